//! Generic time-bounded key/value store with manual invalidation.
//!
//! This is a correctness aid that avoids redundant expensive
//! reconstructions, not a bounded-memory cache: entries expire after a
//! fixed TTL (evaluated lazily on `get`) but key growth is unbounded,
//! which is fine at this system's scale.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::Mutex,
    time::{Duration, Instant},
};

pub struct Cache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

impl<K: Eq + Hash, V: Clone> Cache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached value if it has not expired. Expired entries are
    /// removed on access.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: K, value: V) {
        self.entries.lock().unwrap().insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Removes the entry immediately, regardless of its TTL.
    pub fn invalidate(&self, key: &K) {
        self.entries.lock().unwrap().remove(key);
    }
}
