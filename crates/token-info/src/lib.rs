use {
    alloy_primitives::Address,
    futures::{
        FutureExt,
        future::{BoxFuture, Shared},
    },
    ledger_client::LedgerRead,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct TokenInfo {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

#[derive(Clone, Debug, Error)]
#[error("error fetching token info: {0}")]
pub struct Error(String);

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait TokenInfoFetching: Send + Sync {
    /// Retrieves information for a token.
    async fn get_token_info(&self, address: Address) -> Result<TokenInfo, Error>;

    /// Retrieves all token information.
    /// Default implementation calls get_token_info for each token and ignores
    /// errors.
    async fn get_token_infos(&self, addresses: &[Address]) -> HashMap<Address, TokenInfo>;
}

pub struct TokenInfoFetcher {
    pub ledger: Arc<dyn LedgerRead>,
}

impl TokenInfoFetcher {
    async fn fetch_token(&self, address: Address) -> Result<TokenInfo, Error> {
        let metadata = self
            .ledger
            .token_metadata(address)
            .await
            .map_err(|err| Error(err.to_string()))?;
        Ok(TokenInfo {
            name: metadata.name,
            symbol: metadata.symbol,
            decimals: metadata.decimals,
        })
    }
}

#[async_trait::async_trait]
impl TokenInfoFetching for TokenInfoFetcher {
    async fn get_token_info(&self, address: Address) -> Result<TokenInfo, Error> {
        let info = self.fetch_token(address).await;
        if let Err(err) = &info {
            tracing::debug!(?err, token = ?address, "failed to fetch token info");
        }

        info
    }

    async fn get_token_infos(&self, addresses: &[Address]) -> HashMap<Address, TokenInfo> {
        futures::future::join_all(addresses.iter().copied().map(|address| async move {
            let info = self.fetch_token(address).await;
            if let Err(err) = &info {
                tracing::debug!(?err, token = ?address, "failed to fetch token info");
            }

            (address, info.unwrap_or_default())
        }))
        .await
        .into_iter()
        .collect()
    }
}

type SharedTokenInfo = Shared<BoxFuture<'static, Result<TokenInfo, Error>>>;

/// Caches token infos forever since they are immutable on the ledger.
/// Concurrent fetches for the same token share one in-flight future; failed
/// fetches are evicted so the next caller retries.
pub struct CachedTokenInfoFetcher {
    inner: Arc<dyn TokenInfoFetching>,
    cache: Arc<Mutex<HashMap<Address, SharedTokenInfo>>>,
}

impl CachedTokenInfoFetcher {
    pub fn new(inner: Arc<dyn TokenInfoFetching>) -> Self {
        Self {
            inner,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl CachedTokenInfoFetcher {
    async fn fetch_token(&self, address: Address) -> Result<TokenInfo, Error> {
        let fetch = {
            let mut cache = self.cache.lock().unwrap();
            cache
                .entry(address)
                .or_insert({
                    let inner = self.inner.clone();
                    async move { inner.get_token_info(address).await }
                        .boxed()
                        .shared()
                })
                .clone()
        };

        let info = fetch.await;
        if info.is_err() {
            let mut cache = self.cache.lock().unwrap();
            if let Some(Err(_)) = cache.get(&address).and_then(|fetch| fetch.peek()) {
                cache.remove(&address);
            }
        }

        info
    }
}

#[async_trait::async_trait]
impl TokenInfoFetching for CachedTokenInfoFetcher {
    async fn get_token_info(&self, address: Address) -> Result<TokenInfo, Error> {
        self.fetch_token(address).await
    }

    async fn get_token_infos(&self, addresses: &[Address]) -> HashMap<Address, TokenInfo> {
        futures::future::join_all(addresses.iter().copied().map(|address| async move {
            (
                address,
                self.get_token_info(address).await.unwrap_or_default(),
            )
        }))
        .await
        .into_iter()
        .collect()
    }
}
