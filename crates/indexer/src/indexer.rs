//! The poll cycle reconstructing auction state from the ledger and driving
//! the automated settlement and distribution workflow.
//!
//! One cycle runs at a time: the scheduler awaits full cycle completion
//! before computing the delay to the next tick, so cycles can never
//! overlap. Each phase is independently fault tolerant; a failure for one
//! entity keeps its last known good state and never aborts the rest of the
//! cycle.

use {
    crate::{
        cache::Cache,
        domain::{Auction, AuctionStatus, Clearing, Order},
    },
    alloy_primitives::{Address, U256},
    anyhow::{Context, Result},
    futures::future::join_all,
    ledger_client::{AuctionId, LedgerRead, LedgerWrite, TxParameters, UserId, decode},
    prometheus::{IntCounter, IntGauge},
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        sync::{
            Arc,
            Mutex,
            RwLock,
            atomic::{AtomicBool, AtomicU64, Ordering},
        },
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
    token_info::TokenInfoFetching,
};

/// All indexed state, owned by one [`Indexer`] instance and shared read-only
/// with the API handlers. Locks are only held for the duration of a single
/// map operation, never across suspension points.
pub struct IndexerState {
    auctions: RwLock<BTreeMap<AuctionId, Auction>>,
    clearings: RwLock<HashMap<AuctionId, Clearing>>,
    orders: Cache<AuctionId, Vec<Order>>,
    users: RwLock<HashMap<UserId, Address>>,
    highest_known_id: AtomicU64,
    ledger_time_ms: AtomicU64,
}

impl IndexerState {
    pub fn new(order_cache_ttl: Duration) -> Self {
        Self {
            auctions: RwLock::new(BTreeMap::new()),
            clearings: RwLock::new(HashMap::new()),
            orders: Cache::new(order_cache_ttl),
            users: RwLock::new(HashMap::new()),
            highest_known_id: AtomicU64::new(0),
            ledger_time_ms: AtomicU64::new(0),
        }
    }

    /// Snapshot of all indexed auctions in id order.
    pub fn auctions(&self) -> Vec<Auction> {
        self.auctions.read().unwrap().values().cloned().collect()
    }

    pub fn auction(&self, id: AuctionId) -> Option<Auction> {
        self.auctions.read().unwrap().get(&id).cloned()
    }

    pub fn clearing(&self, id: AuctionId) -> Option<Clearing> {
        self.clearings.read().unwrap().get(&id).copied()
    }

    pub fn cached_orders(&self, id: AuctionId) -> Option<Vec<Order>> {
        self.orders.get(&id)
    }

    /// The authoritative ledger time of the last completed phase 0, in
    /// milliseconds.
    pub fn ledger_time_ms(&self) -> u64 {
        self.ledger_time_ms.load(Ordering::Relaxed)
    }

    pub fn highest_known_id(&self) -> AuctionId {
        self.highest_known_id.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
impl IndexerState {
    pub(crate) fn insert_auction(&self, auction: Auction) {
        self.auctions.write().unwrap().insert(auction.id, auction);
    }

    pub(crate) fn insert_clearing(&self, id: AuctionId, clearing: Clearing) {
        self.clearings.write().unwrap().insert(id, clearing);
    }

    pub(crate) fn set_orders(&self, id: AuctionId, orders: Vec<Order>) {
        self.orders.set(id, orders);
    }

    pub(crate) fn set_ledger_time_ms(&self, time: u64) {
        self.ledger_time_ms.store(time, Ordering::Relaxed);
    }
}

/// Bounded-retry bookkeeping for one kind of automated transaction.
/// Simulation-reported failures count towards the bound; once exhausted or
/// once a transaction was submitted the auction is never attempted again
/// for the lifetime of the process.
struct AttemptTracker {
    failures: HashMap<AuctionId, u32>,
    done: HashSet<AuctionId>,
    max_attempts: u32,
}

impl AttemptTracker {
    fn new(max_attempts: u32) -> Self {
        Self {
            failures: HashMap::new(),
            done: HashSet::new(),
            max_attempts,
        }
    }

    fn is_done(&self, id: AuctionId) -> bool {
        self.done.contains(&id)
    }

    fn mark_done(&mut self, id: AuctionId) {
        self.failures.remove(&id);
        self.done.insert(id);
    }

    /// Records a failed simulation. Returns `true` when the retry bound is
    /// now exhausted, in which case the auction is marked done (given up).
    fn record_failure(&mut self, id: AuctionId) -> bool {
        let failures = self.failures.entry(id).or_insert(0);
        *failures += 1;
        if *failures >= self.max_attempts {
            self.mark_done(id);
            true
        } else {
            false
        }
    }
}

/// Transaction submission half of the indexer, present only when signing
/// parameters are configured.
pub struct Submitter {
    pub write: Arc<dyn LedgerWrite>,
    pub params: TxParameters,
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub poll_interval: Duration,
    /// Upper bound on ids probed per discovery phase.
    pub discovery_lookahead: u64,
    /// Simulation failures tolerated before giving up on an auction.
    pub max_attempts: u32,
}

pub struct Indexer {
    state: Arc<IndexerState>,
    ledger: Arc<dyn LedgerRead>,
    token_infos: Arc<dyn TokenInfoFetching>,
    submitter: Option<Submitter>,
    config: Config,
    settlements: Mutex<AttemptTracker>,
    distributions: Mutex<AttemptTracker>,
    running: AtomicBool,
}

impl Indexer {
    pub fn new(
        state: Arc<IndexerState>,
        ledger: Arc<dyn LedgerRead>,
        token_infos: Arc<dyn TokenInfoFetching>,
        submitter: Option<Submitter>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            ledger,
            token_infos,
            submitter,
            config,
            settlements: Mutex::new(AttemptTracker::new(config.max_attempts)),
            distributions: Mutex::new(AttemptTracker::new(config.max_attempts)),
            running: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> &Arc<IndexerState> {
        &self.state
    }

    /// Starts the poll loop on the tokio runtime. Idempotent: a second call
    /// while already running is a no-op and returns `false`.
    pub fn spawn(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("indexer is already running");
            return false;
        }
        let indexer = self.clone();
        tokio::spawn(async move {
            loop {
                let started = Instant::now();
                indexer.run_cycle().await;
                let interval = indexer.config.poll_interval;
                tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
            }
        });
        true
    }

    /// Runs one full poll cycle. Phases are strictly ordered; all failures
    /// are contained within their phase.
    pub async fn run_cycle(&self) {
        let now = self.reference_time().await;
        self.discover().await;
        self.refresh_unsettled().await;
        self.backfill_clearings().await;
        self.invalidate_stale_order_caches();
        self.aggregate_volumes().await;
        if let Some(submitter) = &self.submitter {
            self.auto_settle(submitter, now).await;
            self.auto_distribute(submitter).await;
        }

        let metrics = Metrics::get();
        metrics.cycles.inc();
        metrics
            .auctions
            .set(i64::try_from(self.state.auctions.read().unwrap().len()).unwrap_or(i64::MAX));
        metrics
            .ledger_time_seconds
            .set(i64::try_from(now / 1_000).unwrap_or(i64::MAX));
    }

    /// Phase 0: reads the ledger's notion of "now". The ledger clock can
    /// diverge from wall clock by minutes, so every status computation of
    /// this cycle uses this timestamp. Falls back to wall clock when the
    /// read fails.
    async fn reference_time(&self) -> u64 {
        let ledger_time = async {
            let number = self.ledger.block_number().await?;
            let block = self.ledger.block(number).await?;
            Ok::<_, anyhow::Error>(block.time.saturating_mul(1_000))
        };
        let now = match ledger_time.await {
            Ok(ms) => ms,
            Err(err) => {
                tracing::warn!(?err, "failed to read ledger time, falling back to wall clock");
                wall_clock_ms()
            }
        };
        self.state.ledger_time_ms.store(now, Ordering::Relaxed);
        now
    }

    /// Phase 1: probes ids past the highest known one until the first id
    /// that does not parse as an auction. That boundary is the frontier of
    /// what exists on the ledger; hitting it on the very first probed id is
    /// the expected steady state.
    async fn discover(&self) {
        let start = self.state.highest_known_id() + 1;
        for id in start..start.saturating_add(self.config.discovery_lookahead) {
            match self.read_auction(id).await {
                Ok(auction) => {
                    tracing::info!(auction = id, "discovered auction");
                    self.state.auctions.write().unwrap().insert(id, auction);
                    self.state.orders.invalidate(&id);
                    self.state.highest_known_id.store(id, Ordering::Relaxed);
                }
                Err(err) => {
                    if id == start {
                        tracing::trace!(auction = id, "no new auctions");
                    } else {
                        tracing::warn!(auction = id, ?err, "discovery stopped on unexpected failure");
                    }
                    break;
                }
            }
        }
    }

    async fn read_auction(&self, id: AuctionId) -> Result<Auction> {
        let raw = self.ledger.auction_data(id).await?;
        let data = decode::decode_auction_data(&raw)?;
        let mut infos = self
            .token_infos
            .get_token_infos(&[data.auctioning_token, data.bidding_token])
            .await;
        let auctioning = infos.remove(&data.auctioning_token).unwrap_or_default();
        let bidding = infos.remove(&data.bidding_token).unwrap_or_default();
        Ok(Auction::new(id, &data, auctioning, bidding))
    }

    /// Phase 2: re-reads every unsettled auction and overwrites the mutable
    /// part of its record. A failed read keeps the previous state until the
    /// next cycle.
    async fn refresh_unsettled(&self) {
        let ids: Vec<AuctionId> = {
            let auctions = self.state.auctions.read().unwrap();
            auctions
                .values()
                .filter(|auction| !auction.settled)
                .map(|auction| auction.id)
                .collect()
        };

        let reads = join_all(ids.into_iter().map(|id| async move {
            let data = async {
                let raw = self.ledger.auction_data(id).await?;
                decode::decode_auction_data(&raw).context("re-parse failed")
            }
            .await;
            (id, data)
        }))
        .await;

        for (id, result) in reads {
            match result {
                Ok(data) => {
                    let mut auctions = self.state.auctions.write().unwrap();
                    if let Some(auction) = auctions.get_mut(&id) {
                        auction.update_from(&data);
                    }
                }
                Err(err) => {
                    tracing::warn!(auction = id, ?err, "refresh failed, keeping last known state");
                }
            }
        }
    }

    /// Phase 3: fetches clearing data for settled auctions that do not have
    /// it yet. Gaps are retried every cycle; once settled the ledger
    /// eventually always answers.
    async fn backfill_clearings(&self) {
        let ids: Vec<AuctionId> = {
            let auctions = self.state.auctions.read().unwrap();
            let clearings = self.state.clearings.read().unwrap();
            auctions
                .values()
                .filter(|auction| auction.settled && !clearings.contains_key(&auction.id))
                .map(|auction| auction.id)
                .collect()
        };

        let reads = join_all(
            ids.into_iter()
                .map(|id| async move { (id, self.ledger.clearing_order(id).await) }),
        )
        .await;

        for (id, result) in reads {
            match result {
                Ok(order) => {
                    self.state
                        .clearings
                        .write()
                        .unwrap()
                        .insert(id, order.into());
                }
                Err(err) => {
                    tracing::debug!(auction = id, ?err, "clearing not available yet");
                }
            }
        }
    }

    /// Phase 4: drops cached order lists that disagree with the ledger's
    /// order count, or that belong to a settled auction and still contain
    /// an order that is neither cancelled nor claimed (its flags may have
    /// changed on-ledger).
    fn invalidate_stale_order_caches(&self) {
        let auctions: Vec<(AuctionId, u64, bool)> = {
            self.state
                .auctions
                .read()
                .unwrap()
                .values()
                .filter(|auction| auction.order_count > 0)
                .map(|auction| (auction.id, auction.order_count, auction.settled))
                .collect()
        };

        for (id, order_count, settled) in auctions {
            let Some(cached) = self.state.orders.get(&id) else {
                continue;
            };
            let stale = cached.len() as u64 != order_count
                || (settled
                    && cached
                        .iter()
                        .any(|order| !order.cancelled && !order.claimed));
            if stale {
                self.state.orders.invalidate(&id);
            }
        }
    }

    /// Phase 5: recomputes the total bid volume of every auction with
    /// orders, except settled auctions whose non-zero total is already
    /// frozen (no more orders can arrive there).
    async fn aggregate_volumes(&self) {
        let ids: Vec<AuctionId> = {
            let auctions = self.state.auctions.read().unwrap();
            auctions
                .values()
                .filter(|auction| {
                    auction.order_count > 0
                        && !(auction.settled && !auction.total_bid_amount.is_zero())
                })
                .map(|auction| auction.id)
                .collect()
        };

        let fetches = join_all(
            ids.into_iter()
                .map(|id| async move { (id, self.orders(id).await) }),
        )
        .await;

        for (id, result) in fetches {
            match result {
                Ok(orders) => {
                    let total = orders
                        .iter()
                        .filter(|order| !order.cancelled)
                        .fold(U256::ZERO, |total, order| {
                            total.saturating_add(order.sell_amount)
                        });
                    let mut auctions = self.state.auctions.write().unwrap();
                    if let Some(auction) = auctions.get_mut(&id) {
                        auction.total_bid_amount = total;
                    }
                }
                Err(err) => {
                    tracing::warn!(auction = id, ?err, "volume fetch failed, keeping last value");
                }
            }
        }
    }

    /// Phase 6: settles auctions that have ended. At most one successful
    /// submission per auction; simulation-reported reverts are retried up
    /// to the configured bound and then given up on.
    async fn auto_settle(&self, submitter: &Submitter, now_ms: u64) {
        let candidates: Vec<AuctionId> = {
            let auctions = self.state.auctions.read().unwrap();
            let settlements = self.settlements.lock().unwrap();
            auctions
                .values()
                .filter(|auction| {
                    !auction.settled
                        && auction.status(now_ms) == AuctionStatus::Ended
                        && !settlements.is_done(auction.id)
                })
                .map(|auction| auction.id)
                .collect()
        };

        for id in candidates {
            match submitter.write.simulate_settlement(id).await {
                Ok(Ok(())) => {
                    // Mark before submitting: a settlement must never be
                    // sent twice, even if the submission response is lost.
                    self.settlements.lock().unwrap().mark_done(id);
                    match submitter.write.submit_settlement(id, &submitter.params).await {
                        Ok(receipt) => {
                            Metrics::get().settlements_submitted.inc();
                            tracing::info!(
                                auction = id,
                                tx = ?receipt.transaction_hash,
                                "submitted settlement"
                            );
                        }
                        Err(err) => {
                            tracing::error!(auction = id, ?err, "settlement submission failed");
                        }
                    }
                }
                Ok(Err(failure)) => {
                    let gave_up = self.settlements.lock().unwrap().record_failure(id);
                    if gave_up {
                        tracing::warn!(auction = id, %failure, "giving up on settling auction");
                    } else {
                        tracing::debug!(auction = id, %failure, "settlement not possible yet");
                    }
                }
                Err(err) => {
                    // Transport problem, not a contract revert: does not
                    // count towards the retry bound.
                    tracing::warn!(auction = id, ?err, "settlement simulation unavailable");
                }
            }
        }
    }

    /// Phase 7: claims proceeds for all unclaimed, non-cancelled orders of
    /// settled auctions in one batch per auction. The contract pays each
    /// order's owner directly, so this is purely an idempotence concern.
    async fn auto_distribute(&self, submitter: &Submitter) {
        let candidates: Vec<AuctionId> = {
            let auctions = self.state.auctions.read().unwrap();
            let distributions = self.distributions.lock().unwrap();
            auctions
                .values()
                .filter(|auction| auction.settled && !distributions.is_done(auction.id))
                .map(|auction| auction.id)
                .collect()
        };

        for id in candidates {
            let orders = match self.orders(id).await {
                Ok(orders) => orders,
                Err(err) => {
                    tracing::warn!(auction = id, ?err, "cannot fetch orders for distribution");
                    continue;
                }
            };
            let pending: Vec<u64> = orders
                .iter()
                .enumerate()
                .filter(|(_, order)| !order.cancelled && !order.claimed)
                .map(|(position, _)| position as u64)
                .collect();
            if pending.is_empty() {
                self.distributions.lock().unwrap().mark_done(id);
                continue;
            }

            match submitter.write.simulate_claim(id, &pending).await {
                Ok(Ok(())) => {
                    self.distributions.lock().unwrap().mark_done(id);
                    match submitter
                        .write
                        .submit_claim(id, &pending, &submitter.params)
                        .await
                    {
                        Ok(receipt) => {
                            Metrics::get().claims_submitted.inc();
                            tracing::info!(
                                auction = id,
                                orders = pending.len(),
                                tx = ?receipt.transaction_hash,
                                "submitted batch claim"
                            );
                        }
                        Err(err) => {
                            tracing::error!(auction = id, ?err, "claim submission failed");
                        }
                    }
                    // Subsequent reads must observe the updated claimed
                    // flags.
                    self.state.orders.invalidate(&id);
                }
                Ok(Err(failure)) => {
                    let gave_up = self.distributions.lock().unwrap().record_failure(id);
                    if gave_up {
                        tracing::warn!(auction = id, %failure, "giving up on distributing auction");
                    } else {
                        tracing::debug!(auction = id, %failure, "distribution not possible yet");
                    }
                }
                Err(err) => {
                    tracing::warn!(auction = id, ?err, "claim simulation unavailable");
                }
            }
        }
    }

    /// Returns the auction's orders, cache first. A miss fetches the order
    /// book from the ledger, resolves owner addresses and populates the
    /// cache. Also used by the read API.
    pub async fn orders(&self, id: AuctionId) -> Result<Vec<Order>> {
        if let Some(orders) = self.state.orders.get(&id) {
            return Ok(orders);
        }

        let raw = self.ledger.auction_orders(id).await?;
        let raw_orders = decode::decode_order_book(&raw)?;
        let owners = self.resolve_owners(&raw_orders).await;
        let orders: Vec<Order> = raw_orders
            .into_iter()
            .map(|order| Order {
                buy_amount: order.buy_amount,
                sell_amount: order.sell_amount,
                user_id: order.user_id,
                owner: owners.get(&order.user_id).copied(),
                cancelled: order.cancelled,
                claimed: order.claimed,
            })
            .collect();
        self.state.orders.set(id, orders.clone());
        Ok(orders)
    }

    /// Resolves user ids to addresses, remembering successful lookups
    /// forever (the mapping is immutable on the ledger). Failed lookups
    /// leave the owner unresolved rather than failing the order fetch.
    async fn resolve_owners(&self, orders: &[decode::RawOrder]) -> HashMap<UserId, Address> {
        let mut resolved: HashMap<UserId, Address> = {
            let users = self.state.users.read().unwrap();
            orders
                .iter()
                .filter_map(|order| {
                    users
                        .get(&order.user_id)
                        .map(|address| (order.user_id, *address))
                })
                .collect()
        };

        let missing: HashSet<UserId> = orders
            .iter()
            .map(|order| order.user_id)
            .filter(|user| !resolved.contains_key(user))
            .collect();

        let lookups = join_all(
            missing
                .into_iter()
                .map(|user| async move { (user, self.ledger.user_address(user).await) }),
        )
        .await;

        for (user, result) in lookups {
            match result {
                Ok(address) => {
                    self.state.users.write().unwrap().insert(user, address);
                    resolved.insert(user, address);
                }
                Err(err) => {
                    tracing::debug!(user, ?err, "failed to resolve user address");
                }
            }
        }

        resolved
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "indexer")]
struct Metrics {
    /// Completed poll cycles.
    cycles: IntCounter,

    /// Number of indexed auctions.
    auctions: IntGauge,

    /// Ledger time observed by the last cycle.
    ledger_time_seconds: IntGauge,

    /// Settlement transactions submitted.
    settlements_submitted: IntCounter,

    /// Batch claim transactions submitted.
    claims_submitted: IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        alloy_primitives::B256,
        anyhow::anyhow,
        ledger_client::{
            Block,
            ClearingOrder,
            MockLedgerRead,
            MockLedgerWrite,
            SimulationFailure,
            decode::AUCTION_DATA_LEN,
        },
        mockall::predicate::eq,
        token_info::{MockTokenInfoFetching, TokenInfo},
    };

    const WORD: usize = 32;

    fn record(settled: bool, order_count: u64) -> Vec<u8> {
        let mut raw = vec![0u8; AUCTION_DATA_LEN];
        raw[31] = 0xaa; // auctioning token, non-zero
        raw[63] = 0xbb; // bidding token
        set_word(&mut raw, 2, 1_000); // order placement start
        set_word(&mut raw, 3, 2_000); // cancellation end
        set_word(&mut raw, 4, 3_000); // auction end
        set_word(&mut raw, 9, order_count);
        set_word(&mut raw, 10, 123); // interim sum of bids
        raw[352] = settled as u8;
        raw
    }

    fn no_auction_record() -> Vec<u8> {
        vec![0u8; AUCTION_DATA_LEN]
    }

    fn set_word(raw: &mut [u8], index: usize, value: u64) {
        raw[index * WORD..(index + 1) * WORD]
            .copy_from_slice(&U256::from(value).to_be_bytes::<32>());
    }

    fn order_book(orders: &[(u64, u64, u64, bool, bool)]) -> Vec<u8> {
        let mut raw = U256::from(orders.len() as u64).to_be_bytes::<32>().to_vec();
        for (buy, sell, user, cancelled, claimed) in orders {
            raw.extend_from_slice(&U256::from(*buy).to_be_bytes::<32>());
            raw.extend_from_slice(&U256::from(*sell).to_be_bytes::<32>());
            raw.extend_from_slice(&U256::from(*user).to_be_bytes::<32>());
            raw.push(*cancelled as u8);
            raw.push(*claimed as u8);
        }
        raw
    }

    fn order(sell: u64, cancelled: bool, claimed: bool) -> Order {
        Order {
            buy_amount: U256::from(1u64),
            sell_amount: U256::from(sell),
            user_id: 7,
            owner: None,
            cancelled,
            claimed,
        }
    }

    fn auction(id: AuctionId, settled: bool, order_count: u64) -> Auction {
        let data = decode::decode_auction_data(&record(settled, order_count)).unwrap();
        Auction::new(id, &data, TokenInfo::default(), TokenInfo::default())
    }

    fn receipt() -> ledger_client::TxReceipt {
        ledger_client::TxReceipt {
            transaction_hash: B256::ZERO,
            block_number: Some(1),
        }
    }

    fn params() -> TxParameters {
        TxParameters {
            sender: Address::with_last_byte(0xfe),
            gas_limit: None,
        }
    }

    fn indexer(ledger: MockLedgerRead, write: Option<MockLedgerWrite>) -> Arc<Indexer> {
        let mut token_infos = MockTokenInfoFetching::new();
        token_infos
            .expect_get_token_infos()
            .returning(|_| HashMap::new());
        Indexer::new(
            Arc::new(IndexerState::new(Duration::from_secs(60))),
            Arc::new(ledger),
            Arc::new(token_infos),
            write.map(|write| Submitter {
                write: Arc::new(write),
                params: params(),
            }),
            Config {
                poll_interval: Duration::from_millis(10),
                discovery_lookahead: 10,
                max_attempts: 10,
            },
        )
    }

    #[tokio::test]
    async fn discovery_advances_to_the_first_missing_id() {
        let mut ledger = MockLedgerRead::new();
        ledger
            .expect_auction_data()
            .with(eq(1))
            .times(1)
            .returning(|_| Ok(record(false, 0)));
        ledger
            .expect_auction_data()
            .with(eq(2))
            .times(1)
            .returning(|_| Ok(record(false, 0)));
        // The frontier is probed again on every cycle.
        ledger
            .expect_auction_data()
            .with(eq(3))
            .times(2)
            .returning(|_| Ok(no_auction_record()));

        let indexer = indexer(ledger, None);
        indexer.discover().await;
        indexer.discover().await;

        assert_eq!(indexer.state.highest_known_id(), 2);
        assert_eq!(indexer.state.auctions().len(), 2);
        assert!(indexer.state.auction(2).is_some());
    }

    #[tokio::test]
    async fn discovery_stops_on_read_failure() {
        let mut ledger = MockLedgerRead::new();
        ledger
            .expect_auction_data()
            .with(eq(1))
            .times(1)
            .returning(|_| Ok(record(false, 0)));
        ledger
            .expect_auction_data()
            .with(eq(2))
            .times(1)
            .returning(|_| Err(anyhow!("rpc down")));

        let indexer = indexer(ledger, None);
        indexer.discover().await;

        assert_eq!(indexer.state.highest_known_id(), 1);
        assert_eq!(indexer.state.auctions().len(), 1);
    }

    #[tokio::test]
    async fn refresh_updates_unsettled_and_skips_settled() {
        let mut ledger = MockLedgerRead::new();
        // Only the unsettled auction 2 is re-read.
        ledger
            .expect_auction_data()
            .with(eq(2))
            .times(1)
            .returning(|_| Ok(record(true, 5)));

        let indexer = indexer(ledger, None);
        {
            let mut auctions = indexer.state.auctions.write().unwrap();
            auctions.insert(1, auction(1, true, 3));
            auctions.insert(2, auction(2, false, 0));
        }

        indexer.refresh_unsettled().await;

        let refreshed = indexer.state.auction(2).unwrap();
        assert!(refreshed.settled);
        assert_eq!(refreshed.order_count, 5);
    }

    #[tokio::test]
    async fn refresh_failure_keeps_last_known_state() {
        let mut ledger = MockLedgerRead::new();
        ledger
            .expect_auction_data()
            .with(eq(1))
            .times(1)
            .returning(|_| Err(anyhow!("rpc down")));

        let indexer = indexer(ledger, None);
        indexer
            .state
            .auctions
            .write()
            .unwrap()
            .insert(1, auction(1, false, 2));

        indexer.refresh_unsettled().await;

        let kept = indexer.state.auction(1).unwrap();
        assert!(!kept.settled);
        assert_eq!(kept.order_count, 2);
    }

    #[tokio::test]
    async fn clearing_backfill_retries_until_available() {
        let mut ledger = MockLedgerRead::new();
        let mut sequence = mockall::Sequence::new();
        ledger
            .expect_clearing_order()
            .with(eq(1))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Err(anyhow!("not materialized")));
        ledger
            .expect_clearing_order()
            .with(eq(1))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| {
                Ok(ClearingOrder {
                    clearing_buy_amount: U256::from(100u64),
                    clearing_sell_amount: U256::from(500u64),
                })
            });

        let indexer = indexer(ledger, None);
        indexer
            .state
            .auctions
            .write()
            .unwrap()
            .insert(1, auction(1, true, 0));

        indexer.backfill_clearings().await;
        assert!(indexer.state.clearing(1).is_none());

        indexer.backfill_clearings().await;
        let clearing = indexer.state.clearing(1).unwrap();
        assert_eq!(clearing.clearing_sell_amount, U256::from(500u64));

        // Once present, the ledger is not asked again.
        indexer.backfill_clearings().await;
    }

    #[tokio::test]
    async fn stale_order_caches_are_invalidated() {
        let indexer = indexer(MockLedgerRead::new(), None);
        {
            let mut auctions = indexer.state.auctions.write().unwrap();
            // Count mismatch: cached 1 order, ledger says 2.
            auctions.insert(1, auction(1, false, 2));
            // Settled with a still-pending order.
            auctions.insert(2, auction(2, true, 1));
            // Consistent and unsettled: stays cached.
            auctions.insert(3, auction(3, false, 1));
        }
        indexer.state.orders.set(1, vec![order(10, false, false)]);
        indexer.state.orders.set(2, vec![order(10, false, false)]);
        indexer.state.orders.set(3, vec![order(10, false, false)]);

        indexer.invalidate_stale_order_caches();

        assert!(indexer.state.cached_orders(1).is_none());
        assert!(indexer.state.cached_orders(2).is_none());
        assert!(indexer.state.cached_orders(3).is_some());
    }

    #[tokio::test]
    async fn volume_aggregation_ignores_cancelled_orders() {
        let indexer = indexer(MockLedgerRead::new(), None);
        {
            let mut auctions = indexer.state.auctions.write().unwrap();
            auctions.insert(1, auction(1, false, 3));
            // Settled with a non-zero total: frozen, orders never fetched
            // (the mock would panic on an unexpected call).
            auctions.insert(2, auction(2, true, 3));
        }
        indexer.state.orders.set(
            1,
            vec![
                order(100, false, false),
                order(200, true, false),
                order(300, false, true),
            ],
        );

        indexer.aggregate_volumes().await;

        let total = indexer.state.auction(1).unwrap().total_bid_amount;
        assert_eq!(total, U256::from(400u64));
        // The frozen auction keeps its interim sum.
        let frozen = indexer.state.auction(2).unwrap().total_bid_amount;
        assert_eq!(frozen, U256::from(123u64));
    }

    #[tokio::test]
    async fn volume_fetch_failure_keeps_last_value() {
        let mut ledger = MockLedgerRead::new();
        ledger
            .expect_auction_orders()
            .with(eq(1))
            .times(1)
            .returning(|_| Err(anyhow!("rpc down")));

        let indexer = indexer(ledger, None);
        indexer
            .state
            .auctions
            .write()
            .unwrap()
            .insert(1, auction(1, false, 1));

        indexer.aggregate_volumes().await;

        // Seeded from the ledger's interim sum and not clobbered.
        let total = indexer.state.auction(1).unwrap().total_bid_amount;
        assert_eq!(total, U256::from(123u64));
    }

    #[tokio::test]
    async fn orders_resolve_owners_and_are_cached() {
        let mut ledger = MockLedgerRead::new();
        ledger
            .expect_auction_orders()
            .with(eq(1))
            .times(1)
            .returning(|_| Ok(order_book(&[(1, 10, 7, false, false), (2, 20, 8, true, false)])));
        ledger
            .expect_user_address()
            .with(eq(7))
            .times(1)
            .returning(|_| Ok(Address::with_last_byte(0x77)));
        ledger
            .expect_user_address()
            .with(eq(8))
            .times(1)
            .returning(|_| Err(anyhow!("unknown user")));

        let indexer = indexer(ledger, None);

        let orders = indexer.orders(1).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].owner, Some(Address::with_last_byte(0x77)));
        assert_eq!(orders[1].owner, None);
        assert!(orders[1].cancelled);

        // Second call is served from the cache: all `times(1)` expectations
        // above would fail otherwise.
        let cached = indexer.orders(1).await.unwrap();
        assert_eq!(cached, orders);
    }

    #[tokio::test]
    async fn settles_an_ended_auction_exactly_once() {
        let mut write = MockLedgerWrite::new();
        write
            .expect_simulate_settlement()
            .with(eq(1))
            .times(1)
            .returning(|_| Ok(Ok(())));
        write
            .expect_submit_settlement()
            .times(1)
            .returning(|_, _| Ok(receipt()));

        let indexer = indexer(MockLedgerRead::new(), Some(write));
        indexer
            .state
            .auctions
            .write()
            .unwrap()
            .insert(1, auction(1, false, 0));
        let submitter = indexer.submitter.as_ref().unwrap();

        // Past the auction end of 3_000s.
        let now_ms = 10_000_000;
        indexer.auto_settle(submitter, now_ms).await;
        // No further simulation or submission on subsequent cycles.
        indexer.auto_settle(submitter, now_ms).await;
    }

    #[tokio::test]
    async fn gives_up_settling_after_bounded_simulation_failures() {
        let mut write = MockLedgerWrite::new();
        write
            .expect_simulate_settlement()
            .with(eq(1))
            .times(10)
            .returning(|_| Ok(Err(SimulationFailure("would revert".into()))));
        write.expect_submit_settlement().never();

        let indexer = indexer(MockLedgerRead::new(), Some(write));
        indexer
            .state
            .auctions
            .write()
            .unwrap()
            .insert(1, auction(1, false, 0));
        let submitter = indexer.submitter.as_ref().unwrap();

        // Two extra cycles past the bound must not simulate again.
        for _ in 0..12 {
            indexer.auto_settle(submitter, 10_000_000).await;
        }
    }

    #[tokio::test]
    async fn transport_errors_do_not_count_towards_the_retry_bound() {
        let mut write = MockLedgerWrite::new();
        let mut sequence = mockall::Sequence::new();
        write
            .expect_simulate_settlement()
            .with(eq(1))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Err(anyhow!("node unreachable")));
        write
            .expect_simulate_settlement()
            .with(eq(1))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(Err(SimulationFailure("would revert".into()))));
        write.expect_submit_settlement().never();

        let mut indexer = indexer(MockLedgerRead::new(), Some(write));
        // A single simulation failure exhausts the bound; the transport
        // error before it must not.
        Arc::get_mut(&mut indexer).unwrap().config.max_attempts = 1;
        *Arc::get_mut(&mut indexer).unwrap().settlements.get_mut().unwrap() =
            AttemptTracker::new(1);
        indexer
            .state
            .auctions
            .write()
            .unwrap()
            .insert(1, auction(1, false, 0));
        let submitter = indexer.submitter.as_ref().unwrap();

        indexer.auto_settle(submitter, 10_000_000).await;
        indexer.auto_settle(submitter, 10_000_000).await;
        // Given up now.
        indexer.auto_settle(submitter, 10_000_000).await;
    }

    #[tokio::test]
    async fn distribution_with_nothing_pending_is_marked_done() {
        let indexer = indexer(MockLedgerRead::new(), Some(MockLedgerWrite::new()));
        indexer
            .state
            .auctions
            .write()
            .unwrap()
            .insert(1, auction(1, true, 2));
        indexer
            .state
            .orders
            .set(1, vec![order(10, false, true), order(20, true, false)]);
        let submitter = indexer.submitter.as_ref().unwrap();

        indexer.auto_distribute(submitter).await;
        assert!(indexer.distributions.lock().unwrap().is_done(1));

        // Done auctions are not even candidates any more.
        indexer.auto_distribute(submitter).await;
    }

    #[tokio::test]
    async fn distributes_pending_orders_in_one_batch() {
        let mut write = MockLedgerWrite::new();
        write
            .expect_simulate_claim()
            .withf(|auction, orders| *auction == 1 && orders == [1, 3])
            .times(1)
            .returning(|_, _| Ok(Ok(())));
        write
            .expect_submit_claim()
            .withf(|auction, orders, _| *auction == 1 && orders == [1, 3])
            .times(1)
            .returning(|_, _, _| Ok(receipt()));

        let indexer = indexer(MockLedgerRead::new(), Some(write));
        indexer
            .state
            .auctions
            .write()
            .unwrap()
            .insert(1, auction(1, true, 4));
        indexer.state.orders.set(
            1,
            vec![
                order(10, false, true),  // already claimed
                order(20, false, false), // pending
                order(30, true, false),  // cancelled
                order(40, false, false), // pending
            ],
        );
        let submitter = indexer.submitter.as_ref().unwrap();

        indexer.auto_distribute(submitter).await;

        assert!(indexer.distributions.lock().unwrap().is_done(1));
        // The cached list is stale after the claim.
        assert!(indexer.state.cached_orders(1).is_none());
    }

    #[tokio::test]
    async fn reference_time_uses_the_ledger_clock() {
        let mut ledger = MockLedgerRead::new();
        ledger.expect_block_number().returning(|| Ok(800_000));
        ledger.expect_block().with(eq(800_000)).returning(|_| {
            Ok(Block {
                time: 1_234,
                median_time: 1_200,
            })
        });

        let indexer = indexer(ledger, None);
        let now = indexer.reference_time().await;

        assert_eq!(now, 1_234_000);
        assert_eq!(indexer.state.ledger_time_ms(), 1_234_000);
    }

    #[tokio::test]
    async fn reference_time_falls_back_to_wall_clock() {
        let mut ledger = MockLedgerRead::new();
        ledger
            .expect_block_number()
            .returning(|| Err(anyhow!("rpc down")));

        let indexer = indexer(ledger, None);
        let now = indexer.reference_time().await;

        // Wall clock is well past 2020 in milliseconds.
        assert!(now > 1_577_836_800_000);
        assert_eq!(indexer.state.ledger_time_ms(), now);
    }

    #[tokio::test]
    async fn spawn_is_idempotent() {
        let mut ledger = MockLedgerRead::new();
        // Permissive expectations: background cycles keep running.
        ledger
            .expect_block_number()
            .returning(|| Err(anyhow!("rpc down")));
        ledger
            .expect_auction_data()
            .returning(|_| Ok(no_auction_record()));

        let indexer = indexer(ledger, None);
        assert!(indexer.spawn());
        assert!(!indexer.spawn());
    }
}
