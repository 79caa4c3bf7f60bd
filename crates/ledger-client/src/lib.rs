//! Trait definitions for the external ledger collaborator.
//!
//! The concrete RPC transport lives outside this workspace. These traits
//! abstract every ledger interaction the indexer needs so that the core can
//! be unit tested with mocks.

pub mod decode;

use {
    alloy_primitives::{Address, B256, U256},
    anyhow::Result,
};

/// Identifier of an auction. Ids are assigned by the ledger contract as a
/// monotonically increasing sequence starting at 1.
pub type AuctionId = u64;

/// Internal integer handle the ledger contract uses in place of a full
/// address inside order records.
pub type UserId = u64;

/// Header data of a ledger block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Block {
    /// Block timestamp in seconds.
    pub time: u64,
    /// Median timestamp of the last blocks in seconds.
    pub median_time: u64,
}

/// The uniform clearing price of a settled auction, expressed as a
/// buy/sell amount ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearingOrder {
    pub clearing_buy_amount: U256,
    pub clearing_sell_amount: U256,
}

/// Metadata reported by a token contract. Any of the calls may fail or be
/// unimplemented on exotic tokens, hence every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

/// Reserves of the liquidity pool pairing the base settlement token with
/// the BTC proxy token, in base units of the respective tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReserves {
    pub base: U256,
    pub btc: U256,
}

/// Abstracts ledger read operations.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait LedgerRead: Send + Sync {
    /// Returns the height of the latest block.
    async fn block_number(&self) -> Result<u64>;

    /// Returns the header of the block at the given height.
    async fn block(&self, number: u64) -> Result<Block>;

    /// Returns the raw auction data record for the given id.
    ///
    /// The buffer follows the packed layout documented in [`decode`]. The
    /// call succeeds even for ids that were never assigned; such records
    /// decode to [`decode::DecodeError::NoAuction`].
    async fn auction_data(&self, auction: AuctionId) -> Result<Vec<u8>>;

    /// Returns the clearing order of a settled auction. Errors while the
    /// ledger has not materialized the clearing data yet.
    async fn clearing_order(&self, auction: AuctionId) -> Result<ClearingOrder>;

    /// Returns the raw order book buffer for the given auction, following
    /// the packed layout documented in [`decode`].
    async fn auction_orders(&self, auction: AuctionId) -> Result<Vec<u8>>;

    /// Resolves an internal user id to the owning address.
    async fn user_address(&self, user: UserId) -> Result<Address>;

    /// Queries `name()`, `symbol()` and `decimals()` of a token contract.
    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata>;

    /// Returns the current reserves of the base/BTC liquidity pool.
    async fn pool_reserves(&self, pool: Address) -> Result<PoolReserves>;

    /// Quotes `amount_in` of `token_in` against the on-ledger router,
    /// returning the obtainable amount of `token_out` in base units.
    async fn router_quote(
        &self,
        router: Address,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<U256>;
}

/// A contract-side revert condition reported by a simulation call. This is
/// a business error carried in the response, not a transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("simulation reported: {0}")]
pub struct SimulationFailure(pub String);

/// Outcome of simulating a transaction before sending it.
pub type SimulationResult = Result<(), SimulationFailure>;

/// Parameters applied to every submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxParameters {
    /// Address the transaction is sent from.
    pub sender: Address,
    /// Optional gas limit override.
    pub gas_limit: Option<u64>,
}

/// Receipt of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
}

/// Abstracts ledger write operations (transaction submission) with
/// simulate-then-send semantics.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait LedgerWrite: Send + Sync {
    /// Simulates settling the given auction. `Ok(Err(_))` means the ledger
    /// contract would revert, `Err(_)` means the simulation itself could
    /// not be performed.
    async fn simulate_settlement(&self, auction: AuctionId) -> Result<SimulationResult>;

    /// Submits the settlement transaction for the given auction.
    async fn submit_settlement(
        &self,
        auction: AuctionId,
        params: &TxParameters,
    ) -> Result<TxReceipt>;

    /// Simulates claiming proceeds for the given orders of a settled
    /// auction in one batch.
    async fn simulate_claim(
        &self,
        auction: AuctionId,
        orders: &[u64],
    ) -> Result<SimulationResult>;

    /// Submits the batch claim transaction. The contract pays each order's
    /// rightful owner directly, so the claim can be sent on behalf of any
    /// order.
    async fn submit_claim(
        &self,
        auction: AuctionId,
        orders: &[u64],
        params: &TxParameters,
    ) -> Result<TxReceipt>;
}
