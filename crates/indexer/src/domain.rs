//! Domain model of the indexed auction state.

use {
    alloy_primitives::{Address, U256},
    ledger_client::{AuctionId, ClearingOrder, UserId, decode::AuctionData},
    token_info::TokenInfo,
};

/// A cancel window shorter than this is considered degenerate. Some creation
/// paths produce zero- or near-zero-width windows which would otherwise
/// misleadingly flag cancellability.
pub const MIN_CANCEL_WINDOW_MS: u64 = 60_000;

/// Lifecycle status of an auction, derived from ledger time, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Upcoming,
    Open,
    CancellationClosed,
    Ended,
    Settled,
    Failed,
}

/// Derives the auction status from its deadlines and the authoritative
/// ledger time. Pure: depends on nothing but its inputs.
pub fn derive_status(
    cancellation_end: u64,
    auction_end: u64,
    settled: bool,
    ledger_time_ms: u64,
    order_placement_start: u64,
) -> AuctionStatus {
    if settled {
        AuctionStatus::Settled
    } else if ledger_time_ms < order_placement_start {
        AuctionStatus::Upcoming
    } else if ledger_time_ms < cancellation_end {
        AuctionStatus::Open
    } else if ledger_time_ms < auction_end {
        AuctionStatus::CancellationClosed
    } else {
        AuctionStatus::Ended
    }
}

/// Whether the auction has a usable cancel window. Filters out degenerate
/// windows narrower than [`MIN_CANCEL_WINDOW_MS`].
pub fn has_cancel_window(cancellation_end: u64, auction_end: u64) -> bool {
    cancellation_end > 0
        && cancellation_end < auction_end
        && auction_end - cancellation_end >= MIN_CANCEL_WINDOW_MS
}

/// An indexed auction. All timestamps are in milliseconds of ledger time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auction {
    pub id: AuctionId,
    pub auctioning_token: Address,
    pub bidding_token: Address,
    pub auctioning_token_info: TokenInfo,
    pub bidding_token_info: TokenInfo,
    pub order_placement_start: u64,
    pub cancellation_end: u64,
    pub auction_end: u64,
    pub auctioned_sell_amount: U256,
    pub min_buy_amount: U256,
    pub min_bid_per_order: U256,
    pub min_funding_threshold: U256,
    pub atomic_closure: bool,
    pub auctioneer: Option<Address>,
    pub order_count: u64,
    pub settled: bool,
    pub funding_not_reached: bool,
    /// Sum of sell amounts over non-cancelled orders. Seeded with the
    /// ledger's interim sum on discovery, recomputed from the order book
    /// every poll while the auction is live.
    pub total_bid_amount: U256,
    pub has_cancel_window: bool,
}

impl Auction {
    pub fn new(
        id: AuctionId,
        data: &AuctionData,
        auctioning_token_info: TokenInfo,
        bidding_token_info: TokenInfo,
    ) -> Self {
        let cancellation_end = data.cancellation_end.saturating_mul(1_000);
        let auction_end = data.auction_end.saturating_mul(1_000);
        Self {
            id,
            auctioning_token: data.auctioning_token,
            bidding_token: data.bidding_token,
            auctioning_token_info,
            bidding_token_info,
            order_placement_start: data.order_placement_start.saturating_mul(1_000),
            cancellation_end,
            auction_end,
            auctioned_sell_amount: data.auctioned_sell_amount,
            min_buy_amount: data.min_buy_amount,
            min_bid_per_order: data.min_bid_per_order,
            min_funding_threshold: data.min_funding_threshold,
            atomic_closure: data.atomic_closure,
            auctioneer: data.auctioneer,
            order_count: data.order_count,
            settled: data.settled,
            funding_not_reached: data.funding_not_reached,
            total_bid_amount: data.interim_sum_bid_amount,
            has_cancel_window: has_cancel_window(cancellation_end, auction_end),
        }
    }

    /// Applies a fresh ledger read to the mutable part of the record. The
    /// immutable-at-creation fields and the locally aggregated bid volume
    /// are left untouched.
    pub fn update_from(&mut self, data: &AuctionData) {
        self.order_count = data.order_count;
        self.settled = data.settled;
        self.funding_not_reached = data.funding_not_reached;
        if data.auctioneer.is_some() {
            self.auctioneer = data.auctioneer;
        }
    }

    /// The current status of this auction at the given ledger time.
    pub fn status(&self, ledger_time_ms: u64) -> AuctionStatus {
        if self.funding_not_reached {
            return AuctionStatus::Failed;
        }
        derive_status(
            self.cancellation_end,
            self.auction_end,
            self.settled,
            ledger_time_ms,
            self.order_placement_start,
        )
    }
}

/// An order of an auction, identified by its dense 0-based position in the
/// ledger's order storage. Only the cancelled/claimed flags ever change,
/// and only through on-ledger transactions which the indexer observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub buy_amount: U256,
    pub sell_amount: U256,
    pub user_id: UserId,
    /// Resolved owner address; `None` while the user id lookup has not
    /// succeeded yet.
    pub owner: Option<Address>,
    pub cancelled: bool,
    pub claimed: bool,
}

/// The uniform clearing price of a settled auction. Immutable once observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clearing {
    pub clearing_buy_amount: U256,
    pub clearing_sell_amount: U256,
}

impl From<ClearingOrder> for Clearing {
    fn from(order: ClearingOrder) -> Self {
        Self {
            clearing_buy_amount: order.clearing_buy_amount,
            clearing_sell_amount: order.clearing_sell_amount,
        }
    }
}
