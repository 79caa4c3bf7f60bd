//! Wire representations of the indexed entities. Amounts serialize as
//! decimal strings since they routinely exceed what JSON numbers can carry.

use {
    crate::domain::{self, AuctionStatus},
    alloy_primitives::{Address, U256},
    ledger_client::UserId,
    serde::Serialize,
    token_info::TokenInfo,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Auction {
    pub id: u64,
    pub auctioning_token: Address,
    pub bidding_token: Address,
    pub auctioning_token_info: TokenInfo,
    pub bidding_token_info: TokenInfo,
    pub order_placement_start: u64,
    pub cancellation_end: u64,
    pub auction_end: u64,
    #[serde(with = "serde_with::As::<number::serialization::U256>")]
    pub auctioned_sell_amount: U256,
    #[serde(with = "serde_with::As::<number::serialization::U256>")]
    pub min_buy_amount: U256,
    #[serde(with = "serde_with::As::<number::serialization::U256>")]
    pub min_bid_per_order: U256,
    #[serde(with = "serde_with::As::<number::serialization::U256>")]
    pub min_funding_threshold: U256,
    #[serde(with = "serde_with::As::<number::serialization::U256>")]
    pub total_bid_amount: U256,
    pub order_count: u64,
    pub atomic_closure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auctioneer: Option<Address>,
    pub settled: bool,
    pub status: AuctionStatus,
    pub has_cancel_window: bool,
}

pub fn auction(auction: &domain::Auction, ledger_time_ms: u64) -> Auction {
    Auction {
        id: auction.id,
        auctioning_token: auction.auctioning_token,
        bidding_token: auction.bidding_token,
        auctioning_token_info: auction.auctioning_token_info.clone(),
        bidding_token_info: auction.bidding_token_info.clone(),
        order_placement_start: auction.order_placement_start,
        cancellation_end: auction.cancellation_end,
        auction_end: auction.auction_end,
        auctioned_sell_amount: auction.auctioned_sell_amount,
        min_buy_amount: auction.min_buy_amount,
        min_bid_per_order: auction.min_bid_per_order,
        min_funding_threshold: auction.min_funding_threshold,
        total_bid_amount: auction.total_bid_amount,
        order_count: auction.order_count,
        atomic_closure: auction.atomic_closure,
        auctioneer: auction.auctioneer,
        settled: auction.settled,
        status: auction.status(ledger_time_ms),
        has_cancel_window: auction.has_cancel_window,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Dense 0-based position in the ledger's order storage.
    pub order_id: u64,
    #[serde(with = "serde_with::As::<number::serialization::U256>")]
    pub buy_amount: U256,
    #[serde(with = "serde_with::As::<number::serialization::U256>")]
    pub sell_amount: U256,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
    pub cancelled: bool,
    pub claimed: bool,
}

pub fn order(position: usize, order: &domain::Order) -> Order {
    Order {
        order_id: position as u64,
        buy_amount: order.buy_amount,
        sell_amount: order.sell_amount,
        user_id: order.user_id,
        owner: order.owner,
        cancelled: order.cancelled,
        claimed: order.claimed,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Clearing {
    #[serde(with = "serde_with::As::<number::serialization::U256>")]
    pub clearing_buy_amount: U256,
    #[serde(with = "serde_with::As::<number::serialization::U256>")]
    pub clearing_sell_amount: U256,
}

impl From<domain::Clearing> for Clearing {
    fn from(clearing: domain::Clearing) -> Self {
        Self {
            clearing_buy_amount: clearing.clearing_buy_amount,
            clearing_sell_amount: clearing.clearing_sell_amount,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_auctions: u64,
    pub settled_auctions: u64,
    pub open_auctions: u64,
    pub upcoming_auctions: u64,
    pub failed_auctions: u64,
    pub total_raised_usd: f64,
    pub total_orders_placed: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTime {
    pub block_time_ms: u64,
}
