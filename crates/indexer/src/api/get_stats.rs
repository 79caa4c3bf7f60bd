use {
    crate::{
        api::{AppState, dto},
        domain::AuctionStatus,
    },
    alloy_primitives::{Address, U256},
    axum::{extract::State, response::Json},
    number::u256_ext::U256Ext,
    std::{collections::HashMap, sync::Arc},
};

pub async fn get_stats_handler(State(state): State<Arc<AppState>>) -> Json<dto::Stats> {
    Json(compute_stats(&state).await)
}

async fn compute_stats(state: &AppState) -> dto::Stats {
    let indexed = state.indexer.state();
    let now = indexed.ledger_time_ms();
    let auctions = indexed.auctions();

    let mut stats = dto::Stats {
        total_auctions: auctions.len() as u64,
        settled_auctions: 0,
        open_auctions: 0,
        upcoming_auctions: 0,
        failed_auctions: 0,
        total_raised_usd: 0.,
        total_orders_placed: auctions.iter().map(|auction| auction.order_count).sum(),
    };
    for auction in &auctions {
        match auction.status(now) {
            AuctionStatus::Settled => stats.settled_auctions += 1,
            AuctionStatus::Upcoming => stats.upcoming_auctions += 1,
            AuctionStatus::Failed => stats.failed_auctions += 1,
            AuctionStatus::Open | AuctionStatus::CancellationClosed | AuctionStatus::Ended => {
                stats.open_auctions += 1
            }
        }
    }

    // USD prices are queried once per distinct bidding token.
    let mut prices: HashMap<Address, f64> = HashMap::new();
    for auction in auctions.iter().filter(|auction| auction.settled) {
        let raised = match indexed.clearing(auction.id) {
            Some(clearing) if !clearing.clearing_buy_amount.is_zero() => auction
                .auctioned_sell_amount
                .saturating_mul(clearing.clearing_sell_amount)
                / clearing.clearing_buy_amount,
            // No clearing observed yet: approximate with the bid volume.
            _ => auction.total_bid_amount,
        };
        let Some(decimals) = auction.bidding_token_info.decimals else {
            continue;
        };
        let price = match prices.get(&auction.bidding_token) {
            Some(price) => *price,
            None => {
                let price = state.prices.price_usd(auction.bidding_token).await;
                prices.insert(auction.bidding_token, price);
                price
            }
        };
        stats.total_raised_usd += to_human_units(raised, decimals) * price;
    }

    stats
}

fn to_human_units(base_units: U256, decimals: u8) -> f64 {
    base_units.to_f64_lossy() / 10f64.powi(i32::from(decimals))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_base_units_by_token_decimals() {
        assert_eq!(to_human_units(U256::from(5_000u64), 8), 0.00005);
        assert_eq!(to_human_units(U256::from(5_000u64), 0), 5_000.);
        assert_eq!(to_human_units(U256::ZERO, 18), 0.);
    }
}
