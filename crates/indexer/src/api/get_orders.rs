use {
    crate::api::{AppState, dto},
    axum::{
        extract::{Path, State},
        response::{IntoResponse, Json},
    },
    ledger_client::AuctionId,
    std::sync::Arc,
};

/// Serves the auction's order list cache-first; a miss fetches the order
/// book from the ledger and populates the cache.
pub async fn get_orders_handler(
    State(state): State<Arc<AppState>>,
    Path(auction): Path<AuctionId>,
) -> impl IntoResponse {
    if state.indexer.state().auction(auction).is_none() {
        return crate::api::not_found_reply();
    }
    match state.indexer.orders(auction).await {
        Ok(orders) => {
            let orders: Vec<dto::Order> = orders
                .iter()
                .enumerate()
                .map(|(position, order)| dto::order(position, order))
                .collect();
            Json(orders).into_response()
        }
        Err(err) => {
            tracing::warn!(auction, ?err, "failed to fetch orders");
            crate::api::not_found_reply()
        }
    }
}
