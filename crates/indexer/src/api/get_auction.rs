use {
    crate::api::{AppState, dto},
    axum::{
        extract::{Path, State},
        response::{IntoResponse, Json},
    },
    ledger_client::AuctionId,
    std::sync::Arc,
};

pub async fn get_auction_handler(
    State(state): State<Arc<AppState>>,
    Path(auction): Path<AuctionId>,
) -> impl IntoResponse {
    let indexed = state.indexer.state();
    match indexed.auction(auction) {
        Some(auction) => Json(dto::auction(&auction, indexed.ledger_time_ms())).into_response(),
        None => crate::api::not_found_reply(),
    }
}
