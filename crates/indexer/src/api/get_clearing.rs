use {
    crate::api::{AppState, dto},
    axum::{
        extract::{Path, State},
        response::{IntoResponse, Json},
    },
    ledger_client::AuctionId,
    std::sync::Arc,
};

pub async fn get_clearing_handler(
    State(state): State<Arc<AppState>>,
    Path(auction): Path<AuctionId>,
) -> impl IntoResponse {
    match state.indexer.state().clearing(auction) {
        Some(clearing) => Json(dto::Clearing::from(clearing)).into_response(),
        None => crate::api::not_found_reply(),
    }
}
