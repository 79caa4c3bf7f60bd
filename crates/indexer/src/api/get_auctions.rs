use {
    crate::api::{AppState, dto},
    axum::{
        extract::State,
        response::{IntoResponse, Json},
    },
    std::sync::Arc,
};

pub async fn get_auctions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let indexed = state.indexer.state();
    let now = indexed.ledger_time_ms();
    let auctions: Vec<dto::Auction> = indexed
        .auctions()
        .iter()
        .map(|auction| dto::auction(auction, now))
        .collect();
    Json(auctions)
}
