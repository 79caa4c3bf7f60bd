use {
    crate::api::{AppState, dto},
    axum::{extract::State, response::Json},
    std::sync::Arc,
};

pub async fn get_block_time_handler(State(state): State<Arc<AppState>>) -> Json<dto::BlockTime> {
    Json(dto::BlockTime {
        block_time_ms: state.indexer.state().ledger_time_ms(),
    })
}
