//! Read-only HTTP API serving the indexed state.
//!
//! Handlers only ever read from [`IndexerState`](crate::indexer::IndexerState)
//! snapshots and caches; indexer-internal failures are answered with absence
//! rather than surfaced to clients.

use {
    crate::{indexer::Indexer, price::PriceResolver},
    axum::{
        Router,
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    serde::Serialize,
    std::{borrow::Cow, net::SocketAddr, sync::Arc},
    token_info::TokenInfoFetching,
    tower_http::trace::TraceLayer,
};

mod dto;
mod get_auction;
mod get_auctions;
mod get_block_time;
mod get_clearing;
mod get_orders;
mod get_stats;
mod get_token_info;

/// Application state shared across all API handlers.
pub struct AppState {
    pub indexer: Arc<Indexer>,
    pub prices: Arc<PriceResolver>,
    pub token_infos: Arc<dyn TokenInfoFetching>,
}

pub fn handle_all_routes(state: AppState) -> Router {
    let api_router = Router::new()
        .route(
            "/v1/auctions",
            get(get_auctions::get_auctions_handler),
        )
        .route(
            "/v1/auctions/{auction}",
            get(get_auction::get_auction_handler),
        )
        .route(
            "/v1/auctions/{auction}/orders",
            get(get_orders::get_orders_handler),
        )
        .route(
            "/v1/auctions/{auction}/clearing",
            get(get_clearing::get_clearing_handler),
        )
        .route("/v1/stats", get(get_stats::get_stats_handler))
        .route(
            "/v1/tokens/{token}",
            get(get_token_info::get_token_info_handler),
        )
        .route(
            "/v1/blocktime",
            get(get_block_time::get_block_time_handler),
        )
        .with_state(Arc::new(state));

    Router::new()
        .nest("/api", api_router)
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
}

/// Binds the listener and serves the router until the process exits.
pub async fn serve(address: SocketAddr, router: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!(%address, "serving api");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn metrics_handler() -> String {
    observe::metrics::encode(observe::metrics::get_registry())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    pub error_type: Cow<'static, str>,
    pub description: Cow<'static, str>,
}

pub fn error(error_type: &'static str, description: impl AsRef<str>) -> Json<Error> {
    Json(Error {
        error_type: error_type.into(),
        description: Cow::Owned(description.as_ref().to_owned()),
    })
}

pub fn not_found_reply() -> Response {
    (StatusCode::NOT_FOUND, error("NotFound", "")).into_response()
}
