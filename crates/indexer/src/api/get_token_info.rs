use {
    crate::api::AppState,
    alloy_primitives::Address,
    axum::{
        extract::{Path, State},
        response::{IntoResponse, Json},
    },
    std::sync::Arc,
};

pub async fn get_token_info_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<Address>,
) -> impl IntoResponse {
    match state.token_infos.get_token_info(token).await {
        Ok(info) => Json(info).into_response(),
        Err(err) => {
            tracing::debug!(?token, ?err, "failed to fetch token info");
            crate::api::not_found_reply()
        }
    }
}
