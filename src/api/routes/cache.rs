//! Cache administration

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::cache::CacheStats;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

/// GET /api/v1/cache/stats
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<CacheStats>> {
    Ok(Json(state.cache.stats().await))
}

/// POST /api/v1/cache/clear — drop every entry and reset the counters
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state.cache.clear().await;
    tracing::info!("cache cleared by request");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/cache/:code — drop every entry for one metric
pub async fn invalidate_metric(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<StatusCode> {
    let definition = state.catalog.require(&code).await?;
    state.cache.invalidate(definition.id).await;
    Ok(StatusCode::NO_CONTENT)
}
