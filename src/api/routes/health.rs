//! Health endpoints for monitoring and orchestration probes
//!
//! - GET /health/live - liveness probe (process is alive)
//! - GET /health/ready - readiness probe (store is reachable)
//! - GET /health - full status

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;
use crate::model::DefinitionFilter;
use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

/// GET /health/live — no dependency checks
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready — exercises the store
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match store_reachable(&state).await {
        true => StatusCode::OK,
        false => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /health
pub async fn full_health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let filter = DefinitionFilter::new().include_inactive();
    let metrics_total = state.store.count_definitions(&filter).await.ok();
    let stats = state.cache.stats().await;

    let (status, text) = match metrics_total {
        Some(_) => (StatusCode::OK, "healthy"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
    };

    let body = HealthResponse {
        status: text.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        metrics_total: metrics_total.unwrap_or(0),
        cache_hit_ratio: stats.hit_ratio,
    };
    (status, Json(body))
}

async fn store_reachable(state: &AppState) -> bool {
    state
        .store
        .count_definitions(&DefinitionFilter::new())
        .await
        .is_ok()
}
