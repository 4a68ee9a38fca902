//! On-demand analysis: anomaly, trend, forecast
//!
//! All three endpoints work over the successful snapshot values of a
//! window (default 30 days), oldest first. Below the minimum sample size
//! the analyzers return a neutral result rather than an error, so a thin
//! history still yields a well-formed response.

use crate::api::dto::{AnalysisParams, ForecastParams};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::analytics::{
    AnomalyDetector, AnomalyResult, ForecastSeries, Forecaster, TrendAnalyzer, TrendResult,
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{Duration, Utc};
use std::sync::Arc;

const DEFAULT_WINDOW_DAYS: i64 = 30;
const DEFAULT_FORECAST_HORIZON: usize = 7;

/// GET /api/v1/metrics/:code/anomaly — test the newest value against the
/// window that precedes it
pub async fn detect_anomaly(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<AnalysisParams>,
) -> ApiResult<Json<AnomalyResult>> {
    let values = series_values(
        &state,
        &code,
        params.days.unwrap_or(DEFAULT_WINDOW_DAYS),
        params.dimension_hash.as_deref(),
    )
    .await?;

    let (candidate, history) = values
        .split_last()
        .ok_or_else(|| ApiError::NotFound(format!("metric '{}' has no snapshots", code)))?;

    let result = AnomalyDetector::new().detect(
        *candidate,
        history,
        params.confidence.unwrap_or_default(),
    );
    Ok(Json(result))
}

/// GET /api/v1/metrics/:code/trend
pub async fn analyze_trend(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<AnalysisParams>,
) -> ApiResult<Json<TrendResult>> {
    let values = series_values(
        &state,
        &code,
        params.days.unwrap_or(DEFAULT_WINDOW_DAYS),
        params.dimension_hash.as_deref(),
    )
    .await?;

    Ok(Json(TrendAnalyzer::new().analyze(&values)))
}

/// GET /api/v1/metrics/:code/forecast
pub async fn forecast(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<ForecastParams>,
) -> ApiResult<Json<ForecastSeries>> {
    let values = series_values(
        &state,
        &code,
        params.days.unwrap_or(DEFAULT_WINDOW_DAYS),
        params.dimension_hash.as_deref(),
    )
    .await?;

    let series = Forecaster::new().forecast(
        &values,
        params.horizon.unwrap_or(DEFAULT_FORECAST_HORIZON),
        params.confidence.unwrap_or_default(),
        params.model,
    );
    Ok(Json(series))
}

/// Successful snapshot values over the window, oldest first
async fn series_values(
    state: &AppState,
    code: &str,
    days: i64,
    dimension_hash: Option<&str>,
) -> ApiResult<Vec<f64>> {
    if days < 1 {
        return Err(ApiError::Validation("days must be at least 1".to_string()));
    }
    let definition = state.catalog.require(code).await?;

    let to = Utc::now();
    let from = to - Duration::days(days);
    let snapshots = state
        .store
        .snapshot_series(definition.id, from, to, dimension_hash)
        .await?;

    Ok(snapshots
        .iter()
        .filter(|s| s.is_success())
        .filter_map(|s| s.value)
        .collect())
}
