//! Collection endpoints: manual runs, latest value, time series
//!
//! Reads go through the TTL cache when the metric's configuration allows
//! it; a manual run that produces an error snapshot is surfaced as 422
//! (the snapshot is persisted either way, so the gap stays visible).

use crate::api::dto::{
    CollectBody, LatestParams, PublishEventRequest, PublishEventResponse, SeriesParams,
    SeriesResponse,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::events::DomainEvent;
use crate::model::{DimensionSet, MetricConfiguration, MetricSnapshot, Period};
use crate::scheduler::{CollectOutcome, CollectRequest};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use std::sync::Arc;

const DEFAULT_SERIES_WINDOW_DAYS: i64 = 30;

/// POST /api/v1/metrics/:code/collect
pub async fn collect_metric(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    body: Option<Json<CollectBody>>,
) -> ApiResult<(StatusCode, Json<CollectOutcome>)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let dimensions: DimensionSet = body.dimensions.into_iter().collect();
    let mut request = CollectRequest::new().dimensions(dimensions);
    match (body.period_start, body.period_end) {
        (Some(start), Some(end)) => {
            let period = Period::try_new(start, end).ok_or_else(|| {
                ApiError::Validation("period_start must precede period_end".to_string())
            })?;
            request = request.period(period);
        }
        (None, None) => {}
        _ => {
            return Err(ApiError::Validation(
                "period_start and period_end must be given together".to_string(),
            ));
        }
    }

    let outcome = state.scheduler.collect_by_code(&code, request).await?;
    if !outcome.snapshot.is_success() {
        let message = outcome
            .snapshot
            .error_message
            .clone()
            .unwrap_or_else(|| "collection produced an error snapshot".to_string());
        return Err(ApiError::Collection(message));
    }

    let status = if outcome.computed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// GET /api/v1/metrics/:code/latest
pub async fn latest_value(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<LatestParams>,
) -> ApiResult<Json<MetricSnapshot>> {
    let definition = state.catalog.require(&code).await?;
    let config = state.catalog.configuration_for(definition.id).await?;
    let cacheable = is_cacheable(&config);

    if let Some(hash) = &params.dimension_hash {
        if cacheable {
            if let Some(cached) = state.cache.latest(definition.id, hash).await {
                return Ok(Json(cached));
            }
        }
    }

    let snapshot = state
        .store
        .latest_snapshot(definition.id, params.dimension_hash.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("metric '{}' has no snapshots", code)))?;

    if cacheable {
        let ttl = cache_ttl(&config);
        state.cache.put_latest(&snapshot, ttl).await;
    }
    Ok(Json(snapshot))
}

/// GET /api/v1/metrics/:code/series
pub async fn snapshot_series(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<SeriesParams>,
) -> ApiResult<Json<SeriesResponse>> {
    let definition = state.catalog.require(&code).await?;
    let config = state.catalog.configuration_for(definition.id).await?;
    let cacheable = is_cacheable(&config);

    let to = params.to.unwrap_or_else(Utc::now);
    let from = params
        .from
        .unwrap_or_else(|| to - Duration::days(DEFAULT_SERIES_WINDOW_DAYS));
    let period = Period::try_new(from, to)
        .ok_or_else(|| ApiError::Validation("'from' must precede 'to'".to_string()))?;

    // the empty string keys the "all dimension sets" variant
    let dim_key = params.dimension_hash.clone().unwrap_or_default();
    let period_key = period.hash_hex();

    if cacheable {
        if let Some(cached) = state
            .cache
            .series(definition.id, &dim_key, &period_key)
            .await
        {
            return Ok(Json(SeriesResponse {
                metric: code,
                count: cached.len(),
                snapshots: cached,
            }));
        }
    }

    let snapshots = state
        .store
        .snapshot_series(definition.id, from, to, params.dimension_hash.as_deref())
        .await?;

    if cacheable {
        let ttl = cache_ttl(&config);
        state
            .cache
            .put_series(definition.id, &dim_key, &period_key, snapshots.clone(), ttl)
            .await;
    }

    Ok(Json(SeriesResponse {
        metric: code,
        count: snapshots.len(),
        snapshots,
    }))
}

/// POST /api/v1/events — publish a domain event; event-scheduled metrics
/// subscribed to the name collect in response.
pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PublishEventRequest>,
) -> ApiResult<(StatusCode, Json<PublishEventResponse>)> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("event name cannot be empty".to_string()));
    }
    let subscribers = state
        .bus
        .publish(DomainEvent::new(payload.name, payload.payload))
        .await;
    Ok((StatusCode::ACCEPTED, Json(PublishEventResponse { subscribers })))
}

/// Caching defaults to on for metrics without a stored configuration
fn is_cacheable(config: &Option<MetricConfiguration>) -> bool {
    config.as_ref().map_or(true, |c| c.cache_enabled)
}

fn cache_ttl(config: &Option<MetricConfiguration>) -> Option<std::time::Duration> {
    config
        .as_ref()
        .and_then(|c| c.cache_ttl_secs)
        .map(std::time::Duration::from_secs)
}
