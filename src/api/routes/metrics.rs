//! Definition and configuration CRUD

use crate::api::dto::{
    ConfigurationRequest, CreateMetricRequest, ListMetricsParams, ListMetricsResponse,
    UpdateMetricRequest,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::model::{MetricConfiguration, MetricDefinition};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

/// GET /api/v1/metrics
pub async fn list_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListMetricsParams>,
) -> ApiResult<Json<ListMetricsResponse>> {
    let filter = params.into_filter()?;
    let total = state.catalog.count(&filter).await?;
    let metrics = state.catalog.list(&filter).await?;
    Ok(Json(ListMetricsResponse { total, metrics }))
}

/// POST /api/v1/metrics
pub async fn create_metric(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateMetricRequest>,
) -> ApiResult<(StatusCode, Json<MetricDefinition>)> {
    let definition = payload.into_definition()?;
    let created = state.catalog.create(definition).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/metrics/:code
pub async fn get_metric(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<MetricDefinition>> {
    let definition = state.catalog.require(&code).await?;
    Ok(Json(definition))
}

/// PUT /api/v1/metrics/:code
pub async fn update_metric(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(payload): Json<UpdateMetricRequest>,
) -> ApiResult<Json<MetricDefinition>> {
    let existing = state.catalog.require(&code).await?;
    let changed = payload.apply(existing)?;
    let updated = state.catalog.update(changed).await?;
    Ok(Json(updated))
}

/// DELETE /api/v1/metrics/:code — soft deactivation, history stays
pub async fn deactivate_metric(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<StatusCode> {
    state.catalog.deactivate(&code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/metrics/:code/configuration
pub async fn get_configuration(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<MetricConfiguration>> {
    let definition = state.catalog.require(&code).await?;
    let config = state
        .catalog
        .configuration_for(definition.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("metric '{}' has no configuration", code)))?;
    Ok(Json(config))
}

/// PUT /api/v1/metrics/:code/configuration
pub async fn put_configuration(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(payload): Json<ConfigurationRequest>,
) -> ApiResult<Json<MetricConfiguration>> {
    let definition = state.catalog.require(&code).await?;
    let existing = state.catalog.configuration_for(definition.id).await?;
    let config = payload.into_configuration(definition.id, existing.as_ref());
    let stored = state.catalog.configure(config).await?;
    Ok(Json(stored))
}
