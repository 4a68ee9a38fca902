//! Metron REST API
//!
//! HTTP surface of the metrics engine, built with Axum.
//!
//! # Endpoints
//!
//! ## Metrics
//! - `GET /api/v1/metrics` - List definitions (filterable)
//! - `POST /api/v1/metrics` - Register a definition
//! - `GET /api/v1/metrics/:code` - Get a definition
//! - `PUT /api/v1/metrics/:code` - Update a definition
//! - `DELETE /api/v1/metrics/:code` - Deactivate (soft)
//! - `GET /api/v1/metrics/:code/configuration` - Get the configuration
//! - `PUT /api/v1/metrics/:code/configuration` - Attach/replace it
//!
//! ## Collection
//! - `POST /api/v1/metrics/:code/collect` - Manual collection run
//! - `GET /api/v1/metrics/:code/latest` - Latest snapshot
//! - `GET /api/v1/metrics/:code/series` - Snapshot time series
//! - `POST /api/v1/events` - Publish a domain event
//!
//! ## Analysis
//! - `GET /api/v1/metrics/:code/anomaly` - Z-score anomaly check
//! - `GET /api/v1/metrics/:code/trend` - OLS trend fit
//! - `GET /api/v1/metrics/:code/forecast` - Multi-step forecast
//!
//! ## Cache
//! - `GET /api/v1/cache/stats` - Hit/miss counters and entry counts
//! - `POST /api/v1/cache/clear` - Drop everything
//! - `DELETE /api/v1/cache/:code` - Drop one metric's entries
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let max_body = state.config.max_body_size;

    let api_routes = Router::new()
        // definition and configuration lifecycle
        .route("/metrics", get(routes::metrics::list_metrics))
        .route("/metrics", post(routes::metrics::create_metric))
        .route("/metrics/:code", get(routes::metrics::get_metric))
        .route("/metrics/:code", put(routes::metrics::update_metric))
        .route("/metrics/:code", delete(routes::metrics::deactivate_metric))
        .route(
            "/metrics/:code/configuration",
            get(routes::metrics::get_configuration),
        )
        .route(
            "/metrics/:code/configuration",
            put(routes::metrics::put_configuration),
        )
        // collection and reads
        .route("/metrics/:code/collect", post(routes::collection::collect_metric))
        .route("/metrics/:code/latest", get(routes::collection::latest_value))
        .route("/metrics/:code/series", get(routes::collection::snapshot_series))
        .route("/events", post(routes::collection::publish_event))
        // analysis
        .route("/metrics/:code/anomaly", get(routes::analysis::detect_anomaly))
        .route("/metrics/:code/trend", get(routes::analysis::analyze_trend))
        .route("/metrics/:code/forecast", get(routes::analysis::forecast))
        // cache administration
        .route("/cache/stats", get(routes::cache::cache_stats))
        .route("/cache/clear", post(routes::cache::clear_cache))
        .route("/cache/:code", delete(routes::cache::invalidate_metric))
        .layer(DefaultBodyLimit::max(max_body));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("metron API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("server error: {}", e)))?;

    tracing::info!("metron API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, starting graceful shutdown");
}
