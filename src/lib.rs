//! # Metron
//!
//! Business metrics engine for benefits administration: defines metrics
//! over a relational data source, schedules and computes their values as
//! immutable snapshots, and analyzes the resulting series.
//!
//! ## Features
//!
//! - **Versioned definitions**: nine metric kinds, from plain counts to
//!   arithmetic composites over other metrics
//! - **Idempotent collection**: one snapshot per (metric, period,
//!   dimension set), failures recorded as error snapshots
//! - **Flexible scheduling**: interval, cron-approximated, event-driven
//!   or manual triggers with per-metric retention and alert rules
//! - **Read-side caching**: TTL cache over latest values and series
//! - **Statistics**: z-score anomaly detection, OLS trend fitting and
//!   multi-model forecasting over snapshot history
//!
//! ## Modules
//!
//! - [`model`]: definitions, configurations, snapshots, periods
//! - [`store`]: persistence (SQLite and in-memory)
//! - [`engine`]: metric computation against the data source
//! - [`catalog`]: definition/configuration lifecycle
//! - [`scheduler`]: collection triggers, alerts, retention
//! - [`cache`]: TTL cache for computed values
//! - [`analytics`]: anomaly / trend / forecast
//! - [`events`]: domain event bus and outbound publishers
//! - [`api`]: REST API server with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metron::catalog::MetricCatalog;
//! use metron::cache::MetricCache;
//! use metron::engine::{CalculationEngine, SqliteDataSource};
//! use metron::model::{Category, DimensionSet, Granularity, MetricDefinition, MetricKind};
//! use metron::store::SqliteStore;
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteStore::open(Path::new("metron.db"))?);
//!     let source = Arc::new(SqliteDataSource::open(Path::new("benefits.db"))?);
//!     let cache = Arc::new(MetricCache::new(Duration::from_secs(300)));
//!
//!     let catalog = MetricCatalog::new(store.clone(), cache);
//!     let metric = catalog
//!         .create(
//!             MetricDefinition::new(
//!                 "requests_received",
//!                 "Requests received",
//!                 MetricKind::Count,
//!                 Granularity::Day,
//!             )
//!             .category(Category::Requests)
//!             .query_template(
//!                 "SELECT COUNT(*) FROM requests \
//!                  WHERE created_at >= '${PERIODO_INICIO}' \
//!                  AND created_at < '${PERIODO_FIM}'",
//!             ),
//!         )
//!         .await?;
//!
//!     let engine = CalculationEngine::new(store, source);
//!     let period = Granularity::Day.last_complete(chrono::Utc::now());
//!     let value = engine
//!         .compute(&metric, period, &DimensionSet::new())
//!         .await?;
//!
//!     println!("{} = {}", metric.code, metric.format_value(value));
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod events;
pub mod model;
pub mod scheduler;
pub mod store;

// Re-export top-level types for convenience
pub use model::{
    Category, DefinitionFilter, DimensionSet, Granularity, MetricConfiguration, MetricDefinition,
    MetricKind, MetricSnapshot, Period, RetentionPolicy, ScheduleKind, ValidationError,
};

pub use store::{InMemoryStore, MetricStore, SqliteStore, StoreError, StoreResult};

pub use engine::{CalculationEngine, ComputeError, DataSource, Formula, SqliteDataSource};

pub use catalog::{CatalogError, CatalogResult, MetricCatalog};

pub use cache::{CacheStats, MetricCache};

pub use scheduler::{CollectOutcome, CollectRequest, CollectionScheduler, Collector, MetricState};

pub use analytics::{
    AnomalyDetector, AnomalyResult, AnomalySweep, ConfidenceLevel, ForecastModel, ForecastSeries,
    Forecaster, TrendAnalyzer, TrendResult,
};

pub use events::{DomainEvent, EventBus, EventPublisher, LogPublisher, WebhookPublisher};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{Config, ConfigError};
