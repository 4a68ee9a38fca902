//! Application state
//!
//! Shared state accessible by all API handlers, wrapped in Arc for
//! thread-safe sharing across async tasks.

use crate::cache::MetricCache;
use crate::catalog::MetricCatalog;
use crate::events::EventBus;
use crate::scheduler::CollectionScheduler;
use crate::store::MetricStore;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Snapshot and definition persistence
    pub store: Arc<dyn MetricStore>,
    /// Definition/configuration lifecycle
    pub catalog: Arc<MetricCatalog>,
    /// Collection triggers and manual runs
    pub scheduler: Arc<CollectionScheduler>,
    /// Read-side TTL cache
    pub cache: Arc<MetricCache>,
    /// Domain event bus feeding event-scheduled collections
    pub bus: Arc<EventBus>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MetricStore>,
        catalog: Arc<MetricCatalog>,
        scheduler: Arc<CollectionScheduler>,
        cache: Arc<MetricCache>,
        bus: Arc<EventBus>,
        config: ApiConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            scheduler,
            cache,
            bus,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            max_body_size: 1024 * 1024,
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
