//! Configuration system
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and METRON_* environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine store configuration (definitions, configurations, snapshots)
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("metron").join("metron.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./metron.db".to_string())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Operational data source the query templates run against
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_path")]
    pub path: String,
}

fn default_source_path() -> String {
    "./benefits.db".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8085
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Master switch for scheduled collection
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Whether the periodic anomaly sweep runs
    #[serde(default = "default_sweep_enabled")]
    pub anomaly_sweep_enabled: bool,

    #[serde(default = "default_sweep_interval")]
    pub anomaly_sweep_interval_hours: u64,

    /// Sweep sensitivity: low, medium or high
    #[serde(default = "default_sweep_confidence")]
    pub anomaly_sweep_confidence: String,
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    6
}

fn default_sweep_confidence() -> String {
    "medium".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            anomaly_sweep_enabled: default_sweep_enabled(),
            anomaly_sweep_interval_hours: default_sweep_interval(),
            anomaly_sweep_confidence: default_sweep_confidence(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,
}

fn default_cache_ttl() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl(),
        }
    }
}

/// Outbound event delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Publisher kind: "log" or "webhook"
    #[serde(default = "default_publisher")]
    pub publisher: String,

    /// Endpoint for the webhook publisher
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

fn default_publisher() -> String {
    "log".to_string()
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            publisher: default_publisher(),
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" for development or "json" for production
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("metron").join("config.toml")),
            Some(PathBuf::from("/etc/metron/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("METRON_STORE_PATH") {
            self.store.path = path;
        }
        if let Ok(path) = std::env::var("METRON_SOURCE_PATH") {
            self.source.path = path;
        }

        if let Ok(host) = std::env::var("METRON_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("METRON_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        if let Ok(url) = std::env::var("METRON_WEBHOOK_URL") {
            self.events.publisher = "webhook".to_string();
            self.events.webhook_url = Some(url);
        }

        if let Ok(level) = std::env::var("METRON_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("METRON_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Metron Configuration
#
# Environment variables override these settings:
# - METRON_STORE_PATH
# - METRON_SOURCE_PATH
# - METRON_API_HOST
# - METRON_API_PORT
# - METRON_WEBHOOK_URL
# - METRON_LOG_LEVEL
# - METRON_LOG_FORMAT

[store]
# SQLite database holding definitions, configurations and snapshots
path = "~/.local/share/metron/metron.db"

[source]
# Operational database the metric query templates run against
path = "./benefits.db"

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8085

# Maximum request body size (bytes)
max_body_size = 1048576

[scheduler]
# Master switch for scheduled collection
enabled = true

# Periodic anomaly sweep over all active metrics
anomaly_sweep_enabled = true

# Sweep interval (hours)
anomaly_sweep_interval_hours = 6

# Sweep sensitivity: low, medium or high
anomaly_sweep_confidence = "medium"

[cache]
# Default TTL for cached values (seconds); configurations may override per metric
default_ttl_secs = 300

[events]
# Outbound publisher: "log" or "webhook"
publisher = "log"

# Endpoint for the webhook publisher
# webhook_url = "https://hooks.example.gov.br/metron"

# Webhook request timeout (seconds)
webhook_timeout_secs = 10

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.port, 8085);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.events.publisher, "log");
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [api]
            port = 9000

            [scheduler]
            anomaly_sweep_enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.host, "0.0.0.0");
        assert!(!config.scheduler.anomaly_sweep_enabled);
        assert_eq!(config.scheduler.anomaly_sweep_interval_hours, 6);
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.api.port, 8085);
        assert_eq!(config.events.webhook_timeout_secs, 10);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load(Path::new("/nonexistent/metron.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
