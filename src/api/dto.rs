//! Request/response DTOs
//!
//! Inbound payloads use plain strings for the enum-typed fields so the
//! API can reject unknown values with a field-level message instead of a
//! bare deserialization error; conversion into domain types happens here.

use crate::analytics::{ConfidenceLevel, ForecastModel};
use crate::api::error::{ApiError, ApiResult};
use crate::model::{
    AlertRule, Category, DashboardHints, DefinitionFilter, Granularity, MetricConfiguration,
    MetricDefinition, MetricKind, MetricSnapshot, RetentionPolicy, SamplingStrategy, ScheduleKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn parse_kind(s: &str) -> ApiResult<MetricKind> {
    MetricKind::parse(s).ok_or_else(|| ApiError::Validation(format!("unknown metric kind '{}'", s)))
}

fn parse_category(s: &str) -> ApiResult<Category> {
    Category::parse(s).ok_or_else(|| ApiError::Validation(format!("unknown category '{}'", s)))
}

fn parse_granularity(s: &str) -> ApiResult<Granularity> {
    Granularity::parse(s)
        .ok_or_else(|| ApiError::Validation(format!("unknown granularity '{}'", s)))
}

/// Payload for registering a metric definition
#[derive(Debug, Deserialize)]
pub struct CreateMetricRequest {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub category: Option<String>,
    pub granularity: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub decimal_places: Option<u8>,
    #[serde(default)]
    pub query_template: Option<String>,
    #[serde(default)]
    pub percentile: Option<f64>,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl CreateMetricRequest {
    pub fn into_definition(self) -> ApiResult<MetricDefinition> {
        let kind = parse_kind(&self.kind)?;
        let granularity = parse_granularity(&self.granularity)?;

        let mut def = MetricDefinition::new(self.code, self.name, kind, granularity);
        if let Some(category) = &self.category {
            def.category = parse_category(category)?;
        }
        def.description = self.description;
        def.unit = self.unit;
        def.prefix = self.prefix;
        def.suffix = self.suffix;
        if let Some(places) = self.decimal_places {
            def.decimal_places = places;
        }
        def.query_template = self.query_template;
        def.percentile = self.percentile;
        def.formula = self.formula;
        def.depends_on = self.depends_on;
        Ok(def)
    }
}

/// Payload for updating a definition; absent fields keep their value.
/// The code is immutable and deliberately not accepted here.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateMetricRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub decimal_places: Option<u8>,
    #[serde(default)]
    pub query_template: Option<String>,
    #[serde(default)]
    pub percentile: Option<f64>,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,
}

impl UpdateMetricRequest {
    /// Apply the changed fields onto an existing definition
    pub fn apply(self, mut def: MetricDefinition) -> ApiResult<MetricDefinition> {
        if let Some(name) = self.name {
            def.name = name;
        }
        if let Some(description) = self.description {
            def.description = Some(description);
        }
        if let Some(kind) = &self.kind {
            def.kind = parse_kind(kind)?;
        }
        if let Some(category) = &self.category {
            def.category = parse_category(category)?;
        }
        if let Some(granularity) = &self.granularity {
            def.granularity = parse_granularity(granularity)?;
        }
        if let Some(unit) = self.unit {
            def.unit = Some(unit);
        }
        if let Some(prefix) = self.prefix {
            def.prefix = Some(prefix);
        }
        if let Some(suffix) = self.suffix {
            def.suffix = Some(suffix);
        }
        if let Some(places) = self.decimal_places {
            def.decimal_places = places;
        }
        if let Some(template) = self.query_template {
            def.query_template = Some(template);
        }
        if let Some(percentile) = self.percentile {
            def.percentile = Some(percentile);
        }
        if let Some(formula) = self.formula {
            def.formula = Some(formula);
        }
        if let Some(depends_on) = self.depends_on {
            def.depends_on = depends_on;
        }
        Ok(def)
    }
}

/// Query parameters for listing definitions
#[derive(Debug, Deserialize, Default)]
pub struct ListMetricsParams {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub include_inactive: Option<bool>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl ListMetricsParams {
    pub fn into_filter(self) -> ApiResult<DefinitionFilter> {
        let mut filter = DefinitionFilter::new();
        if let Some(category) = &self.category {
            filter = filter.category(parse_category(category)?);
        }
        if let Some(kind) = &self.kind {
            filter = filter.kind(parse_kind(kind)?);
        }
        if self.include_inactive.unwrap_or(false) {
            filter = filter.include_inactive();
        }
        if let Some(search) = self.search {
            filter = filter.search(search);
        }
        if let Some(limit) = self.limit {
            filter = filter.page(limit, self.offset.unwrap_or(0));
        }
        Ok(filter)
    }
}

#[derive(Debug, Serialize)]
pub struct ListMetricsResponse {
    /// Total matches ignoring pagination
    pub total: u64,
    pub metrics: Vec<MetricDefinition>,
}

/// Payload for attaching or replacing a metric's configuration.
/// Schedule, retention and alert shapes are the domain types themselves;
/// their serde forms are the wire format.
#[derive(Debug, Deserialize)]
pub struct ConfigurationRequest {
    pub schedule: ScheduleKind,
    #[serde(default = "default_true")]
    pub collection_enabled: bool,
    #[serde(default)]
    pub collection_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
    #[serde(default)]
    pub sampling: Option<SamplingStrategy>,
    #[serde(default)]
    pub sample_size: Option<u32>,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub alert_rules: Vec<AlertRule>,
    #[serde(default)]
    pub dashboard: Option<DashboardHints>,
}

fn default_true() -> bool {
    true
}

impl ConfigurationRequest {
    /// Build the configuration row, preserving identity and creation time
    /// when one already exists for the metric
    pub fn into_configuration(
        self,
        metric_id: i64,
        existing: Option<&MetricConfiguration>,
    ) -> MetricConfiguration {
        let mut config = MetricConfiguration::new(metric_id, self.schedule);
        if let Some(existing) = existing {
            config.id = existing.id;
            config.created_at = existing.created_at;
        }
        config.collection_enabled = self.collection_enabled;
        if let Some(timeout) = self.collection_timeout_secs {
            config.collection_timeout_secs = timeout;
        }
        if let Some(retention) = self.retention {
            config.retention = retention;
        }
        if let Some(sampling) = self.sampling {
            config.sampling = sampling;
        }
        config.sample_size = self.sample_size;
        config.cache_enabled = self.cache_enabled;
        config.cache_ttl_secs = self.cache_ttl_secs;
        config.alert_rules = self.alert_rules;
        if let Some(dashboard) = self.dashboard {
            config.dashboard = dashboard;
        }
        config
    }
}

/// Body for a manual collection run
#[derive(Debug, Deserialize, Default)]
pub struct CollectBody {
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    /// Explicit period override; both bounds or neither
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period_end: Option<DateTime<Utc>>,
}

/// Query parameters for the latest-value endpoint
#[derive(Debug, Deserialize, Default)]
pub struct LatestParams {
    #[serde(default)]
    pub dimension_hash: Option<String>,
}

/// Query parameters for the time-series endpoint
#[derive(Debug, Deserialize, Default)]
pub struct SeriesParams {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dimension_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub metric: String,
    pub count: usize,
    pub snapshots: Vec<MetricSnapshot>,
}

/// Query parameters shared by the anomaly and trend endpoints
#[derive(Debug, Deserialize, Default)]
pub struct AnalysisParams {
    /// History window in days (default 30)
    #[serde(default)]
    pub days: Option<i64>,
    #[serde(default)]
    pub confidence: Option<ConfidenceLevel>,
    #[serde(default)]
    pub dimension_hash: Option<String>,
}

/// Query parameters for the forecast endpoint
#[derive(Debug, Deserialize, Default)]
pub struct ForecastParams {
    #[serde(default)]
    pub days: Option<i64>,
    /// Steps to project forward (default 7)
    #[serde(default)]
    pub horizon: Option<usize>,
    /// Pin a model instead of size-based selection
    #[serde(default)]
    pub model: Option<ForecastModel>,
    #[serde(default)]
    pub confidence: Option<ConfidenceLevel>,
    #[serde(default)]
    pub dimension_hash: Option<String>,
}

/// Body for publishing a domain event onto the bus
#[derive(Debug, Deserialize)]
pub struct PublishEventRequest {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct PublishEventResponse {
    pub subscribers: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub metrics_total: u64,
    pub cache_hit_ratio: f64,
}
