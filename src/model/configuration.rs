//! Metric configurations
//!
//! A `MetricConfiguration` is the operational policy attached one-to-one to
//! a definition: when collection runs, how long snapshots are kept, how
//! results are cached, and which alert rules fire on new values. Definitions
//! say what to measure; configurations say how the scheduler treats it.

use crate::model::error::{ValidationError, ValidationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default per-collection execution timeout
pub const DEFAULT_COLLECTION_TIMEOUT_SECS: u64 = 30;

/// How a metric's collection is triggered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fixed interval in seconds
    Interval { seconds: i64 },
    /// Cron-like expression, resolved to an interval by the scheduler
    Cron { expression: String },
    /// Collected whenever a domain event with this name is published
    Event { name: String },
    /// Only collected on explicit request
    Manual,
}

impl ScheduleKind {
    /// Short name for logging and serialization contexts
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Interval { .. } => "interval",
            Self::Cron { .. } => "cron",
            Self::Event { .. } => "event",
            Self::Manual => "manual",
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// How long snapshots are kept; 0 means unlimited
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    /// Snapshots older than this many days are pruned (0 = keep forever)
    #[serde(default)]
    pub max_age_days: u32,
    /// At most this many snapshots are kept per metric (0 = no cap)
    #[serde(default)]
    pub max_count: u32,
}

impl RetentionPolicy {
    pub fn new(max_age_days: u32, max_count: u32) -> Self {
        Self {
            max_age_days,
            max_count,
        }
    }

    /// Age limit, or None when unlimited
    pub fn age_limit(&self) -> Option<u32> {
        (self.max_age_days > 0).then_some(self.max_age_days)
    }

    /// Count limit, or None when unlimited
    pub fn count_limit(&self) -> Option<u32> {
        (self.max_count > 0).then_some(self.max_count)
    }

    /// Whether pruning would ever delete anything
    pub fn is_unlimited(&self) -> bool {
        self.max_age_days == 0 && self.max_count == 0
    }
}

/// How the underlying query population is sampled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Entire population
    Full,
    /// Random sample of `sample_size` rows
    Random,
    /// Every k-th row up to `sample_size`
    Systematic,
    /// Proportional sample per stratum up to `sample_size`
    Stratified,
}

impl SamplingStrategy {
    pub fn requires_sample_size(&self) -> bool {
        !matches!(self, Self::Full)
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "random" => Some(Self::Random),
            "systematic" => Some(Self::Systematic),
            "stratified" => Some(Self::Stratified),
            _ => None,
        }
    }
}

impl std::fmt::Display for SamplingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Full => "full",
            Self::Random => "random",
            Self::Systematic => "systematic",
            Self::Stratified => "stratified",
        };
        write!(f, "{}", s)
    }
}

/// Comparison an alert rule applies to a freshly collected value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Fires when value > threshold
    Max,
    /// Fires when value < threshold
    Min,
    /// Fires when value equals threshold
    Equals,
    /// Fires when |percent change vs previous value| >= threshold
    PercentChange,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Max => "max",
            Self::Min => "min",
            Self::Equals => "equals",
            Self::PercentChange => "percent_change",
        };
        write!(f, "{}", s)
    }
}

/// How urgent a fired alert is
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// A single threshold rule evaluated after each successful collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    pub kind: AlertKind,
    pub threshold: f64,
    /// Optional operator-facing message carried on the alert event
    #[serde(default)]
    pub message: Option<String>,
    pub severity: AlertSeverity,
}

impl AlertRule {
    pub fn new(kind: AlertKind, threshold: f64, severity: AlertSeverity) -> Self {
        Self {
            kind,
            threshold,
            message: None,
            severity,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Evaluate the rule against a new value.
    ///
    /// `previous` is the most recent prior snapshot value, used only by
    /// percent-change rules; without one, a percent-change rule never fires.
    pub fn evaluate(&self, current: f64, previous: Option<f64>) -> bool {
        match self.kind {
            AlertKind::Max => current > self.threshold,
            AlertKind::Min => current < self.threshold,
            AlertKind::Equals => (current - self.threshold).abs() < 1e-9,
            AlertKind::PercentChange => match previous {
                Some(prev) => percent_change(prev, current).abs() >= self.threshold,
                None => false,
            },
        }
    }
}

fn percent_change(previous: f64, current: f64) -> f64 {
    if previous == 0.0 {
        if current > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (current - previous) / previous.abs() * 100.0
    }
}

/// How a metric appears on dashboards
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardHints {
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Lower values sort first
    #[serde(default)]
    pub sort_priority: i32,
}

fn default_visible() -> bool {
    true
}

impl Default for DashboardHints {
    fn default() -> Self {
        Self {
            visible: true,
            sort_priority: 0,
        }
    }
}

/// Operational policy for one metric definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricConfiguration {
    /// Surrogate identifier, assigned by the store (0 before persistence)
    pub id: i64,
    /// Definition this configuration belongs to
    pub metric_id: i64,
    /// Master toggle; disabled metrics are never scheduled
    #[serde(default = "default_enabled")]
    pub collection_enabled: bool,
    pub schedule: ScheduleKind,
    /// Bounded execution time for one collection run
    #[serde(default = "default_timeout")]
    pub collection_timeout_secs: u64,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default = "default_sampling")]
    pub sampling: SamplingStrategy,
    /// Required when sampling is not `Full`
    #[serde(default)]
    pub sample_size: Option<u32>,
    /// Whether computed values may be served from cache
    #[serde(default = "default_enabled")]
    pub cache_enabled: bool,
    /// Per-metric cache TTL override; None uses the engine default
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    /// Evaluated in order after each successful collection
    #[serde(default)]
    pub alert_rules: Vec<AlertRule>,
    #[serde(default)]
    pub dashboard: DashboardHints,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_COLLECTION_TIMEOUT_SECS
}

fn default_sampling() -> SamplingStrategy {
    SamplingStrategy::Full
}

impl MetricConfiguration {
    /// Create a configuration with default policy for a definition
    pub fn new(metric_id: i64, schedule: ScheduleKind) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            metric_id,
            collection_enabled: true,
            schedule,
            collection_timeout_secs: DEFAULT_COLLECTION_TIMEOUT_SECS,
            retention: RetentionPolicy::default(),
            sampling: SamplingStrategy::Full,
            sample_size: None,
            cache_enabled: true,
            cache_ttl_secs: None,
            alert_rules: Vec::new(),
            dashboard: DashboardHints::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set retention policy
    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = policy;
        self
    }

    /// Builder: set sampling strategy and size
    pub fn sampling(mut self, strategy: SamplingStrategy, sample_size: Option<u32>) -> Self {
        self.sampling = strategy;
        self.sample_size = sample_size;
        self
    }

    /// Builder: add an alert rule
    pub fn alert(mut self, rule: AlertRule) -> Self {
        self.alert_rules.push(rule);
        self
    }

    /// Builder: set cache policy
    pub fn cache(mut self, enabled: bool, ttl_secs: Option<u64>) -> Self {
        self.cache_enabled = enabled;
        self.cache_ttl_secs = ttl_secs;
        self
    }

    /// Builder: disable collection
    pub fn disabled(mut self) -> Self {
        self.collection_enabled = false;
        self
    }

    /// Whether the scheduler should register a trigger for this configuration
    pub fn is_schedulable(&self) -> bool {
        self.collection_enabled && !self.schedule.is_manual()
    }

    /// Structural validation of the configuration
    pub fn validate(&self) -> ValidationResult<()> {
        match &self.schedule {
            ScheduleKind::Interval { seconds } => {
                if *seconds < 1 {
                    return Err(ValidationError::InvalidInterval(self.metric_id));
                }
            }
            ScheduleKind::Cron { expression } => {
                if expression.trim().is_empty() {
                    return Err(ValidationError::InvalidCronSchedule {
                        metric_id: self.metric_id,
                        reason: "expression cannot be empty".to_string(),
                    });
                }
            }
            ScheduleKind::Event { name } => {
                if name.trim().is_empty() {
                    return Err(ValidationError::MissingEventName(self.metric_id));
                }
            }
            ScheduleKind::Manual => {}
        }

        if self.sampling.requires_sample_size() {
            match self.sample_size {
                Some(n) if n > 0 => {}
                _ => {
                    return Err(ValidationError::MissingSampleSize {
                        metric_id: self.metric_id,
                        strategy: self.sampling.to_string(),
                    });
                }
            }
        }

        if self.collection_timeout_secs == 0 {
            return Err(ValidationError::InvalidField {
                field: "collection_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_schedule_validates() {
        let config = MetricConfiguration::new(1, ScheduleKind::Interval { seconds: 300 });
        assert!(config.validate().is_ok());

        let bad = MetricConfiguration::new(1, ScheduleKind::Interval { seconds: 0 });
        assert_eq!(bad.validate(), Err(ValidationError::InvalidInterval(1)));
    }

    #[test]
    fn test_cron_schedule_requires_expression() {
        let bad = MetricConfiguration::new(
            2,
            ScheduleKind::Cron {
                expression: "  ".to_string(),
            },
        );
        assert!(matches!(
            bad.validate(),
            Err(ValidationError::InvalidCronSchedule { metric_id: 2, .. })
        ));
    }

    #[test]
    fn test_event_schedule_requires_name() {
        let bad = MetricConfiguration::new(
            3,
            ScheduleKind::Event {
                name: String::new(),
            },
        );
        assert_eq!(bad.validate(), Err(ValidationError::MissingEventName(3)));
    }

    #[test]
    fn test_non_full_sampling_requires_size() {
        let bad = MetricConfiguration::new(4, ScheduleKind::Manual)
            .sampling(SamplingStrategy::Random, None);
        assert!(matches!(
            bad.validate(),
            Err(ValidationError::MissingSampleSize { metric_id: 4, .. })
        ));

        let ok = MetricConfiguration::new(4, ScheduleKind::Manual)
            .sampling(SamplingStrategy::Random, Some(1000));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_schedulable() {
        let scheduled = MetricConfiguration::new(1, ScheduleKind::Interval { seconds: 60 });
        assert!(scheduled.is_schedulable());

        let manual = MetricConfiguration::new(1, ScheduleKind::Manual);
        assert!(!manual.is_schedulable());

        let disabled =
            MetricConfiguration::new(1, ScheduleKind::Interval { seconds: 60 }).disabled();
        assert!(!disabled.is_schedulable());
    }

    #[test]
    fn test_retention_limits() {
        let unlimited = RetentionPolicy::default();
        assert!(unlimited.is_unlimited());
        assert_eq!(unlimited.age_limit(), None);
        assert_eq!(unlimited.count_limit(), None);

        let bounded = RetentionPolicy::new(90, 1000);
        assert_eq!(bounded.age_limit(), Some(90));
        assert_eq!(bounded.count_limit(), Some(1000));
    }

    #[test]
    fn test_alert_thresholds() {
        let max = AlertRule::new(AlertKind::Max, 100.0, AlertSeverity::Critical);
        assert!(max.evaluate(150.0, None));
        assert!(!max.evaluate(100.0, None));

        let min = AlertRule::new(AlertKind::Min, 10.0, AlertSeverity::Warning);
        assert!(min.evaluate(5.0, None));
        assert!(!min.evaluate(10.0, None));

        let eq = AlertRule::new(AlertKind::Equals, 0.0, AlertSeverity::Info);
        assert!(eq.evaluate(0.0, None));
        assert!(!eq.evaluate(0.1, None));
    }

    #[test]
    fn test_percent_change_alert() {
        let rule = AlertRule::new(AlertKind::PercentChange, 50.0, AlertSeverity::Warning);

        // no previous value, never fires
        assert!(!rule.evaluate(1000.0, None));

        assert!(rule.evaluate(160.0, Some(100.0)));
        assert!(rule.evaluate(40.0, Some(100.0)));
        assert!(!rule.evaluate(120.0, Some(100.0)));

        // previous of zero counts as a 100% jump when the value appears
        assert!(rule.evaluate(5.0, Some(0.0)));
        assert!(!rule.evaluate(0.0, Some(0.0)));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Info < AlertSeverity::Warning);
        assert!(AlertSeverity::Warning < AlertSeverity::Critical);
    }

    #[test]
    fn test_schedule_kind_serialization() {
        let interval = ScheduleKind::Interval { seconds: 300 };
        let json = serde_json::to_string(&interval).unwrap();
        assert!(json.contains("\"kind\":\"interval\""));
        assert_eq!(serde_json::from_str::<ScheduleKind>(&json).unwrap(), interval);

        let event = ScheduleKind::Event {
            name: "payment_processed".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(serde_json::from_str::<ScheduleKind>(&json).unwrap(), event);

        let manual: ScheduleKind = serde_json::from_str("{\"kind\":\"manual\"}").unwrap();
        assert!(manual.is_manual());
    }
}
