//! Domain events and outbound notifications
//!
//! Two event shapes flow through the engine:
//!
//! - **DomainEvent**: a named event with an arbitrary JSON payload,
//!   carried on the in-process [`EventBus`]. Event-scheduled metrics
//!   subscribe to their configured name and collect when it fires.
//! - **OutboundEvent**: the fixed-shape notification emitted when an
//!   alert rule matches, an anomaly is flagged or a trend is reported;
//!   delivered through an [`EventPublisher`].

pub mod bus;
pub mod publisher;

pub use bus::EventBus;
pub use publisher::{EventPublisher, LogPublisher, PublishError, PublishResult, WebhookPublisher};

use crate::analytics::{AnomalyFinding, TrendResult};
use crate::model::{AlertRule, AlertSeverity, MetricDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Named in-process event with an arbitrary payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: String,
    /// Exact-match key for event-scheduled collections
    pub name: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// String key/value pairs of an object payload, used as extra
    /// dimensions by event-triggered collections. Non-string values and
    /// non-object payloads contribute nothing.
    pub fn string_fields(&self) -> Vec<(String, String)> {
        match self.payload.as_object() {
            Some(map) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Kind of outbound notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    Alert,
    Anomaly,
    Trend,
}

impl std::fmt::Display for OutboundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboundKind::Alert => write!(f, "alert"),
            OutboundKind::Anomaly => write!(f, "anomaly"),
            OutboundKind::Trend => write!(f, "trend"),
        }
    }
}

/// Fixed-shape notification delivered to publishers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub id: String,
    pub kind: OutboundKind,
    pub metric_id: i64,
    pub metric_code: String,
    pub metric_name: String,
    pub value: f64,
    pub severity: Option<AlertSeverity>,
    pub message: String,
    /// Kind-specific fields (threshold, rule, z-score, direction, ...)
    pub details: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl OutboundEvent {
    fn base(
        kind: OutboundKind,
        definition_id: i64,
        code: &str,
        name: &str,
        value: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            metric_id: definition_id,
            metric_code: code.to_string(),
            metric_name: name.to_string(),
            value,
            severity: None,
            message: String::new(),
            details: serde_json::Value::Null,
            emitted_at: Utc::now(),
        }
    }

    /// Notification for a matched alert rule
    pub fn alert(definition: &MetricDefinition, rule: &AlertRule, value: f64) -> Self {
        let mut event = Self::base(
            OutboundKind::Alert,
            definition.id,
            &definition.code,
            &definition.name,
            value,
        );
        event.severity = Some(rule.severity);
        event.message = rule.message.clone().unwrap_or_else(|| {
            format!(
                "{} rule matched at threshold {}",
                rule.kind, rule.threshold
            )
        });
        event.details = json!({
            "rule_kind": rule.kind,
            "threshold": rule.threshold,
        });
        event
    }

    /// Notification for a flagged anomaly
    pub fn anomaly(finding: &AnomalyFinding) -> Self {
        let mut event = Self::base(
            OutboundKind::Anomaly,
            finding.definition_id,
            &finding.metric_code,
            &finding.metric_name,
            finding.value,
        );
        event.message = format!(
            "value {:.2} deviates {:.2} standard deviations from the mean {:.2}",
            finding.value, finding.result.z_score, finding.result.mean
        );
        event.details = json!({
            "z_score": finding.result.z_score,
            "mean": finding.result.mean,
            "std_dev": finding.result.std_dev,
            "threshold": finding.result.threshold,
            "confidence": finding.result.confidence,
            "dimensions": finding.dimensions,
            "period_start": finding.period.start,
            "period_end": finding.period.end,
        });
        event
    }

    /// Notification for an on-demand or scheduled trend report
    pub fn trend(definition: &MetricDefinition, result: &TrendResult) -> Self {
        let mut event = Self::base(
            OutboundKind::Trend,
            definition.id,
            &definition.code,
            &definition.name,
            result.next_value,
        );
        event.message = format!(
            "{} trend at {:.2}% intensity over {} samples",
            result.direction, result.intensity, result.sample_size
        );
        event.details = json!({
            "direction": result.direction,
            "slope": result.slope,
            "intensity": result.intensity,
            "confidence": result.confidence,
            "next_value": result.next_value,
        });
        event
    }

    /// Bus channel name the notification is mirrored on
    pub fn channel(&self) -> &'static str {
        match self.kind {
            OutboundKind::Alert => "metric.alert",
            OutboundKind::Anomaly => "metric.anomaly",
            OutboundKind::Trend => "metric.trend",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertKind;

    #[test]
    fn test_string_fields_from_object_payload() {
        let event = DomainEvent::new(
            "benefit.granted",
            json!({"regional": "north", "count": 3, "office": "hq"}),
        );
        let mut fields = event.string_fields();
        fields.sort();
        assert_eq!(
            fields,
            vec![
                ("office".to_string(), "hq".to_string()),
                ("regional".to_string(), "north".to_string()),
            ]
        );
    }

    #[test]
    fn test_string_fields_from_scalar_payload() {
        let event = DomainEvent::new("tick", json!(42));
        assert!(event.string_fields().is_empty());
    }

    #[test]
    fn test_alert_event_shape() {
        let definition = MetricDefinition::new(
            "requests_received",
            "Requests received",
            crate::model::MetricKind::Count,
            crate::model::Granularity::Day,
        );
        let rule = AlertRule::new(AlertKind::Max, 100.0, AlertSeverity::Warning)
            .message("daily requests above limit");

        let event = OutboundEvent::alert(&definition, &rule, 150.0);
        assert_eq!(event.kind, OutboundKind::Alert);
        assert_eq!(event.metric_code, "requests_received");
        assert_eq!(event.value, 150.0);
        assert_eq!(event.severity, Some(AlertSeverity::Warning));
        assert_eq!(event.message, "daily requests above limit");
        assert_eq!(event.channel(), "metric.alert");

        let body = serde_json::to_value(&event).unwrap();
        assert_eq!(body["details"]["threshold"], 100.0);
        assert_eq!(body["kind"], "alert");
    }
}
