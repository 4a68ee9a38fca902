//! Alert-rule evaluation
//!
//! Runs after each successful collection. Rules are evaluated in
//! configuration order and in isolation: a rule that cannot be evaluated
//! (today that means a failed baseline lookup for percent-change rules)
//! is logged and skipped without blocking the others or the snapshot.
//! Percent-change rules compare against the most recent snapshot older
//! than 24 hours for the same dimension set.

use crate::events::OutboundEvent;
use crate::model::{AlertKind, MetricConfiguration, MetricDefinition, MetricSnapshot};
use crate::store::{MetricStore, StoreResult};
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

const PERCENT_CHANGE_BASELINE_AGE_HOURS: i64 = 24;

/// Evaluate the configured rules against a fresh snapshot; returns the
/// alert events to publish, in rule order.
pub async fn evaluate(
    store: &dyn MetricStore,
    definition: &MetricDefinition,
    config: &MetricConfiguration,
    snapshot: &MetricSnapshot,
) -> Vec<OutboundEvent> {
    let value = match snapshot.value {
        Some(value) => value,
        None => return Vec::new(),
    };
    if config.alert_rules.is_empty() {
        return Vec::new();
    }

    let needs_baseline = config
        .alert_rules
        .iter()
        .any(|rule| rule.kind == AlertKind::PercentChange);
    let baseline = if needs_baseline {
        match baseline_value(store, definition.id, &snapshot.dimension_hash).await {
            Ok(baseline) => baseline,
            Err(err) => {
                warn!(
                    metric = %definition.code,
                    error = %err,
                    "baseline lookup failed, skipping percent-change rules"
                );
                None
            }
        }
    } else {
        None
    };

    let mut events = Vec::new();
    for rule in &config.alert_rules {
        let previous = match rule.kind {
            AlertKind::PercentChange => baseline,
            _ => None,
        };
        if rule.evaluate(value, previous) {
            events.push(OutboundEvent::alert(definition, rule, value));
        }
    }
    events
}

/// Most recent successful value older than the baseline age, for the
/// same dimension set.
async fn baseline_value(
    store: &dyn MetricStore,
    definition_id: i64,
    dimension_hash: &str,
) -> StoreResult<Option<f64>> {
    let cutoff = Utc::now() - Duration::hours(PERCENT_CHANGE_BASELINE_AGE_HOURS);
    let series = store
        .snapshot_series(
            definition_id,
            DateTime::<Utc>::UNIX_EPOCH,
            cutoff,
            Some(dimension_hash),
        )
        .await?;
    Ok(series
        .iter()
        .rev()
        .find(|s| s.is_success())
        .and_then(|s| s.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AlertRule, AlertSeverity, DimensionSet, Granularity, MetricKind, Period, ScheduleKind,
    };
    use crate::store::InMemoryStore;

    fn sample_definition(id: i64) -> MetricDefinition {
        let mut def = MetricDefinition::new(
            "requests_received",
            "Requests received",
            MetricKind::Count,
            Granularity::Day,
        );
        def.id = id;
        def
    }

    fn config_with_rules(metric_id: i64, rules: Vec<AlertRule>) -> MetricConfiguration {
        let mut config = MetricConfiguration::new(metric_id, ScheduleKind::Manual);
        config.alert_rules = rules;
        config
    }

    fn snapshot_days_back(definition_id: i64, back: i64, value: f64) -> MetricSnapshot {
        let start = Granularity::Day.truncate(Utc::now()) - Duration::days(back);
        let period = Period::try_new(start, start + Duration::days(1)).unwrap();
        MetricSnapshot::success(
            definition_id,
            1,
            period,
            Granularity::Day,
            value,
            format!("{:.2}", value),
            DimensionSet::new(),
        )
    }

    #[tokio::test]
    async fn test_max_rule_fires_above_threshold() {
        let store = InMemoryStore::new();
        let def = sample_definition(1);
        let config = config_with_rules(
            1,
            vec![AlertRule::new(AlertKind::Max, 100.0, AlertSeverity::Critical)],
        );

        let events = evaluate(&store, &def, &config, &snapshot_days_back(1, 1, 150.0)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Some(AlertSeverity::Critical));
        assert_eq!(events[0].value, 150.0);

        let quiet = evaluate(&store, &def, &config, &snapshot_days_back(1, 1, 80.0)).await;
        assert!(quiet.is_empty());
    }

    #[tokio::test]
    async fn test_rules_evaluate_in_order() {
        let store = InMemoryStore::new();
        let def = sample_definition(1);
        let config = config_with_rules(
            1,
            vec![
                AlertRule::new(AlertKind::Max, 100.0, AlertSeverity::Warning),
                AlertRule::new(AlertKind::Max, 200.0, AlertSeverity::Critical),
                AlertRule::new(AlertKind::Min, 10.0, AlertSeverity::Info),
            ],
        );

        let events = evaluate(&store, &def, &config, &snapshot_days_back(1, 1, 250.0)).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].severity, Some(AlertSeverity::Warning));
        assert_eq!(events[1].severity, Some(AlertSeverity::Critical));
    }

    #[tokio::test]
    async fn test_percent_change_against_day_old_baseline() {
        let store = InMemoryStore::new();
        let def = store
            .insert_definition(&MetricDefinition::new(
                "requests_received",
                "Requests received",
                MetricKind::Count,
                Granularity::Day,
            ))
            .await
            .unwrap();
        // baseline three days back, value 100
        store
            .insert_snapshot(&snapshot_days_back(def.id, 3, 100.0))
            .await
            .unwrap();

        let config = config_with_rules(
            def.id,
            vec![AlertRule::new(
                AlertKind::PercentChange,
                20.0,
                AlertSeverity::Warning,
            )],
        );

        // 150 vs 100 = +50%, above the 20% threshold
        let fresh = snapshot_days_back(def.id, 0, 150.0);
        let events = evaluate(&store, &def, &config, &fresh).await;
        assert_eq!(events.len(), 1);

        // 110 vs 100 = +10%, below threshold
        let calm = snapshot_days_back(def.id, 0, 110.0);
        let events = evaluate(&store, &def, &config, &calm).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_percent_change_without_baseline_never_fires() {
        let store = InMemoryStore::new();
        let def = sample_definition(1);
        let config = config_with_rules(
            1,
            vec![AlertRule::new(
                AlertKind::PercentChange,
                1.0,
                AlertSeverity::Critical,
            )],
        );

        let events = evaluate(&store, &def, &config, &snapshot_days_back(1, 0, 999.0)).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_error_snapshot_evaluates_nothing() {
        let store = InMemoryStore::new();
        let def = sample_definition(1);
        let config = config_with_rules(
            1,
            vec![AlertRule::new(AlertKind::Min, 1000.0, AlertSeverity::Info)],
        );

        let period = Granularity::Day.last_complete(Utc::now());
        let failed = MetricSnapshot::failure(
            1,
            1,
            period,
            Granularity::Day,
            DimensionSet::new(),
            "query failed",
        );
        let events = evaluate(&store, &def, &config, &failed).await;
        assert!(events.is_empty());
    }
}
