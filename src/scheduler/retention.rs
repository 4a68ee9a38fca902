//! Snapshot retention pruning
//!
//! Applied after each successful collection, scoped to the collected
//! metric: first drop snapshots older than the configured age, then drop
//! the oldest rows beyond the configured count. Retention never touches
//! other metrics' history.

use crate::model::RetentionPolicy;
use crate::store::{MetricStore, StoreResult};
use chrono::{Duration, Utc};
use tracing::info;

/// What one pruning pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub pruned_by_age: u64,
    pub pruned_by_count: u64,
}

impl RetentionOutcome {
    pub fn total(&self) -> u64 {
        self.pruned_by_age + self.pruned_by_count
    }
}

/// Prune one metric's snapshots per its retention policy
pub async fn apply(
    store: &dyn MetricStore,
    definition_id: i64,
    policy: &RetentionPolicy,
) -> StoreResult<RetentionOutcome> {
    if policy.is_unlimited() {
        return Ok(RetentionOutcome::default());
    }

    let mut outcome = RetentionOutcome::default();

    if let Some(max_age_days) = policy.age_limit() {
        let cutoff = Utc::now() - Duration::days(max_age_days as i64);
        outcome.pruned_by_age = store
            .delete_snapshots_older_than(definition_id, cutoff)
            .await?;
    }

    if let Some(max_count) = policy.count_limit() {
        outcome.pruned_by_count = store.delete_oldest_beyond(definition_id, max_count).await?;
    }

    if outcome.total() > 0 {
        info!(
            definition_id,
            by_age = outcome.pruned_by_age,
            by_count = outcome.pruned_by_count,
            "pruned snapshots"
        );
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        DimensionSet, Granularity, MetricDefinition, MetricKind, MetricSnapshot, Period,
    };
    use crate::store::InMemoryStore;

    async fn seeded(days_back: &[i64]) -> (InMemoryStore, i64) {
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

        for &back in days_back {
            let start = Granularity::Day.truncate(Utc::now()) - Duration::days(back);
            let period = Period::try_new(start, start + Duration::days(1)).unwrap();
            store
                .insert_snapshot(&MetricSnapshot::success(
                    def.id,
                    1,
                    period,
                    Granularity::Day,
                    back as f64,
                    format!("{}", back),
                    DimensionSet::new(),
                ))
                .await
                .unwrap();
        }
        (store, def.id)
    }

    #[tokio::test]
    async fn test_unlimited_policy_is_a_noop() {
        let (store, id) = seeded(&[1, 2, 3]).await;
        let outcome = apply(&store, id, &RetentionPolicy::default()).await.unwrap();
        assert_eq!(outcome.total(), 0);
    }

    #[tokio::test]
    async fn test_count_cap_keeps_newest() {
        let (store, id) = seeded(&[1, 2, 3, 4, 5]).await;
        let outcome = apply(&store, id, &RetentionPolicy::new(0, 3)).await.unwrap();

        assert_eq!(outcome.pruned_by_count, 2);
        let latest = store.latest_snapshot(id, None).await.unwrap().unwrap();
        // the newest snapshot (1 day back) survives
        assert_eq!(latest.value, Some(1.0));
    }

    #[tokio::test]
    async fn test_age_limit_drops_old_periods() {
        let (store, id) = seeded(&[1, 5, 40, 90]).await;
        let outcome = apply(&store, id, &RetentionPolicy::new(30, 0)).await.unwrap();

        assert_eq!(outcome.pruned_by_age, 2);
        assert_eq!(outcome.pruned_by_count, 0);
    }

    #[tokio::test]
    async fn test_age_then_count() {
        let (store, id) = seeded(&[1, 2, 3, 40, 50]).await;
        let outcome = apply(&store, id, &RetentionPolicy::new(30, 2)).await.unwrap();

        assert_eq!(outcome.pruned_by_age, 2);
        assert_eq!(outcome.pruned_by_count, 1);
    }
}
