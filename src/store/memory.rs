//! In-memory metric store
//!
//! HashMap-backed implementation of `MetricStore` with the same identity
//! semantics as the SQLite backend (unique codes, unique snapshot keys,
//! one configuration per metric). Backs tests and ephemeral runs.

use crate::model::{
    DefinitionFilter, MetricConfiguration, MetricDefinition, MetricSnapshot, SnapshotKey,
    SnapshotStatus,
};
use crate::store::error::{StoreError, StoreResult};
use crate::store::MetricStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct Inner {
    definitions: HashMap<i64, MetricDefinition>,
    codes: HashMap<String, i64>,
    /// Keyed by metric id (one configuration per definition)
    configurations: HashMap<i64, MetricConfiguration>,
    snapshots: Vec<MetricSnapshot>,
    next_definition_id: i64,
    next_configuration_id: i64,
    next_snapshot_id: i64,
}

/// HashMap-backed store for tests and ephemeral runs
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl MetricStore for InMemoryStore {
    async fn insert_definition(&self, def: &MetricDefinition) -> StoreResult<MetricDefinition> {
        let mut inner = self.write()?;
        if inner.codes.contains_key(&def.code) {
            return Err(StoreError::DuplicateCode(def.code.clone()));
        }

        inner.next_definition_id += 1;
        let mut stored = def.clone();
        stored.id = inner.next_definition_id;
        inner.codes.insert(stored.code.clone(), stored.id);
        inner.definitions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_definition(&self, def: &MetricDefinition) -> StoreResult<()> {
        let mut inner = self.write()?;
        let existing_code = match inner.definitions.get(&def.id) {
            Some(existing) => existing.code.clone(),
            None => return Err(StoreError::DefinitionNotFound(format!("id {}", def.id))),
        };

        // code is immutable
        let mut updated = def.clone();
        updated.code = existing_code;
        inner.definitions.insert(def.id, updated);
        Ok(())
    }

    async fn definition_by_id(&self, id: i64) -> StoreResult<Option<MetricDefinition>> {
        Ok(self.read()?.definitions.get(&id).cloned())
    }

    async fn definition_by_code(&self, code: &str) -> StoreResult<Option<MetricDefinition>> {
        let inner = self.read()?;
        Ok(inner
            .codes
            .get(code)
            .and_then(|id| inner.definitions.get(id))
            .cloned())
    }

    async fn list_definitions(
        &self,
        filter: &DefinitionFilter,
    ) -> StoreResult<Vec<MetricDefinition>> {
        let inner = self.read()?;
        let mut matched: Vec<MetricDefinition> = inner
            .definitions
            .values()
            .filter(|def| filter.matches(def))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.code.cmp(&b.code));

        let offset = filter.offset as usize;
        let matched = if offset >= matched.len() {
            Vec::new()
        } else {
            matched.split_off(offset)
        };

        Ok(match filter.limit {
            Some(limit) => matched.into_iter().take(limit as usize).collect(),
            None => matched,
        })
    }

    async fn count_definitions(&self, filter: &DefinitionFilter) -> StoreResult<u64> {
        let inner = self.read()?;
        Ok(inner
            .definitions
            .values()
            .filter(|def| filter.matches(def))
            .count() as u64)
    }

    async fn touch_last_collected(&self, id: i64, when: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.write()?;
        match inner.definitions.get_mut(&id) {
            Some(def) => {
                def.last_collected_at = Some(when);
                Ok(())
            }
            None => Err(StoreError::DefinitionNotFound(format!("id {}", id))),
        }
    }

    async fn upsert_configuration(
        &self,
        config: &MetricConfiguration,
    ) -> StoreResult<MetricConfiguration> {
        let mut inner = self.write()?;
        if !inner.definitions.contains_key(&config.metric_id) {
            return Err(StoreError::DefinitionNotFound(format!(
                "id {}",
                config.metric_id
            )));
        }

        let mut stored = config.clone();
        match inner.configurations.get(&config.metric_id) {
            Some(existing) => stored.id = existing.id,
            None => {
                inner.next_configuration_id += 1;
                stored.id = inner.next_configuration_id;
            }
        }
        inner.configurations.insert(config.metric_id, stored.clone());
        Ok(stored)
    }

    async fn configuration_by_metric(
        &self,
        metric_id: i64,
    ) -> StoreResult<Option<MetricConfiguration>> {
        Ok(self.read()?.configurations.get(&metric_id).cloned())
    }

    async fn list_configurations(&self) -> StoreResult<Vec<MetricConfiguration>> {
        let inner = self.read()?;
        let mut configs: Vec<MetricConfiguration> =
            inner.configurations.values().cloned().collect();
        configs.sort_by_key(|c| c.metric_id);
        Ok(configs)
    }

    async fn insert_snapshot(&self, snapshot: &MetricSnapshot) -> StoreResult<MetricSnapshot> {
        let mut inner = self.write()?;
        if !inner.definitions.contains_key(&snapshot.definition_id) {
            return Err(StoreError::DefinitionNotFound(format!(
                "id {}",
                snapshot.definition_id
            )));
        }

        let key = snapshot.key();
        if inner.snapshots.iter().any(|s| s.key() == key) {
            return Err(StoreError::DuplicateSnapshot {
                definition_id: snapshot.definition_id,
                dimension_hash: snapshot.dimension_hash.clone(),
            });
        }

        inner.next_snapshot_id += 1;
        let mut stored = snapshot.clone();
        stored.id = inner.next_snapshot_id;
        inner.snapshots.push(stored.clone());
        Ok(stored)
    }

    async fn find_snapshot(&self, key: &SnapshotKey) -> StoreResult<Option<MetricSnapshot>> {
        let inner = self.read()?;
        Ok(inner.snapshots.iter().find(|s| &s.key() == key).cloned())
    }

    async fn latest_snapshot(
        &self,
        definition_id: i64,
        dimension_hash: Option<&str>,
    ) -> StoreResult<Option<MetricSnapshot>> {
        let inner = self.read()?;
        Ok(inner
            .snapshots
            .iter()
            .filter(|s| s.definition_id == definition_id)
            .filter(|s| dimension_hash.map_or(true, |h| s.dimension_hash == h))
            .max_by_key(|s| (s.period.end, s.id))
            .cloned())
    }

    async fn snapshot_series(
        &self,
        definition_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        dimension_hash: Option<&str>,
    ) -> StoreResult<Vec<MetricSnapshot>> {
        let inner = self.read()?;
        let mut series: Vec<MetricSnapshot> = inner
            .snapshots
            .iter()
            .filter(|s| s.definition_id == definition_id)
            .filter(|s| s.period.start >= from && s.period.start < to)
            .filter(|s| dimension_hash.map_or(true, |h| s.dimension_hash == h))
            .cloned()
            .collect();
        series.sort_by_key(|s| s.period.start);
        Ok(series)
    }

    async fn latest_snapshots_by_dimension(
        &self,
        definition_id: i64,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricSnapshot>> {
        let inner = self.read()?;
        let mut by_hash: HashMap<&str, &MetricSnapshot> = HashMap::new();
        for snap in inner
            .snapshots
            .iter()
            .filter(|s| s.definition_id == definition_id)
            .filter(|s| s.status == SnapshotStatus::Success)
            .filter(|s| s.period.end >= since)
        {
            let keep = by_hash
                .get(snap.dimension_hash.as_str())
                .map_or(true, |current| {
                    (snap.period.end, snap.id) > (current.period.end, current.id)
                });
            if keep {
                by_hash.insert(snap.dimension_hash.as_str(), snap);
            }
        }

        let mut latest: Vec<MetricSnapshot> = by_hash.into_values().cloned().collect();
        latest.sort_by(|a, b| a.dimension_hash.cmp(&b.dimension_hash));
        Ok(latest)
    }

    async fn delete_snapshots_older_than(
        &self,
        definition_id: i64,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut inner = self.write()?;
        let before = inner.snapshots.len();
        inner
            .snapshots
            .retain(|s| s.definition_id != definition_id || s.period.end >= cutoff);
        Ok((before - inner.snapshots.len()) as u64)
    }

    async fn delete_oldest_beyond(&self, definition_id: i64, keep: u32) -> StoreResult<u64> {
        let mut inner = self.write()?;
        let mut keys: Vec<(DateTime<Utc>, i64)> = inner
            .snapshots
            .iter()
            .filter(|s| s.definition_id == definition_id)
            .map(|s| (s.period.end, s.id))
            .collect();
        if keys.len() <= keep as usize {
            return Ok(0);
        }

        // newest first; everything past `keep` is pruned
        keys.sort_by(|a, b| b.cmp(a));
        let doomed: Vec<i64> = keys[keep as usize..].iter().map(|(_, id)| *id).collect();
        inner.snapshots.retain(|s| !doomed.contains(&s.id));
        Ok(doomed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, DimensionSet, Granularity, MetricKind, Period};
    use chrono::{Duration, TimeZone};

    fn sample_definition(code: &str) -> MetricDefinition {
        MetricDefinition::new(code, "Requests received", MetricKind::Count, Granularity::Day)
            .category(Category::Requests)
            .query_template("SELECT COUNT(*) FROM requests")
    }

    fn day_period(day: u32) -> Period {
        let start = Utc.with_ymd_and_hms(2025, 3, day, 0, 0, 0).unwrap();
        Period::try_new(start, start + Duration::days(1)).unwrap()
    }

    fn sample_snapshot(definition_id: i64, day: u32, value: f64) -> MetricSnapshot {
        MetricSnapshot::success(
            definition_id,
            1,
            day_period(day),
            Granularity::Day,
            value,
            format!("{:.2}", value),
            DimensionSet::new(),
        )
    }

    #[tokio::test]
    async fn test_matches_sqlite_identity_semantics() {
        let store = InMemoryStore::new();
        let def = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();

        assert!(matches!(
            store
                .insert_definition(&sample_definition("requests_received"))
                .await,
            Err(StoreError::DuplicateCode(_))
        ));

        let snap = sample_snapshot(def.id, 10, 1.0);
        store.insert_snapshot(&snap).await.unwrap();
        assert!(matches!(
            store.insert_snapshot(&snap).await,
            Err(StoreError::DuplicateSnapshot { .. })
        ));
    }

    #[tokio::test]
    async fn test_code_immutable_across_update() {
        let store = InMemoryStore::new();
        let mut def = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();

        def.code = "renamed".to_string();
        def.name = "Renamed".to_string();
        store.update_definition(&def).await.unwrap();

        let reloaded = store.definition_by_id(def.id).await.unwrap().unwrap();
        assert_eq!(reloaded.code, "requests_received");
        assert_eq!(reloaded.name, "Renamed");
    }

    #[tokio::test]
    async fn test_count_retention() {
        let store = InMemoryStore::new();
        let def = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();

        for day in 10..15 {
            store
                .insert_snapshot(&sample_snapshot(def.id, day, day as f64))
                .await
                .unwrap();
        }

        let deleted = store.delete_oldest_beyond(def.id, 3).await.unwrap();
        assert_eq!(deleted, 2);

        let latest = store.latest_snapshot(def.id, None).await.unwrap().unwrap();
        assert_eq!(latest.value, Some(14.0));
    }
}
