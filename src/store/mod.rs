//! Persistence layer
//!
//! The `MetricStore` trait is the persistence seam for definitions,
//! configurations and snapshots. The production backend is SQLite
//! (`SqliteStore`); `InMemoryStore` backs tests and ephemeral runs.
//!
//! Snapshot identity is enforced here: the store guarantees at most one
//! snapshot per (definition id, period start, period end, dimension hash)
//! and reports collisions as `StoreError::DuplicateSnapshot` so a racing
//! writer can fetch the winning row instead of duplicating it.

mod error;
mod memory;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{
    DefinitionFilter, MetricConfiguration, MetricDefinition, MetricSnapshot, SnapshotKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence operations for the metrics engine
#[async_trait]
pub trait MetricStore: Send + Sync {
    // Definitions

    /// Insert a new definition, returning it with its assigned id
    async fn insert_definition(&self, def: &MetricDefinition) -> StoreResult<MetricDefinition>;

    /// Update an existing definition in place
    async fn update_definition(&self, def: &MetricDefinition) -> StoreResult<()>;

    /// Fetch a definition by surrogate id
    async fn definition_by_id(&self, id: i64) -> StoreResult<Option<MetricDefinition>>;

    /// Fetch a definition by business code
    async fn definition_by_code(&self, code: &str) -> StoreResult<Option<MetricDefinition>>;

    /// List definitions matching a filter, ordered by code
    async fn list_definitions(
        &self,
        filter: &DefinitionFilter,
    ) -> StoreResult<Vec<MetricDefinition>>;

    /// Count definitions matching a filter, ignoring pagination
    async fn count_definitions(&self, filter: &DefinitionFilter) -> StoreResult<u64>;

    /// Record when a definition's metric was last collected
    async fn touch_last_collected(&self, id: i64, when: DateTime<Utc>) -> StoreResult<()>;

    // Configurations

    /// Insert or replace the configuration attached to a metric
    async fn upsert_configuration(
        &self,
        config: &MetricConfiguration,
    ) -> StoreResult<MetricConfiguration>;

    /// Fetch the configuration attached to a metric
    async fn configuration_by_metric(
        &self,
        metric_id: i64,
    ) -> StoreResult<Option<MetricConfiguration>>;

    /// List every stored configuration
    async fn list_configurations(&self) -> StoreResult<Vec<MetricConfiguration>>;

    // Snapshots

    /// Insert a snapshot; fails with `DuplicateSnapshot` on identity collision
    async fn insert_snapshot(&self, snapshot: &MetricSnapshot) -> StoreResult<MetricSnapshot>;

    /// Fetch a snapshot by its uniqueness key
    async fn find_snapshot(&self, key: &SnapshotKey) -> StoreResult<Option<MetricSnapshot>>;

    /// Most recent snapshot for a definition, optionally pinned to one
    /// dimension set
    async fn latest_snapshot(
        &self,
        definition_id: i64,
        dimension_hash: Option<&str>,
    ) -> StoreResult<Option<MetricSnapshot>>;

    /// Snapshots whose period starts inside [from, to), in chronological order
    async fn snapshot_series(
        &self,
        definition_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        dimension_hash: Option<&str>,
    ) -> StoreResult<Vec<MetricSnapshot>>;

    /// Latest successful snapshot per distinct dimension set, restricted to
    /// periods ending at or after `since`
    async fn latest_snapshots_by_dimension(
        &self,
        definition_id: i64,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricSnapshot>>;

    /// Delete snapshots whose period ended before the cutoff; returns the
    /// number deleted
    async fn delete_snapshots_older_than(
        &self,
        definition_id: i64,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Keep only the `keep` most recent snapshots; returns the number deleted
    async fn delete_oldest_beyond(&self, definition_id: i64, keep: u32) -> StoreResult<u64>;
}
