//! Snapshot collection
//!
//! One collection run: resolve the period, short-circuit if a snapshot for
//! the (metric, period, dimensions) identity already exists, otherwise
//! compute under the configured timeout and persist the result — success
//! or failure, a row is written either way so gaps are visible. After a
//! successful write the collector updates the cache, evaluates alert
//! rules, and applies retention, none of which can fail the collection.

use crate::cache::MetricCache;
use crate::engine::CalculationEngine;
use crate::events::EventPublisher;
use crate::model::{
    DimensionSet, MetricConfiguration, MetricDefinition, MetricSnapshot, Period, SnapshotKey,
    truncate_error,
};
use crate::scheduler::{alerts, retention};
use crate::store::{MetricStore, StoreError, StoreResult};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Parameters for one collection run
#[derive(Debug, Clone, Default)]
pub struct CollectRequest {
    /// Dimension values the snapshot is sliced by
    pub dimensions: DimensionSet,
    /// Explicit period override; None collects the last complete period
    pub period: Option<Period>,
    /// Free-form metadata carried onto the snapshot
    pub metadata: serde_json::Value,
}

impl CollectRequest {
    pub fn new() -> Self {
        Self {
            dimensions: DimensionSet::new(),
            period: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn dimensions(mut self, dimensions: DimensionSet) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of one collection run
#[derive(Debug, Clone, Serialize)]
pub struct CollectOutcome {
    pub snapshot: MetricSnapshot,
    /// False when an existing snapshot satisfied the request
    pub computed: bool,
    /// Alert events successfully handed to the publisher
    pub alerts_published: usize,
}

/// Executes collection runs for the scheduler and for manual requests
pub struct Collector {
    store: Arc<dyn MetricStore>,
    engine: Arc<CalculationEngine>,
    cache: Arc<MetricCache>,
    publisher: Arc<dyn EventPublisher>,
}

impl Collector {
    pub fn new(
        store: Arc<dyn MetricStore>,
        engine: Arc<CalculationEngine>,
        cache: Arc<MetricCache>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            engine,
            cache,
            publisher,
        }
    }

    /// Run one collection for a metric under its configuration.
    ///
    /// Collection is idempotent per (metric, period, dimension set): a
    /// second run for the same identity returns the stored snapshot
    /// without recomputing, whether it raced another collector or simply
    /// came later.
    pub async fn collect(
        &self,
        definition: &MetricDefinition,
        config: &MetricConfiguration,
        request: CollectRequest,
    ) -> StoreResult<CollectOutcome> {
        let period = request
            .period
            .unwrap_or_else(|| definition.granularity.last_complete(Utc::now()));
        let key = SnapshotKey::new(definition.id, period, &request.dimensions);

        if let Some(existing) = self.store.find_snapshot(&key).await? {
            debug!(
                metric = %definition.code,
                period = %period.start,
                "snapshot already collected, skipping"
            );
            return Ok(CollectOutcome {
                snapshot: existing,
                computed: false,
                alerts_published: 0,
            });
        }

        let snapshot = self.compute_snapshot(definition, config, period, &request).await;

        let stored = match self.store.insert_snapshot(&snapshot).await {
            Ok(stored) => stored,
            // lost the race to another collector; the winning row stands
            Err(StoreError::DuplicateSnapshot { .. }) => {
                let winner = self.store.find_snapshot(&key).await?;
                return match winner {
                    Some(snapshot) => Ok(CollectOutcome {
                        snapshot,
                        computed: false,
                        alerts_published: 0,
                    }),
                    None => Err(StoreError::DuplicateSnapshot {
                        definition_id: key.definition_id,
                        dimension_hash: key.dimension_hash,
                    }),
                };
            }
            Err(err) => return Err(err),
        };

        self.store
            .touch_last_collected(definition.id, stored.collected_at)
            .await?;

        self.cache.invalidate(definition.id).await;
        if config.cache_enabled && stored.is_success() {
            let ttl = config.cache_ttl_secs.map(Duration::from_secs);
            self.cache.put_latest(&stored, ttl).await;
        }

        let mut alerts_published = 0;
        if stored.is_success() {
            for event in alerts::evaluate(&*self.store, definition, config, &stored).await {
                match self.publisher.publish(&event).await {
                    Ok(()) => alerts_published += 1,
                    Err(err) => warn!(
                        metric = %definition.code,
                        publisher = self.publisher.name(),
                        error = %err,
                        "alert delivery failed"
                    ),
                }
            }
        }

        if let Err(err) = retention::apply(&*self.store, definition.id, &config.retention).await {
            warn!(metric = %definition.code, error = %err, "retention pruning failed");
        }

        Ok(CollectOutcome {
            snapshot: stored,
            computed: true,
            alerts_published,
        })
    }

    /// Compute the metric under the configured timeout; errors and
    /// timeouts become failure snapshots rather than bubbling up.
    async fn compute_snapshot(
        &self,
        definition: &MetricDefinition,
        config: &MetricConfiguration,
        period: Period,
        request: &CollectRequest,
    ) -> MetricSnapshot {
        let timeout = Duration::from_secs(config.collection_timeout_secs);
        let started = Instant::now();
        let computed = tokio::time::timeout(
            timeout,
            self.engine.compute(definition, period, &request.dimensions),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let snapshot = match computed {
            Ok(Ok(value)) => MetricSnapshot::success(
                definition.id,
                definition.version,
                period,
                definition.granularity,
                value,
                definition.format_value(value),
                request.dimensions.clone(),
            ),
            Ok(Err(err)) => {
                warn!(metric = %definition.code, error = %err, "collection failed");
                MetricSnapshot::failure(
                    definition.id,
                    definition.version,
                    period,
                    definition.granularity,
                    request.dimensions.clone(),
                    &truncate_error(&err.to_string()),
                )
            }
            Err(_) => {
                warn!(
                    metric = %definition.code,
                    timeout_secs = config.collection_timeout_secs,
                    "collection timed out"
                );
                MetricSnapshot::failure(
                    definition.id,
                    definition.version,
                    period,
                    definition.granularity,
                    request.dimensions.clone(),
                    &format!(
                        "collection timed out after {}s",
                        config.collection_timeout_secs
                    ),
                )
            }
        };

        snapshot
            .duration_ms(elapsed_ms)
            .metadata(request.metadata.clone())
    }
}
