//! TTL cache over definitions and snapshots
//!
//! Shared read-side cache with three key families:
//!
//! 1. definition by code
//! 2. latest snapshot by (definition id, dimension hash)
//! 3. snapshot series by (definition id, dimension hash, period hash)
//!
//! Every entry carries its own expiry so per-metric TTL overrides from the
//! configuration coexist with the engine default. Expiry is enforced on
//! read; `purge_expired` sweeps the rest. Invalidation by definition id
//! removes every entry referencing that metric across all families, so a
//! fresh snapshot or definition update is visible to the next read without
//! a full flush. Hit and miss counters feed the cache statistics endpoint.

use crate::model::{MetricDefinition, MetricSnapshot};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Fallback entry lifetime when a configuration does not set one
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Counters and entry counts for the statistics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub definition_entries: usize,
    pub latest_entries: usize,
    pub series_entries: usize,
}

/// Concurrent TTL cache shared by the collector, catalog and API
pub struct MetricCache {
    default_ttl: Duration,
    definitions: RwLock<HashMap<String, Entry<MetricDefinition>>>,
    latest: RwLock<HashMap<(i64, String), Entry<MetricSnapshot>>>,
    series: RwLock<HashMap<(i64, String, String), Entry<Vec<MetricSnapshot>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MetricCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            definitions: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
            series: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached definition by code, if present and fresh
    pub async fn definition(&self, code: &str) -> Option<MetricDefinition> {
        let fresh = {
            let map = self.definitions.read().await;
            match map.get(code) {
                Some(entry) if !entry.expired() => Some(entry.value.clone()),
                Some(_) => None,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };

        match fresh {
            Some(def) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(def)
            }
            None => {
                // expired: drop the stale entry under the write lock
                self.definitions.write().await.remove(code);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put_definition(&self, definition: &MetricDefinition, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.definitions
            .write()
            .await
            .insert(definition.code.clone(), Entry::new(definition.clone(), ttl));
    }

    /// Cached latest snapshot for a (definition, dimension set)
    pub async fn latest(&self, definition_id: i64, dimension_hash: &str) -> Option<MetricSnapshot> {
        let key = (definition_id, dimension_hash.to_string());
        let fresh = {
            let map = self.latest.read().await;
            match map.get(&key) {
                Some(entry) if !entry.expired() => Some(entry.value.clone()),
                Some(_) => None,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };

        match fresh {
            Some(snap) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(snap)
            }
            None => {
                self.latest.write().await.remove(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put_latest(&self, snapshot: &MetricSnapshot, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let key = (snapshot.definition_id, snapshot.dimension_hash.clone());
        self.latest
            .write()
            .await
            .insert(key, Entry::new(snapshot.clone(), ttl));
    }

    /// Cached series for a (definition, dimension set, period range)
    pub async fn series(
        &self,
        definition_id: i64,
        dimension_hash: &str,
        period_hash: &str,
    ) -> Option<Vec<MetricSnapshot>> {
        let key = (
            definition_id,
            dimension_hash.to_string(),
            period_hash.to_string(),
        );
        let fresh = {
            let map = self.series.read().await;
            match map.get(&key) {
                Some(entry) if !entry.expired() => Some(entry.value.clone()),
                Some(_) => None,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };

        match fresh {
            Some(snaps) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(snaps)
            }
            None => {
                self.series.write().await.remove(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put_series(
        &self,
        definition_id: i64,
        dimension_hash: &str,
        period_hash: &str,
        snapshots: Vec<MetricSnapshot>,
        ttl: Option<Duration>,
    ) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let key = (
            definition_id,
            dimension_hash.to_string(),
            period_hash.to_string(),
        );
        self.series
            .write()
            .await
            .insert(key, Entry::new(snapshots, ttl));
    }

    /// Remove every entry referencing `definition_id` across all families
    pub async fn invalidate(&self, definition_id: i64) {
        self.definitions
            .write()
            .await
            .retain(|_, entry| entry.value.id != definition_id);
        self.latest
            .write()
            .await
            .retain(|(id, _), _| *id != definition_id);
        self.series
            .write()
            .await
            .retain(|(id, _, _), _| *id != definition_id);
    }

    /// Drop everything and reset the counters
    pub async fn clear(&self) {
        self.definitions.write().await.clear();
        self.latest.write().await.clear();
        self.series.write().await.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Sweep entries whose TTL has lapsed without waiting for a read
    pub async fn purge_expired(&self) {
        self.definitions
            .write()
            .await
            .retain(|_, entry| !entry.expired());
        self.latest.write().await.retain(|_, entry| !entry.expired());
        self.series.write().await.retain(|_, entry| !entry.expired());
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            definition_entries: self.definitions.read().await.len(),
            latest_entries: self.latest.read().await.len(),
            series_entries: self.series.read().await.len(),
        }
    }
}
