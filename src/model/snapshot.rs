//! Metric snapshots
//!
//! A `MetricSnapshot` is one immutable computed value for a metric over a
//! specific period and dimension set. Snapshots record the definition
//! version in force at compute time, so a later edit to the definition
//! never corrupts the historical series. Uniqueness is enforced on
//! (definition id, period start, period end, dimension hash).

use crate::model::period::{Granularity, Period};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest error message persisted on a failed snapshot
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// An ordered key/value map narrowing a metric's computation
///
/// Ordering is canonical (BTreeMap), so two sets with the same entries
/// always produce the same hash regardless of insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DimensionSet(BTreeMap<String, String>);

impl DimensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Deterministic 8-hex-char hash of the canonical `key=value` listing
    pub fn hash_hex(&self) -> String {
        let mut hasher = crc32fast::Hasher::new();
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                hasher.update(b";");
            }
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        format!("{:08x}", hasher.finalize())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DimensionSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl std::fmt::Display for DimensionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(none)");
        }
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Outcome of a collection run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Success,
    Error,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Identity of a snapshot under the uniqueness constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotKey {
    pub definition_id: i64,
    pub period: Period,
    pub dimension_hash: String,
}

impl SnapshotKey {
    pub fn new(definition_id: i64, period: Period, dimensions: &DimensionSet) -> Self {
        Self {
            definition_id,
            period,
            dimension_hash: dimensions.hash_hex(),
        }
    }
}

/// One computed value for a metric over a period and dimension set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSnapshot {
    /// Surrogate identifier, assigned by the store (0 before persistence)
    pub id: i64,
    pub definition_id: i64,
    /// Definition version in force when the value was computed
    pub definition_version: i64,
    pub period: Period,
    pub granularity: Granularity,
    /// Computed value; absent on error snapshots
    pub value: Option<f64>,
    /// Value rendered per the definition's display rules
    #[serde(default)]
    pub formatted_value: Option<String>,
    #[serde(default)]
    pub dimensions: DimensionSet,
    /// Hash of `dimensions`, part of the uniqueness key
    pub dimension_hash: String,
    /// Pass-through payload from event-triggered collections
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Wall-clock time the computation took
    pub compute_duration_ms: u64,
    pub status: SnapshotStatus,
    /// Truncated failure message; present only on error snapshots
    #[serde(default)]
    pub error_message: Option<String>,
    pub collected_at: DateTime<Utc>,
}

impl MetricSnapshot {
    /// Create a successful snapshot
    pub fn success(
        definition_id: i64,
        definition_version: i64,
        period: Period,
        granularity: Granularity,
        value: f64,
        formatted_value: String,
        dimensions: DimensionSet,
    ) -> Self {
        let dimension_hash = dimensions.hash_hex();
        Self {
            id: 0,
            definition_id,
            definition_version,
            period,
            granularity,
            value: Some(value),
            formatted_value: Some(formatted_value),
            dimensions,
            dimension_hash,
            metadata: serde_json::Value::Null,
            compute_duration_ms: 0,
            status: SnapshotStatus::Success,
            error_message: None,
            collected_at: Utc::now(),
        }
    }

    /// Create an error snapshot carrying the truncated failure message
    pub fn failure(
        definition_id: i64,
        definition_version: i64,
        period: Period,
        granularity: Granularity,
        dimensions: DimensionSet,
        error: &str,
    ) -> Self {
        let dimension_hash = dimensions.hash_hex();
        Self {
            id: 0,
            definition_id,
            definition_version,
            period,
            granularity,
            value: None,
            formatted_value: None,
            dimensions,
            dimension_hash,
            metadata: serde_json::Value::Null,
            compute_duration_ms: 0,
            status: SnapshotStatus::Error,
            error_message: Some(truncate_error(error)),
            collected_at: Utc::now(),
        }
    }

    /// Builder: record the compute duration
    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.compute_duration_ms = ms;
        self
    }

    /// Builder: attach free-form metadata
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Identity under the uniqueness constraint
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            definition_id: self.definition_id,
            period: self.period,
            dimension_hash: self.dimension_hash.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SnapshotStatus::Success
    }
}

/// Truncate an error message to the persisted limit, on char boundaries
pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        message.to_string()
    } else {
        message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_period() -> Period {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 11, 0, 0, 0).unwrap();
        Period::try_new(start, end).unwrap()
    }

    #[test]
    fn test_dimension_hash_is_order_independent() {
        let mut a = DimensionSet::new();
        a.insert("region", "sudeste");
        a.insert("benefit", "bpc");

        let mut b = DimensionSet::new();
        b.insert("benefit", "bpc");
        b.insert("region", "sudeste");

        assert_eq!(a.hash_hex(), b.hash_hex());
        assert_eq!(a.hash_hex().len(), 8);
    }

    #[test]
    fn test_dimension_hash_distinguishes_values() {
        let a = DimensionSet::new().with("region", "sudeste");
        let b = DimensionSet::new().with("region", "nordeste");
        assert_ne!(a.hash_hex(), b.hash_hex());
    }

    #[test]
    fn test_empty_dimension_hash_is_stable() {
        assert_eq!(DimensionSet::new().hash_hex(), "00000000");
    }

    #[test]
    fn test_success_snapshot() {
        let snap = MetricSnapshot::success(
            7,
            2,
            sample_period(),
            Granularity::Day,
            1234.5,
            "1234.50".to_string(),
            DimensionSet::new().with("region", "sul"),
        )
        .duration_ms(42);

        assert!(snap.is_success());
        assert_eq!(snap.value, Some(1234.5));
        assert_eq!(snap.definition_version, 2);
        assert_eq!(snap.compute_duration_ms, 42);
        assert_eq!(snap.dimension_hash, snap.dimensions.hash_hex());
        assert!(snap.error_message.is_none());
    }

    #[test]
    fn test_failure_snapshot_truncates_message() {
        let long = "x".repeat(800);
        let snap = MetricSnapshot::failure(
            7,
            1,
            sample_period(),
            Granularity::Day,
            DimensionSet::new(),
            &long,
        );

        assert!(!snap.is_success());
        assert_eq!(snap.value, None);
        assert_eq!(
            snap.error_message.as_ref().unwrap().chars().count(),
            MAX_ERROR_MESSAGE_LEN
        );
    }

    #[test]
    fn test_snapshot_key_matches_dimensions() {
        let dims = DimensionSet::new().with("uf", "mg");
        let snap = MetricSnapshot::success(
            3,
            1,
            sample_period(),
            Granularity::Day,
            1.0,
            "1.00".to_string(),
            dims.clone(),
        );

        let key = snap.key();
        assert_eq!(key, SnapshotKey::new(3, sample_period(), &dims));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [SnapshotStatus::Success, SnapshotStatus::Error] {
            assert_eq!(SnapshotStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SnapshotStatus::parse("pending"), None);
    }

    #[test]
    fn test_serialization_round_trip() {
        let snap = MetricSnapshot::success(
            1,
            1,
            sample_period(),
            Granularity::Day,
            10.0,
            "10.00".to_string(),
            DimensionSet::new(),
        );
        let json = serde_json::to_string(&snap).unwrap();
        let restored: MetricSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, restored);
    }
}
