//! Z-score anomaly detection
//!
//! Classifies a candidate value against a historical window of snapshot
//! values. The z-score is the distance from the window mean in standard
//! deviations; the confidence level maps to a fixed threshold. Windows
//! below the minimum sample size produce a neutral, non-anomalous result
//! so thin series never error.
//!
//! The batch sweep walks every active metric's most recent snapshot per
//! dimension set and tests it against the preceding window; callers
//! publish the returned findings as anomaly events.

use crate::analytics::{mean, std_dev, ConfidenceLevel, MIN_SAMPLE_SIZE};
use crate::model::{DefinitionFilter, DimensionSet, Period};
use crate::store::{MetricStore, StoreResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Outcome of testing one candidate value against its history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    /// Distance from the window mean in standard deviations (absolute)
    pub z_score: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// Threshold the z-score was compared against
    pub threshold: f64,
    pub confidence: ConfidenceLevel,
    /// Number of historical points the statistics were computed from
    pub sample_size: usize,
    pub checked_at: DateTime<Utc>,
}

impl AnomalyResult {
    /// Non-anomalous result with zero statistics, used below the minimum
    /// sample size.
    fn neutral(confidence: ConfidenceLevel, sample_size: usize) -> Self {
        Self {
            is_anomaly: false,
            z_score: 0.0,
            mean: 0.0,
            std_dev: 0.0,
            threshold: confidence.z_threshold(),
            confidence,
            sample_size,
            checked_at: Utc::now(),
        }
    }
}

/// Statistical anomaly detector over historical snapshot values
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    min_samples: usize,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self {
            min_samples: MIN_SAMPLE_SIZE,
        }
    }

    /// Override the minimum window size (primarily for tests)
    pub fn with_min_samples(min_samples: usize) -> Self {
        Self { min_samples }
    }

    /// Test `candidate` against the historical window.
    ///
    /// A zero-spread window (std dev 0) yields a zero z-score rather than
    /// a division error; the candidate is then never flagged.
    pub fn detect(
        &self,
        candidate: f64,
        history: &[f64],
        confidence: ConfidenceLevel,
    ) -> AnomalyResult {
        if history.len() < self.min_samples {
            return AnomalyResult::neutral(confidence, history.len());
        }

        let m = mean(history);
        let sd = std_dev(history);
        let z_score = if sd == 0.0 {
            0.0
        } else {
            (candidate - m).abs() / sd
        };
        let threshold = confidence.z_threshold();

        AnomalyResult {
            is_anomaly: z_score > threshold,
            z_score,
            mean: m,
            std_dev: sd,
            threshold,
            confidence,
            sample_size: history.len(),
            checked_at: Utc::now(),
        }
    }
}

/// One flagged value from a batch sweep
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyFinding {
    pub definition_id: i64,
    pub metric_code: String,
    pub metric_name: String,
    pub value: f64,
    pub dimensions: DimensionSet,
    pub dimension_hash: String,
    pub period: Period,
    pub result: AnomalyResult,
}

/// Batch detector over every active metric's recent snapshots
pub struct AnomalySweep {
    store: Arc<dyn MetricStore>,
    detector: AnomalyDetector,
    confidence: ConfidenceLevel,
    /// How recent a snapshot must be to count as a candidate
    lookback: Duration,
    /// How far back the comparison window reaches
    history: Duration,
}

impl AnomalySweep {
    pub fn new(store: Arc<dyn MetricStore>, confidence: ConfidenceLevel) -> Self {
        Self {
            store,
            detector: AnomalyDetector::new(),
            confidence,
            lookback: Duration::hours(24),
            history: Duration::days(30),
        }
    }

    pub fn lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn history(mut self, history: Duration) -> Self {
        self.history = history;
        self
    }

    /// Test the most recent snapshot per dimension set of every active
    /// metric against its preceding window; return the flagged ones.
    pub async fn run(&self) -> StoreResult<Vec<AnomalyFinding>> {
        // the default filter already excludes deactivated definitions
        let active = self
            .store
            .list_definitions(&DefinitionFilter::new())
            .await?;

        let since = Utc::now() - self.lookback;
        let mut findings = Vec::new();

        for definition in active {
            let candidates = self
                .store
                .latest_snapshots_by_dimension(definition.id, since)
                .await?;

            for candidate in candidates {
                let value = match candidate.value {
                    Some(value) => value,
                    None => continue,
                };

                let window = self
                    .store
                    .snapshot_series(
                        definition.id,
                        candidate.period.start - self.history,
                        candidate.period.start,
                        Some(&candidate.dimension_hash),
                    )
                    .await?;
                let history: Vec<f64> = window
                    .iter()
                    .filter(|s| s.is_success())
                    .filter_map(|s| s.value)
                    .collect();

                let result = self.detector.detect(value, &history, self.confidence);
                if result.is_anomaly {
                    debug!(
                        metric = %definition.code,
                        dimension_hash = %candidate.dimension_hash,
                        value,
                        z_score = result.z_score,
                        "anomalous snapshot flagged"
                    );
                    findings.push(AnomalyFinding {
                        definition_id: definition.id,
                        metric_code: definition.code.clone(),
                        metric_name: definition.name.clone(),
                        value,
                        dimensions: candidate.dimensions.clone(),
                        dimension_hash: candidate.dimension_hash.clone(),
                        period: candidate.period,
                        result,
                    });
                }
            }
        }

        Ok(findings)
    }
}
