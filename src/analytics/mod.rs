//! Statistical analysis over snapshot series
//!
//! Read-side analytics computed on demand from stored snapshot values:
//!
//! - **anomaly**: z-score detection of a candidate value against a
//!   historical window
//! - **trend**: ordinary least-squares trend fitting with a one-step
//!   prediction
//! - **forecast**: multi-step projection under three models with
//!   confidence intervals
//!
//! All three degrade to a neutral result below the minimum sample size
//! instead of failing, so callers never need an error path for thin data.

pub mod anomaly;
pub mod forecast;
pub mod trend;

pub use anomaly::{AnomalyDetector, AnomalyFinding, AnomalyResult, AnomalySweep};
pub use forecast::{ForecastModel, ForecastPoint, ForecastSeries, Forecaster};
pub use trend::{TrendAnalyzer, TrendDirection, TrendResult};

use serde::{Deserialize, Serialize};

/// Minimum number of historical points before any analysis yields a signal
pub const MIN_SAMPLE_SIZE: usize = 5;

/// How conservative anomaly detection and forecast intervals should be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// Flags at 2.0 standard deviations (~95.5% under a normal assumption)
    Low,
    /// Flags at 2.5 standard deviations (~98.8%)
    #[default]
    Medium,
    /// Flags at 3.0 standard deviations (~99.7%)
    High,
}

impl ConfidenceLevel {
    /// Z-score threshold above which a candidate counts as anomalous
    pub fn z_threshold(self) -> f64 {
        match self {
            ConfidenceLevel::Low => 2.0,
            ConfidenceLevel::Medium => 2.5,
            ConfidenceLevel::High => 3.0,
        }
    }

    /// Two-sided normal quantile scaling forecast interval widths
    pub fn interval_multiplier(self) -> f64 {
        match self {
            ConfidenceLevel::Low => 1.645,
            ConfidenceLevel::Medium => 1.96,
            ConfidenceLevel::High => 2.576,
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceLevel::Low => write!(f, "low"),
            ConfidenceLevel::Medium => write!(f, "medium"),
            ConfidenceLevel::High => write!(f, "high"),
        }
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (the window is the whole population here)
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_monotonic() {
        assert!(ConfidenceLevel::Low.z_threshold() < ConfidenceLevel::Medium.z_threshold());
        assert!(ConfidenceLevel::Medium.z_threshold() < ConfidenceLevel::High.z_threshold());
    }

    #[test]
    fn test_mean_and_std_dev() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[2.0, 4.0, 6.0]), 4.0);
        assert_eq!(std_dev(&[5.0]), 0.0);
        assert_eq!(std_dev(&[10.0, 10.0, 10.0]), 0.0);
        // population std dev of [2, 4, 4, 4, 5, 5, 7, 9] is exactly 2
        let known = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&known) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_level_serde() {
        let level: ConfidenceLevel = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(level, ConfidenceLevel::High);
        assert_eq!(serde_json::to_string(&ConfidenceLevel::Low).unwrap(), "\"low\"");
    }
}
