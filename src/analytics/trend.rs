//! Least-squares trend analysis
//!
//! Fits an ordinary least-squares line to a chronologically ordered series
//! (value against sequence index) and classifies the direction. Intensity
//! expresses the per-step slope as a percentage of the series mean;
//! confidence is the R² of the fit. The next-index prediction carries a
//! 95% interval of ±1.96 × the residual standard error.

use crate::analytics::{mean, MIN_SAMPLE_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Slope threshold below which a series counts as flat
const STABLE_SLOPE: f64 = 0.01;

/// Direction of a fitted trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Stable,
    Decreasing,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Increasing => write!(f, "increasing"),
            TrendDirection::Stable => write!(f, "stable"),
            TrendDirection::Decreasing => write!(f, "decreasing"),
        }
    }
}

/// Outcome of fitting a trend to a snapshot series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendResult {
    pub direction: TrendDirection,
    /// Fitted per-step slope
    pub slope: f64,
    /// Slope as a percentage of the series mean
    pub intensity: f64,
    /// R² of the fit, in [0, 1]
    pub confidence: f64,
    /// Predicted value for the next sequence index
    pub next_value: f64,
    pub interval_lower: f64,
    pub interval_upper: f64,
    pub sample_size: usize,
    pub analyzed_at: DateTime<Utc>,
}

impl TrendResult {
    /// Flat, zero-signal result used below the minimum sample size
    fn neutral(sample_size: usize) -> Self {
        Self {
            direction: TrendDirection::Stable,
            slope: 0.0,
            intensity: 0.0,
            confidence: 0.0,
            next_value: 0.0,
            interval_lower: 0.0,
            interval_upper: 0.0,
            sample_size,
            analyzed_at: Utc::now(),
        }
    }
}

/// Ordinary least-squares trend analyzer
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    min_samples: usize,
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl TrendAnalyzer {
    pub fn new() -> Self {
        Self {
            min_samples: MIN_SAMPLE_SIZE,
        }
    }

    /// Fit a trend over `series`, oldest value first.
    pub fn analyze(&self, series: &[f64]) -> TrendResult {
        if series.len() < self.min_samples {
            return TrendResult::neutral(series.len());
        }

        let fit = LinearFit::over(series);
        let series_mean = mean(series);

        let direction = if fit.slope.abs() < STABLE_SLOPE {
            TrendDirection::Stable
        } else if fit.slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        let intensity = if series_mean == 0.0 {
            0.0
        } else {
            fit.slope / series_mean * 100.0
        };

        let next_value = fit.predict(series.len() as f64);
        let margin = 1.96 * fit.residual_std_error;

        TrendResult {
            direction,
            slope: fit.slope,
            intensity,
            confidence: fit.r_squared,
            next_value,
            interval_lower: next_value - margin,
            interval_upper: next_value + margin,
            sample_size: series.len(),
            analyzed_at: Utc::now(),
        }
    }
}

/// Least-squares line of value against sequence index
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub residual_std_error: f64,
    /// Mean of the x values (index centroid)
    pub x_mean: f64,
    /// Sum of squared x deviations from the centroid
    pub x_spread: f64,
    pub n: usize,
}

impl LinearFit {
    /// Fit over `series` with x = 0..n-1. Caller guarantees n >= 2.
    pub(crate) fn over(series: &[f64]) -> Self {
        let n = series.len();
        let nf = n as f64;
        let x_mean = (nf - 1.0) / 2.0;
        let y_mean = mean(series);

        let mut sxy = 0.0;
        let mut sxx = 0.0;
        for (i, y) in series.iter().enumerate() {
            let dx = i as f64 - x_mean;
            sxy += dx * (y - y_mean);
            sxx += dx * dx;
        }

        let slope = if sxx == 0.0 { 0.0 } else { sxy / sxx };
        let intercept = y_mean - slope * x_mean;

        let mut sse = 0.0;
        let mut sst = 0.0;
        for (i, y) in series.iter().enumerate() {
            let fitted = intercept + slope * i as f64;
            sse += (y - fitted).powi(2);
            sst += (y - y_mean).powi(2);
        }

        // a constant series fits its own line exactly
        let r_squared = if sst == 0.0 {
            1.0
        } else {
            (1.0 - sse / sst).clamp(0.0, 1.0)
        };

        let residual_std_error = if n > 2 {
            (sse / (nf - 2.0)).sqrt()
        } else {
            0.0
        };

        Self {
            slope,
            intercept,
            r_squared,
            residual_std_error,
            x_mean,
            x_spread: sxx,
            n,
        }
    }

    pub(crate) fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}
