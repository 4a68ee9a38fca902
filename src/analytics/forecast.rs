//! Multi-step forecasting
//!
//! Projects a snapshot series forward under one of three models:
//!
//! - **linear regression**: least-squares fit over the day-indexed series,
//!   intervals widening with distance from the data centroid
//! - **moving average**: trailing window (max(3, len/4)) extended by
//!   feeding each prediction back as if observed
//! - **exponential smoothing**: flat forecast at the last smoothed level,
//!   intervals widening by the square root of the horizon step
//!
//! When the caller does not pin a model, one is chosen from the series
//! length: 20 or more points favor exponential smoothing, 10 or more the
//! moving average, anything shorter the regression line. Every model also
//! reports an in-sample goodness score (1 − SSE/SST) and the mean absolute
//! one-step residual.

use crate::analytics::trend::LinearFit;
use crate::analytics::{mean, std_dev, ConfidenceLevel, MIN_SAMPLE_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smoothing factor for exponential smoothing
const SMOOTHING_ALPHA: f64 = 0.3;

/// Forecasting model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastModel {
    LinearRegression,
    MovingAverage,
    ExponentialSmoothing,
}

impl std::fmt::Display for ForecastModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForecastModel::LinearRegression => write!(f, "linear_regression"),
            ForecastModel::MovingAverage => write!(f, "moving_average"),
            ForecastModel::ExponentialSmoothing => write!(f, "exponential_smoothing"),
        }
    }
}

/// One projected value with its confidence interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// Horizon step, 1-based (1 = first period after the series)
    pub step: usize,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// A full forecast run over one series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastSeries {
    pub model: ForecastModel,
    pub confidence: ConfidenceLevel,
    pub points: Vec<ForecastPoint>,
    /// In-sample fit quality, 1 − SSE/SST, in [0, 1]
    pub goodness: f64,
    /// Mean absolute one-step residual of the in-sample fit
    pub mean_absolute_residual: f64,
    pub sample_size: usize,
    pub generated_at: DateTime<Utc>,
}

impl ForecastSeries {
    /// Pointless result used below the minimum sample size
    fn neutral(model: ForecastModel, confidence: ConfidenceLevel, sample_size: usize) -> Self {
        Self {
            model,
            confidence,
            points: Vec::new(),
            goodness: 0.0,
            mean_absolute_residual: 0.0,
            sample_size,
            generated_at: Utc::now(),
        }
    }
}

/// Forward projection over snapshot series
#[derive(Debug, Clone)]
pub struct Forecaster {
    min_samples: usize,
}

impl Default for Forecaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Forecaster {
    pub fn new() -> Self {
        Self {
            min_samples: MIN_SAMPLE_SIZE,
        }
    }

    /// Model chosen when the caller does not pin one
    pub fn select_model(len: usize) -> ForecastModel {
        if len >= 20 {
            ForecastModel::ExponentialSmoothing
        } else if len >= 10 {
            ForecastModel::MovingAverage
        } else {
            ForecastModel::LinearRegression
        }
    }

    /// Project `series` (oldest first) `horizon` steps forward.
    pub fn forecast(
        &self,
        series: &[f64],
        horizon: usize,
        confidence: ConfidenceLevel,
        model: Option<ForecastModel>,
    ) -> ForecastSeries {
        let model = model.unwrap_or_else(|| Self::select_model(series.len()));
        if series.len() < self.min_samples || horizon == 0 {
            return ForecastSeries::neutral(model, confidence, series.len());
        }

        match model {
            ForecastModel::LinearRegression => self.linear(series, horizon, confidence),
            ForecastModel::MovingAverage => self.moving_average(series, horizon, confidence),
            ForecastModel::ExponentialSmoothing => self.exponential(series, horizon, confidence),
        }
    }

    fn linear(&self, series: &[f64], horizon: usize, confidence: ConfidenceLevel) -> ForecastSeries {
        let fit = LinearFit::over(series);
        let multiplier = confidence.interval_multiplier();
        let n = series.len() as f64;

        let points = (1..=horizon)
            .map(|step| {
                let x = n - 1.0 + step as f64;
                let value = fit.predict(x);
                // prediction interval widens with distance from the centroid
                let centroid_term = if fit.x_spread == 0.0 {
                    0.0
                } else {
                    (x - fit.x_mean).powi(2) / fit.x_spread
                };
                let margin = multiplier
                    * fit.residual_std_error
                    * (1.0 + 1.0 / n + centroid_term).sqrt();
                ForecastPoint {
                    step,
                    value,
                    lower: value - margin,
                    upper: value + margin,
                }
            })
            .collect();

        let residuals: Vec<f64> = series
            .iter()
            .enumerate()
            .map(|(i, y)| y - fit.predict(i as f64))
            .collect();

        ForecastSeries {
            model: ForecastModel::LinearRegression,
            confidence,
            points,
            goodness: fit.r_squared,
            mean_absolute_residual: mean_abs(&residuals),
            sample_size: series.len(),
            generated_at: Utc::now(),
        }
    }

    fn moving_average(
        &self,
        series: &[f64],
        horizon: usize,
        confidence: ConfidenceLevel,
    ) -> ForecastSeries {
        let window = (series.len() / 4).max(3);

        // one-step residuals of the trailing-window predictor over history
        let mut residuals = Vec::new();
        let mut predicted = Vec::new();
        let mut actual = Vec::new();
        for i in window..series.len() {
            let pred = mean(&series[i - window..i]);
            residuals.push(series[i] - pred);
            predicted.push(pred);
            actual.push(series[i]);
        }
        let margin = confidence.interval_multiplier() * std_dev(&residuals);

        // extend by feeding each prediction back as if it were observed
        let mut extended = series.to_vec();
        let points = (1..=horizon)
            .map(|step| {
                let tail = &extended[extended.len() - window..];
                let value = mean(tail);
                extended.push(value);
                ForecastPoint {
                    step,
                    value,
                    lower: value - margin,
                    upper: value + margin,
                }
            })
            .collect();

        ForecastSeries {
            model: ForecastModel::MovingAverage,
            confidence,
            points,
            goodness: goodness_of(&actual, &predicted),
            mean_absolute_residual: mean_abs(&residuals),
            sample_size: series.len(),
            generated_at: Utc::now(),
        }
    }

    fn exponential(
        &self,
        series: &[f64],
        horizon: usize,
        confidence: ConfidenceLevel,
    ) -> ForecastSeries {
        // one-step prediction for each point is the previous smoothed level
        let mut level = series[0];
        let mut residuals = Vec::new();
        let mut predicted = Vec::new();
        for value in &series[1..] {
            residuals.push(value - level);
            predicted.push(level);
            level = SMOOTHING_ALPHA * value + (1.0 - SMOOTHING_ALPHA) * level;
        }

        let base_margin = confidence.interval_multiplier() * std_dev(&residuals);
        let points = (1..=horizon)
            .map(|step| {
                // flat forecast; uncertainty grows with the horizon
                let margin = base_margin * (step as f64).sqrt();
                ForecastPoint {
                    step,
                    value: level,
                    lower: level - margin,
                    upper: level + margin,
                }
            })
            .collect();

        ForecastSeries {
            model: ForecastModel::ExponentialSmoothing,
            confidence,
            points,
            goodness: goodness_of(&series[1..], &predicted),
            mean_absolute_residual: mean_abs(&residuals),
            sample_size: series.len(),
            generated_at: Utc::now(),
        }
    }
}

fn mean_abs(residuals: &[f64]) -> f64 {
    if residuals.is_empty() {
        return 0.0;
    }
    residuals.iter().map(|r| r.abs()).sum::<f64>() / residuals.len() as f64
}

/// 1 − SSE/SST of `predicted` against `actual`, clamped to [0, 1]
fn goodness_of(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let m = mean(actual);
    let sse: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let sst: f64 = actual.iter().map(|a| (a - m).powi(2)).sum();
    if sst == 0.0 {
        if sse == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        (1.0 - sse / sst).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_auto_selection() {
        assert_eq!(
            Forecaster::select_model(5),
            ForecastModel::LinearRegression
        );
        assert_eq!(Forecaster::select_model(9), ForecastModel::LinearRegression);
        assert_eq!(Forecaster::select_model(10), ForecastModel::MovingAverage);
        assert_eq!(Forecaster::select_model(19), ForecastModel::MovingAverage);
        assert_eq!(
            Forecaster::select_model(20),
            ForecastModel::ExponentialSmoothing
        );
    }

    #[test]
    fn test_below_min_samples_has_no_points() {
        let forecaster = Forecaster::new();
        let result = forecaster.forecast(&[1.0, 2.0], 7, ConfidenceLevel::Medium, None);

        assert!(result.points.is_empty());
        assert_eq!(result.goodness, 0.0);
        assert_eq!(result.sample_size, 2);
    }

    #[test]
    fn test_linear_continues_a_perfect_line() {
        let forecaster = Forecaster::new();
        let series: Vec<f64> = (1..=8).map(|v| v as f64).collect();
        let result = forecaster.forecast(
            &series,
            3,
            ConfidenceLevel::Medium,
            Some(ForecastModel::LinearRegression),
        );

        assert_eq!(result.model, ForecastModel::LinearRegression);
        assert_eq!(result.points.len(), 3);
        assert!((result.points[0].value - 9.0).abs() < 1e-9);
        assert!((result.points[1].value - 10.0).abs() < 1e-9);
        assert!((result.points[2].value - 11.0).abs() < 1e-9);
        assert!((result.goodness - 1.0).abs() < 1e-9);
        assert!(result.mean_absolute_residual < 1e-9);
    }

    #[test]
    fn test_linear_interval_widens_away_from_centroid() {
        let forecaster = Forecaster::new();
        let series = [10.0, 13.0, 11.0, 15.0, 12.0, 16.0, 14.0, 18.0];
        let result = forecaster.forecast(
            &series,
            5,
            ConfidenceLevel::Medium,
            Some(ForecastModel::LinearRegression),
        );

        let widths: Vec<f64> = result.points.iter().map(|p| p.upper - p.lower).collect();
        for pair in widths.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_moving_average_on_constant_series() {
        let forecaster = Forecaster::new();
        let series = vec![42.0; 12];
        let result = forecaster.forecast(
            &series,
            4,
            ConfidenceLevel::Medium,
            Some(ForecastModel::MovingAverage),
        );

        assert_eq!(result.model, ForecastModel::MovingAverage);
        for point in &result.points {
            assert!((point.value - 42.0).abs() < 1e-9);
            // zero residual spread collapses the interval onto the value
            assert!((point.upper - point.lower).abs() < 1e-9);
        }
        assert_eq!(result.goodness, 1.0);
    }

    #[test]
    fn test_moving_average_feeds_predictions_back() {
        let forecaster = Forecaster::new();
        // window = max(3, 12/4) = 3; the tail mean drifts as predictions enter it
        let series = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 4.0, 4.0];
        let result = forecaster.forecast(
            &series,
            2,
            ConfidenceLevel::Medium,
            Some(ForecastModel::MovingAverage),
        );

        // step 1 averages [1, 4, 4]; step 2 averages [4, 4, 3]
        assert!((result.points[0].value - 3.0).abs() < 1e-9);
        assert!((result.points[1].value - 11.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_exponential_smoothing_is_flat_and_widening() {
        let forecaster = Forecaster::new();
        let series: Vec<f64> = (0..25).map(|i| 50.0 + (i % 5) as f64).collect();
        let result = forecaster.forecast(&series, 6, ConfidenceLevel::High, None);

        // 25 points auto-select exponential smoothing
        assert_eq!(result.model, ForecastModel::ExponentialSmoothing);
        let first = result.points[0].value;
        for point in &result.points {
            assert!((point.value - first).abs() < 1e-9);
        }
        let widths: Vec<f64> = result.points.iter().map(|p| p.upper - p.lower).collect();
        for pair in widths.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        // width grows with sqrt(step): step 4 is exactly twice step 1
        assert!((widths[3] - 2.0 * widths[0]).abs() < 1e-9);
    }

    #[test]
    fn test_higher_confidence_widens_intervals() {
        let forecaster = Forecaster::new();
        let series = [10.0, 12.0, 9.0, 14.0, 11.0, 13.0, 10.0, 15.0];

        let low = forecaster.forecast(
            &series,
            1,
            ConfidenceLevel::Low,
            Some(ForecastModel::LinearRegression),
        );
        let high = forecaster.forecast(
            &series,
            1,
            ConfidenceLevel::High,
            Some(ForecastModel::LinearRegression),
        );

        let low_width = low.points[0].upper - low.points[0].lower;
        let high_width = high.points[0].upper - high.points[0].lower;
        assert!(high_width > low_width);
    }

    #[test]
    fn test_zero_horizon_yields_no_points() {
        let forecaster = Forecaster::new();
        let series = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let result = forecaster.forecast(&series, 0, ConfidenceLevel::Medium, None);
        assert!(result.points.is_empty());
    }
}
