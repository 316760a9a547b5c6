//! Short-horizon extrapolation of the cumulative enrollment series.
//!
//! Forecasting is a capability behind [`TimeSeriesForecaster`]: fit a model to
//! an evenly spaced series, then ask the fitted model for point predictions.
//! The series starts at the rollup bucket, which counts as one time step with
//! no calendar month of its own.

use std::fmt::Debug;

use thiserror::Error;

use crate::series::{CalendarWindow, CumulativeSeries, Month};

/// Number of months projected past the window.
pub const FORECAST_HORIZON: usize = 3;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("need at least {required} points to fit {model}, got {points}")]
    InsufficientData {
        model: &'static str,
        points: usize,
        required: usize,
    },

    #[error("series is constant; {model} has nothing to fit")]
    DegenerateSeries { model: &'static str },

    #[error("{model} did not converge: {reason}")]
    NonConvergence { model: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ForecastError>;

/// A model that has been fitted to a series.
pub trait FittedForecast: Debug {
    /// Point predictions for the `horizon` steps after the last observation.
    fn predict(&self, horizon: usize) -> Vec<f64>;
}

/// A forecasting strategy that can be fitted to an evenly spaced series.
pub trait TimeSeriesForecaster: Debug {
    type Fitted: FittedForecast;

    fn fit(&self, series: &[f64]) -> Result<Self::Fitted>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPoint {
    pub month: Month,
    pub value: f64,
}

impl ForecastPoint {
    pub fn rounded(&self) -> i64 {
        self.value.round_ties_even() as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub model: &'static str,
    pub points: Vec<ForecastPoint>,
}

/// Fit `forecaster` to the cumulative series and label the predictions with
/// the months that follow the window.
pub fn forecast<F: TimeSeriesForecaster>(
    forecaster: &F,
    series: &CumulativeSeries,
    window: &CalendarWindow,
    horizon: usize,
) -> Result<Forecast> {
    let fitted = forecaster.fit(&series.values())?;
    let values = fitted.predict(horizon);

    if values.len() != horizon || values.iter().any(|value| !value.is_finite()) {
        return Err(ForecastError::NonConvergence {
            model: forecaster.name(),
            reason: "prediction is not finite".to_string(),
        });
    }

    let points = window
        .following(horizon)
        .into_iter()
        .zip(values)
        .map(|(month, value)| ForecastPoint { month, value })
        .collect();

    Ok(Forecast {
        model: forecaster.name(),
        points,
    })
}

/// ARIMA(1,1,1) without a constant, estimated by conditional sum of squares.
#[derive(Debug, Clone)]
pub struct ArimaForecaster {
    min_points: usize,
}

impl Default for ArimaForecaster {
    fn default() -> Self {
        Self { min_points: 4 }
    }
}

impl ArimaForecaster {
    const NAME: &'static str = "ARIMA(1,1,1)";
    /// Keeps the AR part stationary and the MA part invertible.
    const BOUND: f64 = 0.98;
    const COARSE_STEP: f64 = 0.02;
    const FINE_STEP: f64 = 0.002;

    pub fn new() -> Self {
        Self::default()
    }

    fn search(
        diffs: &[f64],
        phi_range: (f64, f64),
        theta_range: (f64, f64),
        step: f64,
        best: &mut (f64, f64, f64),
    ) {
        let phi_steps = ((phi_range.1 - phi_range.0) / step).round() as usize;
        let theta_steps = ((theta_range.1 - theta_range.0) / step).round() as usize;

        for i in 0..=phi_steps {
            let phi = phi_range.0 + i as f64 * step;
            for j in 0..=theta_steps {
                let theta = theta_range.0 + j as f64 * step;
                let sse = conditional_sse(diffs, phi, theta);
                if sse < best.2 {
                    *best = (phi, theta, sse);
                }
            }
        }
    }
}

impl TimeSeriesForecaster for ArimaForecaster {
    type Fitted = FittedArima;

    fn fit(&self, series: &[f64]) -> Result<FittedArima> {
        if series.len() < self.min_points {
            return Err(ForecastError::InsufficientData {
                model: Self::NAME,
                points: series.len(),
                required: self.min_points,
            });
        }

        let diffs = difference(series);
        if diffs.iter().all(|step| step.abs() < f64::EPSILON) {
            return Err(ForecastError::DegenerateSeries { model: Self::NAME });
        }

        let mut best = (0.0, 0.0, conditional_sse(&diffs, 0.0, 0.0));
        Self::search(
            &diffs,
            (-Self::BOUND, Self::BOUND),
            (-Self::BOUND, Self::BOUND),
            Self::COARSE_STEP,
            &mut best,
        );

        let clamp = |centre: f64| {
            (
                (centre - Self::COARSE_STEP).max(-Self::BOUND),
                (centre + Self::COARSE_STEP).min(Self::BOUND),
            )
        };
        let (phi_range, theta_range) = (clamp(best.0), clamp(best.1));
        Self::search(&diffs, phi_range, theta_range, Self::FINE_STEP, &mut best);

        let (phi, theta, sse) = best;
        if !sse.is_finite() {
            return Err(ForecastError::NonConvergence {
                model: Self::NAME,
                reason: "sum of squared residuals is not finite".to_string(),
            });
        }

        let residuals = residuals(&diffs, phi, theta);
        log::debug!("fitted {} with phi={phi:.3} theta={theta:.3} sse={sse:.3}", Self::NAME);

        Ok(FittedArima {
            phi,
            theta,
            last_level: series[series.len() - 1],
            last_diff: diffs[diffs.len() - 1],
            last_residual: residuals[residuals.len() - 1],
        })
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedArima {
    pub phi: f64,
    pub theta: f64,
    last_level: f64,
    last_diff: f64,
    last_residual: f64,
}

impl FittedForecast for FittedArima {
    fn predict(&self, horizon: usize) -> Vec<f64> {
        let mut level = self.last_level;
        let mut diff = self.last_diff;
        let mut predictions = Vec::with_capacity(horizon);

        for step in 0..horizon {
            // Future shocks have zero expectation; only the first step sees
            // the last observed residual.
            diff = if step == 0 {
                self.phi * diff + self.theta * self.last_residual
            } else {
                self.phi * diff
            };
            level += diff;
            predictions.push(level);
        }

        predictions
    }
}

/// Random walk with drift: last value plus the mean historical step.
#[derive(Debug, Clone, Default)]
pub struct DriftForecaster;

impl TimeSeriesForecaster for DriftForecaster {
    type Fitted = FittedDrift;

    fn fit(&self, series: &[f64]) -> Result<FittedDrift> {
        if series.len() < 2 {
            return Err(ForecastError::InsufficientData {
                model: self.name(),
                points: series.len(),
                required: 2,
            });
        }

        let diffs = difference(series);
        let drift = diffs.iter().sum::<f64>() / diffs.len() as f64;
        Ok(FittedDrift {
            last_level: series[series.len() - 1],
            drift,
        })
    }

    fn name(&self) -> &'static str {
        "drift"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedDrift {
    last_level: f64,
    drift: f64,
}

impl FittedForecast for FittedDrift {
    fn predict(&self, horizon: usize) -> Vec<f64> {
        (1..=horizon)
            .map(|step| self.last_level + self.drift * step as f64)
            .collect()
    }
}

fn difference(series: &[f64]) -> Vec<f64> {
    series.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

/// Residuals conditioned on the first difference, with the pre-sample shock at zero.
fn residuals(diffs: &[f64], phi: f64, theta: f64) -> Vec<f64> {
    let mut residuals = Vec::with_capacity(diffs.len());
    residuals.push(0.0);
    for t in 1..diffs.len() {
        let previous = residuals[t - 1];
        residuals.push(diffs[t] - phi * diffs[t - 1] - theta * previous);
    }
    residuals
}

fn conditional_sse(diffs: &[f64], phi: f64, theta: f64) -> f64 {
    residuals(diffs, phi, theta).iter().map(|e| e * e).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::WINDOW_START;

    fn window_to(year: i32, month: u32) -> CalendarWindow {
        let end = chrono::NaiveDate::from_ymd_opt(year, month, 1).map(Month::of);
        CalendarWindow::new(WINDOW_START, end)
    }

    #[test]
    fn rejects_short_series() {
        let err = ArimaForecaster::new().fit(&[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            ForecastError::InsufficientData {
                model: "ARIMA(1,1,1)",
                points: 3,
                required: 4,
            }
        );
    }

    #[test]
    fn rejects_constant_series() {
        let err = ArimaForecaster::new().fit(&[3.0; 6]).unwrap_err();
        assert!(matches!(err, ForecastError::DegenerateSeries { .. }));
    }

    #[test]
    fn coefficients_stay_in_bounds() {
        let fitted = ArimaForecaster::new()
            .fit(&[2.0, 2.0, 5.0, 5.0, 6.0])
            .unwrap();
        assert!(fitted.phi.abs() <= 0.98 + 1e-9);
        assert!(fitted.theta.abs() <= 0.98 + 1e-9);
    }

    #[test]
    fn small_enrollment_series_forecasts_three_months() {
        let series = [2.0, 2.0, 5.0, 5.0, 6.0];
        let fitted = ArimaForecaster::new().fit(&series).unwrap();
        let values = fitted.predict(FORECAST_HORIZON);

        assert_eq!(values.len(), 3);
        for value in values {
            assert!(value.is_finite());
            assert!((value - 6.0).abs() < 10.0, "forecast {value} drifted too far");
        }
    }

    #[test]
    fn steady_growth_keeps_growing() {
        let series = [0.0, 2.0, 4.0, 6.0, 8.0, 10.0];
        let values = ArimaForecaster::new().fit(&series).unwrap().predict(3);

        assert!(values[0] > 11.0 && values[0] <= 12.5, "got {}", values[0]);
        assert!(values[1] > values[0]);
        assert!(values[2] > values[1]);
    }

    #[test]
    fn fitting_is_deterministic() {
        let series = [4.0, 9.0, 11.0, 18.0, 20.0, 27.0, 31.0];
        let first = ArimaForecaster::new().fit(&series).unwrap();
        let second = ArimaForecaster::new().fit(&series).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.predict(3), second.predict(3));
    }

    #[test]
    fn drift_extends_mean_step() {
        let fitted = DriftForecaster.fit(&[1.0, 3.0, 5.0]).unwrap();
        assert_eq!(fitted.predict(3), vec![7.0, 9.0, 11.0]);
        assert!(DriftForecaster.fit(&[1.0]).is_err());
    }

    #[test]
    fn forecast_labels_months_after_window() {
        use crate::models::{date, record};
        use crate::series::{bucket_by_month, cumulate};

        let records = vec![
            record(None, Some(date(2021, 6, 1))),
            record(None, Some(date(2022, 1, 4))),
            record(None, Some(date(2022, 2, 4))),
            record(None, Some(date(2022, 2, 9))),
            record(None, Some(date(2022, 4, 1))),
        ];
        let window = window_to(2022, 4);
        let cumulative = cumulate(&bucket_by_month(&records, |r| r.enrollment_date, &window));

        let result = forecast(&DriftForecaster, &cumulative, &window, FORECAST_HORIZON).unwrap();
        let months: Vec<String> = result.points.iter().map(|p| p.month.to_string()).collect();
        assert_eq!(months, vec!["2022-05", "2022-06", "2022-07"]);
        assert_eq!(result.model, "drift");
        // Cumulative [1, 2, 4, 4, 5]: mean step 1.
        let rounded: Vec<i64> = result.points.iter().map(ForecastPoint::rounded).collect();
        assert_eq!(rounded, vec![6, 7, 8]);
    }

    #[test]
    fn rounding_is_half_to_even() {
        let point = ForecastPoint {
            month: WINDOW_START,
            value: 2.5,
        };
        assert_eq!(point.rounded(), 2);
    }
}
