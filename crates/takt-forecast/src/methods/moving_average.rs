//! Moving average: the fallback for short histories.

use tracing::debug;

use takt_core::dates::Date;
use takt_core::model::Model;
use takt_core::CoreResult;

use crate::bucket::Forecast;
use crate::config::ForecastParameters;

use super::{apply_constant, ForecastMethod, Metrics, EPS};

#[derive(Debug, Clone)]
pub struct MovingAverage {
    order: usize,
    avg: f64,
}

impl MovingAverage {
    pub fn new(order: usize) -> Self {
        MovingAverage {
            order: order.max(1),
            avg: 0.0,
        }
    }
}

impl ForecastMethod for MovingAverage {
    fn fit(&mut self, history: &[f64], weight: &[f64], params: &ForecastParameters) -> Metrics {
        let count = history.len();
        if count == 0 {
            return Metrics::unusable();
        }
        let mut clean_history = vec![0.0; count];
        let mut error_smape = 0.0;
        let mut error_smape_weights = 0.0;
        let mut standard_deviation = 0.0;
        let mut max_deviation = 0.0;

        for outliers in 0..=1 {
            if outliers == 1 {
                clean_history[0] = history[0];
            }
            error_smape = 0.0;
            error_smape_weights = 0.0;

            for i in 1..=count {
                let source: &[f64] = if outliers == 0 { history } else { &clean_history };
                let window = self.order.min(i);
                let sum: f64 = source[i - window..i].iter().sum();
                self.avg = sum / window as f64;
                if i == count {
                    break;
                }
                if outliers == 0 {
                    // Scan pass: measure the running deviation of the
                    // one-step forecast against the actuals.
                    standard_deviation += (self.avg - history[i]) * (self.avg - history[i]);
                    if (self.avg - history[i]).abs() > max_deviation {
                        max_deviation = (self.avg - history[i]).abs();
                    }
                } else {
                    // Filter pass: clip the history into the band.
                    let band = params.max_deviation * standard_deviation;
                    clean_history[i] = history[i].clamp(self.avg - band, self.avg + band);
                }
                if i >= params.skip && (self.avg + history[i]).abs() > EPS {
                    error_smape +=
                        (self.avg - history[i]).abs() / (self.avg + history[i]).abs() * weight[i] * 2.0;
                    error_smape_weights += weight[i];
                }
            }

            if outliers == 0 {
                if count > 1 {
                    standard_deviation = (standard_deviation / (count - 1) as f64).sqrt();
                }
                if standard_deviation > 0.0 {
                    max_deviation /= standard_deviation;
                }
                if max_deviation < params.max_deviation {
                    break;
                }
            }
        }

        if error_smape_weights > 0.0 {
            error_smape /= error_smape_weights;
        }
        debug!(
            smape = error_smape,
            forecast = self.avg,
            standard_deviation,
            "moving average fitted"
        );
        Metrics::new(error_smape, standard_deviation, false)
    }

    fn apply(
        &mut self,
        forecast: &mut Forecast,
        model: &Model,
        bucket_dates: &[Date],
        _params: &ForecastParameters,
    ) -> CoreResult<()> {
        apply_constant(forecast, model, bucket_dates, self.avg)
    }

    fn name(&self) -> &'static str {
        "moving average"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_params() -> ForecastParameters {
        ForecastParameters {
            skip: 0,
            ..ForecastParameters::default()
        }
    }

    #[test]
    fn constant_history_fits_exactly() {
        let history = vec![10.0; 12];
        let weight = vec![1.0; 13];
        let mut ma = MovingAverage::new(5);
        let metrics = ma.fit(&history, &weight, &flat_params());
        assert!(metrics.smape < 1e-9);
        assert!((ma.avg - 10.0).abs() < 1e-9);
    }

    #[test]
    fn averages_over_the_order() {
        let history = vec![0.0, 0.0, 0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 10.0, 10.0];
        let weight = vec![1.0; 11];
        let mut ma = MovingAverage::new(5);
        ma.fit(&history, &weight, &flat_params());
        // The final average covers the trailing window of 10s.
        assert!((ma.avg - 10.0).abs() < 1e-9);
    }
}
