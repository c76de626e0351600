//! Croston's method for intermittent demand.
//!
//! Separate exponential smoothing of the non-zero demand sizes and the
//! intervals between them. The smoothing constant is scanned linearly
//! across its allowed range rather than tuned by Newton steps: with
//! mostly-zero histories the error surface is too ragged for gradients.

use tracing::debug;

use takt_core::dates::Date;
use takt_core::model::Model;
use takt_core::CoreResult;

use crate::bucket::Forecast;
use crate::config::ForecastParameters;

use super::{apply_constant, ForecastMethod, Metrics, EPS};

#[derive(Debug, Clone)]
pub struct Croston {
    alfa: f64,
    f_i: f64,
}

impl Croston {
    pub fn new(params: &ForecastParameters) -> Self {
        Croston {
            alfa: params
                .croston_initial_alfa
                .clamp(params.croston_min_alfa, params.croston_max_alfa),
            f_i: 0.0,
        }
    }
}

impl ForecastMethod for Croston {
    fn fit(&mut self, history: &[f64], weight: &[f64], params: &ForecastParameters) -> Metrics {
        let count = history.len();
        let mut nonzero = 0.0;
        let mut totalsum = 0.0;
        for h in history {
            if *h != 0.0 {
                nonzero += 1.0;
                totalsum += h;
            }
        }
        if count < 2 || nonzero == 0.0 {
            return Metrics::unusable();
        }

        let mut best_error = f64::MAX;
        let mut best_smape = 0.0;
        let mut best_alfa = params.croston_min_alfa;
        let mut best_f_i = 0.0;
        let mut best_standard_deviation = 0.0;
        let mut between_demands = 1.0;

        self.alfa = params.croston_min_alfa;
        let delta = if params.iterations > 1 {
            (params.croston_max_alfa - params.croston_min_alfa) / (params.iterations - 1) as f64
        } else {
            0.0
        };

        for iteration in 0..params.iterations {
            let mut standard_deviation = 0.0;
            let mut max_deviation = 0.0;
            let mut error_smape = 0.0;
            let mut error_smape_weights = 0.0;

            for outliers in 0..=1 {
                error_smape = 0.0;
                error_smape_weights = 0.0;
                // Seed with the overall averages: intermittent series
                // rarely have enough points to drift far from them.
                let mut q_i = totalsum / nonzero;
                let mut p_i = count as f64 / nonzero;
                self.f_i = (1.0 - self.alfa / 2.0) * q_i / p_i;

                let mut history_i = history[0];
                for i in 1..=count {
                    let history_i_min_1 = history_i;
                    history_i = history.get(i).copied().unwrap_or(0.0);
                    if history_i_min_1 != 0.0 {
                        q_i = self.alfa * history_i_min_1 + (1.0 - self.alfa) * q_i;
                        p_i = self.alfa * between_demands + (1.0 - self.alfa) * p_i;
                        self.f_i = (1.0 - self.alfa / 2.0) * q_i / p_i;
                        between_demands = 1.0;
                    } else {
                        between_demands += 1.0;
                    }
                    if i == count {
                        break;
                    }
                    if outliers == 0 {
                        standard_deviation += (self.f_i - history[i]) * (self.f_i - history[i]);
                        if (history[i] - self.f_i).abs() > max_deviation {
                            max_deviation = (self.f_i - history[i]).abs();
                        }
                    } else {
                        // Only an upper clip: zeros are normal here.
                        let ceiling = self.f_i + params.max_deviation * standard_deviation;
                        if history_i > ceiling {
                            history_i = ceiling;
                        }
                    }
                    if i >= params.skip && p_i > 0.0 && (self.f_i + history[i]).abs() > EPS {
                        error_smape += (self.f_i - history_i).abs() / (self.f_i + history_i).abs()
                            * weight[i]
                            * 2.0;
                        error_smape_weights += weight[i];
                    }
                }

                if outliers == 0 {
                    standard_deviation = (standard_deviation / (count - 1) as f64).sqrt();
                    if standard_deviation > 0.0 {
                        max_deviation /= standard_deviation;
                    }
                    if max_deviation < params.max_deviation {
                        break;
                    }
                }
            }

            if error_smape < best_error {
                best_error = error_smape;
                best_smape = if error_smape_weights > 0.0 {
                    error_smape / error_smape_weights
                } else {
                    0.0
                };
                best_alfa = self.alfa;
                best_f_i = self.f_i;
                best_standard_deviation = standard_deviation;
            }

            let _ = iteration;
            if delta > 0.0 {
                self.alfa += delta;
            } else {
                break;
            }
        }

        self.f_i = best_f_i;
        self.alfa = best_alfa;
        debug!(
            alfa = best_alfa,
            smape = best_smape,
            forecast = self.f_i,
            standard_deviation = best_standard_deviation,
            "croston fitted"
        );
        Metrics::new(best_smape, best_standard_deviation, false)
    }

    fn apply(
        &mut self,
        forecast: &mut Forecast,
        model: &Model,
        bucket_dates: &[Date],
        _params: &ForecastParameters,
    ) -> CoreResult<()> {
        apply_constant(forecast, model, bucket_dates, self.f_i)
    }

    fn name(&self) -> &'static str {
        "croston"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ForecastParameters {
        ForecastParameters {
            skip: 0,
            ..ForecastParameters::default()
        }
    }

    #[test]
    fn intermittent_series_fits_below_the_rate() {
        // Demand of 12 every third bucket: rate 4 per bucket.
        let history = vec![12.0, 0.0, 0.0, 12.0, 0.0, 0.0, 12.0, 0.0, 0.0, 12.0, 0.0, 0.0];
        let weight = vec![1.0; 13];
        let mut m = Croston::new(&params());
        let metrics = m.fit(&history, &weight, &params());
        assert!(metrics.is_usable());
        assert!(m.f_i > 2.0 && m.f_i < 6.0, "forecast {}", m.f_i);
    }

    #[test]
    fn all_zero_history_is_unusable() {
        let history = vec![0.0; 8];
        let weight = vec![1.0; 9];
        let mut m = Croston::new(&params());
        assert!(!m.fit(&history, &weight, &params()).is_usable());
    }
}
