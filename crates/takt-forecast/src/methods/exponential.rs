//! Single and double exponential smoothing with Levenberg-Marquardt
//! parameter tuning.

use tracing::{debug, trace};

use takt_core::dates::{Date, DateRange};
use takt_core::model::Model;
use takt_core::CoreResult;

use crate::bucket::Forecast;
use crate::config::ForecastParameters;

use super::{apply_constant, ForecastMethod, Metrics, ACCURACY, EPS};

/// Single exponential smoothing, for level demand.
#[derive(Debug, Clone)]
pub struct SingleExponential {
    alfa: f64,
    f_i: f64,
}

impl SingleExponential {
    pub fn new(params: &ForecastParameters) -> Self {
        SingleExponential {
            alfa: params
                .single_initial_alfa
                .clamp(params.single_min_alfa, params.single_max_alfa),
            f_i: 0.0,
        }
    }
}

impl ForecastMethod for SingleExponential {
    fn fit(&mut self, history: &[f64], weight: &[f64], params: &ForecastParameters) -> Metrics {
        let count = history.len();
        // The method needs a few buckets beyond the warmup to settle.
        if count < params.skip + 5 {
            return Metrics::unusable();
        }

        let mut upper_boundary_tested = false;
        let mut lower_boundary_tested = false;
        let mut best_error = f64::MAX;
        let mut best_smape = 0.0;
        let mut best_alfa = self.alfa;
        let mut best_f_i = 0.0;
        let mut best_standard_deviation = 0.0;

        let mut iteration = 1;
        while iteration <= params.iterations {
            let mut standard_deviation = 0.0;
            let mut max_deviation = 0.0;
            let mut error = 0.0;
            let mut error_smape = 0.0;
            let mut error_smape_weights = 0.0;
            let mut sum_11 = 0.0;
            let mut sum_12 = 0.0;

            for outliers in 0..=1 {
                let mut df_dalfa_i = 0.0;
                sum_11 = 0.0;
                sum_12 = 0.0;
                error = 0.0;
                error_smape = 0.0;
                error_smape_weights = 0.0;

                // Seed with the average of the first three values; the
                // filter pass clips those against the measured band.
                self.f_i = (history[0] + history[1] + history[2]) / 3.0;
                if outliers == 1 {
                    let band = params.max_deviation * standard_deviation;
                    let t: f64 = history[..3]
                        .iter()
                        .map(|h| h.clamp(self.f_i - band, self.f_i + band))
                        .sum();
                    self.f_i = t / 3.0;
                }

                let mut history_i = history[0];
                for i in 1..=count {
                    let history_i_min_1 = history_i;
                    history_i = history.get(i).copied().unwrap_or(0.0);
                    df_dalfa_i = history_i_min_1 - self.f_i + (1.0 - self.alfa) * df_dalfa_i;
                    self.f_i = history_i_min_1 * self.alfa + (1.0 - self.alfa) * self.f_i;
                    if i == count {
                        break;
                    }
                    if outliers == 0 {
                        standard_deviation += (self.f_i - history[i]) * (self.f_i - history[i]);
                        if (self.f_i - history[i]).abs() > max_deviation {
                            max_deviation = (self.f_i - history[i]).abs();
                        }
                    } else {
                        let band = params.max_deviation * standard_deviation;
                        history_i = history_i.clamp(self.f_i - band, self.f_i + band);
                    }
                    sum_12 += df_dalfa_i * (history_i - self.f_i) * weight[i];
                    sum_11 += df_dalfa_i * df_dalfa_i * weight[i];
                    if i >= params.skip {
                        error += (self.f_i - history_i) * (self.f_i - history_i) * weight[i];
                        if (self.f_i + history[i]).abs() > EPS {
                            error_smape += (self.f_i - history_i).abs()
                                / (self.f_i + history_i)
                                * weight[i]
                                * 2.0;
                            error_smape_weights += weight[i];
                        }
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

            if error < best_error {
                best_error = error;
                best_smape = if error_smape_weights > 0.0 {
                    error_smape / error_smape_weights
                } else {
                    0.0
                };
                best_alfa = self.alfa;
                best_f_i = self.f_i;
                best_standard_deviation = standard_deviation;
            }

            // Levenberg-Marquardt damping on the 1x1 normal matrix.
            if (sum_11 + error / iteration as f64).abs() > EPS {
                sum_11 += error / iteration as f64;
            }
            if sum_11.abs() < EPS {
                break;
            }
            let delta = sum_12 / sum_11;
            if delta.abs() < ACCURACY && iteration > 3 {
                break;
            }
            trace!(iteration, alfa = self.alfa, "single exponential iteration");

            self.alfa += delta;
            // A boundary may be probed once; bouncing against it twice
            // ends the search.
            if self.alfa > params.single_max_alfa {
                self.alfa = params.single_max_alfa;
                if upper_boundary_tested {
                    break;
                }
                upper_boundary_tested = true;
            } else if self.alfa < params.single_min_alfa {
                self.alfa = params.single_min_alfa;
                if lower_boundary_tested {
                    break;
                }
                lower_boundary_tested = true;
            }
            iteration += 1;
        }

        self.f_i = best_f_i;
        self.alfa = best_alfa;
        debug!(
            alfa = best_alfa,
            smape = best_smape,
            forecast = self.f_i,
            standard_deviation = best_standard_deviation,
            "single exponential fitted"
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
        "single exponential"
    }
}

/// Double exponential smoothing, for trended demand.
#[derive(Debug, Clone)]
pub struct DoubleExponential {
    alfa: f64,
    gamma: f64,
    constant_i: f64,
    trend_i: f64,
}

impl DoubleExponential {
    pub fn new(params: &ForecastParameters) -> Self {
        DoubleExponential {
            alfa: params.double_initial_alfa,
            gamma: params.double_initial_gamma,
            constant_i: 0.0,
            trend_i: 0.0,
        }
    }
}

impl ForecastMethod for DoubleExponential {
    fn fit(&mut self, history: &[f64], weight: &[f64], params: &ForecastParameters) -> Metrics {
        let count = history.len();
        if count < params.skip + 5 {
            return Metrics::unusable();
        }

        let mut best_error = f64::MAX;
        let mut best_smape = 0.0;
        let mut best_alfa = self.alfa;
        let mut best_gamma = self.gamma;
        let mut best_constant_i = 0.0;
        let mut best_trend_i = 0.0;
        let mut best_standard_deviation = 0.0;
        let mut boundary_tested = 0;

        let mut iteration = 1;
        while iteration <= params.iterations {
            let mut standard_deviation = 0.0;
            let mut max_deviation = 0.0;
            let mut error = 0.0;
            let mut error_smape = 0.0;
            let mut error_smape_weights = 0.0;
            let mut sum11 = 0.0;
            let mut sum12 = 0.0;
            let mut sum22 = 0.0;
            let mut sum13 = 0.0;
            let mut sum23 = 0.0;

            for outliers in 0..=1 {
                error = 0.0;
                error_smape = 0.0;
                error_smape_weights = 0.0;
                sum11 = 0.0;
                sum12 = 0.0;
                sum22 = 0.0;
                sum13 = 0.0;
                sum23 = 0.0;
                let mut d_constant_d_alfa = 0.0;
                let mut d_constant_d_gamma = 0.0;
                let mut d_trend_d_alfa = 0.0;
                let mut d_trend_d_gamma = 0.0;
                let mut d_forecast_d_alfa = 0.0;
                let mut d_forecast_d_gamma = 0.0;

                self.constant_i = (history[0] + history[1] + history[2]) / 3.0;
                self.trend_i = (history[3] - history[0]) / 3.0;
                if outliers == 1 {
                    // Clip the seed values against the band around the
                    // fitted line.
                    let band = params.max_deviation * standard_deviation;
                    let mut t1 = 0.0;
                    let mut t2;
                    let clip0 = history[0]
                        .clamp(self.constant_i - band, self.constant_i + band);
                    t1 += clip0;
                    t2 = -clip0;
                    t1 += history[1].clamp(
                        self.constant_i + self.trend_i - band,
                        self.constant_i + self.trend_i + band,
                    );
                    let clip2 = history[2].clamp(
                        self.constant_i + 2.0 * self.trend_i - band,
                        self.constant_i + 2.0 * self.trend_i + band,
                    );
                    t1 += clip2;
                    t2 += clip2;
                    self.constant_i = t1 / 3.0;
                    self.trend_i = t2 / 3.0;
                }

                let mut history_i = history[0];
                for i in 1..=count {
                    let history_i_min_1 = history_i;
                    history_i = history.get(i).copied().unwrap_or(0.0);
                    let constant_i_prev = self.constant_i;
                    let trend_i_prev = self.trend_i;
                    self.constant_i = history_i_min_1 * self.alfa
                        + (1.0 - self.alfa) * (constant_i_prev + trend_i_prev);
                    self.trend_i = self.gamma * (self.constant_i - constant_i_prev)
                        + (1.0 - self.gamma) * trend_i_prev;
                    if i == count {
                        break;
                    }
                    let fitted = self.constant_i + self.trend_i;
                    if outliers == 0 {
                        standard_deviation += (fitted - history[i]) * (fitted - history[i]);
                        if (fitted - history[i]).abs() > max_deviation {
                            max_deviation = (fitted - history[i]).abs();
                        }
                    } else {
                        let band = params.max_deviation * standard_deviation;
                        history_i = history_i.clamp(fitted - band, fitted + band);
                    }
                    let d_constant_d_gamma_prev = d_constant_d_gamma;
                    let d_constant_d_alfa_prev = d_constant_d_alfa;
                    d_constant_d_alfa = history_i_min_1 - constant_i_prev - trend_i_prev
                        + (1.0 - self.alfa) * d_forecast_d_alfa;
                    d_constant_d_gamma = (1.0 - self.alfa) * d_forecast_d_gamma;
                    d_trend_d_alfa = self.gamma * (d_constant_d_alfa - d_constant_d_alfa_prev)
                        + (1.0 - self.gamma) * d_trend_d_alfa;
                    d_trend_d_gamma = self.constant_i - constant_i_prev - trend_i_prev
                        + self.gamma * (d_constant_d_gamma - d_constant_d_gamma_prev)
                        + (1.0 - self.gamma) * d_trend_d_gamma;
                    d_forecast_d_alfa = d_constant_d_alfa + d_trend_d_alfa;
                    d_forecast_d_gamma = d_constant_d_gamma + d_trend_d_gamma;
                    sum11 += weight[i] * d_forecast_d_alfa * d_forecast_d_alfa;
                    sum12 += weight[i] * d_forecast_d_alfa * d_forecast_d_gamma;
                    sum22 += weight[i] * d_forecast_d_gamma * d_forecast_d_gamma;
                    sum13 += weight[i] * d_forecast_d_alfa * (history_i - fitted);
                    sum23 += weight[i] * d_forecast_d_gamma * (history_i - fitted);
                    if i >= params.skip {
                        error += (fitted - history_i) * (fitted - history_i) * weight[i];
                        if (fitted + history_i).abs() > EPS {
                            error_smape +=
                                (fitted - history_i).abs() / (fitted + history_i).abs()
                                    * weight[i]
                                    * 2.0;
                            error_smape_weights += weight[i];
                        }
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

            if error < best_error {
                best_error = error;
                best_smape = if error_smape_weights > 0.0 {
                    error_smape / error_smape_weights
                } else {
                    0.0
                };
                best_alfa = self.alfa;
                best_gamma = self.gamma;
                best_constant_i = self.constant_i;
                best_trend_i = self.trend_i;
                best_standard_deviation = standard_deviation;
            }

            // Levenberg-Marquardt damping on the 2x2 normal matrix,
            // retried undamped when the system is near singular.
            sum11 += error / iteration as f64;
            sum22 += error / iteration as f64;
            let mut determinant = sum11 * sum22 - sum12 * sum12;
            if determinant.abs() < EPS {
                sum11 -= error / iteration as f64;
                sum22 -= error / iteration as f64;
                determinant = sum11 * sum22 - sum12 * sum12;
                if determinant.abs() < EPS {
                    break;
                }
            }
            let delta_alfa = (sum13 * sum22 - sum23 * sum12) / determinant;
            let delta_gamma = (sum23 * sum11 - sum13 * sum12) / determinant;

            if delta_alfa.abs() + delta_gamma.abs() < 2.0 * ACCURACY && iteration > 3 {
                break;
            }
            trace!(
                iteration,
                alfa = self.alfa,
                gamma = self.gamma,
                "double exponential iteration"
            );

            self.alfa = (self.alfa + delta_alfa).clamp(params.double_min_alfa, params.double_max_alfa);
            self.gamma =
                (self.gamma + delta_gamma).clamp(params.double_min_gamma, params.double_max_gamma);

            let alfa_at_bound =
                self.alfa == params.double_min_alfa || self.alfa == params.double_max_alfa;
            let gamma_at_bound =
                self.gamma == params.double_min_gamma || self.gamma == params.double_max_gamma;
            if alfa_at_bound && gamma_at_bound {
                boundary_tested += 1;
                if boundary_tested > 5 {
                    break;
                }
            }
            iteration += 1;
        }

        self.constant_i = best_constant_i;
        self.trend_i = best_trend_i;
        self.alfa = best_alfa;
        self.gamma = best_gamma;
        debug!(
            alfa = best_alfa,
            gamma = best_gamma,
            smape = best_smape,
            constant = self.constant_i,
            trend = self.trend_i,
            "double exponential fitted"
        );
        Metrics::new(best_smape, best_standard_deviation, false)
    }

    fn apply(
        &mut self,
        forecast: &mut Forecast,
        model: &Model,
        bucket_dates: &[Date],
        params: &ForecastParameters,
    ) -> CoreResult<()> {
        // The projection dampens the trend further into the future.
        if forecast.discrete {
            let mut carryover = 0.0;
            for w in bucket_dates.windows(2) {
                self.constant_i += self.trend_i;
                self.trend_i *= params.double_dampen_trend;
                carryover += self.constant_i;
                let val = (carryover - 0.5).ceil();
                carryover -= val;
                forecast.set_total(model, DateRange::new(w[0], w[1]), val.max(0.0), false)?;
            }
        } else {
            for w in bucket_dates.windows(2) {
                self.constant_i += self.trend_i;
                self.trend_i *= params.double_dampen_trend;
                forecast.set_total(
                    model,
                    DateRange::new(w[0], w[1]),
                    self.constant_i.max(0.0),
                    false,
                )?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "double exponential"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ForecastParameters {
        ForecastParameters {
            skip: 2,
            ..ForecastParameters::default()
        }
    }

    #[test]
    fn single_fits_level_series() {
        let history = vec![100.0, 101.0, 99.0, 100.0, 100.0, 101.0, 99.0, 100.0, 100.0, 100.0];
        let weight: Vec<f64> = vec![1.0; history.len() + 1];
        let mut m = SingleExponential::new(&params());
        let metrics = m.fit(&history, &weight, &params());
        assert!(metrics.is_usable());
        assert!(metrics.smape < 0.05);
        assert!((m.f_i - 100.0).abs() < 2.0);
    }

    #[test]
    fn single_needs_enough_history() {
        let history = vec![10.0; 4];
        let weight = vec![1.0; 5];
        let mut m = SingleExponential::new(&params());
        assert!(!m.fit(&history, &weight, &params()).is_usable());
    }

    #[test]
    fn double_tracks_a_trend() {
        let history: Vec<f64> = (0..12).map(|i| 10.0 + 5.0 * i as f64).collect();
        let weight = vec![1.0; 13];
        let mut m = DoubleExponential::new(&params());
        let metrics = m.fit(&history, &weight, &params());
        assert!(metrics.is_usable());
        // The fitted trend must be close to the real slope.
        assert!((m.trend_i - 5.0).abs() < 1.5, "trend {}", m.trend_i);
    }

    #[test]
    fn double_beats_single_on_trended_data() {
        let history: Vec<f64> = (0..12).map(|i| 10.0 + 5.0 * i as f64).collect();
        let weight = vec![1.0; 13];
        let mut single = SingleExponential::new(&params());
        let mut double = DoubleExponential::new(&params());
        let ms = single.fit(&history, &weight, &params());
        let md = double.fit(&history, &weight, &params());
        assert!(md.smape < ms.smape);
    }
}
