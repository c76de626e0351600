//! Holt-Winters multiplicative seasonal smoothing with automatic cycle
//! detection.

use tracing::{debug, trace};

use takt_core::dates::{Date, DateRange};
use takt_core::model::Model;
use takt_core::CoreResult;

use crate::bucket::Forecast;
use crate::config::ForecastParameters;

use super::{ForecastMethod, Metrics, ACCURACY, EPS};

const MAX_PERIOD: usize = 24;

#[derive(Debug, Clone)]
pub struct Seasonal {
    alfa: f64,
    beta: f64,
    period: usize,
    autocorrelation: f64,
    l_i: f64,
    t_i: f64,
    s_i: [f64; MAX_PERIOD],
    cycle_index: usize,
}

impl Seasonal {
    pub fn new(params: &ForecastParameters) -> Self {
        Seasonal {
            alfa: params.seasonal_initial_alfa,
            beta: params.seasonal_initial_beta,
            period: 0,
            autocorrelation: 0.0,
            l_i: 0.0,
            t_i: 0.0,
            s_i: [0.0; MAX_PERIOD],
            cycle_index: 0,
        }
    }

    pub fn detected_period(&self) -> usize {
        self.period
    }

    pub fn autocorrelation(&self) -> f64 {
        self.autocorrelation
    }

    /// Find a dominant cycle by the autocorrelation of the history.
    /// A period qualifies when its autocorrelation clears the minimum
    /// and pokes at least 10% above both neighbors; two adjacent lags
    /// within 0.05 of each other count as a twin peak.
    fn detect_cycle(&mut self, history: &[f64], params: &ForecastParameters) {
        let count = history.len();
        self.period = 0;
        self.autocorrelation = 0.0;
        if count < params.seasonal_min_period * 2 {
            return;
        }

        let average: f64 = history.iter().sum::<f64>() / count as f64;
        let variance: f64 = history
            .iter()
            .map(|h| (h - average) * (h - average))
            .sum::<f64>()
            / count as f64;
        if variance <= EPS {
            return;
        }

        let mut best_period = 0;
        let mut best_autocorrelation = params.seasonal_min_autocorrelation;
        let mut prev = 10.0;
        let mut prevprev = 10.0;
        let mut prevprevprev = 10.0;
        let max_p = params.seasonal_max_period.min(MAX_PERIOD);
        let mut p = params.seasonal_min_period;
        while p <= max_p && p < count / 2 {
            let mut correlation = 0.0;
            for i in p..count {
                correlation += (history[i] - average) * (history[i - p] - average);
            }
            correlation /= (count - p) as f64;
            correlation /= variance;

            if p > params.seasonal_min_period + 1
                && prev > prevprev * 1.1
                && prev > correlation * 1.1
                && prev > best_autocorrelation
            {
                // Autocorrelation peak at a single period.
                best_autocorrelation = prev;
                best_period = p - 1;
            }
            if p > params.seasonal_min_period + 2
                && prevprev > prevprevprev * 1.1
                && (prevprev - prev).abs() < 0.05
                && prev > correlation * 1.1
            {
                // Autocorrelation peak across two adjacent periods.
                if prev > best_autocorrelation {
                    best_autocorrelation = prev;
                    best_period = p - 1;
                }
                if prevprev > best_autocorrelation {
                    best_autocorrelation = prevprev;
                    best_period = p - 2;
                }
            }
            prevprevprev = prevprev;
            prevprev = prev;
            prev = correlation;
            p += 1;
        }

        self.autocorrelation = best_autocorrelation;
        self.period = best_period;
    }
}

impl ForecastMethod for Seasonal {
    // No outlier filtering in the seasonal fit. The standard deviation
    // is likewise only carried from the initialization and not updated
    // per iteration; both quirks are preserved from the reference
    // behavior of this method.
    fn fit(&mut self, history: &[f64], weight: &[f64], params: &ForecastParameters) -> Metrics {
        self.detect_cycle(history, params);
        if self.period == 0 {
            return Metrics::unusable();
        }
        let period = self.period;
        let count = history.len();

        // Initial components: level over the first cycle, trend from
        // the first-to-second cycle deltas, seasonal indexes over all
        // complete cycles.
        let mut l_initial = 0.0;
        let mut t_initial = 0.0;
        let mut s_initial = [0.0; MAX_PERIOD];
        for i in 0..period {
            l_initial += history[i];
            t_initial += history[i + period] - history[i];
        }
        t_initial /= period as f64;
        l_initial /= period as f64;
        let mut cycle_count = 0.0;
        let mut i = 0;
        while i + period <= count {
            cycle_count += 1.0;
            let cyclesum: f64 = history[i..i + period].iter().sum();
            if cyclesum != 0.0 {
                for j in 0..period {
                    s_initial[j] += history[i + j] / cyclesum * period as f64;
                }
            }
            i += period;
        }
        for s in s_initial.iter_mut().take(period) {
            *s /= cycle_count;
        }

        let mut best_error = f64::MAX;
        let mut best_smape = 0.0;
        let mut best_alfa = self.alfa;
        let mut best_beta = self.beta;
        let mut best_l_i = 0.0;
        let mut best_t_i = 0.0;
        let mut best_s_i = [0.0; MAX_PERIOD];
        let best_standard_deviation = 0.0;
        let mut boundary_tested = 0;
        let gamma = params.seasonal_gamma;

        let mut iteration = 1;
        while iteration <= params.iterations {
            let mut error = 0.0;
            let mut error_smape = 0.0;
            let mut error_smape_weights = 0.0;
            let mut sum11 = 0.0;
            let mut sum12 = 0.0;
            let mut sum13 = 0.0;
            let mut sum22 = 0.0;
            let mut sum23 = 0.0;
            let mut d_l_d_alfa = 0.0;
            let mut d_l_d_beta = 0.0;
            let mut d_t_d_alfa = 0.0;
            let mut d_t_d_beta = 0.0;
            let mut d_s_d_alfa = [0.0; MAX_PERIOD];
            let mut d_s_d_beta = [0.0; MAX_PERIOD];

            self.l_i = l_initial;
            self.t_i = t_initial;
            let mut cyclesum = 0.0;
            for i in 0..period {
                self.s_i[i] = s_initial[i];
                if i > 0 {
                    cyclesum += history[i - 1];
                }
            }

            let mut prev_cycle_index = period - 1;
            self.cycle_index = 0;
            for i in period..=count {
                let l_i_prev = self.l_i;
                cyclesum += history[i - 1];
                if i > period {
                    cyclesum -= history[i - 1 - period];
                }
                // A cycle-average level update rather than the textbook
                // single-point one; it is steadier on noisy data.
                self.l_i = self.alfa * cyclesum / period as f64
                    + (1.0 - self.alfa) * (self.l_i + self.t_i);
                if self.l_i < 0.0 {
                    self.l_i = 0.0;
                }
                self.t_i = self.beta * (self.l_i - l_i_prev) + (1.0 - self.beta) * self.t_i;
                let mut factor = -self.s_i[prev_cycle_index];
                if self.l_i != 0.0 {
                    self.s_i[prev_cycle_index] = gamma * history[i - 1] / self.l_i
                        + (1.0 - gamma) * self.s_i[prev_cycle_index];
                }
                if self.s_i[prev_cycle_index] < 0.0 {
                    self.s_i[prev_cycle_index] = 0.0;
                }

                // Rescale the seasonal indexes to sum to the period.
                factor = period as f64 / (period as f64 + factor + self.s_i[prev_cycle_index]);
                for s in self.s_i.iter_mut().take(period) {
                    *s *= factor;
                }

                if i == count {
                    break;
                }

                let d_l_d_alfa_prev = d_l_d_alfa;
                let d_l_d_beta_prev = d_l_d_beta;
                let d_t_d_alfa_prev = d_t_d_alfa;
                let d_t_d_beta_prev = d_t_d_beta;
                let d_s_d_alfa_prev = d_s_d_alfa[prev_cycle_index];
                let d_s_d_beta_prev = d_s_d_beta[prev_cycle_index];
                d_l_d_alfa = cyclesum / period as f64 - (self.l_i + self.t_i)
                    + (1.0 - self.alfa) * (d_l_d_alfa_prev + d_t_d_alfa_prev);
                d_l_d_beta = (1.0 - self.alfa) * (d_l_d_beta_prev + d_t_d_beta_prev);
                if self.l_i > EPS {
                    d_s_d_alfa[prev_cycle_index] =
                        -gamma * history[i - 1] / self.l_i / self.l_i * d_l_d_alfa_prev
                            + (1.0 - gamma) * d_s_d_alfa_prev;
                    d_s_d_beta[prev_cycle_index] =
                        -gamma * history[i - 1] / self.l_i / self.l_i * d_l_d_beta_prev
                            + (1.0 - gamma) * d_s_d_beta_prev;
                } else {
                    d_s_d_alfa[prev_cycle_index] = (1.0 - gamma) * d_s_d_alfa_prev;
                    d_s_d_beta[prev_cycle_index] = (1.0 - gamma) * d_s_d_beta_prev;
                }
                d_t_d_alfa = self.beta * (d_l_d_alfa - d_l_d_alfa_prev)
                    + (1.0 - self.beta) * d_t_d_alfa_prev;
                d_t_d_beta = (self.l_i - l_i_prev)
                    + self.beta * (d_l_d_beta - d_l_d_beta_prev)
                    - self.t_i
                    + (1.0 - self.beta) * d_t_d_beta_prev;
                let d_forecast_d_alfa = (d_l_d_alfa + d_t_d_alfa) * self.s_i[self.cycle_index]
                    + (self.l_i + self.t_i) * d_s_d_alfa[self.cycle_index];
                let d_forecast_d_beta = (d_l_d_beta + d_t_d_beta) * self.s_i[self.cycle_index]
                    + (self.l_i + self.t_i) * d_s_d_beta[self.cycle_index];
                let forecast_i = (self.l_i + self.t_i) * self.s_i[self.cycle_index];
                sum11 += weight[i] * d_forecast_d_alfa * d_forecast_d_alfa;
                sum12 += weight[i] * d_forecast_d_alfa * d_forecast_d_beta;
                sum22 += weight[i] * d_forecast_d_beta * d_forecast_d_beta;
                sum13 += weight[i] * d_forecast_d_alfa * (history[i] - forecast_i);
                sum23 += weight[i] * d_forecast_d_beta * (history[i] - forecast_i);
                if i >= params.skip {
                    error += (forecast_i - history[i]) * (forecast_i - history[i]) * weight[i];
                    if (forecast_i + history[i]).abs() > EPS {
                        error_smape += (forecast_i - history[i]).abs()
                            / (forecast_i + history[i]).abs()
                            * weight[i]
                            * 2.0;
                        error_smape_weights += weight[i];
                    }
                }
                self.cycle_index = (self.cycle_index + 1) % period;
                prev_cycle_index = (prev_cycle_index + 1) % period;
            }

            if error < best_error {
                best_error = error;
                best_smape = if error_smape_weights > 0.0 {
                    error_smape / error_smape_weights
                } else {
                    0.0
                };
                best_alfa = self.alfa;
                best_beta = self.beta;
                best_l_i = self.l_i;
                best_t_i = self.t_i;
                best_s_i[..period].copy_from_slice(&self.s_i[..period]);
            }

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
            let delta_beta = (sum23 * sum11 - sum13 * sum12) / determinant;
            if delta_alfa.abs() + delta_beta.abs() < 3.0 * ACCURACY && iteration > 3 {
                break;
            }
            trace!(iteration, alfa = self.alfa, beta = self.beta, "seasonal iteration");

            self.alfa =
                (self.alfa + delta_alfa).clamp(params.seasonal_min_alfa, params.seasonal_max_alfa);
            self.beta =
                (self.beta + delta_beta).clamp(params.seasonal_min_beta, params.seasonal_max_beta);
            let alfa_at_bound =
                self.alfa == params.seasonal_min_alfa || self.alfa == params.seasonal_max_alfa;
            let beta_at_bound =
                self.beta == params.seasonal_min_beta || self.beta == params.seasonal_max_beta;
            if alfa_at_bound && beta_at_bound {
                boundary_tested += 1;
                if boundary_tested > 5 {
                    break;
                }
            }
            iteration += 1;
        }

        if period > params.skip {
            // The seasonal fit measures fewer buckets (it warms up over
            // one full cycle); scale the error to stay comparable with
            // the other methods.
            best_smape *= (count - params.skip) as f64;
            best_smape /= (count - period) as f64;
        }

        self.alfa = best_alfa;
        self.beta = best_beta;
        self.l_i = best_l_i;
        self.t_i = best_t_i;
        self.s_i[..period].copy_from_slice(&best_s_i[..period]);
        self.cycle_index = count % period;

        debug!(
            alfa = best_alfa,
            beta = best_beta,
            smape = best_smape,
            period,
            autocorrelation = self.autocorrelation,
            "seasonal fitted"
        );
        // A very obvious cycle forces this method regardless of SMAPE.
        Metrics::new(
            best_smape,
            best_standard_deviation,
            self.autocorrelation > params.seasonal_max_autocorrelation,
        )
    }

    fn apply(
        &mut self,
        forecast: &mut Forecast,
        model: &Model,
        bucket_dates: &[Date],
        params: &ForecastParameters,
    ) -> CoreResult<()> {
        let period = self.period.max(1);
        if forecast.discrete {
            let mut carryover = 0.0;
            for w in bucket_dates.windows(2) {
                self.l_i += self.t_i;
                self.t_i *= params.seasonal_dampen_trend;
                carryover += self.l_i * self.s_i[self.cycle_index];
                let val = (carryover - 0.5).ceil();
                carryover -= val;
                forecast.set_total(model, DateRange::new(w[0], w[1]), val.max(0.0), false)?;
                self.cycle_index = (self.cycle_index + 1) % period;
            }
        } else {
            for w in bucket_dates.windows(2) {
                self.l_i += self.t_i;
                self.t_i *= params.seasonal_dampen_trend;
                let value = self.l_i * self.s_i[self.cycle_index];
                forecast.set_total(model, DateRange::new(w[0], w[1]), value.max(0.0), false)?;
                self.cycle_index = (self.cycle_index + 1) % period;
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "seasonal"
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

    fn cyclic_history(cycles: usize) -> Vec<f64> {
        let pattern = [10.0, 20.0, 30.0, 20.0];
        (0..cycles).flat_map(|_| pattern).collect()
    }

    #[test]
    fn detects_period_four() {
        let history = cyclic_history(4);
        let mut m = Seasonal::new(&params());
        m.detect_cycle(&history, &params());
        assert_eq!(m.detected_period(), 4);
        assert!(m.autocorrelation() > 0.8, "r = {}", m.autocorrelation());
    }

    #[test]
    fn strong_cycle_forces_the_method() {
        let history = cyclic_history(4);
        let weight = vec![1.0; history.len() + 1];
        let mut m = Seasonal::new(&params());
        let metrics = m.fit(&history, &weight, &params());
        assert!(metrics.force);
        assert!(metrics.is_usable());
    }

    #[test]
    fn no_cycle_means_unusable() {
        let history: Vec<f64> = (0..16).map(|i| 10.0 + i as f64).collect();
        let weight = vec![1.0; 17];
        let mut m = Seasonal::new(&params());
        let metrics = m.fit(&history, &weight, &params());
        assert!(!metrics.is_usable());
    }
}
