//! The classical time-series methods.
//!
//! Every method fits its parameters on the history, scores itself with
//! a weighted symmetric mean absolute percentage error, and can then
//! project the fitted model over future buckets. The exponential
//! methods tune their smoothing constants with Levenberg-Marquardt
//! damped Newton steps; Croston scans its constant linearly.
//!
//! All methods except the seasonal one run a two-pass outlier loop: the
//! first pass fits while measuring the running standard deviation, and
//! when the worst residual exceeds the configured multiple of it, a
//! second pass refits against a history clipped to the band.

mod croston;
mod exponential;
mod moving_average;
mod seasonal;

pub use croston::Croston;
pub use exponential::{DoubleExponential, SingleExponential};
pub use moving_average::MovingAverage;
pub use seasonal::Seasonal;

use takt_core::dates::Date;
use takt_core::model::Model;
use takt_core::CoreResult;

use crate::bucket::Forecast;
use crate::config::ForecastParameters;

/// Convergence tolerance of the parameter search.
pub(crate) const ACCURACY: f64 = 0.01;

pub(crate) const EPS: f64 = 1e-6;

/// Outcome of fitting one method on a history.
#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    /// Weighted SMAPE over the non-warmup horizon.
    pub smape: f64,
    pub standard_deviation: f64,
    /// Set when this method must be chosen regardless of its error
    /// (seasonal fits with very high autocorrelation).
    pub force: bool,
}

impl Metrics {
    pub fn new(smape: f64, standard_deviation: f64, force: bool) -> Self {
        Metrics {
            smape,
            standard_deviation,
            force,
        }
    }

    /// A method that cannot be applied to this history.
    pub fn unusable() -> Self {
        Metrics {
            smape: f64::MAX,
            standard_deviation: f64::MAX,
            force: false,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.smape < f64::MAX
    }
}

pub trait ForecastMethod {
    /// Fit the method on the history and return its error metrics.
    /// The fitted state is kept for a later [`ForecastMethod::apply`].
    fn fit(&mut self, history: &[f64], weight: &[f64], params: &ForecastParameters) -> Metrics;

    /// Fill the future buckets from the fitted state. `bucket_dates`
    /// are the boundaries: bucket `i` spans `dates[i-1]..dates[i]`.
    fn apply(
        &mut self,
        forecast: &mut Forecast,
        model: &Model,
        bucket_dates: &[Date],
        params: &ForecastParameters,
    ) -> CoreResult<()>;

    fn name(&self) -> &'static str;
}

/// Project a constant per-bucket value into the future, with the
/// discrete carry-over when the forecast is discrete.
pub(crate) fn apply_constant(
    forecast: &mut Forecast,
    model: &Model,
    bucket_dates: &[Date],
    value: f64,
) -> CoreResult<()> {
    use takt_core::dates::DateRange;
    if forecast.discrete {
        let mut carryover = 0.0;
        for w in bucket_dates.windows(2) {
            carryover += value;
            let val = (carryover - 0.5).ceil();
            carryover -= val;
            forecast.set_total(model, DateRange::new(w[0], w[1]), val.max(0.0), false)?;
        }
    } else {
        for w in bucket_dates.windows(2) {
            forecast.set_total(model, DateRange::new(w[0], w[1]), value.max(0.0), false)?;
        }
    }
    Ok(())
}
