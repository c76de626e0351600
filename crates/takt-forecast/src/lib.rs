//! # takt-forecast: Demand Forecasting
//!
//! The forecasting side of the takt planning engine:
//!
//! - **Bucketized forecasts** ([`Forecast`]): a calendar divides the
//!   horizon into weighted buckets; totals distribute over them by
//!   weight and overlap, with discrete carry-over rounding.
//! - **Time-series generation** ([`generate_forecast`]): moving
//!   average, single and double exponential smoothing, Holt-Winters
//!   seasonal and Croston, fitted with Levenberg-Marquardt damping and
//!   scored by weighted SMAPE; the best method fills the future
//!   buckets.
//! - **Netting** ([`ForecastRegistry`]): firm orders consume the net
//!   forecast of their (item, customer) match, climbing both
//!   hierarchies when needed, so demand isn't counted twice.
//!
//! The generated net forecast flows into planning as ordinary demands
//! via [`Forecast::bucket_demands`].

pub mod bucket;
pub mod config;
pub mod engine;
pub mod methods;
pub mod netting;

pub use bucket::{Forecast, ForecastBucket};
pub use config::{ForecastParameters, MethodSet};
pub use engine::{generate_forecast, GeneratedForecast};
pub use methods::{
    Croston, DoubleExponential, ForecastMethod, Metrics, MovingAverage, Seasonal,
    SingleExponential,
};
pub use netting::ForecastRegistry;
