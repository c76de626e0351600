//! Forecast engine configuration.
//!
//! One flat parameter set covers bucketization, method fitting, outlier
//! filtering and order netting. The per-method `initial/min/max` boxes
//! bound the Levenberg-Marquardt parameter search.

use serde::{Deserialize, Serialize};

use takt_core::dates::TimeSpan;

/// Bitmask of the enabled time-series methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodSet(pub u8);

impl MethodSet {
    pub const CONSTANT: u8 = 1;
    pub const TREND: u8 = 2;
    pub const SEASONAL: u8 = 4;
    pub const CROSTON: u8 = 8;
    pub const MOVING_AVERAGE: u8 = 16;

    pub const ALL: MethodSet = MethodSet(31);
    pub const NONE: MethodSet = MethodSet(0);

    #[inline]
    pub fn constant(&self) -> bool {
        self.0 & Self::CONSTANT != 0
    }

    #[inline]
    pub fn trend(&self) -> bool {
        self.0 & Self::TREND != 0
    }

    #[inline]
    pub fn seasonal(&self) -> bool {
        self.0 & Self::SEASONAL != 0
    }

    #[inline]
    pub fn croston(&self) -> bool {
        self.0 & Self::CROSTON != 0
    }

    #[inline]
    pub fn moving_average(&self) -> bool {
        self.0 & Self::MOVING_AVERAGE != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Default for MethodSet {
    fn default() -> Self {
        MethodSet::ALL
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastParameters {
    /// Maximum fitting iterations per method. 1 disables tuning.
    pub iterations: u32,
    /// Exponential decay of the SMAPE weight for older buckets, in
    /// (0.5, 1.0].
    pub smape_alfa: f64,
    /// Warmup buckets excluded from the error measurement.
    pub skip: usize,
    /// Outlier threshold, as a multiple of the standard deviation.
    pub max_deviation: f64,

    pub moving_average_order: usize,

    pub single_initial_alfa: f64,
    pub single_min_alfa: f64,
    pub single_max_alfa: f64,

    pub double_initial_alfa: f64,
    pub double_min_alfa: f64,
    pub double_max_alfa: f64,
    pub double_initial_gamma: f64,
    pub double_min_gamma: f64,
    pub double_max_gamma: f64,
    pub double_dampen_trend: f64,

    pub seasonal_initial_alfa: f64,
    pub seasonal_min_alfa: f64,
    pub seasonal_max_alfa: f64,
    pub seasonal_initial_beta: f64,
    pub seasonal_min_beta: f64,
    pub seasonal_max_beta: f64,
    pub seasonal_gamma: f64,
    pub seasonal_dampen_trend: f64,
    pub seasonal_min_period: usize,
    pub seasonal_max_period: usize,
    /// Below this autocorrelation the seasonal method is never used.
    pub seasonal_min_autocorrelation: f64,
    /// Above this autocorrelation the seasonal method is always used.
    pub seasonal_max_autocorrelation: f64,

    pub croston_initial_alfa: f64,
    pub croston_min_alfa: f64,
    pub croston_max_alfa: f64,
    /// Fraction of zero buckets beyond which only Croston qualifies.
    pub croston_min_intermittence: f64,

    /// Forecast bucket demands are due at the bucket end instead of the
    /// start.
    pub due_at_end_of_bucket: bool,
    /// Netting hierarchy order: climb customers before items.
    pub customer_then_item_hierarchy: bool,
    /// Netting requires a matching delivery operation.
    pub match_using_delivery_operation: bool,
    /// How far before its due date an order may net forecast.
    pub net_early: TimeSpan,
    /// How far after its due date an order may net forecast.
    pub net_late: TimeSpan,
}

impl Default for ForecastParameters {
    fn default() -> Self {
        ForecastParameters {
            iterations: 15,
            smape_alfa: 0.95,
            skip: 5,
            max_deviation: 4.0,
            moving_average_order: 5,
            single_initial_alfa: 0.2,
            single_min_alfa: 0.03,
            single_max_alfa: 1.0,
            double_initial_alfa: 0.2,
            double_min_alfa: 0.02,
            double_max_alfa: 1.0,
            double_initial_gamma: 0.2,
            double_min_gamma: 0.05,
            double_max_gamma: 1.0,
            double_dampen_trend: 0.8,
            seasonal_initial_alfa: 0.2,
            seasonal_min_alfa: 0.02,
            seasonal_max_alfa: 1.0,
            seasonal_initial_beta: 0.2,
            seasonal_min_beta: 0.2,
            seasonal_max_beta: 1.0,
            seasonal_gamma: 0.05,
            seasonal_dampen_trend: 0.8,
            seasonal_min_period: 2,
            seasonal_max_period: 14,
            seasonal_min_autocorrelation: 0.5,
            seasonal_max_autocorrelation: 0.8,
            croston_initial_alfa: 0.1,
            croston_min_alfa: 0.03,
            croston_max_alfa: 1.0,
            croston_min_intermittence: 0.33,
            due_at_end_of_bucket: false,
            customer_then_item_hierarchy: true,
            match_using_delivery_operation: true,
            net_early: TimeSpan::ZERO,
            net_late: TimeSpan::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_set_bits() {
        let all = MethodSet::ALL;
        assert!(all.constant() && all.trend() && all.seasonal());
        assert!(all.croston() && all.moving_average());
        let only_croston = MethodSet(MethodSet::CROSTON);
        assert!(only_croston.croston());
        assert!(!only_croston.trend());
    }
}
