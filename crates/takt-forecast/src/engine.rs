//! Method selection and forecast generation.
//!
//! Given a demand history and a future bucket grid, the engine picks
//! the qualified methods for the history's shape, fits each, scores
//! them by weighted SMAPE and applies the winner to the future buckets.

use tracing::{info, warn};

use takt_core::dates::Date;
use takt_core::model::Model;
use takt_core::{CoreError, CoreResult};

use crate::bucket::Forecast;
use crate::config::{ForecastParameters, MethodSet};
use crate::methods::{
    Croston, DoubleExponential, ForecastMethod, MovingAverage, Seasonal, SingleExponential,
};

/// Summary of a generation run.
#[derive(Debug, Clone)]
pub struct GeneratedForecast {
    pub method: &'static str,
    pub smape: f64,
    pub standard_deviation: f64,
}

/// Generate future forecast values from historical demand.
///
/// `bucket_dates` holds the future bucket boundaries; bucket `i` spans
/// `dates[i-1]..dates[i]`, so at least two dates are required.
pub fn generate_forecast(
    forecast: &mut Forecast,
    model: &Model,
    history: &[f64],
    bucket_dates: &[Date],
    params: &ForecastParameters,
) -> CoreResult<Option<GeneratedForecast>> {
    let methods = forecast.methods;
    if methods.is_empty() {
        return Ok(None);
    }
    if bucket_dates.len() < 2 {
        return Err(CoreError::Data("need at least 2 forecast dates".into()));
    }

    // Leading zero buckets would distort every method; the series only
    // starts at the first real demand.
    let first_nonzero = history.iter().position(|h| *h != 0.0).unwrap_or(history.len());
    let history = &history[first_nonzero..];
    let count = history.len();

    let mut qualified: Vec<Box<dyn ForecastMethod>> = Vec::new();
    if count <= params.skip + 5 {
        // Too little history: only a moving average is trustworthy.
        if methods.moving_average() {
            qualified.push(Box::new(MovingAverage::new(params.moving_average_order)));
        }
    } else {
        let zeros = history.iter().filter(|h| **h == 0.0).count();
        if zeros as f64 > params.croston_min_intermittence * count as f64 {
            // Intermittent series: Croston.
            if methods.croston() {
                qualified.push(Box::new(Croston::new(params)));
            }
        } else {
            if methods.moving_average() {
                qualified.push(Box::new(MovingAverage::new(params.moving_average_order)));
            }
            if methods.constant() {
                qualified.push(Box::new(SingleExponential::new(params)));
            }
            if methods.trend() {
                qualified.push(Box::new(DoubleExponential::new(params)));
            }
            if methods.seasonal() {
                qualified.push(Box::new(Seasonal::new(params)));
            }
        }
    }
    if qualified.is_empty() {
        // None of the enabled methods suits the history; run whatever
        // is enabled anyway.
        warn!(
            forecast = %forecast.name,
            "the enabled forecast methods are potentially not suitable"
        );
        if methods.moving_average() {
            qualified.push(Box::new(MovingAverage::new(params.moving_average_order)));
        }
        if methods.croston() {
            qualified.push(Box::new(Croston::new(params)));
        }
        if methods.constant() {
            qualified.push(Box::new(SingleExponential::new(params)));
        }
        if methods.trend() {
            qualified.push(Box::new(DoubleExponential::new(params)));
        }
        if methods.seasonal() {
            qualified.push(Box::new(Seasonal::new(params)));
        }
    }
    if qualified.is_empty() || count == 0 {
        return Ok(None);
    }

    // SMAPE weights decay from the newest bucket backwards.
    let mut weight = vec![0.0; count + 1];
    weight[count] = 1.0;
    for i in (0..count).rev() {
        weight[i] = weight[i + 1] * params.smape_alfa;
    }

    let mut best_error = f64::MAX;
    let mut best_method: Option<usize> = None;
    let mut best_deviation = 0.0;
    for (i, method) in qualified.iter_mut().enumerate() {
        let metrics = method.fit(history, &weight, params);
        if metrics.smape < best_error || metrics.force {
            best_error = metrics.smape;
            best_method = Some(i);
            best_deviation = metrics.standard_deviation;
            if metrics.force {
                break;
            }
        }
    }

    if methods == MethodSet(MethodSet::SEASONAL) && best_error == f64::MAX {
        // Seasonal was the only allowed method and no cycle exists;
        // fall back to the trend method.
        let mut fallback: Box<dyn ForecastMethod> = Box::new(DoubleExponential::new(params));
        let metrics = fallback.fit(history, &weight, params);
        best_error = metrics.smape;
        best_deviation = metrics.standard_deviation;
        qualified = vec![fallback];
        best_method = Some(0);
    }

    let Some(best) = best_method.filter(|_| best_error < f64::MAX) else {
        forecast.method = None;
        return Ok(None);
    };

    let chosen = &mut qualified[best];
    info!(
        forecast = %forecast.name,
        method = chosen.name(),
        smape = best_error,
        "forecast method chosen"
    );
    chosen.apply(forecast, model, bucket_dates, params)?;
    forecast.method = Some(chosen.name().to_string());
    Ok(Some(GeneratedForecast {
        method: chosen.name(),
        smape: best_error,
        standard_deviation: best_deviation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use takt_core::calendar::Calendar;
    use takt_core::dates::DateRange;

    const WEEK: i64 = 7 * 86_400;
    const BASE: i64 = 1_704_067_200;

    fn at(offset: i64) -> Date {
        Date(BASE + offset)
    }

    fn fixture(buckets: i64) -> (Model, Forecast, Vec<Date>) {
        let mut model = Model::new(at(0));
        let mut cal = Calendar::new("weeks", 0.0);
        for w in 0..buckets {
            cal.set_value(at(w * WEEK), 1.0);
        }
        cal.set_value(at(buckets * WEEK), 0.0);
        let cal = model.add_calendar(cal);
        let forecast = Forecast::new("fc", cal).with_discrete(false);
        let dates: Vec<Date> = (0..=buckets).map(|w| at(w * WEEK)).collect();
        (model, forecast, dates)
    }

    fn no_skip() -> ForecastParameters {
        ForecastParameters {
            skip: 0,
            ..ForecastParameters::default()
        }
    }

    #[test]
    fn short_history_uses_moving_average() {
        let (model, mut forecast, dates) = fixture(4);
        let params = ForecastParameters::default();
        // Exactly skip + 5 points: still the short-history regime.
        let history = vec![10.0; params.skip + 5];
        let out = generate_forecast(&mut forecast, &model, &history, &dates, &params)
            .unwrap()
            .unwrap();
        assert_eq!(out.method, "moving average");
    }

    #[test]
    fn longer_history_opens_the_full_set() {
        let (model, mut forecast, dates) = fixture(4);
        let params = ForecastParameters::default();
        // One past the threshold: the full method set competes, and a
        // level series is no longer forced onto the moving average.
        let history = vec![10.0; params.skip + 6];
        let out = generate_forecast(&mut forecast, &model, &history, &dates, &params)
            .unwrap()
            .unwrap();
        assert_ne!(out.method, "croston");
    }

    #[test]
    fn intermittent_history_uses_croston() {
        let (model, mut forecast, dates) = fixture(4);
        let history = vec![9.0, 0.0, 0.0, 9.0, 0.0, 0.0, 9.0, 0.0, 0.0, 9.0, 0.0, 0.0];
        let out = generate_forecast(&mut forecast, &model, &history, &dates, &no_skip())
            .unwrap()
            .unwrap();
        assert_eq!(out.method, "croston");
    }

    #[test]
    fn strong_seasonality_is_forced() {
        let (model, mut forecast, dates) = fixture(8);
        let history: Vec<f64> = (0..4).flat_map(|_| [10.0, 20.0, 30.0, 20.0]).collect();
        let out = generate_forecast(&mut forecast, &model, &history, &dates, &no_skip())
            .unwrap()
            .unwrap();
        assert_eq!(out.method, "seasonal");
        // The projection continues the cycle: the third future bucket
        // must be the cycle peak.
        let totals: Vec<f64> = forecast.buckets().iter().map(|b| b.total).collect();
        let peak = totals
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(peak % 4, 2, "totals {totals:?}");
    }

    #[test]
    fn trended_history_picks_the_trend_method() {
        let (model, mut forecast, dates) = fixture(4);
        let history: Vec<f64> = (0..16).map(|i| 10.0 + 4.0 * i as f64).collect();
        let out = generate_forecast(&mut forecast, &model, &history, &dates, &no_skip())
            .unwrap()
            .unwrap();
        assert_eq!(out.method, "double exponential");
        // The projection keeps growing.
        let totals: Vec<f64> = forecast.buckets().iter().map(|b| b.total).collect();
        assert!(totals[1] > totals[0]);
    }

    #[test]
    fn leading_zeros_are_stripped() {
        let (model, mut forecast, dates) = fixture(4);
        let params = ForecastParameters::default();
        // Ten leading zeros then a short real series: the stripped
        // history is short, so the moving average is used.
        let mut history = vec![0.0; 10];
        history.extend(vec![10.0; 6]);
        let out = generate_forecast(&mut forecast, &model, &history, &dates, &params)
            .unwrap()
            .unwrap();
        assert_eq!(out.method, "moving average");
    }

    #[test]
    fn distribution_round_trip_totals() {
        let (model, mut forecast, _) = fixture(4);
        forecast
            .set_total(&model, DateRange::new(at(0), at(4 * WEEK)), 100.0, false)
            .unwrap();
        let read_back = forecast.total_in(&DateRange::new(at(0), at(4 * WEEK)));
        assert!((read_back - 100.0).abs() < 1e-9);
    }
}
