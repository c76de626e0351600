//! Forecasts and their time buckets.
//!
//! A forecast is a bucketized demand signal: a calendar divides the
//! horizon into buckets, each carrying a gross total, the quantity
//! consumed by netted orders, and a weight for distribution. Buckets
//! are instantiated lazily the first time a total is written. The open
//! (net) quantity of a bucket is what flows into planning as demand.

use serde::{Deserialize, Serialize};
use tracing::trace;

use takt_core::dates::{Date, DateRange, TimeSpan};
use takt_core::demand::Demand;
use takt_core::model::Model;
use takt_core::{CalendarId, CoreError, CoreResult, CustomerId, ItemId, LocationId, OperationId};

use crate::config::MethodSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastBucket {
    pub range: DateRange,
    /// Relative weight when distributing a total over buckets.
    pub weight: f64,
    /// Gross forecast.
    pub total: f64,
    /// Quantity netted away by firm orders.
    pub consumed: f64,
}

impl ForecastBucket {
    fn new(range: DateRange, weight: f64) -> Self {
        ForecastBucket {
            range,
            weight,
            total: 0.0,
            consumed: 0.0,
        }
    }

    /// The remaining net forecast of this bucket.
    pub fn net(&self) -> f64 {
        (self.total - self.consumed).max(0.0)
    }

    pub fn set_total(&mut self, total: f64) -> CoreResult<()> {
        if total < 0.0 {
            return Err(CoreError::Data(
                "gross forecast must be greater or equal to 0".into(),
            ));
        }
        self.total = total;
        Ok(())
    }

    pub fn inc_total(&mut self, delta: f64) {
        self.total = (self.total + delta).max(0.0);
    }

    pub fn set_consumed(&mut self, consumed: f64) -> CoreResult<()> {
        if consumed < 0.0 {
            return Err(CoreError::Data(
                "consumed forecast must be greater or equal to 0".into(),
            ));
        }
        self.consumed = consumed;
        Ok(())
    }

    pub fn inc_consumed(&mut self, delta: f64) {
        self.consumed = (self.consumed + delta).max(0.0);
    }
}

/// A bucketized demand signal for one item and customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    pub name: String,
    pub item: Option<ItemId>,
    pub customer: Option<CustomerId>,
    pub location: Option<LocationId>,
    /// Delivery operation inherited by every bucket demand.
    pub operation: Option<OperationId>,
    pub calendar: CalendarId,
    /// Round distributed quantities to whole units.
    pub discrete: bool,
    /// Whether bucket demands are released into planning.
    pub planned: bool,
    pub methods: MethodSet,
    /// The method picked by the last generation run.
    pub method: Option<String>,
    pub priority: i32,
    pub max_lateness: TimeSpan,
    pub min_shipment: f64,
    buckets: Vec<ForecastBucket>,
}

impl Forecast {
    pub fn new(name: impl Into<String>, calendar: CalendarId) -> Self {
        Forecast {
            name: name.into(),
            item: None,
            customer: None,
            location: None,
            operation: None,
            calendar,
            discrete: true,
            planned: true,
            methods: MethodSet::ALL,
            method: None,
            priority: 10,
            max_lateness: TimeSpan::MAX,
            min_shipment: 0.0,
            buckets: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: ItemId) -> Self {
        self.item = Some(item);
        self
    }

    pub fn with_customer(mut self, customer: CustomerId) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn with_operation(mut self, operation: OperationId) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_discrete(mut self, discrete: bool) -> Self {
        self.discrete = discrete;
        self
    }

    pub fn with_methods(mut self, methods: MethodSet) -> Self {
        self.methods = methods;
        self
    }

    pub fn is_instantiated(&self) -> bool {
        !self.buckets.is_empty()
    }

    pub fn buckets(&self) -> &[ForecastBucket] {
        &self.buckets
    }

    pub fn buckets_mut(&mut self) -> &mut [ForecastBucket] {
        &mut self.buckets
    }

    /// Create the buckets from the calendar. Only calendar buckets with
    /// a positive value yield a forecast bucket; the value becomes the
    /// weight.
    pub fn instantiate(&mut self, model: &Model) {
        if self.is_instantiated() {
            return;
        }
        for (range, value) in model.calendar(self.calendar).bucket_ranges() {
            if value > 0.0 {
                self.buckets.push(ForecastBucket::new(range, value));
            }
        }
        trace!(forecast = %self.name, buckets = self.buckets.len(), "instantiated");
    }

    /// The bucket containing a date.
    pub fn bucket_containing(&self, date: Date) -> Option<usize> {
        self.buckets.iter().position(|b| b.range.contains(date))
    }

    /// Update the gross total of the single bucket containing `date`.
    pub fn set_total_at(
        &mut self,
        model: &Model,
        date: Date,
        quantity: f64,
        add: bool,
    ) -> CoreResult<()> {
        self.instantiate(model);
        if let Some(idx) = self.bucket_containing(date) {
            let bucket = &mut self.buckets[idx];
            if add {
                bucket.inc_total(quantity);
            } else {
                bucket.set_total(quantity)?;
            }
        }
        Ok(())
    }

    /// Distribute a total over the buckets intersecting a date range,
    /// weighting each bucket by its weight times the overlap duration.
    /// With `add` the per-bucket portions increment the current totals,
    /// otherwise fully covered buckets are overwritten. In discrete
    /// mode a fractional carry rolls across the buckets.
    pub fn set_total(
        &mut self,
        model: &Model,
        range: DateRange,
        quantity: f64,
        add: bool,
    ) -> CoreResult<()> {
        self.instantiate(model);

        if range.duration().is_zero() {
            // A degenerate range addresses exactly one bucket.
            for bucket in &mut self.buckets {
                if bucket.range.contains(range.start) {
                    if add {
                        bucket.inc_total(quantity);
                    } else {
                        bucket.set_total(quantity)?;
                    }
                    return Ok(());
                }
            }
            return Ok(());
        }

        let mut weights = 0.0;
        for bucket in &self.buckets {
            if range.intersects(&bucket.range) {
                weights += bucket.weight * bucket.range.overlap(&range).as_seconds() as f64;
            }
        }
        if weights == 0.0 {
            return Err(CoreError::Data(format!(
                "no valid forecast date in range {} of forecast '{}'",
                range, self.name
            )));
        }

        let per_weight = quantity / weights;
        let mut carryover = 0.0;
        let discrete = self.discrete;
        for bucket in &mut self.buckets {
            if !range.intersects(&bucket.range) {
                continue;
            }
            let overlap = bucket.range.overlap(&range);
            let portion = bucket.weight * overlap.as_seconds() as f64 * per_weight;
            let partial = overlap < bucket.range.duration();
            if discrete {
                carryover += portion;
                let whole = (carryover - 0.5).ceil();
                carryover -= whole;
                if partial || add {
                    bucket.inc_total(whole);
                } else {
                    bucket.set_total(whole.max(0.0))?;
                }
            } else if partial || add {
                bucket.inc_total(portion);
            } else {
                bucket.set_total(portion)?;
            }
        }
        Ok(())
    }

    /// Sum of the gross totals over a range.
    pub fn total_in(&self, range: &DateRange) -> f64 {
        self.buckets
            .iter()
            .filter(|b| range.intersects(&b.range))
            .map(|b| b.total)
            .sum()
    }

    /// Materialize the net forecast of every bucket as a demand, for
    /// release into the planning run. Buckets with no open quantity
    /// yield nothing.
    pub fn bucket_demands(&self, due_at_end: bool) -> Vec<Demand> {
        if !self.planned {
            return Vec::new();
        }
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.net() > 0.0)
            .map(|(i, b)| {
                let due = if due_at_end { b.range.end } else { b.range.start };
                let mut demand = Demand::new(format!("{} - {}", self.name, i), b.net(), due)
                    .with_priority(self.priority)
                    .with_max_lateness(self.max_lateness)
                    .with_min_shipment(self.min_shipment);
                demand.item = self.item;
                demand.customer = self.customer;
                demand.location = self.location;
                demand.operation = self.operation;
                demand
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use takt_core::calendar::Calendar;

    const WEEK: i64 = 7 * 86_400;
    // 2024-01-01, comfortably inside the horizon.
    const BASE: i64 = 1_704_067_200;

    fn at(offset: i64) -> Date {
        Date(BASE + offset)
    }

    fn weekly_model(weeks: i64) -> (Model, CalendarId) {
        let mut model = Model::new(at(0));
        let mut cal = Calendar::new("weeks", 0.0);
        for w in 0..weeks {
            cal.set_value(at(w * WEEK), 1.0);
        }
        cal.set_value(at(weeks * WEEK), 0.0);
        let id = model.add_calendar(cal);
        (model, id)
    }

    #[test]
    fn distribution_sums_to_total() {
        let (model, cal) = weekly_model(4);
        let mut fcst = Forecast::new("f", cal).with_discrete(false);
        fcst.set_total(&model, DateRange::new(at(0), at(4 * WEEK)), 100.0, false)
            .unwrap();
        let sum: f64 = fcst.buckets().iter().map(|b| b.total).sum();
        assert!((sum - 100.0).abs() < 1e-9);
        // Equal weights and durations: equal portions.
        assert!((fcst.buckets()[0].total - 25.0).abs() < 1e-9);
    }

    #[test]
    fn discrete_distribution_carries_fractions() {
        let (model, cal) = weekly_model(4);
        let mut fcst = Forecast::new("f", cal);
        fcst.set_total(&model, DateRange::new(at(0), at(4 * WEEK)), 10.0, false)
            .unwrap();
        let sum: f64 = fcst.buckets().iter().map(|b| b.total).sum();
        assert!((sum - 10.0).abs() < 1e-9);
        for b in fcst.buckets() {
            assert_eq!(b.total, b.total.round());
        }
    }

    #[test]
    fn single_bucket_range_set_and_add() {
        let (model, cal) = weekly_model(4);
        let mut fcst = Forecast::new("f", cal);
        let inside = at(WEEK + 3 * 86_400);
        fcst.set_total_at(&model, inside, 40.0, false).unwrap();
        assert_eq!(fcst.buckets()[1].total, 40.0);
        assert_eq!(fcst.buckets()[0].total, 0.0);
        fcst.set_total_at(&model, inside, 5.0, true).unwrap();
        assert_eq!(fcst.buckets()[1].total, 45.0);
    }

    #[test]
    fn zero_weight_range_is_an_error() {
        let (model, cal) = weekly_model(2);
        let mut fcst = Forecast::new("f", cal);
        // The calendar value drops to zero after week 2; beyond there
        // is no valid forecast date.
        let err = fcst
            .set_total(
                &model,
                DateRange::new(at(10 * WEEK), at(12 * WEEK)),
                50.0,
                false,
            )
            .unwrap_err();
        assert!(err.to_string().contains("no valid forecast date"));
    }

    #[test]
    fn net_is_total_minus_consumed_floored() {
        let mut b = ForecastBucket::new(DateRange::new(at(0), at(WEEK)), 1.0);
        b.set_total(100.0).unwrap();
        b.inc_consumed(40.0);
        assert_eq!(b.net(), 60.0);
        b.inc_consumed(80.0);
        assert_eq!(b.net(), 0.0);
    }

    #[test]
    fn bucket_demands_inherit_forecast_fields() {
        let (model, cal) = weekly_model(2);
        let mut fcst = Forecast::new("f", cal).with_discrete(false);
        fcst.priority = 3;
        fcst.set_total(&model, DateRange::new(at(0), at(2 * WEEK)), 20.0, false)
            .unwrap();
        let demands = fcst.bucket_demands(false);
        assert_eq!(demands.len(), 2);
        assert_eq!(demands[0].priority, 3);
        assert_eq!(demands[0].due, at(0));
        let at_end = fcst.bucket_demands(true);
        assert_eq!(at_end[0].due, at(WEEK));
    }
}
