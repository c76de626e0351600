//! Order netting: deduct firm orders from the matching forecast.
//!
//! Each order looks up its forecast by (item, customer). When no exact
//! match exists the search climbs the customer and item hierarchies
//! toward their roots, in the configured order. The matched forecast is
//! consumed in the bucket holding the order's due date, then in earlier
//! and later buckets within the allowed netting window. Netting is
//! single threaded; the registry is the only shared structure it
//! writes.

use tracing::{debug, info, warn};

use takt_core::demand::{demand_ordering, Demand};
use takt_core::model::Model;
use takt_core::operation::ROUNDING_ERROR;
use takt_core::{CoreError, CoreResult, CustomerId, DemandId, ItemId};

use crate::bucket::Forecast;
use crate::config::ForecastParameters;

/// All forecasts of a planning context, searchable by item and
/// customer.
#[derive(Debug, Default)]
pub struct ForecastRegistry {
    forecasts: Vec<Forecast>,
}

impl ForecastRegistry {
    pub fn new() -> Self {
        ForecastRegistry::default()
    }

    pub fn add(&mut self, forecast: Forecast) -> usize {
        self.forecasts.push(forecast);
        self.forecasts.len() - 1
    }

    pub fn get(&self, idx: usize) -> &Forecast {
        &self.forecasts[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Forecast {
        &mut self.forecasts[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Forecast> {
        self.forecasts.iter()
    }

    pub fn len(&self) -> usize {
        self.forecasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forecasts.is_empty()
    }

    fn find(
        &self,
        item: Option<ItemId>,
        customer: Option<CustomerId>,
        demand: &Demand,
        params: &ForecastParameters,
    ) -> Option<usize> {
        self.forecasts.iter().position(|f| {
            f.item == item
                && f.customer == customer
                && (!params.match_using_delivery_operation || f.operation == demand.operation)
        })
    }

    /// Locate the forecast an order nets against, climbing the two
    /// hierarchies when the exact key has no forecast.
    pub fn match_demand(
        &self,
        model: &Model,
        demand: &Demand,
        params: &ForecastParameters,
    ) -> Option<usize> {
        let customer_first = params.customer_then_item_hierarchy;
        let mut item = demand.item;
        let mut customer = demand.customer;
        loop {
            // Walk the first dimension to its root.
            loop {
                if let Some(idx) = self.find(item, customer, demand, params) {
                    return Some(idx);
                }
                if customer_first {
                    match customer {
                        Some(c) => customer = model.customer_parent(c),
                        None => break,
                    }
                } else {
                    match item {
                        Some(i) => item = model.item_parent(i),
                        None => break,
                    }
                }
            }
            // Step the second dimension and reset the first.
            if customer_first {
                match item {
                    Some(i) => {
                        item = model.item_parent(i);
                        customer = demand.customer;
                    }
                    None => return None,
                }
            } else {
                match customer {
                    Some(c) => {
                        customer = model.customer_parent(c);
                        item = demand.item;
                    }
                    None => return None,
                }
            }
        }
    }

    /// Net one order. Returns the quantity that found no forecast to
    /// consume.
    pub fn net_demand(
        &mut self,
        model: &Model,
        demand: &Demand,
        params: &ForecastParameters,
    ) -> CoreResult<f64> {
        debug!(
            order = %demand.name,
            due = %demand.due,
            qty = demand.quantity,
            "netting order"
        );
        let Some(idx) = self.match_demand(model, demand, params) else {
            debug!(order = %demand.name, "no matching forecast available");
            return Ok(demand.quantity);
        };
        let early = params.net_early;
        let late = params.net_late;
        let fcst = &mut self.forecasts[idx];
        fcst.instantiate(model);
        if fcst.buckets().is_empty() {
            return Ok(demand.quantity);
        }
        let Some(zero) = fcst.bucket_containing(demand.due) else {
            return Err(CoreError::Logic(format!(
                "can't find forecast bucket for {} in forecast '{}'",
                demand.due, fcst.name
            )));
        };

        let due = demand.due;
        let in_window = |b: &crate::bucket::ForecastBucket| {
            due - early < b.range.end && due + late >= b.range.start
        };

        let mut remaining = demand.quantity;
        // Backward from the due bucket. Later buckets are only reached
        // when the backward walk runs off the start of the list; a walk
        // stopped by the netting window ends the search entirely.
        let mut i = zero as isize;
        let mut ran_off_start = false;
        while remaining > ROUNDING_ERROR {
            if i < 0 {
                ran_off_start = true;
                break;
            }
            let bucket = &mut fcst.buckets_mut()[i as usize];
            if !in_window(bucket) {
                break;
            }
            let take = remaining.min(bucket.net());
            if take > 0.0 {
                debug!(bucket = %bucket.range, take, "consuming forecast");
                bucket.inc_consumed(take);
                remaining -= take;
            }
            i -= 1;
        }
        if ran_off_start {
            let mut i = zero + 1;
            while remaining > ROUNDING_ERROR && i < fcst.buckets().len() {
                let bucket = &mut fcst.buckets_mut()[i];
                if !in_window(bucket) {
                    break;
                }
                let take = remaining.min(bucket.net());
                if take > 0.0 {
                    debug!(bucket = %bucket.range, take, "consuming forecast");
                    bucket.inc_consumed(take);
                    remaining -= take;
                }
                i += 1;
            }
        }

        if remaining > ROUNDING_ERROR {
            info!(
                order = %demand.name,
                remaining,
                "quantity could not be netted"
            );
        }
        Ok(remaining)
    }

    /// Net every firm order of the model against the registry, in the
    /// planning order. Per-order errors are logged and skipped.
    pub fn net_orders(&mut self, model: &Model, params: &ForecastParameters) {
        let mut orders: Vec<DemandId> = model.demands().map(|(id, _)| id).collect();
        orders.sort_by(|a, b| demand_ordering(model.demand(*a), model.demand(*b)));
        for id in orders {
            let demand = model.demand(id).clone();
            if let Err(e) = self.net_demand(model, &demand, params) {
                warn!(order = %demand.name, error = %e, "netting failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use takt_core::calendar::Calendar;
    use takt_core::dates::{Date, TimeSpan};

    const WEEK: i64 = 7 * 86_400;
    const BASE: i64 = 1_704_067_200;

    fn at(offset: i64) -> Date {
        Date(BASE + offset)
    }

    fn fixture() -> (Model, ForecastRegistry, ItemId, CustomerId) {
        let mut model = Model::new(at(0));
        let item = model.add_item("widget", None).unwrap();
        let customer = model.add_customer("acme", None).unwrap();
        let mut cal = Calendar::new("weeks", 0.0);
        for w in 0..4 {
            cal.set_value(at(w * WEEK), 1.0);
        }
        cal.set_value(at(4 * WEEK), 0.0);
        let cal = model.add_calendar(cal);

        let mut registry = ForecastRegistry::new();
        let mut fcst = Forecast::new("fc", cal)
            .with_item(item)
            .with_customer(customer);
        fcst.instantiate(&model);
        for b in fcst.buckets_mut() {
            b.set_total(100.0).unwrap();
        }
        registry.add(fcst);
        (model, registry, item, customer)
    }

    fn loose_params() -> ForecastParameters {
        ForecastParameters {
            match_using_delivery_operation: false,
            ..ForecastParameters::default()
        }
    }

    #[test]
    fn order_nets_its_due_bucket() {
        let (model, mut registry, item, customer) = fixture();
        // Due in the middle of week 2.
        let order = Demand::new("o1", 40.0, at(WEEK + 3 * 86_400))
            .with_item(item)
            .with_customer(customer);
        let remaining = registry.net_demand(&model, &order, &loose_params()).unwrap();
        assert_eq!(remaining, 0.0);
        let fcst = registry.get(0);
        assert_eq!(fcst.buckets()[1].consumed, 40.0);
        assert_eq!(fcst.buckets()[1].net(), 60.0);
        assert_eq!(fcst.buckets()[0].consumed, 0.0);
        assert_eq!(fcst.buckets()[2].consumed, 0.0);
    }

    #[test]
    fn overflow_stays_unnetted_without_window() {
        let (model, mut registry, item, customer) = fixture();
        let order = Demand::new("big", 150.0, at(WEEK))
            .with_item(item)
            .with_customer(customer);
        let remaining = registry.net_demand(&model, &order, &loose_params()).unwrap();
        // net_early/net_late are zero: only the due bucket nets.
        assert_eq!(remaining, 50.0);
    }

    #[test]
    fn forward_netting_requires_exhausted_early_buckets() {
        let (model, mut registry, item, customer) = fixture();
        // A late window is open, but there is no early window: the
        // backward walk stops on the window edge before reaching the
        // list start, so later buckets stay untouched.
        let params = ForecastParameters {
            net_late: TimeSpan::days(14),
            ..loose_params()
        };
        let order = Demand::new("big", 150.0, at(WEEK))
            .with_item(item)
            .with_customer(customer);
        let remaining = registry.net_demand(&model, &order, &params).unwrap();
        assert_eq!(remaining, 50.0);
        let fcst = registry.get(0);
        assert_eq!(fcst.buckets()[1].consumed, 100.0);
        assert_eq!(fcst.buckets()[2].consumed, 0.0);
        assert_eq!(fcst.buckets()[3].consumed, 0.0);
    }

    #[test]
    fn window_allows_spill_into_neighbors() {
        let (model, mut registry, item, customer) = fixture();
        let params = ForecastParameters {
            net_early: TimeSpan::days(14),
            net_late: TimeSpan::days(14),
            ..loose_params()
        };
        let order = Demand::new("big", 250.0, at(WEEK))
            .with_item(item)
            .with_customer(customer);
        let remaining = registry.net_demand(&model, &order, &params).unwrap();
        assert_eq!(remaining, 0.0);
        let fcst = registry.get(0);
        // Due bucket and the earlier one drain first, then the later.
        assert_eq!(fcst.buckets()[1].consumed, 100.0);
        assert_eq!(fcst.buckets()[0].consumed, 100.0);
        assert_eq!(fcst.buckets()[2].consumed, 50.0);
    }

    #[test]
    fn hierarchy_climb_finds_parent_forecast() {
        let (mut model, mut registry, item, customer) = fixture();
        // A child customer with no forecast of its own: the climb must
        // land on the parent's forecast.
        let child = model.add_customer("acme-retail", Some(customer)).unwrap();
        let order = Demand::new("o2", 30.0, at(WEEK))
            .with_item(item)
            .with_customer(child);
        let remaining = registry.net_demand(&model, &order, &loose_params()).unwrap();
        assert_eq!(remaining, 0.0);
        assert_eq!(registry.get(0).buckets()[1].consumed, 30.0);
    }

    #[test]
    fn no_match_returns_everything() {
        let (mut model, mut registry, _item, customer) = fixture();
        let other_item = model.add_item("gadget", None).unwrap();
        let order = Demand::new("o3", 25.0, at(WEEK))
            .with_item(other_item)
            .with_customer(customer);
        let remaining = registry.net_demand(&model, &order, &loose_params()).unwrap();
        assert_eq!(remaining, 25.0);
    }
}
