//! Demands: requests for a quantity of an item at a due date.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::dates::{Date, TimeSpan};
use crate::{CustomerId, ItemId, LocationId, OperationId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Demand {
    pub name: String,
    pub item: Option<ItemId>,
    pub customer: Option<CustomerId>,
    pub location: Option<LocationId>,
    pub quantity: f64,
    pub due: Date,
    /// Smaller numbers are more urgent.
    pub priority: i32,
    pub max_lateness: TimeSpan,
    pub min_shipment: f64,
    /// The delivery operation driven to satisfy this demand.
    pub operation: Option<OperationId>,
}

impl Demand {
    pub fn new(name: impl Into<String>, quantity: f64, due: Date) -> Self {
        Demand {
            name: name.into(),
            item: None,
            customer: None,
            location: None,
            quantity,
            due,
            priority: 10,
            max_lateness: TimeSpan::MAX,
            min_shipment: 0.0,
            operation: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_operation(mut self, operation: OperationId) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_item(mut self, item: ItemId) -> Self {
        self.item = Some(item);
        self
    }

    pub fn with_customer(mut self, customer: CustomerId) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn with_max_lateness(mut self, lateness: TimeSpan) -> Self {
        self.max_lateness = lateness;
        self
    }

    pub fn with_min_shipment(mut self, min_shipment: f64) -> Self {
        self.min_shipment = min_shipment;
        self
    }
}

/// The planning order: priority first, then due date, then quantity.
/// All demand loops (planning, netting, move-out candidate scoring) use
/// this single comparison so their results agree.
pub fn demand_ordering(a: &Demand, b: &Demand) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.due.cmp(&b.due))
        .then(a.quantity.partial_cmp(&b.quantity).unwrap_or(Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_by_priority_then_due_then_quantity() {
        let base = Demand::new("a", 10.0, Date(1_000));
        let urgent = Demand::new("b", 50.0, Date(2_000)).with_priority(1);
        assert_eq!(demand_ordering(&urgent, &base), Ordering::Less);

        let earlier = Demand::new("c", 10.0, Date(500));
        assert_eq!(demand_ordering(&earlier, &base), Ordering::Less);

        let smaller = Demand::new("d", 5.0, Date(1_000));
        assert_eq!(demand_ordering(&smaller, &base), Ordering::Less);
    }
}
