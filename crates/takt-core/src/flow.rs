//! Material and capacity edges of an operation.
//!
//! A [`Flow`] connects an operation to a buffer: positive quantities
//! produce into the buffer, negative quantities consume from it. A
//! [`Load`] connects an operation to a resource. Both can belong to a
//! named alternate group, in which case the solver picks one member at
//! plan time.

use serde::{Deserialize, Serialize};

use crate::dates::{Date, DateRange};
use crate::{BufferId, OperationId, ResourceId};

/// When the material movement happens, and whether the quantity scales
/// with the plan quantity or is a fixed lump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Proportional quantity at the plan start.
    Start,
    /// Proportional quantity at the plan end.
    End,
    /// Fixed quantity at the plan start.
    FixedStart,
    /// Fixed quantity at the plan end.
    FixedEnd,
}

impl FlowKind {
    #[inline]
    pub fn is_fixed(&self) -> bool {
        matches!(self, FlowKind::FixedStart | FlowKind::FixedEnd)
    }

    #[inline]
    pub fn at_start(&self) -> bool {
        matches!(self, FlowKind::Start | FlowKind::FixedStart)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub operation: OperationId,
    pub buffer: BufferId,
    pub kind: FlowKind,
    /// Quantity per planned unit for proportional kinds, absolute
    /// quantity for fixed kinds. Producers are strictly positive,
    /// consumers strictly negative.
    pub quantity: f64,
    pub effective: DateRange,
    /// Alternate group name; flows sharing a group on the same operation
    /// are substitutes and the solver selects one.
    pub alternate_group: Option<String>,
    pub priority: i32,
}

impl Flow {
    pub fn new(operation: OperationId, buffer: BufferId, kind: FlowKind, quantity: f64) -> Self {
        Flow {
            operation,
            buffer,
            kind,
            quantity,
            effective: DateRange::horizon(),
            alternate_group: None,
            priority: 1,
        }
    }

    pub fn with_effective(mut self, effective: DateRange) -> Self {
        self.effective = effective;
        self
    }

    pub fn with_alternate(mut self, group: impl Into<String>, priority: i32) -> Self {
        self.alternate_group = Some(group.into());
        self.priority = priority;
        self
    }

    #[inline]
    pub fn is_producer(&self) -> bool {
        self.quantity > 0.0
    }

    #[inline]
    pub fn is_consumer(&self) -> bool {
        self.quantity < 0.0
    }

    /// The signed flowplan quantity for a plan of `plan_qty` units dated
    /// at `date`. Outside the effective window the flow moves nothing.
    pub fn plan_quantity(&self, plan_qty: f64, date: Date) -> f64 {
        if !self.effective.contains(date) {
            return 0.0;
        }
        if self.kind.is_fixed() {
            if plan_qty > 0.0 {
                self.quantity
            } else {
                0.0
            }
        } else {
            self.quantity * plan_qty
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    pub operation: OperationId,
    pub resource: ResourceId,
    /// Capacity claimed per planned unit of time on the resource.
    pub quantity: f64,
    /// Required skill; when the resource is an aggregate pool, a child
    /// carrying this skill is chosen at plan time.
    pub skill: Option<String>,
    /// Setup required on the resource while this load runs.
    pub setup: Option<String>,
    pub effective: DateRange,
    pub alternate_group: Option<String>,
    pub priority: i32,
}

impl Load {
    pub fn new(operation: OperationId, resource: ResourceId, quantity: f64) -> Self {
        Load {
            operation,
            resource,
            quantity,
            skill: None,
            setup: None,
            effective: DateRange::horizon(),
            alternate_group: None,
            priority: 1,
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skill = Some(skill.into());
        self
    }

    pub fn with_setup(mut self, setup: impl Into<String>) -> Self {
        self.setup = Some(setup.into());
        self
    }

    pub fn with_effective(mut self, effective: DateRange) -> Self {
        self.effective = effective;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::Date;

    #[test]
    fn proportional_flow_scales_with_plan() {
        let f = Flow::new(OperationId::new(0), BufferId::new(0), FlowKind::End, 2.0);
        assert_eq!(f.plan_quantity(5.0, Date(1_000_000_000)), 10.0);
        assert!(f.is_producer());
    }

    #[test]
    fn fixed_flow_ignores_plan_quantity() {
        let f = Flow::new(
            OperationId::new(0),
            BufferId::new(0),
            FlowKind::FixedEnd,
            7.0,
        );
        assert_eq!(f.plan_quantity(100.0, Date(1_000_000_000)), 7.0);
        assert_eq!(f.plan_quantity(0.0, Date(1_000_000_000)), 0.0);
    }

    #[test]
    fn ineffective_flow_moves_nothing() {
        let f = Flow::new(OperationId::new(0), BufferId::new(0), FlowKind::End, -1.0)
            .with_effective(DateRange::new(Date(0), Date(100)));
        assert_eq!(f.plan_quantity(5.0, Date(200)), 0.0);
    }
}
