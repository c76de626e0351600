//! # takt-core: Production Planning Model Core
//!
//! Provides the data model for a constrained production planning engine:
//! the supply network (operations, buffers, resources and the flow/load
//! edges between them), the demands placed on it, and the plan state the
//! solvers mutate (operation plans with their material and capacity
//! events).
//!
//! ## Design Philosophy
//!
//! Entities live in **arenas indexed by typed ids** rather than linked
//! by pointers:
//! - **Model**: the static network. Read-only during a planning run.
//! - **PlanState**: every operation plan, flowplan and loadplan, plus
//!   the per-buffer and per-resource timelines. This is the only state
//!   the solvers write.
//!
//! The split is what makes cluster-parallel planning safe: workers share
//! the model immutably and each owns the plan fragment of its cluster.
//!
//! ## Quick Start
//!
//! ```rust
//! use takt_core::*;
//!
//! let mut model = Model::new(Date(0));
//!
//! // A buffer replenished by a two-day make operation.
//! let stock = model.add_buffer(Buffer::new("stock").with_onhand(5.0));
//! let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(2)));
//! model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
//! model.buffer_mut(stock).producing = Some(make);
//!
//! // A delivery operation consuming from it, driven by a demand.
//! let deliver = model.add_operation(Operation::fixed_time("deliver", TimeSpan::ZERO));
//! model.add_flow(Flow::new(deliver, stock, FlowKind::Start, -1.0));
//! model.add_demand(Demand::new("order-1", 10.0, Date(10 * 86_400)).with_operation(deliver));
//!
//! assert!(model.validate().is_empty());
//! ```
//!
//! ## Modules
//!
//! - [`dates`] - instants, time spans, ranges, the wire formats
//! - [`calendar`] - date-valued step functions
//! - [`plan`] - operation plans, flow/load plans, timelines
//! - [`cluster`] - connected components and upstream levels
//! - [`problem`] - constraint records collected while planning

use serde::{Deserialize, Serialize};

pub mod buffer;
pub mod calendar;
pub mod cluster;
pub mod dates;
pub mod demand;
pub mod error;
pub mod flow;
pub mod model;
pub mod operation;
pub mod plan;
pub mod problem;
pub mod resource;

pub use buffer::{Buffer, BufferKind};
pub use calendar::{Calendar, CalendarBucket};
pub use cluster::{compute_clusters, compute_levels, Clusters, Levels};
pub use dates::{Date, DateRange, TimeSpan, INFINITE_FUTURE, INFINITE_PAST};
pub use demand::{demand_ordering, Demand};
pub use error::{CoreError, CoreResult};
pub use flow::{Flow, FlowKind, Load};
pub use model::{HierarchyNode, Location, Model};
pub use operation::{
    Operation, OperationKind, PlanShape, SearchMode, SplitShare, SubOperation, ROUNDING_ERROR,
};
pub use plan::{pegged_demands, FlowPlan, LoadPlan, OperationPlan, PlanSnapshot, PlanState};
pub use problem::{Problem, ProblemKind, ProblemMark, ProblemStack};
pub use resource::{Resource, ResourceKind, SetupMatrix, SetupRule};

// Newtype wrappers for IDs for type safety
macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub fn new(value: usize) -> Self {
                $name(value)
            }
            #[inline]
            pub fn value(&self) -> usize {
                self.0
            }
        }
    };
}

entity_id!(
    /// Index of an [`Operation`] in the model.
    OperationId
);
entity_id!(
    /// Index of a [`Buffer`] in the model.
    BufferId
);
entity_id!(
    /// Index of a [`Resource`] in the model.
    ResourceId
);
entity_id!(
    /// Index of a [`Flow`] in the model.
    FlowId
);
entity_id!(
    /// Index of a [`Load`] in the model.
    LoadId
);
entity_id!(
    /// Index of a [`Demand`] in the model.
    DemandId
);
entity_id!(
    /// Index of an item hierarchy node.
    ItemId
);
entity_id!(
    /// Index of a customer hierarchy node.
    CustomerId
);
entity_id!(
    /// Index of a [`Location`] in the model.
    LocationId
);
entity_id!(
    /// Index of a [`Calendar`] in the model.
    CalendarId
);
entity_id!(
    /// Index of a [`SetupMatrix`] in the model.
    SetupMatrixId
);
entity_id!(
    /// Index of an [`OperationPlan`] in the plan state.
    PlanId
);
entity_id!(
    /// Index of a [`FlowPlan`] in the plan state.
    FlowPlanId
);
entity_id!(
    /// Index of a [`LoadPlan`] in the plan state.
    LoadPlanId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let op = OperationId::new(3);
        assert_eq!(op.value(), 3);
        // BufferId::new(3) == op would not compile; sameness is only
        // checkable within one id type.
        assert_eq!(OperationId::new(3), op);
    }

    #[test]
    fn id_serde_is_transparent() {
        let id = BufferId::new(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
        let back: BufferId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
