//! User-exit callbacks.
//!
//! External integrations (scripting layers, custom business rules)
//! observe the solver through this trait. Only the flow callback can
//! steer the result: returning `false` vetoes consumption from an
//! alternate flow.

use takt_core::model::Model;
use takt_core::{BufferId, DemandId, FlowId, OperationId, ResourceId};

#[allow(unused_variables)]
pub trait Hooks: Sync {
    /// Called before a demand is planned.
    fn demand(&self, model: &Model, demand: DemandId) {}

    /// Called before an operation is asked.
    fn operation(&self, model: &Model, operation: OperationId, constrained: bool) {}

    /// Called before a buffer is asked.
    fn buffer(&self, model: &Model, buffer: BufferId) {}

    /// Called before a resource is asked.
    fn resource(&self, model: &Model, resource: ResourceId) {}

    /// Called before consuming from an alternate flow. Returning
    /// `false` rejects this alternate and the solver moves on to the
    /// next one.
    fn flow(&self, model: &Model, flow: FlowId, quantity: f64) -> bool {
        true
    }
}

/// The default: no callbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {}
