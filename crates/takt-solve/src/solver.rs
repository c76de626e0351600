//! Solver configuration and the top-level planning entry point.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use takt_core::dates::TimeSpan;
use takt_core::model::Model;
use takt_core::plan::PlanState;
use takt_core::problem::Problem;
use takt_core::{CoreResult, DemandId};

use crate::hooks::{Hooks, NoHooks};
use crate::scheduler;

/// Bitmask of the constraints a solver run respects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Constraints(pub u8);

impl Constraints {
    pub const LEADTIME: u8 = 1;
    pub const MATERIAL: u8 = 2;
    pub const CAPACITY: u8 = 4;
    pub const FENCE: u8 = 8;

    pub const NONE: Constraints = Constraints(0);
    pub const ALL: Constraints = Constraints(15);

    #[inline]
    pub fn leadtime(&self) -> bool {
        self.0 & Self::LEADTIME != 0
    }

    #[inline]
    pub fn material(&self) -> bool {
        self.0 & Self::MATERIAL != 0
    }

    #[inline]
    pub fn capacity(&self) -> bool {
        self.0 & Self::CAPACITY != 0
    }

    #[inline]
    pub fn fence(&self) -> bool {
        self.0 & Self::FENCE != 0
    }

    #[inline]
    pub fn any(&self) -> bool {
        self.0 != 0
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints::ALL
    }
}

/// What kind of plan a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    /// Respect all enabled constraints; demand may be short or late.
    #[default]
    Constrained,
    /// Meet all demand on time; search alternates for availability and
    /// leave the remaining shortage on the primary alternate.
    UnconstrainedWithAlternates,
    /// Meet all demand on time without evaluating alternates.
    UnconstrainedWithoutAlternates,
}

impl PlanType {
    pub fn is_constrained(&self) -> bool {
        matches!(self, PlanType::Constrained)
    }

    pub fn searches_alternates(&self) -> bool {
        !matches!(self, PlanType::UnconstrainedWithoutAlternates)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    pub constraints: Constraints,
    pub plan_type: PlanType,
    /// Upper bound of asks per demand; 0 means unbounded.
    pub iteration_max: u64,
    /// Absolute delta that stops buffer retry loops.
    pub iteration_threshold: f64,
    /// Percentage delta that stops buffer retry loops.
    pub iteration_accuracy: f64,
    /// Forward bump applied when a reply is zero at the asked date.
    pub lazy_delay: TimeSpan,
    /// Commit after each demand rather than keeping the journal open.
    pub autocommit: bool,
    pub allow_splits: bool,
    /// Round-robin over equal-capacity pool members.
    pub rotate_resources: bool,
    /// Replenish safety stock before planning any demand.
    pub plan_safety_stock_first: bool,
    /// 0 silent, 1 demand progress, 2 full ask/reply echo.
    pub log_level: u8,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            constraints: Constraints::ALL,
            plan_type: PlanType::Constrained,
            iteration_max: 0,
            iteration_threshold: 1.0,
            iteration_accuracy: 1.0,
            lazy_delay: TimeSpan::days(1),
            autocommit: true,
            allow_splits: true,
            rotate_resources: true,
            plan_safety_stock_first: false,
            log_level: 0,
        }
    }
}

/// Outcome of a planning run.
#[derive(Debug, Default)]
pub struct PlanResult {
    pub plan: PlanState,
    /// Constraints hit per demand; demands absent here planned clean.
    pub problems: HashMap<DemandId, Vec<Problem>>,
    /// Demands abandoned after an iteration or recursion limit.
    pub unplannable: Vec<DemandId>,
}

/// The demand-driven MRP solver.
///
/// Demands are partitioned into clusters (connected components of the
/// supply network) and each cluster is planned by one worker with a
/// private journal and state stack. Within a cluster, demands go in
/// (priority, due, quantity) order, each driving an ask/reply recursion
/// through its delivery operation.
pub struct SolverMrp {
    pub config: SolverConfig,
    cancel: Arc<AtomicBool>,
}

impl SolverMrp {
    pub fn new(config: SolverConfig) -> Self {
        SolverMrp {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation flag, checked between demands.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Plan every demand of the model, starting from an empty plan.
    pub fn solve(&self, model: &Model) -> CoreResult<PlanResult> {
        self.solve_with(model, PlanState::new(), &NoHooks)
    }

    /// Plan every demand, starting from existing plan state (loaded
    /// locked plans, previous run output).
    pub fn solve_with(
        &self,
        model: &Model,
        initial: PlanState,
        hooks: &dyn Hooks,
    ) -> CoreResult<PlanResult> {
        scheduler::run(model, &self.config, initial, hooks, &self.cancel)
    }
}

impl Default for SolverMrp {
    fn default() -> Self {
        SolverMrp::new(SolverConfig::default())
    }
}
