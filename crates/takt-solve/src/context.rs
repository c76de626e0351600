//! Per-worker solver context.
//!
//! One context exists per cluster worker: it owns the cluster's plan
//! fragment, its journal and its state stack. The model, configuration
//! and hooks are shared immutably.

use std::collections::HashMap;

use takt_core::dates::{Date, DateRange};
use takt_core::model::Model;
use takt_core::operation::PlanShape;
use takt_core::plan::PlanState;
use takt_core::problem::{Problem, ProblemKind, ProblemStack};
use takt_core::{CoreError, CoreResult, DemandId, OperationId, PlanId, ResourceId};

use crate::hooks::Hooks;
use crate::journal::{Bookmark, Command, Journal};
use crate::solver::SolverConfig;
use crate::state::{State, StateStack};

pub struct SolveCtx<'a> {
    pub model: &'a Model,
    pub config: &'a SolverConfig,
    pub hooks: &'a dyn Hooks,
    pub plan: PlanState,
    pub journal: Journal,
    pub stack: StateStack,
    /// True while planning under constraints; alternate handlers flip
    /// this temporarily during unconstrained fallbacks.
    pub constrained: bool,
    /// Whether shortfalls are recorded as problems right now.
    pub log_constraints: bool,
    pub planning_demand: Option<DemandId>,
    pub problems: ProblemStack,
    /// Set during the safety stock pass; suppresses problem records.
    pub safety_stock_planning: bool,
    /// Asks spent on the current demand, against `iteration_max`.
    pub iteration_count: u64,
    /// Round-robin cursors for `rotate_resources`.
    pub rotation: HashMap<ResourceId, usize>,
}

impl<'a> SolveCtx<'a> {
    pub fn new(
        model: &'a Model,
        config: &'a SolverConfig,
        hooks: &'a dyn Hooks,
        plan: PlanState,
    ) -> Self {
        SolveCtx {
            model,
            config,
            hooks,
            plan,
            journal: Journal::new(),
            stack: StateStack::new(),
            constrained: config.plan_type.is_constrained(),
            log_constraints: true,
            planning_demand: None,
            problems: ProblemStack::new(),
            safety_stock_planning: false,
            iteration_count: 0,
            rotation: HashMap::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> &State {
        self.stack.top()
    }

    #[inline]
    pub fn state_mut(&mut self) -> &mut State {
        self.stack.top_mut()
    }

    #[inline]
    pub fn now(&self) -> Date {
        self.model.current
    }

    /// Count one ask against the per-demand iteration limit.
    pub fn count_ask(&mut self) -> CoreResult<()> {
        self.iteration_count += 1;
        if self.config.iteration_max > 0 && self.iteration_count > self.config.iteration_max {
            return Err(CoreError::Runtime(format!(
                "maximum number of asks ({}) exceeded",
                self.config.iteration_max
            )));
        }
        Ok(())
    }

    // ----- journaled mutations ---------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_plan(
        &mut self,
        operation: OperationId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        demand: Option<DemandId>,
        owner: Option<PlanId>,
        defer_flow_loads: bool,
    ) -> PlanId {
        let id = self.plan.create_plan(
            self.model,
            operation,
            quantity,
            start,
            end,
            prefer_end,
            demand,
            owner,
            defer_flow_loads,
        );
        self.journal.record(Command::Create { plan: id });
        id
    }

    /// Journaled reshape; undone by rollback. Used by passes that touch
    /// plans created outside their own journal scope.
    pub fn move_plan(
        &mut self,
        id: PlanId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
    ) -> PlanShape {
        let prev = self.plan.shape_of(id);
        self.journal.record(Command::Move { plan: id, prev });
        self.plan
            .set_shape(self.model, id, quantity, start, end, prefer_end)
    }

    /// Direct reshape of a plan created in the current journal scope.
    /// A rollback deletes the whole plan, so no shape history is kept.
    pub fn move_plan_direct(
        &mut self,
        id: PlanId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
    ) -> PlanShape {
        self.plan
            .set_shape(self.model, id, quantity, start, end, prefer_end)
    }

    pub fn set_quantity_direct(&mut self, id: PlanId, quantity: f64) -> PlanShape {
        self.plan.set_quantity(self.model, id, quantity)
    }

    pub fn delete_plan(&mut self, id: PlanId) {
        let snapshot = self.plan.delete_plan(id);
        self.journal.record(Command::Delete { snapshot });
    }

    pub fn rollback(&mut self, mark: Bookmark) {
        self.journal.rollback(self.model, &mut self.plan, mark);
    }

    // ----- problem recording -----------------------------------------

    pub fn push_problem(
        &mut self,
        kind: ProblemKind,
        operation: Option<OperationId>,
        dates: DateRange,
        quantity: f64,
    ) {
        if self.log_constraints && !self.safety_stock_planning {
            self.problems.push(Problem {
                kind,
                operation,
                dates,
                quantity,
            });
        }
    }
}
