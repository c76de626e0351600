//! Excess removal: walk the producer graph upstream and take out
//! operation plans that created surplus.
//!
//! Buffers are processed from a worklist. In each buffer the excess at
//! the end of the horizon is traced back to its earliest unlocked
//! producers, which are deleted or shrunk; the buffers feeding those
//! producers are then pushed for scanning in turn.

use tracing::{debug, trace};

use takt_core::model::Model;
use takt_core::operation::ROUNDING_ERROR;
use takt_core::plan::PlanState;
use takt_core::{BufferId, DemandId, PlanId, ResourceId};

use crate::journal::{Command, Journal};

/// The excess-removal operator. When a journal is supplied, deletions
/// and resizes are recorded there and can be rolled back; otherwise
/// they are applied immediately.
pub struct OperatorDelete<'a> {
    model: &'a Model,
    worklist: Vec<BufferId>,
}

impl<'a> OperatorDelete<'a> {
    pub fn new(model: &'a Model) -> Self {
        OperatorDelete {
            model,
            worklist: Vec::new(),
        }
    }

    /// Remove excess from every buffer of the model.
    pub fn solve_all(&mut self, plan: &mut PlanState, journal: Option<&mut Journal>) {
        for (id, _) in self.model.buffers() {
            self.queue_buffer(id);
        }
        self.drain(plan, journal);
    }

    /// Remove excess starting from one buffer and its upstream chain.
    pub fn solve_buffer(
        &mut self,
        buffer: BufferId,
        plan: &mut PlanState,
        journal: Option<&mut Journal>,
    ) {
        self.queue_buffer(buffer);
        self.drain(plan, journal);
    }

    /// Delete a demand's unlocked deliveries, then clean up the excess
    /// their removal leaves upstream.
    pub fn solve_demand(
        &mut self,
        demand: DemandId,
        plan: &mut PlanState,
        mut journal: Option<&mut Journal>,
    ) {
        loop {
            let candidate = plan
                .deliveries(demand)
                .iter()
                .copied()
                .find(|p| !plan.plan(*p).locked);
            let Some(candidate) = candidate else {
                break;
            };
            // Deleting the delivery frees its consumed material.
            self.push_buffers(plan, candidate, true);
            delete_through(plan, journal.as_deref_mut(), candidate);
        }
        self.drain(plan, journal);
    }

    /// Scan the buffers fed by plans loading a resource.
    pub fn solve_resource(
        &mut self,
        resource: ResourceId,
        plan: &mut PlanState,
        journal: Option<&mut Journal>,
    ) {
        for lp_id in plan.resource_events(resource).to_vec() {
            let owner = plan.loadplan(lp_id).plan;
            self.push_buffers(plan, owner, false);
        }
        self.drain(plan, journal);
    }

    fn queue_buffer(&mut self, buffer: BufferId) {
        if !self.worklist.contains(&buffer) {
            self.worklist.push(buffer);
        }
    }

    /// Queue the buffers a plan consumes from (`consuming`) or produces
    /// into, recursing through its sub-plans.
    fn push_buffers(&mut self, plan: &PlanState, id: PlanId, consuming: bool) {
        for fp_id in &plan.plan(id).flowplans {
            let fp = plan.flowplan(*fp_id);
            if (consuming && fp.quantity >= 0.0) || (!consuming && fp.quantity <= 0.0) {
                continue;
            }
            self.queue_buffer(fp.buffer);
        }
        for child in plan.plan(id).children.clone() {
            self.push_buffers(plan, child, consuming);
        }
    }

    fn drain(&mut self, plan: &mut PlanState, mut journal: Option<&mut Journal>) {
        while let Some(buffer) = self.worklist.pop() {
            self.remove_excess(buffer, plan, journal.as_deref_mut());
        }
    }

    /// Delete or shrink the earliest producers whose output is surplus
    /// in this buffer.
    fn remove_excess(
        &mut self,
        buffer: BufferId,
        plan: &mut PlanState,
        mut journal: Option<&mut Journal>,
    ) {
        let profile = plan.buffer_profile(self.model, buffer);
        let Some(last) = profile.last() else {
            return;
        };
        let mut excess = last.onhand - self.model.buffer_minimum_at(buffer, last.date);
        if excess <= ROUNDING_ERROR {
            return;
        }
        trace!(
            buffer = %self.model.buffer(buffer).name,
            excess,
            "scanning for excess"
        );

        let events: Vec<_> = profile.iter().map(|e| e.flowplan).collect();
        for fp_id in events {
            if excess <= ROUNDING_ERROR {
                break;
            }
            if !plan.contains_flowplan(fp_id) {
                // Removed along with an earlier deletion.
                continue;
            }
            let (owner, fp_qty) = {
                let fp = plan.flowplan(fp_id);
                (fp.plan, fp.quantity)
            };
            if fp_qty <= 0.0 {
                continue;
            }
            let cur_excess = plan.excess_of(self.model, buffer, fp_id);
            if plan.plan(owner).locked || cur_excess < ROUNDING_ERROR {
                continue;
            }

            // Whatever this plan consumed upstream becomes potential
            // excess there.
            self.push_buffers(plan, owner, true);

            if cur_excess >= fp_qty - ROUNDING_ERROR {
                // The whole plan is surplus.
                debug!(
                    buffer = %self.model.buffer(buffer).name,
                    operation = %self.model.operation(plan.plan(owner).operation).name,
                    qty = fp_qty,
                    "deleting excess plan"
                );
                excess -= fp_qty;
                delete_through(plan, journal.as_deref_mut(), owner);
            } else {
                // Shrink the plan to its useful part, if the size grid
                // allows a smaller plan at all.
                let flow = self.model.flow(plan.flowplan(fp_id).flow);
                let op = self.model.operation(plan.plan(owner).operation);
                let desired_flow_qty = fp_qty - cur_excess;
                let target_qty = if flow.kind.is_fixed() {
                    continue;
                } else {
                    op.apply_size(desired_flow_qty / flow.quantity)
                };
                let old_qty = plan.plan(owner).quantity;
                if target_qty >= old_qty - ROUNDING_ERROR || target_qty <= ROUNDING_ERROR {
                    // No feasible smaller size.
                    continue;
                }
                debug!(
                    buffer = %self.model.buffer(buffer).name,
                    operation = %op.name,
                    from = old_qty,
                    to = target_qty,
                    "shrinking excess plan"
                );
                if let Some(j) = journal.as_deref_mut() {
                    let prev = plan.shape_of(owner);
                    j.record(Command::Move { plan: owner, prev });
                }
                plan.set_quantity(self.model, owner, target_qty);
                excess -= (old_qty - target_qty) * flow.quantity;
            }
        }
    }
}

fn delete_through(plan: &mut PlanState, journal: Option<&mut Journal>, id: PlanId) {
    let snapshot = plan.delete_plan(id);
    if let Some(j) = journal {
        j.record(Command::Delete { snapshot });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use takt_core::dates::{Date, TimeSpan};
    use takt_core::flow::{Flow, FlowKind};
    use takt_core::operation::Operation;
    use takt_core::Buffer;

    fn day(n: i64) -> Date {
        // 2024-01-01 plus n days, comfortably inside the horizon.
        Date(1_704_067_200 + n * 86_400)
    }

    #[test]
    fn deletes_unconsumed_supply() {
        let mut model = Model::new(day(0));
        let stock = model.add_buffer(Buffer::new("stock"));
        let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(1)));
        model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));

        let mut plan = PlanState::new();
        plan.create_plan(&model, make, 10.0, None, Some(day(5)), true, None, None, false);

        let mut op = OperatorDelete::new(&model);
        op.solve_buffer(stock, &mut plan, None);
        assert_eq!(plan.final_onhand(&model, stock), 0.0);
        assert_eq!(plan.plan_ids().count(), 0);
    }

    #[test]
    fn shrinks_partially_consumed_supply() {
        let mut model = Model::new(day(0));
        let stock = model.add_buffer(Buffer::new("stock"));
        let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(1)));
        model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
        let ship = model.add_operation(Operation::fixed_time("ship", TimeSpan::ZERO));
        model.add_flow(Flow::new(ship, stock, FlowKind::Start, -1.0));

        let mut plan = PlanState::new();
        plan.create_plan(&model, make, 10.0, None, Some(day(5)), true, None, None, false);
        plan.create_plan(&model, ship, 4.0, Some(day(6)), None, false, None, None, false);

        let mut op = OperatorDelete::new(&model);
        op.solve_buffer(stock, &mut plan, None);
        // The producer shrinks to the 4 consumed units.
        assert!((plan.final_onhand(&model, stock) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn locked_plans_are_untouched() {
        let mut model = Model::new(day(0));
        let stock = model.add_buffer(Buffer::new("stock"));
        let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(1)));
        model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));

        let mut plan = PlanState::new();
        let id = plan.create_plan(&model, make, 10.0, None, Some(day(5)), true, None, None, false);
        plan.plan_mut(id).locked = true;

        let mut op = OperatorDelete::new(&model);
        op.solve_buffer(stock, &mut plan, None);
        assert!(plan.contains(id));
        assert_eq!(plan.final_onhand(&model, stock), 10.0);
    }

    #[test]
    fn minimal_plan_is_a_fixed_point() {
        let mut model = Model::new(day(0));
        let stock = model.add_buffer(Buffer::new("stock"));
        let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(1)));
        model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
        let ship = model.add_operation(Operation::fixed_time("ship", TimeSpan::ZERO));
        model.add_flow(Flow::new(ship, stock, FlowKind::Start, -1.0));

        let mut plan = PlanState::new();
        plan.create_plan(&model, make, 4.0, None, Some(day(5)), true, None, None, false);
        plan.create_plan(&model, ship, 4.0, Some(day(6)), None, false, None, None, false);

        let mut op = OperatorDelete::new(&model);
        op.solve_buffer(stock, &mut plan, None);
        let plans_after_first: Vec<_> = plan.plan_ids().collect();
        let mut op2 = OperatorDelete::new(&model);
        op2.solve_buffer(stock, &mut plan, None);
        let plans_after_second: Vec<_> = plan.plan_ids().collect();
        assert_eq!(plans_after_first, plans_after_second);
    }
}
