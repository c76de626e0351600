//! Lateness repair: move plans out of the release fence and resolve the
//! buffer shortages the moves create.
//!
//! Pass one snaps every unlocked plan starting inside the fence window
//! forward to `now + fence`. Pass two walks the buffers from the
//! deepest level downstream: in every shortage region, the unlocked
//! consumer pegged to the least urgent demand is pushed to the date of
//! the next producer, repeating until the shortage clears or no
//! candidate is left.

use tracing::{debug, info, trace, warn};

use takt_core::cluster::compute_levels;
use takt_core::dates::Date;
use takt_core::demand_ordering;
use takt_core::model::Model;
use takt_core::operation::ROUNDING_ERROR;
use takt_core::plan::{pegged_demands, PlanState};
use takt_core::{BufferId, CoreResult, DemandId, PlanId};

use crate::journal::{Command, Journal};
use crate::solver::Constraints;

/// Bound on repair iterations per buffer, against pathological models.
const MAX_REPAIR_ROUNDS: usize = 1_000;

pub struct OperatorMoveOut<'a> {
    model: &'a Model,
    constraints: Constraints,
}

impl<'a> OperatorMoveOut<'a> {
    pub fn new(model: &'a Model, constraints: Constraints) -> Self {
        OperatorMoveOut { model, constraints }
    }

    /// Run both passes. Buffers of different clusters never interact,
    /// so one deepest-first sweep covers them all.
    pub fn solve(&self, plan: &mut PlanState, mut journal: Option<&mut Journal>) -> CoreResult<()> {
        let levels = compute_levels(self.model);

        if self.constraints.fence() || self.constraints.leadtime() {
            for (op_id, _) in self.model.operations() {
                self.repair_fence(plan, journal.as_deref_mut(), op_id);
            }
        }

        // Deepest buffers first, so downstream shortages see repaired
        // upstream supply.
        let mut buffers: Vec<BufferId> = self.model.buffers().map(|(id, _)| id).collect();
        buffers.sort_by_key(|b| std::cmp::Reverse(levels.of_buffer[b.value()]));
        for buffer in buffers {
            self.repair_buffer(plan, journal.as_deref_mut(), buffer);
        }
        Ok(())
    }

    /// Pass one: push plans of one operation past the fence window.
    fn repair_fence(
        &self,
        plan: &mut PlanState,
        mut journal: Option<&mut Journal>,
        operation: takt_core::OperationId,
    ) {
        let op = self.model.operation(operation);
        let mut earliest = self.model.current;
        if self.constraints.fence() && !op.fence.is_negative() {
            earliest = earliest + op.fence;
        }

        let ids: Vec<PlanId> = plan
            .plan_ids()
            .filter(|id| plan.plan(*id).operation == operation)
            .collect();
        let mut first = true;
        for id in ids {
            let p = plan.plan(id);
            if p.locked || p.dates.start >= earliest {
                continue;
            }
            if first {
                debug!(operation = %op.name, "repairing fence violations");
                first = false;
            }
            let orig = plan.shape_of(id);
            if let Some(j) = journal.as_deref_mut() {
                j.record(Command::Move { plan: id, prev: orig });
            }
            plan.set_shape(self.model, id, orig.quantity, Some(earliest), None, false);
            trace!(
                operation = %op.name,
                from = %orig.start,
                to = %earliest,
                "moved out of fence"
            );
        }
    }

    /// Pass two: resolve the shortages of one buffer by displacing the
    /// consumer with the least urgent pegged demand.
    fn repair_buffer(
        &self,
        plan: &mut PlanState,
        mut journal: Option<&mut Journal>,
        buffer: BufferId,
    ) {
        // Only temporal problems can be fixed by moving plans around; a
        // true net shortage stays.
        if plan.final_onhand(self.model, buffer) < -ROUNDING_ERROR {
            trace!(
                buffer = %self.model.buffer(buffer).name,
                "net shortage, nothing to rearrange"
            );
            return;
        }

        for _round in 0..MAX_REPAIR_ROUNDS {
            let profile = plan.buffer_profile(self.model, buffer);

            // First date where the settled onhand goes negative. Only
            // the last event of each instant counts; same-date
            // producers and consumers balance out.
            let Some(short_idx) = profile.iter().enumerate().position(|(i, e)| {
                let last_of_date =
                    i + 1 >= profile.len() || profile[i + 1].date != e.date;
                last_of_date && e.onhand < -ROUNDING_ERROR
            }) else {
                return;
            };

            // The next producer after the shortage begins ends the
            // region; everything consuming before it is a candidate.
            let Some(producer_idx) = profile[short_idx..]
                .iter()
                .position(|e| e.quantity > 0.0)
                .map(|i| i + short_idx)
            else {
                info!(
                    buffer = %self.model.buffer(buffer).name,
                    "no candidate found to resolve the shortage"
                );
                return;
            };
            let reference_date = profile[producer_idx].date;

            let mut candidate: Option<(takt_core::FlowPlanId, Option<DemandId>)> = None;
            for ev in &profile {
                if ev.date >= reference_date {
                    break;
                }
                if ev.quantity >= 0.0 {
                    continue;
                }
                let owner = plan.flowplan(ev.flowplan).plan;
                if plan.plan(owner).locked {
                    continue;
                }
                let score = most_urgent_pegged(plan, self.model, owner);
                match (&candidate, &score) {
                    // A candidate serving no demand at all beats any
                    // pegged one.
                    (Some((_, None)), Some(_)) => continue,
                    (Some((_, Some(best))), Some(cur)) => {
                        if demand_ordering(self.model.demand(*cur), self.model.demand(*best))
                            == std::cmp::Ordering::Less
                        {
                            // The current consumer is more urgent than
                            // the best so far; keep the best.
                            continue;
                        }
                        candidate = Some((ev.flowplan, score));
                    }
                    _ => candidate = Some((ev.flowplan, score)),
                }
            }

            let Some((fp_id, _)) = candidate else {
                info!(
                    buffer = %self.model.buffer(buffer).name,
                    "no candidate found to resolve the shortage"
                );
                return;
            };

            // Move the whole consumer so its consumption lands on the
            // producer's date.
            let owner = plan.flowplan(fp_id).plan;
            let flow = self.model.flow(plan.flowplan(fp_id).flow);
            let orig = plan.shape_of(owner);
            if let Some(j) = journal.as_deref_mut() {
                j.record(Command::Move { plan: owner, prev: orig });
            }
            if flow.kind.at_start() {
                plan.set_shape(
                    self.model,
                    owner,
                    orig.quantity,
                    Some(reference_date),
                    None,
                    false,
                );
            } else {
                plan.set_shape(
                    self.model,
                    owner,
                    orig.quantity,
                    None,
                    Some(reference_date),
                    true,
                );
            }
            debug!(
                buffer = %self.model.buffer(buffer).name,
                operation = %self.model.operation(plan.plan(owner).operation).name,
                qty = orig.quantity,
                to = %reference_date,
                "moved consumer past producer"
            );
        }
        warn!(
            buffer = %self.model.buffer(buffer).name,
            "shortage repair did not converge"
        );
    }
}

/// The most urgent demand the pegging network links a plan to, or none
/// when the plan serves no demand at all.
fn most_urgent_pegged(plan: &PlanState, model: &Model, id: PlanId) -> Option<DemandId> {
    pegged_demands(plan, model, id)
        .into_iter()
        .min_by(|a, b| demand_ordering(model.demand(*a), model.demand(*b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use takt_core::dates::TimeSpan;
    use takt_core::demand::Demand;
    use takt_core::flow::{Flow, FlowKind};
    use takt_core::operation::Operation;
    use takt_core::Buffer;

    fn day(n: i64) -> Date {
        // 2024-01-01 plus n days, comfortably inside the horizon.
        Date(1_704_067_200 + n * 86_400)
    }

    #[test]
    fn fence_pass_snaps_plan_forward() {
        let mut model = Model::new(day(10));
        let stock = model.add_buffer(Buffer::new("stock"));
        let make = model.add_operation(
            Operation::fixed_time("make", TimeSpan::days(1)).with_fence(TimeSpan::days(2)),
        );
        model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));

        let mut plan = PlanState::new();
        let id = plan.create_plan(&model, make, 5.0, Some(day(8)), None, false, None, None, false);

        let op = OperatorMoveOut::new(&model, Constraints::ALL);
        op.solve(&mut plan, None).unwrap();
        // now + fence = day 12.
        assert_eq!(plan.plan(id).dates.start, day(12));
    }

    #[test]
    fn locked_plan_stays_inside_fence() {
        let mut model = Model::new(day(10));
        let stock = model.add_buffer(Buffer::new("stock"));
        let make = model.add_operation(
            Operation::fixed_time("make", TimeSpan::days(1)).with_fence(TimeSpan::days(2)),
        );
        model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));

        let mut plan = PlanState::new();
        let id = plan.create_plan(&model, make, 5.0, Some(day(8)), None, false, None, None, false);
        plan.plan_mut(id).locked = true;

        let op = OperatorMoveOut::new(&model, Constraints::ALL);
        op.solve(&mut plan, None).unwrap();
        assert_eq!(plan.plan(id).dates.start, day(8));
    }

    #[test]
    fn shortage_moves_lowest_priority_consumer() {
        let mut model = Model::new(day(0));
        let stock = model.add_buffer(Buffer::new("stock"));
        let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(1)));
        model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
        let ship = model.add_operation(Operation::fixed_time("ship", TimeSpan::ZERO));
        model.add_flow(Flow::new(ship, stock, FlowKind::Start, -1.0));

        let urgent = model.add_demand(
            Demand::new("urgent", 5.0, day(6))
                .with_priority(1)
                .with_operation(ship),
        );
        let casual = model.add_demand(
            Demand::new("casual", 5.0, day(6))
                .with_priority(9)
                .with_operation(ship),
        );

        let mut plan = PlanState::new();
        // Supply of 10 arrives only on day 8, but both consumers sit on
        // day 6.
        plan.create_plan(&model, make, 10.0, None, Some(day(8)), true, None, None, false);
        let d1 = plan.create_plan(
            &model,
            ship,
            5.0,
            Some(day(6)),
            None,
            false,
            Some(urgent),
            None,
            false,
        );
        let d2 = plan.create_plan(
            &model,
            ship,
            5.0,
            Some(day(6)),
            None,
            false,
            Some(casual),
            None,
            false,
        );

        let op = OperatorMoveOut::new(&model, Constraints::ALL);
        op.solve(&mut plan, None).unwrap();

        // Both consumers end up on the supply date (repair repeats
        // until the shortage clears), but the low priority one is
        // displaced first.
        assert_eq!(plan.plan(d2).dates.start, day(8));
        assert_eq!(plan.plan(d1).dates.start, day(8));
        // No shortage remains anywhere on the timeline.
        assert!(plan
            .buffer_profile(&model, stock)
            .iter()
            .all(|e| e.onhand >= -1e-6));
    }
}
