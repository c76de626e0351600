//! Operation solving: the ask/reply core.
//!
//! `solve_operation` dispatches on the operation kind. The generic path
//! creates an operation plan and runs `check_operation`, which enforces
//! lead time and fence, negotiates capacity with every loaded resource,
//! and asks the consuming flows for material, retrying at later dates
//! or with shrunk quantities while that can still produce a usable
//! reply. Routing, alternate and split operations compose the generic
//! path over their sub-operations.

use tracing::{debug, trace};

use takt_core::dates::{Date, DateRange, INFINITE_FUTURE};
use takt_core::operation::{OperationKind, SearchMode, ROUNDING_ERROR};
use takt_core::problem::ProblemKind;
use takt_core::{CoreError, CoreResult, OperationId, PlanId};

use crate::context::SolveCtx;
use crate::flow::solve_flow;
use crate::resource::solve_load;

/// Dispatch an ask to an operation by kind.
pub fn solve_operation(ctx: &mut SolveCtx, operation: OperationId) -> CoreResult<()> {
    ctx.count_ask()?;
    match &ctx.model.operation(operation).kind {
        OperationKind::Routing { .. } => solve_routing(ctx, operation),
        OperationKind::Alternate { .. } => solve_alternate(ctx, operation),
        OperationKind::Split { .. } => solve_split(ctx, operation),
        _ => solve_operation_generic(ctx, operation),
    }
}

/// The generic case: fixed-time and time-per operations.
fn solve_operation_generic(ctx: &mut SolveCtx, operation: OperationId) -> CoreResult<()> {
    let op = ctx.model.operation(operation);
    ctx.hooks.operation(ctx.model, operation, ctx.constrained);

    let orig_q_date = ctx.state().q_date;

    // Resolve the producing flow into the buffer being replenished.
    let mut flow_qty_per = 1.0;
    let mut flow_qty_fixed = 0.0;
    let mut fixed_flow = false;
    if let Some(buffer) = ctx.state().cur_buffer {
        match ctx.model.find_producing_flow(operation, buffer, orig_q_date) {
            Some(flow_id) => {
                let flow = ctx.model.flow(flow_id);
                if flow.kind.is_fixed() {
                    fixed_flow = true;
                    flow_qty_fixed = if op.size_minimum <= 0.0 {
                        0.001
                    } else {
                        op.size_minimum
                    };
                }
                flow_qty_per = flow.quantity;
            }
            None => {
                return Err(CoreError::Data(format!(
                    "invalid producing operation '{}' for buffer '{}'",
                    op.name,
                    ctx.model.buffer(buffer).name
                )));
            }
        }
    }

    trace!(
        operation = %op.name,
        qty = ctx.state().q_qty,
        date = %ctx.state().q_date,
        "operation asked"
    );

    let top_constraint = ctx.problems.mark();

    // Subtract the post-operation time.
    let prev_q_date_max = ctx.state().q_date_max;
    {
        let post = op.post_time;
        let st = ctx.state_mut();
        st.q_date_max = st.q_date;
        st.q_date = st.q_date - post;
    }

    // Create the plan, either under the current owner or standalone.
    let ask_qty = if fixed_flow {
        flow_qty_fixed
    } else {
        ctx.state().q_qty / flow_qty_per
    };
    let owner = ctx.state().cur_owner;
    let demand = if owner.is_none() {
        ctx.state_mut().cur_demand.take()
    } else {
        None
    };
    let end = ctx.state().q_date;
    let plan_id = ctx.create_plan(operation, ask_qty, None, Some(end), true, demand, owner, false);
    let orig_q_qty = ctx.plan.plan(plan_id).quantity;

    check_operation(ctx, plan_id)?;
    ctx.state_mut().q_date_max = prev_q_date_max;

    // Multiply the operation reply by the flow quantity.
    if ctx.state().cur_buffer.is_some() {
        if fixed_flow {
            if ctx.state().a_qty > 0.0 {
                ctx.state_mut().a_qty = flow_qty_per;
            }
        } else {
            ctx.state_mut().a_qty *= flow_qty_per;
        }
    }

    // A complete reply means any constraints flagged under us were
    // absorbed by slack; drop them.
    if ctx.state().a_qty >= orig_q_qty - ROUNDING_ERROR {
        ctx.problems.rewind(top_constraint);
    }

    if ctx.state().a_qty > 0.0 {
        let cost = ctx.plan.plan(plan_id).quantity * op.cost;
        ctx.state_mut().a_cost += cost;
    }

    // Guarantee forward progress for the caller's retry loop.
    if ctx.state().a_qty == 0.0 && ctx.state().a_date <= orig_q_date {
        let bumped = orig_q_date + ctx.config.lazy_delay;
        trace!(operation = %op.name, "applying lazy delay");
        ctx.state_mut().a_date = bumped;
    }

    trace!(
        operation = %op.name,
        a_qty = ctx.state().a_qty,
        a_date = %ctx.state().a_date,
        "operation answers"
    );
    Ok(())
}

/// Check every constraint of a plan and propagate upstream. Returns
/// whether the plan is acceptable, possibly in reduced quantity. Does
/// not look into sub-plans.
pub fn check_operation(ctx: &mut SolveCtx, plan_id: PlanId) -> CoreResult<bool> {
    {
        let q_qty = ctx.state().q_qty;
        let st = ctx.state_mut();
        st.a_date = INFINITE_FUTURE;
        st.a_qty = q_qty;
    }

    // The plan could not be shaped into the window at all.
    if ctx.plan.plan(plan_id).quantity == 0.0 {
        let op_id = ctx.plan.plan(plan_id).operation;
        let shape = ctx
            .model
            .operation(op_id)
            .plan_shape(0.0001, Some(ctx.now()), None, false);
        let st = ctx.state_mut();
        st.a_date = shape.end;
        st.a_qty = 0.0;
        return Ok(false);
    }

    if ctx.constrained && !check_operation_leadtime(ctx, plan_id, true)? {
        return Ok(false);
    }

    let top_command = ctx.journal.bookmark();

    let mut orig_dates = ctx.plan.plan(plan_id).dates;
    let mut okay;
    let mut a_qty = 0.0;
    let mut a_date;
    let mut orig_q_date = ctx.state().q_date;
    let orig_q_date_max = ctx.state().q_date_max;
    let orig_plan_qty = ctx.state().q_qty;
    let mut incomplete = false;
    let tmp_force_late = ctx.state().force_late;
    let mut is_planned_early = false;
    let mut matnext = DateRange::horizon();

    ctx.state_mut().force_late = false;
    loop {
        if ctx.config.constraints.capacity() {
            check_operation_capacity(ctx, plan_id)?;
            if ctx.state().a_qty == 0.0 {
                // Search forward past the maximum ask date for the first
                // feasible capacity slot to report back.
                let mut guard = 0;
                while ctx.state().a_date <= orig_q_date_max && guard < 64 {
                    ctx.move_plan_direct(
                        plan_id,
                        orig_plan_qty,
                        Some(orig_q_date_max),
                        None,
                        false,
                    );
                    ctx.state_mut().force_late = true;
                    check_operation_capacity(ctx, plan_id)?;
                    guard += 1;
                }
                // The reply is zero; the buffers may not see supply
                // from this wreck of a plan.
                if ctx.plan.plan(plan_id).quantity > 0.0 {
                    ctx.set_quantity_direct(plan_id, 0.0);
                }
                ctx.state_mut().force_late = tmp_force_late;
                ctx.state_mut().a_qty = 0.0;
                return Ok(false);
            }
        }

        // Ask material for every consuming flowplan.
        {
            let qty = ctx.plan.plan(plan_id).quantity;
            let end = ctx.plan.plan(plan_id).dates.end;
            let st = ctx.state_mut();
            st.q_qty = qty;
            st.q_date = end;
            a_qty = qty;
            a_date = end;
        }
        incomplete = false;
        matnext = DateRange::horizon();

        let flowplans = ctx.plan.plan(plan_id).flowplans.clone();
        for fp_id in flowplans {
            if !ctx.plan.contains_flowplan(fp_id) {
                continue;
            }
            // A flowplan left on an alternate by a previous pass is
            // reset to the group leader before re-solving.
            let flow_id = ctx.plan.flowplan(fp_id).flow;
            let leader = ctx.model.flow_alternate_leader(flow_id);
            if leader != flow_id {
                ctx.plan.switch_flowplan_flow(ctx.model, fp_id, leader);
            }
            if !ctx.model.flow(ctx.plan.flowplan(fp_id).flow).is_consumer() {
                continue;
            }

            let q_qty_flow = -ctx.plan.flowplan(fp_id).quantity;
            ctx.state_mut().q_flowplan = Some(fp_id);
            solve_flow(ctx, fp_id)?;

            if ctx.state().a_qty < q_qty_flow {
                // Short on this material: shrink the plan to what the
                // buffer could give and remember the next date.
                let answered = ctx.state().a_qty;
                ctx.plan.resize_plan_for_flow(ctx.model, fp_id, answered);
                a_qty = ctx.plan.plan(plan_id).quantity;
                incomplete = true;

                if ctx.state().a_date < INFINITE_FUTURE {
                    let op_id = ctx.plan.plan(plan_id).operation;
                    let at = ctx.model.operation(op_id).plan_shape(
                        0.01,
                        Some(ctx.state().a_date),
                        None,
                        false,
                    );
                    if at.end < matnext.end {
                        matnext = DateRange::new(at.start, at.end);
                    }
                }
                if a_qty <= ROUNDING_ERROR {
                    // Zero quantity: no point asking the other flows.
                    break;
                }
            } else if ctx.state().a_qty > q_qty_flow + ROUNDING_ERROR {
                // Never answer more than asked; the plan can be bigger
                // because of lot sizing.
                let per = ctx.model.flow(ctx.plan.flowplan(fp_id).flow).quantity;
                a_qty = -q_qty_flow / per;
            }
        }

        is_planned_early = ctx.plan.plan(plan_id).dates.end < orig_dates.end;

        if matnext.end != INFINITE_FUTURE
            && a_qty <= ROUNDING_ERROR
            && matnext.end <= orig_q_date_max
            && matnext.end > orig_q_date
        {
            // Zero reply but the material next-date still fits inside
            // the maximum window: retry there, trading post-op slack.
            {
                let st = ctx.state_mut();
                st.q_date = matnext.end;
                st.q_qty = orig_plan_qty;
                st.a_date = INFINITE_FUTURE;
                st.a_qty = orig_plan_qty;
            }
            orig_q_date = matnext.end;
            ctx.move_plan_direct(plan_id, orig_plan_qty, None, Some(matnext.end), true);
            okay = false;
            ctx.rollback(top_command);
            trace!("retrying at a new date");
        } else if matnext.end != INFINITE_FUTURE
            && a_qty <= ROUNDING_ERROR
            && matnext.start < a_date
            && orig_plan_qty
                > ctx
                    .model
                    .operation(ctx.plan.plan(plan_id).operation)
                    .size_minimum
        {
            // The full quantity doesn't fit, but a smaller plan inside
            // [matnext.start, a_date] might.
            ctx.move_plan_direct(
                plan_id,
                orig_plan_qty,
                Some(matnext.start),
                Some(a_date),
                true,
            );
            let shaped = ctx.plan.plan(plan_id);
            if shaped.dates.start >= matnext.start
                && shaped.dates.end <= a_date
                && shaped.quantity > ROUNDING_ERROR
            {
                orig_dates = shaped.dates;
                let qty = shaped.quantity;
                let st = ctx.state_mut();
                st.q_date = orig_dates.end;
                st.q_qty = qty;
                st.a_date = INFINITE_FUTURE;
                st.a_qty = qty;
                okay = false;
                ctx.rollback(top_command);
                trace!(qty, "retrying with a smaller quantity");
            } else {
                ctx.set_quantity_direct(plan_id, 0.0);
                okay = true;
            }
        } else {
            okay = true;
        }
        if okay {
            break;
        }
    }

    if a_qty <= ROUNDING_ERROR
        && !ctx.state().force_late
        && is_planned_early
        && matnext.start != INFINITE_FUTURE
        && !matnext.start.is_infinite_past()
        && ctx.constrained
        && ctx.config.constraints.capacity()
    {
        // The plan was pulled early by a resource and the material
        // answer date can't be trusted: recheck capacity pushing late.
        trace!("rechecking capacity after early move");
        let start = matnext.start.max(orig_dates.start);
        ctx.move_plan_direct(plan_id, orig_plan_qty, Some(start), None, false);
        ctx.state_mut().force_late = true;
        check_operation_capacity(ctx, plan_id)?;

        if ctx.plan.plan(plan_id).dates.end <= orig_q_date_max {
            ctx.move_plan_direct(plan_id, orig_plan_qty, None, Some(orig_q_date_max), true);
            ctx.state_mut().force_late = true;
            check_operation_capacity(ctx, plan_id)?;
        }
        a_qty = 0.0;
        matnext.end = ctx.plan.plan(plan_id).dates.end;
        incomplete = true;
    }

    {
        let st = ctx.state_mut();
        st.a_date = if incomplete {
            matnext.end
        } else {
            INFINITE_FUTURE
        };
        st.a_qty = a_qty;
        st.force_late = tmp_force_late;
    }
    if a_qty > ROUNDING_ERROR {
        Ok(true)
    } else {
        ctx.rollback(top_command);
        Ok(false)
    }
}

/// Enforce the lead time and release fence on a plan. `extra` is set
/// when called from the operation resolver (the post-op time may then
/// be eaten) and cleared when called from the capacity resolver.
pub fn check_operation_leadtime(
    ctx: &mut SolveCtx,
    plan_id: PlanId,
    extra: bool,
) -> CoreResult<bool> {
    let constraints = ctx.config.constraints;
    if !ctx.constrained || (!constraints.fence() && !constraints.leadtime()) {
        return Ok(true);
    }

    let op_id = ctx.plan.plan(plan_id).operation;
    let op_fence = ctx.model.operation(op_id).fence;
    let op_post = ctx.model.operation(op_id).post_time;

    // The fence window extends the threshold; a negative fence under a
    // lead time constraint never relaxes it below the current date.
    let mut threshold = ctx.now();
    if constraints.fence() && !(constraints.leadtime() && op_fence.is_negative()) {
        threshold = threshold + op_fence;
    }

    let original = ctx.plan.shape_of(plan_id);
    if original.start >= threshold {
        return Ok(true);
    }

    // Resize into the remaining window; time-per operations can still
    // deliver a reduced quantity.
    if extra {
        ctx.move_plan_direct(
            plan_id,
            original.quantity,
            Some(threshold),
            Some(original.end + op_post),
            false,
        );
    } else {
        ctx.move_plan_direct(
            plan_id,
            original.quantity,
            Some(threshold),
            Some(original.end),
            true,
        );
    }

    let shaped = ctx.plan.shape_of(plan_id);
    if shaped.start >= threshold
        && (!extra || shaped.end <= ctx.state().q_date_max)
        && shaped.quantity > ROUNDING_ERROR
    {
        let st = ctx.state_mut();
        st.a_qty = shaped.quantity;
        st.a_date = shaped.end;
        Ok(true)
    } else {
        // Doesn't fit at all: park the plan at the threshold with zero
        // quantity and report the earliest possible end.
        ctx.state_mut().a_qty = 0.0;
        ctx.move_plan_direct(plan_id, original.quantity.max(0.0001), Some(threshold), None, false);
        let end = ctx.plan.plan(plan_id).dates.end;
        ctx.set_quantity_direct(plan_id, 0.0);
        ctx.state_mut().a_date = end;

        let kind = if threshold == ctx.now() {
            ProblemKind::BeforeCurrent
        } else {
            ProblemKind::BeforeFence
        };
        ctx.push_problem(
            kind,
            Some(op_id),
            DateRange::new(original.start, original.end),
            original.quantity,
        );
        Ok(false)
    }
}

/// Negotiate capacity for every loadplan of a plan. Resources may move
/// the plan early or late; when several loads exist, a move by one
/// forces a recheck of the others.
pub fn check_operation_capacity(ctx: &mut SolveCtx, plan_id: PlanId) -> CoreResult<()> {
    let loadplans = ctx.plan.plan(plan_id).loadplans.clone();
    let constrained_loads = loadplans
        .iter()
        .filter(|lp| {
            let lp = ctx.plan.loadplan(**lp);
            lp.quantity != 0.0 && !ctx.model.resource(lp.resource).is_infinite()
        })
        .count();

    let minimum_end = ctx.plan.plan(plan_id).dates.end;
    let backup_log_constraints = ctx.log_constraints;
    let backup_force_late = ctx.state().force_late;
    let mut orig;

    loop {
        orig = ctx.plan.plan(plan_id).dates;
        let mut recheck = false;
        let mut first = true;
        for lp_id in &loadplans {
            if ctx.plan.plan(plan_id).dates != orig {
                break;
            }
            let lp = ctx.plan.loadplan(*lp_id);
            if lp.quantity == 0.0 || ctx.model.load(lp.load).quantity == 0.0 {
                continue;
            }
            {
                let q_qty = lp.quantity;
                let q_date = lp.interval.start;
                let st = ctx.state_mut();
                st.q_operationplan = Some(plan_id);
                st.q_loadplan = Some(*lp_id);
                st.q_qty = q_qty;
                st.q_date = q_date;
            }
            solve_load(ctx, *lp_id)?;
            if ctx.plan.plan(plan_id).dates != orig {
                if ctx.state().a_qty == 0.0 {
                    // One resource went late; others may only delay
                    // further from here on.
                    ctx.state_mut().force_late = true;
                }
                if !first {
                    recheck = true;
                }
            }
            first = false;
        }
        // Only the first pass collects constraint records.
        ctx.log_constraints = false;
        let moved = ctx.plan.plan(plan_id).dates != orig;
        if !(constrained_loads > 1
            && moved
            && ((ctx.state().a_qty == 0.0 && ctx.state().a_date > minimum_end) || recheck))
        {
            break;
        }
    }
    ctx.log_constraints = backup_log_constraints;
    ctx.state_mut().force_late = backup_force_late;

    // A zero reply zeroes the plan so the buffers see no phantom supply.
    if ctx.state().a_qty == 0.0 && ctx.plan.plan(plan_id).quantity > 0.0 {
        ctx.set_quantity_direct(plan_id, 0.0);
    }
    Ok(())
}

/// Plan a routing: steps are planned last to first, each step ending
/// where the next one starts.
fn solve_routing(ctx: &mut SolveCtx, operation: OperationId) -> CoreResult<()> {
    let op = ctx.model.operation(operation);
    let steps = match &op.kind {
        OperationKind::Routing { steps } => steps.clone(),
        _ => return Err(CoreError::Logic("solve_routing on non-routing".into())),
    };
    ctx.hooks.operation(ctx.model, operation, ctx.constrained);
    debug!(operation = %op.name, qty = ctx.state().q_qty, "routing asked");

    // Total flow into the requested buffer: the routing itself plus any
    // of its steps can produce into it.
    let mut flow_qty = 1.0;
    let mut flow_qty_fixed = 0.0;
    let mut fixed_flow: Option<bool> = None;
    if let Some(buffer) = ctx.state().cur_buffer {
        flow_qty = 0.0;
        let q_date = ctx.state().q_date;
        let mut contributions: Vec<OperationId> = vec![operation];
        contributions.extend(steps.iter().copied());
        for candidate in contributions {
            if let Some(flow_id) = ctx.model.find_producing_flow(candidate, buffer, q_date) {
                let flow = ctx.model.flow(flow_id);
                let is_fixed = flow.kind.is_fixed();
                match fixed_flow {
                    Some(prev) if prev != is_fixed => {
                        return Err(CoreError::Data(format!(
                            "can't mix fixed and proportional flows on operation '{}' for buffer '{}'",
                            op.name,
                            ctx.model.buffer(buffer).name
                        )));
                    }
                    _ => fixed_flow = Some(is_fixed),
                }
                if is_fixed {
                    flow_qty_fixed += flow.quantity;
                } else {
                    flow_qty += flow.quantity;
                }
            }
        }
        match fixed_flow {
            Some(false) if flow_qty > 0.0 => {}
            Some(true) if flow_qty_fixed > 0.0 => {}
            _ => {
                return Err(CoreError::Data(format!(
                    "invalid producing operation '{}' for buffer '{}'",
                    op.name,
                    ctx.model.buffer(buffer).name
                )));
            }
        }
    }
    let fixed = fixed_flow == Some(true);
    ctx.state_mut().cur_buffer = None;

    let mut a_qty = if fixed {
        if op.size_minimum <= 0.0 {
            0.001
        } else {
            op.size_minimum
        }
    } else {
        ctx.state().q_qty / flow_qty
    };

    // Create the owning plan; its own flows materialize after the steps.
    let prev_owner = ctx.state().cur_owner;
    let demand = if prev_owner.is_none() {
        ctx.state_mut().cur_demand.take()
    } else {
        None
    };
    let top_q_date = ctx.state().q_date;
    let top = ctx.create_plan(
        operation,
        a_qty,
        None,
        Some(top_q_date),
        true,
        demand,
        prev_owner,
        true,
    );
    ctx.state_mut().cur_owner = Some(top);
    ctx.state_mut().q_date_max = top_q_date;

    let mut max_date: Option<Date> = None;
    for step in steps.iter().rev() {
        if a_qty <= 0.0 {
            break;
        }
        let owner_start = ctx.plan.plan(top).dates.start;
        let tmp_buffer = ctx.state().cur_buffer;
        {
            let st = ctx.state_mut();
            st.q_qty = a_qty;
            st.q_date = owner_start;
            st.cur_owner = Some(top);
        }
        let step_q_date = owner_start;
        solve_operation(ctx, *step)?;
        a_qty = ctx.state().a_qty;
        ctx.state_mut().cur_buffer = tmp_buffer;

        ctx.set_quantity_direct(top, a_qty);

        if ctx.state().a_date != INFINITE_FUTURE {
            // Track the worst next-feasible date across steps.
            let shape = op.plan_shape(0.01, Some(ctx.state().a_date), None, false);
            let _ = step_q_date;
            max_date = Some(match max_date {
                Some(m) => m.max(shape.end),
                None => shape.end,
            });
        }
    }

    // With all steps planned the routing's own flows and loads can be
    // checked; this can move or resize the whole routing.
    ctx.plan.create_flow_loads(ctx.model, top);
    if ctx.plan.plan(top).quantity > 0.0 {
        let end = ctx.plan.plan(top).dates.end;
        {
            let st = ctx.state_mut();
            st.q_qty = a_qty;
            st.q_date = end;
        }
        let q_date = end;
        check_operation(ctx, top)?;
        a_qty = ctx.state().a_qty;
        if a_qty == 0.0 && ctx.state().a_date != INFINITE_FUTURE {
            let reply = ctx.state().a_date;
            max_date = Some(match max_date {
                Some(m) if reply <= m => m,
                _ => reply,
            });
            let _ = q_date;
        }
    }

    {
        let st = ctx.state_mut();
        st.a_date = max_date.unwrap_or(INFINITE_FUTURE);
        if fixed {
            if st.a_qty > 0.0 {
                st.a_qty = flow_qty_fixed;
            }
        } else {
            st.a_qty = a_qty * flow_qty;
        }
    }

    if ctx.state().a_qty > 0.0 {
        let cost = ctx.plan.plan(top).quantity * op.cost;
        ctx.state_mut().a_cost += cost;
    }
    ctx.state_mut().cur_owner = prev_owner;

    if ctx.state().a_qty == 0.0 && ctx.state().a_date <= top_q_date {
        // The steps point at dates that don't delay the routing as a
        // whole; estimating the real constrained date is hopeless, so
        // nudge forward.
        let bumped = top_q_date + ctx.config.lazy_delay;
        trace!(operation = %op.name, "applying lazy delay in routing");
        ctx.state_mut().a_date = bumped;
    }
    debug!(
        operation = %op.name,
        a_qty = ctx.state().a_qty,
        a_date = %ctx.state().a_date,
        "routing answers"
    );
    Ok(())
}

/// Plan an alternate: walk the sub-operations in priority order, or
/// evaluate them all and replan on the cheapest, depending on the
/// search mode.
fn solve_alternate(ctx: &mut SolveCtx, operation: OperationId) -> CoreResult<()> {
    let op = ctx.model.operation(operation);
    let (alternates, search) = match &op.kind {
        OperationKind::Alternate { alternates, search } => (alternates.clone(), *search),
        _ => return Err(CoreError::Logic("solve_alternate on non-alternate".into())),
    };
    ctx.hooks.operation(ctx.model, operation, ctx.constrained);

    let orig_q_date = ctx.state().q_date;
    let orig_q_qty = ctx.state().q_qty;
    let buffer = ctx.state().cur_buffer;
    let demand = ctx.state().cur_demand;
    let prev_owner = ctx.state().cur_owner;

    debug!(operation = %op.name, qty = orig_q_qty, "alternate asked");

    // The alternate operation itself may own the flow into the buffer.
    let mut top_flow_qty_per = 0.0;
    let mut top_flow_exists = false;
    let mut fixed_flow = false;
    if let Some(buf) = buffer {
        if let Some(flow_id) = ctx.model.find_producing_flow(operation, buf, orig_q_date) {
            let flow = ctx.model.flow(flow_id);
            if flow.kind.is_fixed() {
                fixed_flow = true;
            }
            top_flow_qty_per = flow.quantity;
            top_flow_exists = true;
        }
    }

    let original_planning_mode = ctx.constrained;
    ctx.constrained = true;
    let original_log_constraints = ctx.log_constraints;
    let top_constraint = ctx.problems.mark();

    let mut a_qty = orig_q_qty;
    let mut a_date = INFINITE_FUTURE;
    let mut first_alternate: Option<(OperationId, f64)> = None;
    let mut last_top: Option<PlanId> = None;

    'outer: while a_qty > ROUNDING_ERROR {
        let mut effective_only = true;
        let mut best: Option<(OperationId, f64, f64, f64, Date)> = None;
        let mut idx = 0;
        loop {
            if idx >= alternates.len() {
                if effective_only {
                    // Second pass: alternates beyond their effective
                    // end can still help, at the price of lateness.
                    effective_only = false;
                    idx = 0;
                    continue;
                }
                break;
            }
            let alt = alternates[idx].clone();
            let cur_q_date = ctx.state().q_date;
            if alt.priority == 0
                || (effective_only && !alt.effective.contains(cur_q_date))
                || (!effective_only && alt.effective.end > cur_q_date)
            {
                idx += 1;
                continue;
            }
            let ask_date = if effective_only {
                orig_q_date
            } else {
                alt.effective.end
            };

            // The flow can live on the top operation, the alternate, or
            // both.
            let mut sub_flow_qty_per = 0.0;
            if let Some(buf) = buffer {
                match ctx.model.find_producing_flow(alt.operation, buf, ask_date) {
                    Some(flow_id) => {
                        let flow = ctx.model.flow(flow_id);
                        if top_flow_exists && fixed_flow != flow.kind.is_fixed() {
                            ctx.constrained = original_planning_mode;
                            ctx.log_constraints = original_log_constraints;
                            return Err(CoreError::Data(format!(
                                "can't mix fixed and proportional flows on operation '{}' for buffer '{}'",
                                op.name,
                                ctx.model.buffer(buf).name
                            )));
                        }
                        if flow.kind.is_fixed() {
                            fixed_flow = true;
                        }
                        sub_flow_qty_per = flow.quantity;
                    }
                    None if !top_flow_exists => {
                        ctx.constrained = original_planning_mode;
                        ctx.log_constraints = original_log_constraints;
                        return Err(CoreError::Data(format!(
                            "invalid producing operation '{}' for buffer '{}'",
                            op.name,
                            ctx.model.buffer(buf).name
                        )));
                    }
                    None => {}
                }
            } else {
                sub_flow_qty_per = 1.0;
            }
            let flow_per = sub_flow_qty_per + top_flow_qty_per;
            if first_alternate.is_none() {
                first_alternate = Some((alt.operation, flow_per));
            }

            // Constraints are tracked on the first alternate only, and
            // its record is wiped on every replan.
            if first_alternate.map(|f| f.0) == Some(alt.operation) {
                ctx.problems.rewind(top_constraint);
                ctx.log_constraints = original_log_constraints;
            } else {
                ctx.log_constraints = false;
            }

            let top_command = ctx.journal.bookmark();
            let top = ctx.create_plan(
                operation,
                a_qty,
                None,
                Some(ask_date),
                true,
                if prev_owner.is_none() { demand } else { None },
                prev_owner,
                true,
            );
            last_top = Some(top);
            {
                let st = ctx.state_mut();
                st.q_date = ask_date;
                st.cur_demand = None;
                st.cur_owner = Some(top);
                st.cur_buffer = None;
                st.q_qty = if fixed_flow {
                    if op.size_minimum <= 0.0 {
                        0.001
                    } else {
                        op.size_minimum
                    }
                } else {
                    a_qty / flow_per
                };
            }

            let before_cost = ctx.state().a_cost;
            let before_penalty = ctx.state().a_penalty;
            if search == SearchMode::Priority {
                debug!(alternate = %ctx.model.operation(alt.operation).name, "trying alternate");
            }
            let solved = solve_operation(ctx, alt.operation);
            if let Err(e) = solved {
                ctx.constrained = original_planning_mode;
                ctx.log_constraints = original_log_constraints;
                return Err(e);
            }
            let delta_cost = ctx.state().a_cost - before_cost;
            let delta_penalty = ctx.state().a_penalty - before_penalty;
            {
                let st = ctx.state_mut();
                st.a_cost = before_cost;
                st.a_penalty = before_penalty;
            }

            // Keep the lowest next-date across effective alternates.
            if effective_only && ctx.state().a_date < a_date && ctx.state().a_date > ask_date {
                a_date = ctx.state().a_date;
            }

            if ctx.state().a_qty > ROUNDING_ERROR {
                // The owner follows the quantity its chosen child could
                // actually make; then its own flows and loads are
                // solved, now that the duration is known.
                let answered = ctx.state().a_qty;
                ctx.set_quantity_direct(top, answered);
                {
                    let st = ctx.state_mut();
                    st.q_qty = answered;
                    st.q_date = orig_q_date;
                }
                ctx.plan.create_flow_loads(ctx.model, top);
                check_operation(ctx, top)?;
                if ctx.state().a_qty > ROUNDING_ERROR {
                    if fixed_flow {
                        ctx.state_mut().a_qty = flow_per;
                    } else {
                        ctx.state_mut().a_qty *= flow_per;
                    }
                }
                if ctx.state().a_date < a_date && ctx.state().a_date > ask_date {
                    a_date = ctx.state().a_date;
                }
            }

            let mut next_alternate = true;
            if search == SearchMode::Priority {
                if ctx.state().a_qty < ROUNDING_ERROR {
                    ctx.rollback(top_command);
                } else {
                    // Stay on this alternate while it keeps answering.
                    next_alternate = false;
                }
                a_qty -= ctx.state().a_qty;
                if a_qty < ROUNDING_ERROR {
                    a_qty = 0.0;
                    break;
                }
            } else {
                let answered = ctx.state().a_qty;
                let value = match search {
                    SearchMode::MinCost => delta_cost / answered,
                    SearchMode::MinPenalty => delta_penalty / answered,
                    SearchMode::MinCostPenalty => (delta_cost + delta_penalty) / answered,
                    SearchMode::Priority => unreachable!(),
                };
                debug!(
                    alternate = %ctx.model.operation(alt.operation).name,
                    answered, value, "alternate evaluated"
                );
                let better = answered > ROUNDING_ERROR
                    && match best {
                        None => true,
                        Some((_, best_value, best_qty, _, _)) => {
                            value + ROUNDING_ERROR < best_value
                                || ((value - best_value).abs() < ROUNDING_ERROR
                                    && answered > best_qty)
                        }
                    };
                if better {
                    best = Some((alt.operation, value, answered, flow_per, ask_date));
                }
                // This was only an evaluation.
                ctx.rollback(top_command);
            }

            if next_alternate {
                idx += 1;
            }
        }

        if search == SearchMode::Priority {
            break 'outer;
        }

        // Replan on the winning alternate.
        match best {
            Some((best_op, _, _, best_per, best_q_date)) => {
                debug!(winner = %ctx.model.operation(best_op).name, "alternate chooses winner");
                let top = ctx.create_plan(
                    operation,
                    a_qty,
                    None,
                    Some(best_q_date),
                    true,
                    if prev_owner.is_none() { demand } else { None },
                    prev_owner,
                    true,
                );
                last_top = Some(top);
                {
                    let st = ctx.state_mut();
                    st.q_qty = if fixed_flow {
                        if op.size_minimum <= 0.0 {
                            0.001
                        } else {
                            op.size_minimum
                        }
                    } else {
                        a_qty / best_per
                    };
                    st.q_date = best_q_date;
                    st.cur_demand = None;
                    st.cur_owner = Some(top);
                    st.cur_buffer = None;
                }
                solve_operation(ctx, best_op)?;
                let answered = ctx.state().a_qty;
                ctx.set_quantity_direct(top, answered);
                {
                    let st = ctx.state_mut();
                    st.q_qty = answered;
                    st.q_date = orig_q_date;
                }
                ctx.plan.create_flow_loads(ctx.model, top);
                check_operation(ctx, top)?;
                if ctx.state().a_qty > ROUNDING_ERROR {
                    if fixed_flow {
                        ctx.state_mut().a_qty = best_per;
                    } else {
                        ctx.state_mut().a_qty *= best_per;
                    }
                }
                if ctx.state().a_date < a_date && ctx.state().a_date > best_q_date {
                    a_date = ctx.state().a_date;
                }
                a_qty -= ctx.state().a_qty;
                if a_qty < ROUNDING_ERROR {
                    a_qty = 0.0;
                    break 'outer;
                }
                if ctx.state().a_qty <= ROUNDING_ERROR {
                    // The winner failed on replan; avoid spinning.
                    break 'outer;
                }
            }
            None => break 'outer,
        }
    }

    // No shortage or no tracking: drop the collected constraints.
    if a_qty < ROUNDING_ERROR || !original_log_constraints {
        ctx.problems.rewind(top_constraint);
    }

    // In an unconstrained plan a full shortage is forced onto the first
    // alternate without constraint checks.
    if !original_planning_mode
        && (orig_q_qty - a_qty).abs() < ROUNDING_ERROR
        && first_alternate.is_some()
    {
        ctx.constrained = false;
        ctx.log_constraints = false;
        let (first_op, first_per) = first_alternate.expect("first alternate");
        debug!(operation = %op.name, "alternate plans unconstrained on primary");
        let top = ctx.create_plan(
            operation,
            a_qty,
            None,
            Some(orig_q_date),
            true,
            if prev_owner.is_none() { demand } else { None },
            prev_owner,
            true,
        );
        last_top = Some(top);
        {
            let st = ctx.state_mut();
            st.q_qty = a_qty / first_per;
            st.q_date = orig_q_date;
            st.cur_demand = None;
            st.cur_owner = Some(top);
            st.cur_buffer = None;
        }
        solve_operation(ctx, first_op)?;
        let answered = ctx.state().a_qty;
        ctx.set_quantity_direct(top, answered);
        {
            let st = ctx.state_mut();
            st.q_qty = answered;
            st.q_date = orig_q_date;
        }
        ctx.plan.create_flow_loads(ctx.model, top);
        check_operation(ctx, top)?;
        a_qty = 0.0;
    }

    {
        let st = ctx.state_mut();
        st.a_qty = orig_q_qty - a_qty;
        st.a_date = a_date;
    }
    if ctx.state().a_qty == 0.0 && ctx.state().a_date <= orig_q_date {
        trace!(operation = %op.name, "applying lazy delay in alternate");
        ctx.state_mut().a_date = orig_q_date + ctx.config.lazy_delay;
    }

    ctx.constrained = original_planning_mode;
    ctx.log_constraints = original_log_constraints;

    if ctx.state().a_qty > 0.0 {
        if let Some(top) = last_top.filter(|t| ctx.plan.contains(*t)) {
            let cost = ctx.plan.plan(top).quantity * op.cost;
            ctx.state_mut().a_cost += cost;
        }
    }
    ctx.state_mut().cur_owner = prev_owner;
    debug!(
        operation = %op.name,
        a_qty = ctx.state().a_qty,
        a_date = %ctx.state().a_date,
        "alternate answers"
    );
    Ok(())
}

/// Plan a split: each effective member gets its rescaled share, and a
/// shortfall on any leg rescales all of them.
///
/// Shared upstream constraints between the legs are not detected: when
/// the legs merge again on a common buffer or resource, the solver only
/// sees the limit leg by leg and cannot rebalance the total.
fn solve_split(ctx: &mut SolveCtx, operation: OperationId) -> CoreResult<()> {
    let op = ctx.model.operation(operation);
    let shares = match &op.kind {
        OperationKind::Split { shares } => shares.clone(),
        _ => return Err(CoreError::Logic("solve_split on non-split".into())),
    };
    ctx.hooks.operation(ctx.model, operation, ctx.constrained);

    let orig_q_date = ctx.state().q_date;
    let orig_q_qty = ctx.state().q_qty;
    let buffer = ctx.state().cur_buffer;
    let demand = ctx.state().cur_demand;
    let prev_owner = ctx.state().cur_owner;

    debug!(operation = %op.name, qty = orig_q_qty, "split asked");

    let effective: Vec<_> = shares
        .iter()
        .filter(|s| s.percentage > 0.0 && s.effective.contains(orig_q_date))
        .cloned()
        .collect();
    if effective.is_empty() {
        return Err(CoreError::Data(format!(
            "split operation '{}' has no effective members",
            op.name
        )));
    }
    let total_pct: f64 = if ctx.config.allow_splits {
        effective.iter().map(|s| s.percentage).sum()
    } else {
        // Splits disabled: the whole quantity goes to the first member.
        effective[0].percentage
    };
    let members: &[takt_core::SplitShare] = if ctx.config.allow_splits {
        &effective
    } else {
        &effective[..1]
    };

    // Per-member flow factor into the requested buffer.
    let top_flow_per = buffer
        .and_then(|b| ctx.model.find_producing_flow(operation, b, orig_q_date))
        .map(|f| ctx.model.flow(f).quantity)
        .unwrap_or(0.0);
    let mut member_per = Vec::with_capacity(members.len());
    for share in members {
        let per = match buffer {
            None => 1.0,
            Some(b) => {
                let sub = ctx
                    .model
                    .find_producing_flow(share.operation, b, orig_q_date)
                    .map(|f| ctx.model.flow(f).quantity)
                    .unwrap_or(0.0);
                let per = sub + top_flow_per;
                if per <= 0.0 {
                    return Err(CoreError::Data(format!(
                        "invalid producing operation '{}' for buffer '{}'",
                        ctx.model.operation(share.operation).name,
                        ctx.model.buffer(b).name
                    )));
                }
                per
            }
        };
        member_per.push(per);
    }

    // Two passes at most: measure the feasible ratio, then replan all
    // legs rescaled to the weakest one.
    let mut ratio = 1.0;
    let mut min_a_date = INFINITE_FUTURE;
    for attempt in 0..2 {
        let mark = ctx.journal.bookmark();
        let top = ctx.create_plan(
            operation,
            orig_q_qty * ratio,
            None,
            Some(orig_q_date),
            true,
            if prev_owner.is_none() { demand } else { None },
            prev_owner,
            true,
        );
        let mut achieved_ratio = ratio;
        for (share, per) in members.iter().zip(&member_per) {
            let ask_share = orig_q_qty * ratio * share.percentage / total_pct;
            {
                let st = ctx.state_mut();
                st.q_qty = ask_share / per;
                st.q_date = orig_q_date;
                st.cur_demand = None;
                st.cur_owner = Some(top);
                st.cur_buffer = None;
            }
            solve_operation(ctx, share.operation)?;
            let answered = ctx.state().a_qty * per;
            if ask_share > ROUNDING_ERROR {
                achieved_ratio = achieved_ratio.min(ratio * answered / ask_share);
            }
            if ctx.state().a_date > orig_q_date && ctx.state().a_date < min_a_date {
                min_a_date = ctx.state().a_date;
            }
        }

        if achieved_ratio >= ratio - ROUNDING_ERROR || attempt == 1 {
            // All legs made their share (or this was the rescaled
            // attempt, which we accept as-is).
            ratio = achieved_ratio.max(0.0);
            ctx.set_quantity_direct(top, orig_q_qty * ratio);
            ctx.plan.create_flow_loads(ctx.model, top);
            if ctx.plan.plan(top).quantity > 0.0 && ratio > ROUNDING_ERROR {
                let end = ctx.plan.plan(top).dates.end;
                {
                    let st = ctx.state_mut();
                    st.q_qty = orig_q_qty * ratio;
                    st.q_date = end;
                }
                check_operation(ctx, top)?;
            }
            if ratio <= ROUNDING_ERROR {
                ctx.rollback(mark);
            }
            break;
        }
        // A leg fell short: the split is a hard coupling, so undo
        // everything and retry all legs at the weakest leg's ratio.
        ctx.rollback(mark);
        ratio = achieved_ratio;
        if ratio <= ROUNDING_ERROR {
            ratio = 0.0;
            break;
        }
        debug!(operation = %op.name, ratio, "rescaling split");
    }

    {
        let st = ctx.state_mut();
        st.a_qty = orig_q_qty * ratio;
        st.a_date = if ratio >= 1.0 - ROUNDING_ERROR {
            INFINITE_FUTURE
        } else {
            min_a_date
        };
        st.cur_owner = prev_owner;
        st.cur_demand = demand;
        st.cur_buffer = buffer;
    }
    if ctx.state().a_qty == 0.0 && ctx.state().a_date <= orig_q_date {
        ctx.state_mut().a_date = orig_q_date + ctx.config.lazy_delay;
    }
    if ctx.state().a_qty > 0.0 {
        let cost = ctx.state().a_qty * op.cost;
        ctx.state_mut().a_cost += cost;
    }
    debug!(
        operation = %op.name,
        a_qty = ctx.state().a_qty,
        a_date = %ctx.state().a_date,
        "split answers"
    );
    Ok(())
}
