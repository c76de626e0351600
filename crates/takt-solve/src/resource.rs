//! Resource solving: capacity checks and plan movement.
//!
//! A loaded plan overloading its resource is moved backward to the
//! latest earlier instant with room, or forward to the earliest later
//! one when nothing earlier works (or when an earlier resource already
//! forced the plan late). Bucketized resources check discrete per-bucket
//! capacity instead of a continuous profile.

use tracing::{debug, trace};

use takt_core::dates::{Date, DateRange, TimeSpan, INFINITE_FUTURE};
use takt_core::operation::ROUNDING_ERROR;
use takt_core::problem::ProblemKind;
use takt_core::resource::ResourceKind;
use takt_core::{CoreError, CoreResult, LoadPlanId, PlanId, ResourceId};

use crate::context::SolveCtx;

/// Upper bound on move candidates evaluated per direction.
const MAX_MOVE_CANDIDATES: usize = 256;

/// Solve the loadplan in `state.q_loadplan`: check capacity on its
/// resource, moving the owning plan if needed.
pub fn solve_load(ctx: &mut SolveCtx, lp_id: LoadPlanId) -> CoreResult<()> {
    let load_id = ctx.plan.loadplan(lp_id).load;
    let load_qty = ctx.model.load(load_id).quantity;
    if load_qty == 0.0 || ctx.plan.loadplan(lp_id).quantity == 0.0 {
        let st = ctx.state_mut();
        st.a_qty = st.q_qty;
        st.a_date = st.q_date;
        return Ok(());
    }

    let resource = choose_resource(ctx, lp_id)?;
    ctx.hooks.resource(ctx.model, resource);

    match ctx.model.resource(resource).kind {
        ResourceKind::Infinite => {
            let st = ctx.state_mut();
            st.a_qty = st.q_qty;
            st.a_date = st.q_date;
            Ok(())
        }
        ResourceKind::Buckets { max_early } => solve_resource_buckets(ctx, lp_id, resource, max_early),
        ResourceKind::Default => solve_resource_default(ctx, lp_id, resource),
    }
}

/// Pick the concrete resource for a load. A load with a skill on an
/// aggregate pool selects among the children holding the skill,
/// preferring one already in the required setup, and round-robining
/// over the rest when `rotate_resources` is on.
fn choose_resource(ctx: &mut SolveCtx, lp_id: LoadPlanId) -> CoreResult<ResourceId> {
    let load_id = ctx.plan.loadplan(lp_id).load;
    let load = ctx.model.load(load_id).clone();
    let declared = load.resource;
    let children = ctx.model.resource_children(declared);

    let target = match (&load.skill, children.is_empty()) {
        (Some(skill), false) => {
            let candidates: Vec<ResourceId> = children
                .into_iter()
                .filter(|r| ctx.model.resource(*r).has_skill(skill))
                .collect();
            if candidates.is_empty() {
                return Err(CoreError::Data(format!(
                    "no resource under '{}' offers skill '{}'",
                    ctx.model.resource(declared).name,
                    skill
                )));
            }
            // Keeping the current setup beats any rotation.
            let setup_match = load.setup.as_ref().and_then(|setup| {
                candidates
                    .iter()
                    .copied()
                    .find(|r| ctx.model.resource(*r).setup.as_deref() == Some(setup))
            });
            match setup_match {
                Some(r) => r,
                None if ctx.config.rotate_resources => {
                    let cursor = ctx.rotation.entry(declared).or_insert(0);
                    let pick = candidates[*cursor % candidates.len()];
                    *cursor += 1;
                    pick
                }
                None => candidates[0],
            }
        }
        _ => declared,
    };

    // A setup change costs; surface it as a penalty on the reply.
    if let (Some(matrix_id), Some(wanted)) = (ctx.model.resource(target).setup_matrix, &load.setup)
    {
        let current = ctx.model.resource(target).setup.clone().unwrap_or_default();
        if &current != wanted {
            if let Some(rule) = ctx.model.setup_matrix(matrix_id).rule_for(&current, wanted) {
                ctx.state_mut().a_penalty += rule.cost;
            }
        }
    }

    if ctx.plan.loadplan(lp_id).resource != target {
        ctx.plan.switch_loadplan_resource(lp_id, target);
    }
    Ok(target)
}

/// All instants where the capacity situation of a resource can change.
fn capacity_boundaries(ctx: &SolveCtx, resource: ResourceId) -> Vec<Date> {
    let mut out: Vec<Date> = Vec::new();
    for lp_id in ctx.plan.resource_events(resource) {
        let lp = ctx.plan.loadplan(*lp_id);
        out.push(lp.interval.start);
        out.push(lp.interval.end);
    }
    if let Some(cal) = ctx.model.resource(resource).maximum_calendar {
        for b in ctx.model.calendar(cal).boundaries() {
            if !b.is_infinite_past() && !b.is_infinite_future() {
                out.push(b);
            }
        }
    }
    out.sort();
    out.dedup();
    out
}

/// Does the usage profile exceed capacity anywhere inside the window?
fn overloaded(ctx: &SolveCtx, resource: ResourceId, window: &DateRange) -> bool {
    if window.duration() <= TimeSpan::ZERO {
        return false;
    }
    let mut checkpoints = vec![window.start];
    for b in capacity_boundaries(ctx, resource) {
        if b > window.start && b < window.end {
            checkpoints.push(b);
        }
    }
    checkpoints.into_iter().any(|t| {
        ctx.plan.resource_usage_at(resource, t)
            > ctx.model.resource_capacity_at(resource, t) + ROUNDING_ERROR
    })
}

/// The earliest start allowed by the lead time and fence constraints.
fn leadtime_threshold(ctx: &SolveCtx, plan_id: PlanId) -> Date {
    let constraints = ctx.config.constraints;
    if !ctx.constrained || (!constraints.fence() && !constraints.leadtime()) {
        return Date(i64::MIN / 2);
    }
    let fence = ctx
        .model
        .operation(ctx.plan.plan(plan_id).operation)
        .fence;
    let mut threshold = ctx.now();
    if constraints.fence() && !(constraints.leadtime() && fence.is_negative()) {
        threshold = threshold + fence;
    }
    threshold
}

fn solve_resource_default(ctx: &mut SolveCtx, lp_id: LoadPlanId, resource: ResourceId) -> CoreResult<()> {
    let plan_id = ctx.plan.loadplan(lp_id).plan;
    let orig = ctx.plan.shape_of(plan_id);
    let q_qty = ctx.state().q_qty;
    let q_date = ctx.state().q_date;

    let window = ctx.plan.loadplan(lp_id).interval;
    if !overloaded(ctx, resource, &window) {
        let st = ctx.state_mut();
        st.a_qty = q_qty;
        st.a_date = q_date;
        return Ok(());
    }

    let op_id = ctx.plan.plan(plan_id).operation;
    ctx.push_problem(
        ProblemKind::Capacity,
        Some(op_id),
        DateRange::new(orig.start, orig.end),
        orig.quantity,
    );
    trace!(
        resource = %ctx.model.resource(resource).name,
        window = %window,
        "capacity overload"
    );

    let boundaries = capacity_boundaries(ctx, resource);
    let threshold = leadtime_threshold(ctx, plan_id);

    if !ctx.state().force_late {
        // Latest earlier slot: walk candidate end dates backward.
        for end in boundaries
            .iter()
            .rev()
            .filter(|e| **e < orig.end)
            .take(MAX_MOVE_CANDIDATES)
        {
            ctx.move_plan_direct(plan_id, orig.quantity, None, Some(*end), true);
            let shaped = ctx.plan.plan(plan_id);
            if shaped.dates.start < threshold {
                // Fence or lead time blocks any earlier slot.
                break;
            }
            if shaped.quantity > ROUNDING_ERROR {
                let lp_window = ctx.plan.loadplan(lp_id).interval;
                if !overloaded(ctx, resource, &lp_window) {
                    debug!(
                        resource = %ctx.model.resource(resource).name,
                        end = %end,
                        "moved early for capacity"
                    );
                    let st = ctx.state_mut();
                    st.a_qty = q_qty;
                    st.a_date = q_date;
                    return Ok(());
                }
            }
        }
        // Nothing earlier worked; fall back to the original position.
        ctx.move_plan_direct(plan_id, orig.quantity, None, Some(orig.end), true);
    }

    // Earliest later slot: walk candidate start dates forward.
    for start in boundaries
        .iter()
        .filter(|s| **s > orig.start)
        .take(MAX_MOVE_CANDIDATES)
    {
        ctx.move_plan_direct(plan_id, orig.quantity, Some(*start), None, false);
        let shaped = ctx.plan.plan(plan_id);
        if shaped.quantity > ROUNDING_ERROR {
            let lp_window = ctx.plan.loadplan(lp_id).interval;
            if !overloaded(ctx, resource, &lp_window) {
                let end = shaped.dates.end;
                debug!(
                    resource = %ctx.model.resource(resource).name,
                    start = %start,
                    "moved late for capacity"
                );
                let st = ctx.state_mut();
                st.a_qty = 0.0;
                st.a_date = end;
                return Ok(());
            }
        }
    }

    // No capacity anywhere in the scanned horizon.
    ctx.move_plan_direct(plan_id, orig.quantity, None, Some(orig.end), true);
    let st = ctx.state_mut();
    st.a_qty = 0.0;
    st.a_date = INFINITE_FUTURE;
    Ok(())
}

fn solve_resource_buckets(
    ctx: &mut SolveCtx,
    lp_id: LoadPlanId,
    resource: ResourceId,
    max_early: TimeSpan,
) -> CoreResult<()> {
    let plan_id = ctx.plan.loadplan(lp_id).plan;
    let orig = ctx.plan.shape_of(plan_id);
    let q_qty = ctx.state().q_qty;
    let q_date = ctx.state().q_date;

    let load = ctx.model.load(ctx.plan.loadplan(lp_id).load);
    let ask = load.quantity * ctx.plan.plan(plan_id).quantity;

    // Bucket grid: the capacity calendar, or one bucket over the whole
    // horizon for a flat maximum.
    let buckets: Vec<(DateRange, f64)> = match ctx.model.resource(resource).maximum_calendar {
        Some(cal) => ctx.model.calendar(cal).bucket_ranges(),
        None => vec![(DateRange::horizon(), ctx.model.resource(resource).maximum)],
    };
    let start_date = ctx.plan.loadplan(lp_id).interval.start;
    let Some(idx) = buckets.iter().position(|(range, _)| range.contains(start_date)) else {
        let st = ctx.state_mut();
        st.a_qty = 0.0;
        st.a_date = INFINITE_FUTURE;
        return Ok(());
    };

    // Usage in the home bucket includes this plan already.
    let used = ctx.plan.resource_bucket_usage(ctx.model, resource, &buckets[idx].0);
    if used <= buckets[idx].1 + ROUNDING_ERROR {
        let st = ctx.state_mut();
        st.a_qty = q_qty;
        st.a_date = q_date;
        return Ok(());
    }

    let op_id = ctx.plan.plan(plan_id).operation;
    ctx.push_problem(
        ProblemKind::Capacity,
        Some(op_id),
        DateRange::new(orig.start, orig.end),
        orig.quantity,
    );

    if !ctx.state().force_late {
        // Earlier buckets, limited by how early the plan may be pulled.
        for j in (0..idx).rev() {
            let (range, capacity) = buckets[j];
            if range.end + max_early <= start_date {
                break;
            }
            let free = capacity - ctx.plan.resource_bucket_usage(ctx.model, resource, &range);
            if free >= ask - ROUNDING_ERROR {
                // Start just inside the earlier bucket.
                let new_start = range.end - TimeSpan::seconds(1);
                if new_start >= leadtime_threshold(ctx, plan_id) {
                    ctx.move_plan_direct(plan_id, orig.quantity, Some(new_start), None, false);
                    debug!(
                        resource = %ctx.model.resource(resource).name,
                        bucket = %range,
                        "placed in earlier bucket"
                    );
                    let st = ctx.state_mut();
                    st.a_qty = q_qty;
                    st.a_date = q_date;
                    return Ok(());
                }
            }
        }
    }

    // First later bucket with room.
    for &(range, capacity) in buckets.iter().skip(idx + 1) {
        let free = capacity - ctx.plan.resource_bucket_usage(ctx.model, resource, &range);
        if free >= ask - ROUNDING_ERROR {
            ctx.move_plan_direct(plan_id, orig.quantity, Some(range.start), None, false);
            debug!(
                resource = %ctx.model.resource(resource).name,
                bucket = %range,
                "placed in later bucket"
            );
            let st = ctx.state_mut();
            st.a_qty = 0.0;
            st.a_date = range.start;
            return Ok(());
        }
    }

    let st = ctx.state_mut();
    st.a_qty = 0.0;
    st.a_date = INFINITE_FUTURE;
    Ok(())
}
