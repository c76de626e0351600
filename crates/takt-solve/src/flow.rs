//! Flow solving: passing a material ask on to a buffer.
//!
//! For a plain flow this is a relay to the buffer solver. For a flow in
//! an alternate group, the members are tried in priority order until
//! one buffer answers a positive quantity, rolling back the attempts
//! that lost.

use tracing::trace;

use takt_core::dates::INFINITE_FUTURE;
use takt_core::operation::ROUNDING_ERROR;
use takt_core::{CoreError, CoreResult, FlowId, FlowPlanId};

use crate::buffer::solve_buffer;
use crate::context::SolveCtx;

/// Solve the flowplan in `state.q_flowplan`. Called for consuming
/// flowplans and, within a group, only for the leader.
pub fn solve_flow(ctx: &mut SolveCtx, fp_id: FlowPlanId) -> CoreResult<()> {
    let flow_id = ctx.plan.flowplan(fp_id).flow;
    let flow = ctx.model.flow(flow_id);

    let group = match &flow.alternate_group {
        Some(group) => group.clone(),
        None => {
            // Plain flow: hand the ask to the buffer.
            let q_qty = -ctx.plan.flowplan(fp_id).quantity;
            let q_date = ctx.plan.flowplan(fp_id).date;
            {
                let st = ctx.state_mut();
                st.q_qty = q_qty;
                st.q_date = q_date;
            }
            if q_qty != 0.0 {
                solve_buffer(ctx, flow.buffer)?;
                let effective_end = ctx.model.flow(flow_id).effective.end;
                if ctx.state().a_date > effective_end {
                    // After the effective window this flow stops
                    // consuming; a later reply date is useless.
                    trace!(
                        buffer = %ctx.model.buffer(flow.buffer).name,
                        "answer date clamped to flow effectivity"
                    );
                    ctx.state_mut().a_date = effective_end;
                }
            } else {
                let st = ctx.state_mut();
                st.a_date = st.q_date;
                st.a_qty = 0.0;
            }
            return Ok(());
        }
    };

    // Alternate flow: try each member in priority order.
    let fp_date = ctx.plan.flowplan(fp_id).date;
    let members: Vec<FlowId> = ctx
        .model
        .flow_group_members(flow.operation, &group)
        .into_iter()
        .filter(|f| ctx.model.flow(*f).effective.contains(fp_date))
        .collect();

    let original_mode = ctx.constrained;
    ctx.constrained = true;
    let original_log = ctx.log_constraints;

    let mut first_alternate: Option<(FlowId, f64)> = None;
    let mut min_next_date = INFINITE_FUTURE;

    for cur in &members {
        if ctx.plan.flowplan(fp_id).flow != *cur {
            ctx.plan.switch_flowplan_flow(ctx.model, fp_id, *cur);
        }
        // The user exit can veto this alternate.
        if !ctx
            .hooks
            .flow(ctx.model, *cur, ctx.plan.flowplan(fp_id).quantity)
        {
            trace!(
                buffer = %ctx.model.buffer(ctx.model.flow(*cur).buffer).name,
                "user exit disallows consumption"
            );
            continue;
        }
        if first_alternate.is_none() {
            first_alternate = Some((*cur, ctx.plan.flowplan(fp_id).quantity));
        }
        // Only the first alternate tracks constraints.
        ctx.log_constraints = first_alternate.map(|f| f.0) == Some(*cur) && original_log;

        let ask_qty = -ctx.plan.flowplan(fp_id).quantity;
        {
            let q_date = ctx.plan.flowplan(fp_id).date;
            let st = ctx.state_mut();
            st.q_qty = ask_qty;
            st.q_date = q_date;
        }
        let mark = ctx.journal.bookmark();
        solve_buffer(ctx, ctx.model.flow(*cur).buffer)?;

        if ctx.state().a_qty > ROUNDING_ERROR {
            if ctx.state().a_qty < ask_qty - ROUNDING_ERROR {
                // Partial reply: shrink the plan so the flowplan matches.
                let answered = ctx.state().a_qty;
                ctx.plan.resize_plan_for_flow(ctx.model, fp_id, answered);
                ctx.state_mut().a_qty = -ctx.plan.flowplan(fp_id).quantity;
            }
            if ctx.state().a_qty > ROUNDING_ERROR {
                ctx.constrained = original_mode;
                ctx.log_constraints = original_log;
                return Ok(());
            }
        }

        // This alternate lost; undo and move on.
        ctx.rollback(mark);
        if ctx.state().a_date < min_next_date {
            min_next_date = ctx.state().a_date;
        }
    }

    if !original_mode {
        // Unconstrained plan: force the full quantity on the primary
        // alternate.
        let (first, first_qty) = first_alternate.ok_or_else(|| {
            CoreError::Data(format!(
                "alternate flow group '{group}' has no usable members"
            ))
        })?;
        if ctx.plan.flowplan(fp_id).flow != first {
            ctx.plan.switch_flowplan_flow(ctx.model, fp_id, first);
        }
        trace!(
            buffer = %ctx.model.buffer(ctx.model.flow(first).buffer).name,
            "alternate flow plans unconstrained on primary"
        );
        ctx.constrained = false;
        ctx.plan.resize_plan_for_flow(ctx.model, fp_id, -first_qty);
        {
            let q_qty = -ctx.plan.flowplan(fp_id).quantity;
            let q_date = ctx.plan.flowplan(fp_id).date;
            let st = ctx.state_mut();
            st.q_qty = q_qty;
            st.q_date = q_date;
        }
        solve_buffer(ctx, ctx.model.flow(first).buffer)?;
        ctx.state_mut().a_qty = -ctx.plan.flowplan(fp_id).quantity;
        ctx.constrained = original_mode;
    } else {
        // Constrained: no alternate can supply; report the earliest
        // next chance across them.
        let st = ctx.state_mut();
        st.a_date = min_next_date;
        st.a_qty = 0.0;
        trace!("no supply on any alternate flow");
    }
    ctx.log_constraints = original_log;
    Ok(())
}
