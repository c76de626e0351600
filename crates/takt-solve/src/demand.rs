//! Demand solving: driving the delivery operation of one demand.

use tracing::{debug, info};

use takt_core::dates::DateRange;
use takt_core::operation::ROUNDING_ERROR;
use takt_core::problem::ProblemKind;
use takt_core::{CoreError, CoreResult, DemandId};

use crate::context::SolveCtx;
use crate::operation::solve_operation;

/// Plan one demand: ask its delivery operation for the open quantity at
/// the due date, accept replies that meet the minimum shipment, and
/// retry at the answered next-feasible date while the maximum lateness
/// allows. Shortfalls and lateness leave problem records.
pub fn solve_demand(ctx: &mut SolveCtx, demand_id: DemandId) -> CoreResult<()> {
    ctx.hooks.demand(ctx.model, demand_id);
    let demand = ctx.model.demand(demand_id).clone();
    let operation = demand.operation.ok_or_else(|| {
        CoreError::Data(format!("demand '{}' has no delivery operation", demand.name))
    })?;

    let due = demand.due;
    let latest = due + demand.max_lateness;
    let mut remaining = demand.quantity - ctx.plan.planned_quantity(demand_id);
    let mut ask_date = due;

    debug!(demand = %demand.name, qty = remaining, due = %due, "planning demand");

    while remaining > ROUNDING_ERROR {
        let mark = ctx.journal.bookmark();
        ctx.stack.push(remaining, ask_date)?;
        ctx.state_mut().cur_demand = Some(demand_id);
        let solved = solve_operation(ctx, operation);
        let reply = ctx.stack.pop()?;
        solved?;

        let acceptable = reply.a_qty > ROUNDING_ERROR
            && (reply.a_qty >= remaining - ROUNDING_ERROR
                || reply.a_qty >= demand.min_shipment - ROUNDING_ERROR);

        if acceptable {
            if ask_date > due {
                ctx.push_problem(
                    ProblemKind::Late,
                    Some(operation),
                    DateRange::new(due, ask_date),
                    reply.a_qty,
                );
            }
            remaining -= reply.a_qty;
            continue;
        }

        // Too little (or nothing): undo this attempt and move to the
        // next feasible date if lateness still allows it.
        ctx.rollback(mark);
        if reply.a_date.is_infinite_future() || reply.a_date <= ask_date {
            break;
        }
        if reply.a_date > latest {
            debug!(demand = %demand.name, next = %reply.a_date, "maximum lateness exceeded");
            break;
        }
        ask_date = reply.a_date;
    }

    if remaining > ROUNDING_ERROR {
        ctx.push_problem(
            ProblemKind::Short,
            Some(operation),
            DateRange::new(due, ask_date),
            remaining,
        );
        info!(
            demand = %demand.name,
            short = remaining,
            "demand planned short"
        );
    }
    Ok(())
}
