//! Buffer solving: turning a material ask into upstream replenishment.
//!
//! The buffer inspects its inventory profile at and after the asked
//! date. A shortfall is pushed onto the producing operation, repeatedly
//! for the residual, until the ask is covered, the producer stops
//! answering, or successive rounds stop making progress. The minimum
//! inventory level is a wish: the safety stock pass replenishes toward
//! it, but it never blocks demand.

use tracing::{debug, trace};

use takt_core::buffer::BufferKind;
use takt_core::dates::{Date, DateRange, TimeSpan, INFINITE_FUTURE};
use takt_core::operation::ROUNDING_ERROR;
use takt_core::problem::ProblemKind;
use takt_core::{BufferId, CoreResult};

use crate::context::SolveCtx;
use crate::operation::solve_operation;

/// The worst uncovered shortfall at or after `date`: how much the
/// onhand dips below zero from that point on. Onhand is evaluated only
/// where the date changes; several events at one instant settle
/// together, so a consumer and a producer on the same date don't fake
/// a dip.
fn shortage_at_or_after(ctx: &SolveCtx, buffer: BufferId, date: Date) -> f64 {
    let events = ctx.plan.buffer_events(buffer);
    let mut onhand = ctx.model.buffer(buffer).onhand;
    let mut min_onhand = f64::INFINITY;
    let mut seen_after = false;
    for (i, fp_id) in events.iter().enumerate() {
        let fp = ctx.plan.flowplan(*fp_id);
        onhand += fp.quantity;
        let last_of_date = i + 1 >= events.len()
            || ctx.plan.flowplan(events[i + 1]).date != fp.date;
        if last_of_date && fp.date >= date {
            min_onhand = min_onhand.min(onhand);
            seen_after = true;
        }
    }
    if !seen_after {
        min_onhand = onhand;
    }
    (-min_onhand).max(0.0)
}

/// The earliest date after `date` from which the onhand never dips
/// negative again: existing future supply resolves the shortage there.
fn recovery_date(ctx: &SolveCtx, buffer: BufferId, date: Date) -> Date {
    let profile = ctx.plan.buffer_profile(ctx.model, buffer);
    // Settled onhand per distinct date.
    let settled: Vec<(Date, f64)> = profile
        .iter()
        .enumerate()
        .filter(|(i, ev)| *i + 1 >= profile.len() || profile[i + 1].date != ev.date)
        .map(|(_, ev)| (ev.date, ev.onhand))
        .collect();
    if settled.is_empty() {
        return INFINITE_FUTURE;
    }
    let mut suffix_min = vec![0.0; settled.len()];
    let mut running = f64::INFINITY;
    for (i, (_, onhand)) in settled.iter().enumerate().rev() {
        running = running.min(*onhand);
        suffix_min[i] = running;
    }
    for (i, (d, _)) in settled.iter().enumerate() {
        if *d > date && suffix_min[i] >= -ROUNDING_ERROR {
            return *d;
        }
    }
    INFINITE_FUTURE
}

/// For a procurement buffer, the end date of the latest existing
/// replenishment, used to respect the minimum ordering interval.
fn last_procurement_end(ctx: &SolveCtx, buffer: BufferId) -> Option<Date> {
    ctx.plan
        .buffer_events(buffer)
        .iter()
        .filter_map(|fp_id| {
            let fp = ctx.plan.flowplan(*fp_id);
            (fp.quantity > 0.0).then_some(fp.date)
        })
        .max()
}

pub fn solve_buffer(ctx: &mut SolveCtx, buffer_id: BufferId) -> CoreResult<()> {
    ctx.hooks.buffer(ctx.model, buffer_id);
    let buffer = ctx.model.buffer(buffer_id);

    if buffer.is_infinite() {
        // Never constrains, never propagates upstream.
        let st = ctx.state_mut();
        st.a_qty = st.q_qty;
        st.a_date = st.q_date;
        return Ok(());
    }

    let q_qty = ctx.state().q_qty;
    let q_date = ctx.state().q_date;
    let q_date_max = ctx.state().q_date_max;
    let producing = buffer.producing;
    let min_interval = match &buffer.kind {
        BufferKind::Procure { min_interval, .. } => *min_interval,
        _ => TimeSpan::ZERO,
    };

    trace!(
        buffer = %buffer.name,
        qty = q_qty,
        date = %q_date,
        "buffer asked"
    );

    let mut prev_deficit = f64::INFINITY;
    let mut producer_next_date = INFINITE_FUTURE;

    loop {
        let deficit = shortage_at_or_after(ctx, buffer_id, q_date);
        if deficit <= ROUNDING_ERROR {
            let st = ctx.state_mut();
            st.a_qty = q_qty;
            st.a_date = q_date;
            trace!(buffer = %ctx.model.buffer(buffer_id).name, "fully available");
            return Ok(());
        }

        // Convergence guard: stop when successive rounds barely move.
        let delta = (prev_deficit - deficit).abs();
        if delta < ctx.config.iteration_threshold
            || delta < ctx.config.iteration_accuracy / 100.0 * q_qty.abs()
        {
            break;
        }
        prev_deficit = deficit;

        let Some(producer) = producing else {
            break;
        };

        // A procurement buffer may not order again inside the minimum
        // interval since the last order.
        if !min_interval.is_zero() {
            if let Some(last) = last_procurement_end(ctx, buffer_id) {
                let allowed = last + min_interval;
                if allowed > q_date {
                    producer_next_date = producer_next_date.min(allowed);
                    break;
                }
            }
        }

        // Ask the producer to cover the deficit by the asked date.
        ctx.stack.push(deficit, q_date)?;
        {
            let st = ctx.state_mut();
            st.cur_buffer = Some(buffer_id);
            st.q_date_max = q_date_max.max(q_date);
        }
        let solved = solve_operation(ctx, producer);
        let reply = ctx.stack.pop()?;
        solved?;
        {
            let st = ctx.state_mut();
            st.a_cost += reply.a_cost;
            st.a_penalty += reply.a_penalty;
        }

        if reply.a_qty <= ROUNDING_ERROR {
            producer_next_date = producer_next_date.min(reply.a_date);
            break;
        }
        // Supply was created; re-evaluate the remaining deficit.
    }

    // The ask could not be covered in full by the requested date.
    let deficit = shortage_at_or_after(ctx, buffer_id, q_date);
    if deficit <= ROUNDING_ERROR {
        let st = ctx.state_mut();
        st.a_qty = q_qty;
        st.a_date = q_date;
        return Ok(());
    }
    if !ctx.constrained || !ctx.config.constraints.material() {
        // Unconstrained material: accept the shortfall and answer in
        // full; problems stay off the books.
        let st = ctx.state_mut();
        st.a_qty = q_qty;
        st.a_date = q_date;
        return Ok(());
    }

    let next = producer_next_date.min(recovery_date(ctx, buffer_id, q_date));
    let op = ctx.model.buffer(buffer_id).producing;
    ctx.push_problem(
        ProblemKind::Material,
        op,
        DateRange::new(q_date, if next == INFINITE_FUTURE { q_date } else { next }),
        deficit,
    );
    let st = ctx.state_mut();
    st.a_qty = (q_qty - deficit).max(0.0);
    st.a_date = next;
    debug!(
        buffer = %ctx.model.buffer(buffer_id).name,
        short = deficit,
        next = %next,
        "buffer short"
    );
    Ok(())
}

/// Replenish buffers toward their minimum level. The minimum is a wish:
/// whatever the producer can give is taken, and a zero answer is simply
/// rolled back.
///
/// Buffers are visited in the order given, which the scheduler arranges
/// from the demand side upstream.
pub fn solve_safety_stock(ctx: &mut SolveCtx, buffers: &[BufferId]) -> CoreResult<()> {
    let saved = ctx.safety_stock_planning;
    ctx.safety_stock_planning = true;
    let result = safety_stock_inner(ctx, buffers);
    ctx.safety_stock_planning = saved;
    result
}

fn safety_stock_inner(ctx: &mut SolveCtx, buffers: &[BufferId]) -> CoreResult<()> {
    for &buffer_id in buffers {
        let buffer = ctx.model.buffer(buffer_id);
        if buffer.is_infinite() {
            continue;
        }
        let Some(producer) = buffer.producing else {
            continue;
        };

        // Replenishment dates: each minimum-calendar bucket start, or
        // just the current date for a flat minimum.
        let mut dates: Vec<Date> = match buffer.minimum_calendar {
            Some(cal) => ctx
                .model
                .calendar(cal)
                .boundaries()
                .into_iter()
                .filter(|d| !d.is_infinite_future())
                .map(|d| d.max(ctx.now()))
                .collect(),
            None => vec![ctx.now()],
        };
        dates.sort();
        dates.dedup();

        for date in dates {
            let target = ctx.model.buffer_minimum_at(buffer_id, date);
            if target <= ROUNDING_ERROR {
                continue;
            }
            let onhand = ctx.plan.onhand_at(ctx.model, buffer_id, date);
            if onhand >= target - ROUNDING_ERROR {
                continue;
            }
            let gap = target - onhand;
            let mark = ctx.journal.bookmark();
            ctx.stack.push(gap, date)?;
            ctx.state_mut().cur_buffer = Some(buffer_id);
            let solved = solve_operation(ctx, producer);
            let reply = ctx.stack.pop()?;
            match solved {
                Ok(()) => {}
                Err(e) if e.is_data() => {
                    ctx.rollback(mark);
                    continue;
                }
                Err(e) => return Err(e),
            }
            if reply.a_qty <= ROUNDING_ERROR {
                ctx.rollback(mark);
            } else {
                trace!(
                    buffer = %ctx.model.buffer(buffer_id).name,
                    qty = reply.a_qty,
                    date = %date,
                    "safety stock replenished"
                );
            }
        }

        // A procurement buffer with a maximum ordering interval gets a
        // top-up order wherever replenishments sit further apart.
        if let BufferKind::Procure {
            max_interval,
            size_minimum,
            ..
        } = &ctx.model.buffer(buffer_id).kind
        {
            let max_interval = *max_interval;
            let order = size_minimum.max(1.0);
            if !max_interval.is_zero() {
                let mut guard = 0;
                while guard < 64 {
                    guard += 1;
                    let mut supply_dates: Vec<Date> = ctx
                        .plan
                        .buffer_events(buffer_id)
                        .iter()
                        .filter_map(|fp| {
                            let fp = ctx.plan.flowplan(*fp);
                            (fp.quantity > 0.0).then_some(fp.date)
                        })
                        .collect();
                    supply_dates.sort();
                    let Some(gap_at) = supply_dates
                        .windows(2)
                        .find(|w| w[1] - w[0] > max_interval)
                        .map(|w| w[0] + max_interval)
                    else {
                        break;
                    };
                    ctx.stack.push(order, gap_at)?;
                    ctx.state_mut().cur_buffer = Some(buffer_id);
                    let solved = solve_operation(ctx, producer);
                    let reply = ctx.stack.pop()?;
                    solved?;
                    if reply.a_qty <= ROUNDING_ERROR {
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}
