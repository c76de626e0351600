//! The cluster scheduler.
//!
//! Demands are grouped by the connected component of their delivery
//! operation. Components share no operations, buffers or resources, so
//! each one can be planned by its own worker: the model is shared
//! read-only, while every worker owns the plan fragment of its cluster
//! together with a private journal and state stack. Fragments are
//! merged once all workers are done.
//!
//! Verbose logging or deferred commits force a single worker so output
//! and journal semantics stay deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{error, info, warn};

use takt_core::cluster::{compute_clusters, compute_levels};
use takt_core::demand_ordering;
use takt_core::model::Model;
use takt_core::plan::PlanState;
use takt_core::problem::{Problem, ProblemStack};
use takt_core::{BufferId, CoreError, CoreResult, DemandId};

use crate::buffer::solve_safety_stock;
use crate::context::SolveCtx;
use crate::demand::solve_demand;
use crate::hooks::Hooks;
use crate::solver::{PlanResult, SolverConfig};

struct ClusterOutcome {
    plan: PlanState,
    problems: HashMap<DemandId, Vec<Problem>>,
    unplannable: Vec<DemandId>,
}

pub fn run(
    model: &Model,
    config: &SolverConfig,
    initial: PlanState,
    hooks: &dyn Hooks,
    cancel: &AtomicBool,
) -> CoreResult<PlanResult> {
    let clusters = compute_clusters(model);
    let levels = compute_levels(model);
    let mut demands_per_cluster = clusters.demands_per_cluster(model);
    for demands in &mut demands_per_cluster {
        demands.sort_by(|a, b| demand_ordering(model.demand(*a), model.demand(*b)));
    }

    // Buffers per cluster, nearest the demands first, for safety stock.
    let mut buffers_per_cluster: Vec<Vec<BufferId>> = vec![Vec::new(); clusters.count];
    for (id, _) in model.buffers() {
        buffers_per_cluster[clusters.buffer(id)].push(id);
    }
    for buffers in &mut buffers_per_cluster {
        buffers.sort_by_key(|b| levels.of_buffer[b.value()]);
    }

    let single_threaded = config.log_level > 0 || !config.autocommit || clusters.count <= 1;

    let fragments: Vec<PlanState> = (0..clusters.count)
        .map(|c| initial.extract_cluster(&clusters, c))
        .collect();

    let outcomes: Vec<ClusterOutcome> = if single_threaded {
        fragments
            .into_iter()
            .enumerate()
            .map(|(cluster, fragment)| {
                run_cluster(
                    model,
                    config,
                    hooks,
                    fragment,
                    cluster,
                    &demands_per_cluster[cluster],
                    &buffers_per_cluster[cluster],
                    cancel,
                )
            })
            .collect()
    } else {
        let workers = num_cpus::get().min(clusters.count.max(1));
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| CoreError::Runtime(format!("building planning thread pool: {e}")))?;
        pool.install(|| {
            fragments
                .into_par_iter()
                .enumerate()
                .map(|(cluster, fragment)| {
                    run_cluster(
                        model,
                        config,
                        hooks,
                        fragment,
                        cluster,
                        &demands_per_cluster[cluster],
                        &buffers_per_cluster[cluster],
                        cancel,
                    )
                })
                .collect()
        })
    };

    let mut merged = PlanResult::default();
    for outcome in outcomes {
        absorb_outcome(&mut merged, outcome);
    }
    Ok(merged)
}

fn absorb_outcome(merged: &mut PlanResult, outcome: ClusterOutcome) {
    merged.plan.absorb(&outcome.plan);
    merged.problems.extend(outcome.problems);
    merged.unplannable.extend(outcome.unplannable);
}

/// Plan all demands of one cluster. A logic or runtime failure outside
/// a single demand wipes the cluster's unlocked plans; planning of the
/// other clusters is unaffected.
#[allow(clippy::too_many_arguments)]
fn run_cluster(
    model: &Model,
    config: &SolverConfig,
    hooks: &dyn Hooks,
    fragment: PlanState,
    cluster: usize,
    demands: &[DemandId],
    buffers: &[BufferId],
    cancel: &AtomicBool,
) -> ClusterOutcome {
    if config.log_level > 0 {
        info!(cluster, demands = demands.len(), "start solving cluster");
    }
    let pristine = fragment.clone();
    let mut ctx = SolveCtx::new(model, config, hooks, fragment);
    let mut problems: HashMap<DemandId, Vec<Problem>> = HashMap::new();
    let mut unplannable = Vec::new();

    let body = (|| -> CoreResult<()> {
        if config.plan_safety_stock_first {
            ctx.iteration_count = 0;
            solve_safety_stock(&mut ctx, buffers)?;
            if config.autocommit {
                ctx.journal.commit();
            }
        }

        for &demand_id in demands {
            if cancel.load(Ordering::Relaxed) {
                warn!(cluster, "planning cancelled");
                break;
            }
            ctx.constrained = config.plan_type.is_constrained();
            ctx.log_constraints = true;
            ctx.iteration_count = 0;
            ctx.planning_demand = Some(demand_id);
            ctx.problems = ProblemStack::new();

            let mark = ctx.journal.bookmark();
            match solve_demand(&mut ctx, demand_id) {
                Ok(()) => {
                    let collected = std::mem::take(&mut ctx.problems).into_entries();
                    if !collected.is_empty() {
                        problems.insert(demand_id, collected);
                    }
                    if config.autocommit {
                        ctx.journal.commit();
                    }
                }
                Err(e) if matches!(e, CoreError::Data(_) | CoreError::Runtime(_)) => {
                    // One broken demand doesn't ruin the cluster.
                    warn!(
                        demand = %model.demand(demand_id).name,
                        error = %e,
                        "demand is unplannable"
                    );
                    ctx.rollback(mark);
                    unplannable.push(demand_id);
                }
                Err(e) => return Err(e),
            }
        }

        if !config.plan_safety_stock_first {
            ctx.iteration_count = 0;
            solve_safety_stock(&mut ctx, buffers)?;
        }
        ctx.journal.commit();
        Ok(())
    })();

    match body {
        Ok(()) => ClusterOutcome {
            plan: ctx.plan,
            problems,
            unplannable,
        },
        Err(e) => {
            // Logic failure: throw the cluster's work away wholesale and
            // report the demands as unplanned.
            error!(cluster, error = %e, "cluster aborted");
            ClusterOutcome {
                plan: pristine,
                problems: HashMap::new(),
                unplannable: demands.to_vec(),
            }
        }
    }
}
