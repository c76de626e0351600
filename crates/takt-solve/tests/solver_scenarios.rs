//! End-to-end planning scenarios.

use takt_core::calendar::Calendar;
use takt_core::dates::{Date, TimeSpan};
use takt_core::demand::Demand;
use takt_core::flow::{Flow, FlowKind};
use takt_core::model::Model;
use takt_core::operation::{Operation, OperationKind, SearchMode, SubOperation};
use takt_core::problem::ProblemKind;
use takt_core::resource::Resource;
use takt_core::{Buffer, BufferId, DemandId, Load, OperationId, ResourceId};
use takt_solve::{SolverConfig, SolverMrp};

// 2024-01-01, comfortably inside the horizon.
const BASE: i64 = 1_704_067_200;

fn day(n: i64) -> Date {
    Date(BASE + n * 86_400)
}

/// Install a tracing subscriber once so `RUST_LOG` exposes the solver's
/// ask/reply echo when a scenario needs debugging.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Demand of 10 due day 10; delivery consumes a buffer replenished by a
/// two day operation. One supply plan of 10, ending day 10.
#[test]
fn simple_material_chain() {
    init_tracing();
    let mut model = Model::new(day(0));
    let stock = model.add_buffer(Buffer::new("stock"));
    let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(2)));
    model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
    model.buffer_mut(stock).producing = Some(make);
    let deliver = model.add_operation(Operation::fixed_time("deliver", TimeSpan::ZERO));
    model.add_flow(Flow::new(deliver, stock, FlowKind::Start, -1.0));
    let demand = model.add_demand(Demand::new("order", 10.0, day(10)).with_operation(deliver));

    let solver = SolverMrp::default();
    let result = solver.solve(&model).unwrap();

    assert!(result.problems.is_empty(), "{:?}", result.problems);
    assert!((result.plan.planned_quantity(demand) - 10.0).abs() < 1e-6);

    let supply: Vec<_> = result
        .plan
        .plan_ids()
        .filter(|p| result.plan.plan(*p).operation == make)
        .collect();
    assert_eq!(supply.len(), 1);
    let p = result.plan.plan(supply[0]);
    assert_eq!(p.dates.end, day(10));
    assert_eq!(p.dates.start, day(8));
    assert!((p.quantity - 10.0).abs() < 1e-6);

    // The stock balance closes at zero.
    assert!(result.plan.final_onhand(&model, stock).abs() < 1e-6);
}

fn capacity_model() -> (Model, BufferId, OperationId, ResourceId, DemandId) {
    let mut model = Model::new(day(0));
    let stock = model.add_buffer(Buffer::new("stock"));
    // Daily capacity of 5 on a bucketized resource.
    let mut cal = Calendar::new("per-day", 0.0);
    for d in 0..15 {
        cal.set_value(day(d), 5.0);
    }
    cal.set_value(day(15), 0.0);
    let cal = model.add_calendar(cal);
    let machine = model.add_resource(
        Resource::buckets("machine", 5.0, TimeSpan::days(30)).with_calendar(cal),
    );
    let make = model.add_operation(
        Operation::fixed_time("make", TimeSpan::days(2)).with_sizes(0.0, 5.0, 5.0),
    );
    model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
    model.add_load(Load::new(make, machine, 1.0));
    model.buffer_mut(stock).producing = Some(make);
    let deliver = model.add_operation(Operation::fixed_time("deliver", TimeSpan::ZERO));
    model.add_flow(Flow::new(deliver, stock, FlowKind::Start, -1.0));
    let demand = model.add_demand(Demand::new("order", 10.0, day(10)).with_operation(deliver));
    (model, stock, make, machine, demand)
}

/// Capacity of 5 per day forces the ask of 10 into two plans of 5 in
/// different buckets.
#[test]
fn capacity_bump_splits_supply() {
    init_tracing();
    let (model, _stock, make, _machine, demand) = capacity_model();
    let solver = SolverMrp::default();
    let result = solver.solve(&model).unwrap();

    assert!((result.plan.planned_quantity(demand) - 10.0).abs() < 1e-6);
    let supply: Vec<_> = result
        .plan
        .plan_ids()
        .filter(|p| result.plan.plan(*p).operation == make)
        .collect();
    assert_eq!(supply.len(), 2, "expected the supply split in two");
    let mut starts = Vec::new();
    for p in &supply {
        let plan = result.plan.plan(*p);
        // Size multiple respected on each plan.
        assert!((plan.quantity - 5.0).abs() < 1e-6);
        starts.push(plan.dates.start);
    }
    starts.sort();
    // The two plans land in different daily buckets.
    assert!(starts[1] - starts[0] >= TimeSpan::ZERO);
    assert_ne!(starts[0].seconds() / 86_400, starts[1].seconds() / 86_400);
}

/// A release fence pushes the plan out and leaves a BeforeFence record;
/// the demand is then satisfied late at the fence boundary.
#[test]
fn fence_enforcement() {
    init_tracing();
    let mut model = Model::new(day(0));
    let deliver = model.add_operation(
        Operation::fixed_time("deliver", TimeSpan::hours(2)).with_fence(TimeSpan::days(1)),
    );
    let due = Date(BASE + 3_600);
    let demand = model.add_demand(Demand::new("rush", 10.0, due).with_operation(deliver));

    let solver = SolverMrp::default();
    let result = solver.solve(&model).unwrap();

    // Fully planned, but late and flagged.
    assert!((result.plan.planned_quantity(demand) - 10.0).abs() < 1e-6);
    let problems = &result.problems[&demand];
    assert!(problems
        .iter()
        .any(|p| p.kind == ProblemKind::BeforeFence));
    assert!(problems.iter().any(|p| p.kind == ProblemKind::Late));

    let delivery = result.plan.deliveries(demand)[0];
    let p = result.plan.plan(delivery);
    // Snapped to now + fence, ending a lead time later.
    assert_eq!(p.dates.start, day(1));
    assert_eq!(p.dates.end, day(1) + TimeSpan::hours(2));
}

/// MINCOST alternate search: the cheap alternate with capacity 5 takes
/// the first 5 units, the expensive unlimited one the rest.
#[test]
fn alternate_with_cost_search() {
    init_tracing();
    let mut model = Model::new(day(0));
    let a1 = model.add_operation(
        Operation::fixed_time("expensive", TimeSpan::days(1)).with_cost(10.0),
    );
    let limited = model.add_resource(Resource::buckets("cheap-cell", 5.0, TimeSpan::days(30)));
    let a2 = model.add_operation(
        Operation::fixed_time("cheap", TimeSpan::days(1))
            .with_cost(5.0)
            .with_sizes(0.0, 0.0, 5.0),
    );
    model.add_load(Load::new(a2, limited, 1.0));
    let alt = model.add_operation(Operation::new(
        "choose",
        OperationKind::Alternate {
            alternates: vec![SubOperation::new(a1, 1), SubOperation::new(a2, 2)],
            search: SearchMode::MinCost,
        },
    ));
    let demand = model.add_demand(Demand::new("order", 10.0, day(10)).with_operation(alt));

    let solver = SolverMrp::default();
    let result = solver.solve(&model).unwrap();

    assert!((result.plan.planned_quantity(demand) - 10.0).abs() < 1e-6);
    let on_a1: f64 = result
        .plan
        .plan_ids()
        .filter(|p| result.plan.plan(*p).operation == a1)
        .map(|p| result.plan.plan(p).quantity)
        .sum();
    let on_a2: f64 = result
        .plan
        .plan_ids()
        .filter(|p| result.plan.plan(*p).operation == a2)
        .map(|p| result.plan.plan(p).quantity)
        .sum();
    assert!((on_a2 - 5.0).abs() < 1e-6, "cheap alternate planned {on_a2}");
    assert!((on_a1 - 5.0).abs() < 1e-6, "expensive alternate planned {on_a1}");
}

/// PRIORITY search: the first priority that can reply in full gets the
/// whole order; the lower priority alternate stays unused.
#[test]
fn alternate_priority_takes_first() {
    init_tracing();
    let mut model = Model::new(day(0));
    let a1 = model.add_operation(Operation::fixed_time("primary", TimeSpan::days(1)));
    let a2 = model.add_operation(Operation::fixed_time("backup", TimeSpan::days(1)));
    let alt = model.add_operation(Operation::new(
        "choose",
        OperationKind::Alternate {
            alternates: vec![SubOperation::new(a1, 1), SubOperation::new(a2, 2)],
            search: SearchMode::Priority,
        },
    ));
    let demand = model.add_demand(Demand::new("order", 8.0, day(10)).with_operation(alt));

    let result = SolverMrp::default().solve(&model).unwrap();
    assert!((result.plan.planned_quantity(demand) - 8.0).abs() < 1e-6);
    let on_a2: f64 = result
        .plan
        .plan_ids()
        .filter(|p| result.plan.plan(*p).operation == a2)
        .map(|p| result.plan.plan(p).quantity)
        .sum();
    assert_eq!(on_a2, 0.0, "backup must stay unused");
}

/// A routing plans its steps back to front, the last step ending at the
/// requested date.
#[test]
fn routing_chains_steps() {
    init_tracing();
    let mut model = Model::new(day(0));
    let cut = model.add_operation(Operation::fixed_time("cut", TimeSpan::days(1)));
    let weld = model.add_operation(Operation::fixed_time("weld", TimeSpan::days(2)));
    let route = model.add_operation(Operation::new(
        "fabricate",
        OperationKind::Routing {
            steps: vec![cut, weld],
        },
    ));
    let demand = model.add_demand(Demand::new("order", 4.0, day(10)).with_operation(route));

    let result = SolverMrp::default().solve(&model).unwrap();
    assert!((result.plan.planned_quantity(demand) - 4.0).abs() < 1e-6);

    let weld_plan = result
        .plan
        .plan_ids()
        .find(|p| result.plan.plan(*p).operation == weld)
        .expect("weld planned");
    let cut_plan = result
        .plan
        .plan_ids()
        .find(|p| result.plan.plan(*p).operation == cut)
        .expect("cut planned");
    let weld_dates = result.plan.plan(weld_plan).dates;
    let cut_dates = result.plan.plan(cut_plan).dates;
    assert_eq!(weld_dates.end, day(10));
    // The earlier step finishes before the later one starts.
    assert!(cut_dates.end <= weld_dates.start);
}

/// A split spreads the order over its members by percentage.
#[test]
fn split_spreads_by_share() {
    init_tracing();
    let mut model = Model::new(day(0));
    let line_a = model.add_operation(Operation::fixed_time("line-a", TimeSpan::days(1)));
    let line_b = model.add_operation(Operation::fixed_time("line-b", TimeSpan::days(1)));
    let split = model.add_operation(Operation::new(
        "both-lines",
        OperationKind::Split {
            shares: vec![
                takt_core::SplitShare::new(line_a, 60.0),
                takt_core::SplitShare::new(line_b, 40.0),
            ],
        },
    ));
    let demand = model.add_demand(Demand::new("order", 10.0, day(10)).with_operation(split));

    let result = SolverMrp::default().solve(&model).unwrap();
    assert!((result.plan.planned_quantity(demand) - 10.0).abs() < 1e-6);
    let qty_of = |op: OperationId| -> f64 {
        result
            .plan
            .plan_ids()
            .filter(|p| result.plan.plan(*p).operation == op)
            .map(|p| result.plan.plan(p).quantity)
            .sum()
    };
    assert!((qty_of(line_a) - 6.0).abs() < 1e-6);
    assert!((qty_of(line_b) - 4.0).abs() < 1e-6);
}

/// An infinite buffer answers everything and never creates upstream
/// supply.
#[test]
fn infinite_buffer_never_propagates() {
    init_tracing();
    let mut model = Model::new(day(0));
    let stock = model.add_buffer(Buffer::infinite("endless"));
    let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(2)));
    model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
    model.buffer_mut(stock).producing = Some(make);
    let deliver = model.add_operation(Operation::fixed_time("deliver", TimeSpan::ZERO));
    model.add_flow(Flow::new(deliver, stock, FlowKind::Start, -1.0));
    let demand = model.add_demand(Demand::new("order", 25.0, day(5)).with_operation(deliver));

    let result = SolverMrp::default().solve(&model).unwrap();
    assert!((result.plan.planned_quantity(demand) - 25.0).abs() < 1e-6);
    assert_eq!(
        result
            .plan
            .plan_ids()
            .filter(|p| result.plan.plan(*p).operation == make)
            .count(),
        0,
        "infinite buffer must not trigger replenishment"
    );
}

/// Without material a demand past its maximum lateness stays short and
/// leaves Material and Short records.
#[test]
fn shortage_records_problems() {
    init_tracing();
    let mut model = Model::new(day(0));
    let stock = model.add_buffer(Buffer::new("stock").with_onhand(3.0));
    // No producing operation: the onhand is all there is.
    let deliver = model.add_operation(Operation::fixed_time("deliver", TimeSpan::ZERO));
    model.add_flow(Flow::new(deliver, stock, FlowKind::Start, -1.0));
    let demand = model.add_demand(
        Demand::new("order", 10.0, day(5))
            .with_operation(deliver)
            .with_max_lateness(TimeSpan::days(2)),
    );

    let result = SolverMrp::default().solve(&model).unwrap();
    let planned = result.plan.planned_quantity(demand);
    assert!((planned - 3.0).abs() < 1e-6, "planned {planned}");
    let problems = &result.problems[&demand];
    assert!(problems.iter().any(|p| p.kind == ProblemKind::Material));
    assert!(problems.iter().any(|p| p.kind == ProblemKind::Short));
    // The shortage matches the unplanned remainder.
    let short = problems
        .iter()
        .find(|p| p.kind == ProblemKind::Short)
        .unwrap();
    assert!((short.quantity - 7.0).abs() < 1e-6);
}

/// An unconstrained plan meets the demand on time even when the fence
/// would forbid it.
#[test]
fn unconstrained_plan_ignores_constraints() {
    init_tracing();
    let mut model = Model::new(day(0));
    let stock = model.add_buffer(Buffer::new("stock"));
    let make = model.add_operation(
        Operation::fixed_time("make", TimeSpan::days(2)).with_fence(TimeSpan::days(30)),
    );
    model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
    model.buffer_mut(stock).producing = Some(make);
    let deliver = model.add_operation(Operation::fixed_time("deliver", TimeSpan::ZERO));
    model.add_flow(Flow::new(deliver, stock, FlowKind::Start, -1.0));
    let demand = model.add_demand(Demand::new("order", 10.0, day(10)).with_operation(deliver));

    let solver = SolverMrp::new(SolverConfig {
        plan_type: takt_solve::PlanType::UnconstrainedWithoutAlternates,
        ..SolverConfig::default()
    });
    let result = solver.solve(&model).unwrap();
    assert!((result.plan.planned_quantity(demand) - 10.0).abs() < 1e-6);
    let delivery = result.plan.deliveries(demand)[0];
    assert_eq!(result.plan.plan(delivery).dates.end, day(10));
}

/// Two independent chains plan identically whether they run on one
/// worker or several.
#[test]
fn clusters_plan_independently() {
    init_tracing();
    let build = || {
        let mut model = Model::new(day(0));
        for i in 0..3 {
            let stock = model.add_buffer(Buffer::new(format!("stock-{i}")));
            let make =
                model.add_operation(Operation::fixed_time(format!("make-{i}"), TimeSpan::days(1)));
            model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
            model.buffer_mut(stock).producing = Some(make);
            let deliver =
                model.add_operation(Operation::fixed_time(format!("deliver-{i}"), TimeSpan::ZERO));
            model.add_flow(Flow::new(deliver, stock, FlowKind::Start, -1.0));
            model.add_demand(
                Demand::new(format!("order-{i}"), 5.0 + i as f64, day(8)).with_operation(deliver),
            );
        }
        model
    };

    let model = build();
    let parallel = SolverMrp::default().solve(&model).unwrap();
    let single = SolverMrp::new(SolverConfig {
        log_level: 1,
        ..SolverConfig::default()
    })
    .solve(&model)
    .unwrap();

    for (id, _) in model.demands() {
        assert!(
            (parallel.plan.planned_quantity(id) - single.plan.planned_quantity(id)).abs() < 1e-6
        );
    }
}

/// Rolling back a bookmark and replaying the same ask reproduces the
/// same plan.
#[test]
fn rollback_then_replay_is_deterministic() {
    init_tracing();
    let mut model = Model::new(day(0));
    let stock = model.add_buffer(Buffer::new("stock"));
    let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(2)));
    model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
    model.buffer_mut(stock).producing = Some(make);
    let deliver = model.add_operation(Operation::fixed_time("deliver", TimeSpan::ZERO));
    model.add_flow(Flow::new(deliver, stock, FlowKind::Start, -1.0));
    model.add_demand(Demand::new("order", 10.0, day(10)).with_operation(deliver));

    let run = || {
        let result = SolverMrp::default().solve(&model).unwrap();
        let mut shapes: Vec<(OperationId, Date, Date, i64)> = result
            .plan
            .plan_ids()
            .map(|p| {
                let plan = result.plan.plan(p);
                (
                    plan.operation,
                    plan.dates.start,
                    plan.dates.end,
                    plan.quantity.round() as i64,
                )
            })
            .collect();
        shapes.sort();
        shapes
    };
    assert_eq!(run(), run());
}

/// Safety stock replenishes toward the minimum as a wish.
#[test]
fn safety_stock_replenishment() {
    init_tracing();
    let mut model = Model::new(day(0));
    // Minimum of 20 wished from day 5 onward.
    let mut min_cal = Calendar::new("min-level", 0.0);
    min_cal.set_value(day(5), 20.0);
    let min_cal = model.add_calendar(min_cal);
    let mut stock = Buffer::new("stock");
    stock.minimum_calendar = Some(min_cal);
    let stock = model.add_buffer(stock);
    let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(1)));
    model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
    model.buffer_mut(stock).producing = Some(make);

    let result = SolverMrp::default().solve(&model).unwrap();
    // No demand at all, yet the buffer reaches its wish level.
    assert!((result.plan.final_onhand(&model, stock) - 20.0).abs() < 1e-6);
}
