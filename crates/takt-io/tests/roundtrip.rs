//! Exchange document round-trip tests.

use takt_core::dates::{Date, DateRange, TimeSpan, INFINITE_FUTURE, INFINITE_PAST};
use takt_io::document::{
    BufferKindRecord, BufferRecord, CalendarBucketRecord, CalendarRecord, DemandRecord,
    FlowRecord, HierarchyRecord, OperationKindRecord, OperationPlanRecord, OperationRecord,
    ResourceKindRecord, ResourceRecord,
};
use takt_io::PlanDocument;

const BASE: i64 = 1_704_067_200;

fn day(n: i64) -> Date {
    Date(BASE + n * 86_400)
}

fn sample_document() -> PlanDocument {
    PlanDocument {
        current: day(0),
        items: vec![
            HierarchyRecord {
                name: "all-items".into(),
                owner: None,
            },
            HierarchyRecord {
                name: "widget".into(),
                owner: Some("all-items".into()),
            },
        ],
        customers: vec![HierarchyRecord {
            name: "acme".into(),
            owner: None,
        }],
        locations: vec!["plant".into()],
        calendars: vec![CalendarRecord {
            name: "weeks".into(),
            default_value: 0.0,
            buckets: vec![
                CalendarBucketRecord {
                    start: day(0),
                    value: 1.0,
                },
                CalendarBucketRecord {
                    start: day(7),
                    value: 1.0,
                },
            ],
        }],
        setup_matrices: vec![],
        operations: vec![
            OperationRecord {
                name: "make".into(),
                kind: OperationKindRecord::FixedTime {
                    duration: TimeSpan::days(2),
                },
                fence: TimeSpan::days(1),
                post_time: TimeSpan::ZERO,
                size_minimum: 0.0,
                size_multiple: 5.0,
                size_maximum: f64::INFINITY,
                cost: 2.5,
            },
            OperationRecord {
                name: "deliver".into(),
                kind: OperationKindRecord::FixedTime {
                    duration: TimeSpan::ZERO,
                },
                fence: TimeSpan::ZERO,
                post_time: TimeSpan::ZERO,
                size_minimum: 0.0,
                size_multiple: 0.0,
                size_maximum: f64::INFINITY,
                cost: 0.0,
            },
        ],
        buffers: vec![BufferRecord {
            name: "stock".into(),
            item: Some("widget".into()),
            location: Some("plant".into()),
            onhand: 12.0,
            kind: BufferKindRecord::Default,
            minimum: 0.0,
            minimum_calendar: None,
            producing: Some("make".into()),
        }],
        resources: vec![ResourceRecord {
            name: "cell".into(),
            kind: ResourceKindRecord::Buckets {
                max_early: TimeSpan::days(10),
            },
            maximum: 5.0,
            maximum_calendar: Some("weeks".into()),
            skills: vec!["assembly".into()],
            setup: None,
            setup_matrix: None,
            parent: None,
        }],
        flows: vec![
            FlowRecord {
                operation: "make".into(),
                buffer: "stock".into(),
                kind: takt_core::FlowKind::End,
                quantity: 1.0,
                effective: DateRange::horizon(),
                alternate_group: None,
                priority: 1,
            },
            FlowRecord {
                operation: "deliver".into(),
                buffer: "stock".into(),
                kind: takt_core::FlowKind::Start,
                quantity: -1.0,
                effective: DateRange::horizon(),
                alternate_group: None,
                priority: 1,
            },
        ],
        loads: vec![],
        demands: vec![DemandRecord {
            name: "order-1".into(),
            item: Some("widget".into()),
            customer: Some("acme".into()),
            quantity: 10.0,
            due: day(10),
            priority: 5,
            max_lateness: TimeSpan::MAX,
            min_shipment: 0.0,
            operation: Some("deliver".into()),
        }],
        forecasts: vec![],
        operationplans: vec![OperationPlanRecord {
            operation: "make".into(),
            start: day(3),
            end: day(5),
            quantity: 5.0,
            locked: true,
            demand: None,
            children: vec![],
        }],
    }
}

#[test]
fn json_round_trip_is_identical() {
    let doc = sample_document();
    let json = doc.to_json().unwrap();
    let back = PlanDocument::from_json(&json).unwrap();
    assert_eq!(doc, back);
}

#[test]
fn load_then_dump_reproduces_the_document() {
    let doc = sample_document();
    let loaded = doc.load().unwrap();
    assert!(loaded.issues.is_empty(), "{:?}", loaded.issues);
    let dumped = PlanDocument::dump(&loaded.model, &loaded.plan, &loaded.forecasts);
    assert_eq!(doc, dumped);
}

#[test]
fn sentinel_dates_round_trip_bit_exact() {
    let json = format!(
        "{{\"current\":\"{}\",\"demands\":[{{\"name\":\"d\",\"quantity\":1.0,\"due\":\"{}\",\"priority\":1}}]}}",
        INFINITE_PAST, INFINITE_FUTURE
    );
    let doc = PlanDocument::from_json(&json).unwrap();
    assert_eq!(doc.current, INFINITE_PAST);
    assert_eq!(doc.demands[0].due, INFINITE_FUTURE);
    let out = doc.to_json().unwrap();
    assert!(out.contains("1971-01-01T00:00:00"));
    assert!(out.contains("2030-12-31T00:00:00"));
}

#[test]
fn loaded_locked_plan_keeps_its_window() {
    let doc = sample_document();
    let loaded = doc.load().unwrap();
    let id = loaded.plan.plan_ids().next().unwrap();
    let p = loaded.plan.plan(id);
    assert!(p.locked);
    assert_eq!(p.dates.start, day(3));
    assert_eq!(p.dates.end, day(5));
    assert_eq!(p.quantity, 5.0);
    // The locked supply shows in the buffer profile.
    let stock = loaded.model.buffers().next().unwrap().0;
    assert_eq!(loaded.plan.onhand_at(&loaded.model, stock, day(5)), 17.0);
}

#[test]
fn bad_references_are_reported_not_fatal() {
    let mut doc = sample_document();
    doc.flows.push(FlowRecord {
        operation: "ghost".into(),
        buffer: "stock".into(),
        kind: takt_core::FlowKind::End,
        quantity: 1.0,
        effective: DateRange::horizon(),
        alternate_group: None,
        priority: 1,
    });
    let loaded = doc.load().unwrap();
    assert_eq!(loaded.issues.len(), 1);
    // The good entities all made it.
    assert_eq!(loaded.model.operation_count(), 2);
    assert_eq!(loaded.model.demand_count(), 1);
}
