//! The plan exchange document.
//!
//! A tagged, name-keyed representation of the whole entity graph:
//! items, locations, customers, calendars, operations, buffers,
//! resources, flows, loads, demands, forecasts and operation plans.
//! Entities reference each other by name on the wire; ids only exist in
//! memory. Dates use the `%Y-%m-%dT%H:%M:%S` format and durations the
//! ISO-8601 period form, so the horizon sentinels round-trip exactly.
//!
//! Loading is tolerant per entity: a bad record is reported and
//! skipped, and the rest of the document still loads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use takt_core::buffer::{Buffer, BufferKind};
use takt_core::calendar::Calendar;
use takt_core::dates::{Date, DateRange, TimeSpan};
use takt_core::demand::Demand;
use takt_core::flow::{Flow, FlowKind, Load};
use takt_core::model::Model;
use takt_core::operation::{
    Operation, OperationKind, PlanShape, SearchMode, SplitShare, SubOperation,
};
use takt_core::plan::PlanState;
use takt_core::resource::{Resource, ResourceKind, SetupMatrix};
use takt_core::{
    BufferId, CalendarId, CoreError, CustomerId, DemandId, ItemId, LocationId, OperationId, PlanId,
    ResourceId,
};
use takt_forecast::{Forecast, ForecastRegistry, MethodSet};

use crate::{IoError, IoResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarRecord {
    pub name: String,
    pub default_value: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<CalendarBucketRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarBucketRecord {
    pub start: Date,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKindRecord {
    FixedTime {
        duration: TimeSpan,
    },
    TimePer {
        duration: TimeSpan,
        duration_per: TimeSpan,
    },
    Routing {
        steps: Vec<String>,
    },
    Alternate {
        alternates: Vec<AlternateRecord>,
        search: SearchMode,
    },
    Split {
        shares: Vec<ShareRecord>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternateRecord {
    pub operation: String,
    pub priority: i32,
    pub effective: DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub operation: String,
    pub percentage: f64,
    pub effective: DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub name: String,
    #[serde(flatten)]
    pub kind: OperationKindRecord,
    #[serde(default)]
    pub fence: TimeSpan,
    #[serde(default)]
    pub post_time: TimeSpan,
    #[serde(default)]
    pub size_minimum: f64,
    #[serde(default)]
    pub size_multiple: f64,
    #[serde(default = "infinity", skip_serializing_if = "is_infinite")]
    pub size_maximum: f64,
    #[serde(default)]
    pub cost: f64,
}

fn infinity() -> f64 {
    f64::INFINITY
}

// JSON has no literal for infinity; unbounded values stay implicit.
#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_infinite(v: &f64) -> bool {
    v.is_infinite()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BufferKindRecord {
    Default,
    Infinite,
    Procure {
        leadtime: TimeSpan,
        size_minimum: f64,
        size_maximum: f64,
        size_multiple: f64,
        min_interval: TimeSpan,
        max_interval: TimeSpan,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub onhand: f64,
    #[serde(flatten)]
    pub kind: BufferKindRecord,
    #[serde(default)]
    pub minimum: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_calendar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producing: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKindRecord {
    Default,
    Infinite,
    Buckets { max_early: TimeSpan },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    #[serde(flatten)]
    pub kind: ResourceKindRecord,
    #[serde(default = "infinity", skip_serializing_if = "is_infinite")]
    pub maximum: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_calendar: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_matrix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupMatrixRecord {
    pub name: String,
    pub rules: Vec<SetupRuleRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupRuleRecord {
    pub from_setup: String,
    pub to_setup: String,
    pub duration: TimeSpan,
    pub cost: f64,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub operation: String,
    pub buffer: String,
    pub kind: FlowKind,
    pub quantity: f64,
    #[serde(default)]
    pub effective: DateRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_group: Option<String>,
    #[serde(default = "one")]
    pub priority: i32,
}

fn one() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRecord {
    pub operation: String,
    pub resource: String,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
    #[serde(default)]
    pub effective: DateRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_group: Option<String>,
    #[serde(default = "one")]
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    pub quantity: f64,
    pub due: Date,
    pub priority: i32,
    #[serde(default = "max_span")]
    pub max_lateness: TimeSpan,
    #[serde(default)]
    pub min_shipment: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

fn max_span() -> TimeSpan {
    TimeSpan::MAX
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBucketRecord {
    pub start: Date,
    pub end: Date,
    pub weight: f64,
    pub total: f64,
    #[serde(default)]
    pub consumed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub calendar: String,
    pub discrete: bool,
    pub methods: u8,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<ForecastBucketRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPlanRecord {
    pub operation: String,
    pub start: Date,
    pub end: Date,
    pub quantity: f64,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demand: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OperationPlanRecord>,
}

/// The complete exchange document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanDocument {
    pub current: Date,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<HierarchyRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customers: Vec<HierarchyRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calendars: Vec<CalendarRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup_matrices: Vec<SetupMatrixRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<OperationRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<BufferRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flows: Vec<FlowRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loads: Vec<LoadRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub demands: Vec<DemandRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forecasts: Vec<ForecastRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operationplans: Vec<OperationPlanRecord>,
}

/// Everything a document loads into.
#[derive(Debug)]
pub struct LoadedPlan {
    pub model: Model,
    pub plan: PlanState,
    pub forecasts: ForecastRegistry,
    /// Per-entity data errors; the affected records were skipped.
    pub issues: Vec<CoreError>,
}

impl PlanDocument {
    pub fn to_json(&self) -> IoResult<String> {
        serde_json::to_string_pretty(self).map_err(IoError::from)
    }

    pub fn from_json(text: &str) -> IoResult<Self> {
        serde_json::from_str(text).map_err(IoError::from)
    }

    /// Build the in-memory model from the document.
    pub fn load(&self) -> IoResult<LoadedPlan> {
        let mut model = Model::new(self.current);
        let mut issues = Vec::new();

        let mut items: HashMap<&str, ItemId> = HashMap::new();
        for rec in &self.items {
            let parent = rec.owner.as_deref().and_then(|o| items.get(o).copied());
            if rec.owner.is_some() && parent.is_none() {
                issues.push(CoreError::Data(format!(
                    "item '{}' references unknown owner",
                    rec.name
                )));
                continue;
            }
            match model.add_item(rec.name.clone(), parent) {
                Ok(id) => {
                    items.insert(rec.name.as_str(), id);
                }
                Err(e) => issues.push(e),
            }
        }
        let mut customers: HashMap<&str, CustomerId> = HashMap::new();
        for rec in &self.customers {
            let parent = rec.owner.as_deref().and_then(|o| customers.get(o).copied());
            if rec.owner.is_some() && parent.is_none() {
                issues.push(CoreError::Data(format!(
                    "customer '{}' references unknown owner",
                    rec.name
                )));
                continue;
            }
            match model.add_customer(rec.name.clone(), parent) {
                Ok(id) => {
                    customers.insert(rec.name.as_str(), id);
                }
                Err(e) => issues.push(e),
            }
        }
        let mut locations: HashMap<&str, LocationId> = HashMap::new();
        for name in &self.locations {
            locations.insert(name.as_str(), model.add_location(name.clone()));
        }
        let mut calendars: HashMap<&str, CalendarId> = HashMap::new();
        for rec in &self.calendars {
            let mut cal = Calendar::new(rec.name.clone(), rec.default_value);
            for b in &rec.buckets {
                cal.set_value(b.start, b.value);
            }
            calendars.insert(rec.name.as_str(), model.add_calendar(cal));
        }
        let mut matrices: HashMap<&str, takt_core::SetupMatrixId> = HashMap::new();
        for rec in &self.setup_matrices {
            let matrix = SetupMatrix {
                name: rec.name.clone(),
                rules: rec
                    .rules
                    .iter()
                    .map(|r| takt_core::SetupRule {
                        from_setup: r.from_setup.clone(),
                        to_setup: r.to_setup.clone(),
                        duration: r.duration,
                        cost: r.cost,
                        priority: r.priority,
                    })
                    .collect(),
            };
            matrices.insert(rec.name.as_str(), model.add_setup_matrix(matrix));
        }

        // Operations in two passes: sub-operation references may point
        // forward in the list.
        let mut operations: HashMap<&str, OperationId> = HashMap::new();
        for rec in &self.operations {
            let mut op = Operation::new(
                rec.name.clone(),
                OperationKind::FixedTime {
                    duration: TimeSpan::ZERO,
                },
            );
            op.fence = rec.fence;
            op.post_time = rec.post_time;
            op.size_minimum = rec.size_minimum;
            op.size_multiple = rec.size_multiple;
            op.size_maximum = rec.size_maximum;
            op.cost = rec.cost;
            operations.insert(rec.name.as_str(), model.add_operation(op));
        }
        for rec in &self.operations {
            let id = operations[rec.name.as_str()];
            let resolve = |name: &str| -> IoResult<OperationId> {
                operations
                    .get(name)
                    .copied()
                    .ok_or_else(|| IoError::Reference(format!("unknown operation '{name}'")))
            };
            let kind = match &rec.kind {
                OperationKindRecord::FixedTime { duration } => OperationKind::FixedTime {
                    duration: *duration,
                },
                OperationKindRecord::TimePer {
                    duration,
                    duration_per,
                } => OperationKind::TimePer {
                    duration: *duration,
                    duration_per: *duration_per,
                },
                OperationKindRecord::Routing { steps } => {
                    let mut resolved = Vec::with_capacity(steps.len());
                    let mut ok = true;
                    for s in steps {
                        match resolve(s) {
                            Ok(r) => resolved.push(r),
                            Err(e) => {
                                issues.push(CoreError::Data(e.to_string()));
                                ok = false;
                            }
                        }
                    }
                    if !ok {
                        continue;
                    }
                    OperationKind::Routing { steps: resolved }
                }
                OperationKindRecord::Alternate { alternates, search } => {
                    let mut resolved = Vec::with_capacity(alternates.len());
                    let mut ok = true;
                    for a in alternates {
                        match resolve(&a.operation) {
                            Ok(r) => resolved.push(SubOperation {
                                operation: r,
                                priority: a.priority,
                                effective: a.effective,
                            }),
                            Err(e) => {
                                issues.push(CoreError::Data(e.to_string()));
                                ok = false;
                            }
                        }
                    }
                    if !ok {
                        continue;
                    }
                    OperationKind::Alternate {
                        alternates: resolved,
                        search: *search,
                    }
                }
                OperationKindRecord::Split { shares } => {
                    let mut resolved = Vec::with_capacity(shares.len());
                    let mut ok = true;
                    for s in shares {
                        match resolve(&s.operation) {
                            Ok(r) => resolved.push(SplitShare {
                                operation: r,
                                percentage: s.percentage,
                                effective: s.effective,
                            }),
                            Err(e) => {
                                issues.push(CoreError::Data(e.to_string()));
                                ok = false;
                            }
                        }
                    }
                    if !ok {
                        continue;
                    }
                    OperationKind::Split { shares: resolved }
                }
            };
            model.operation_mut(id).kind = kind;
        }

        let mut buffers: HashMap<&str, BufferId> = HashMap::new();
        for rec in &self.buffers {
            let mut buffer = Buffer::new(rec.name.clone());
            buffer.item = rec.item.as_deref().and_then(|n| items.get(n).copied());
            buffer.location = rec.location.as_deref().and_then(|n| locations.get(n).copied());
            buffer.onhand = rec.onhand;
            buffer.minimum = rec.minimum;
            buffer.minimum_calendar = rec
                .minimum_calendar
                .as_deref()
                .and_then(|n| calendars.get(n).copied());
            buffer.kind = match &rec.kind {
                BufferKindRecord::Default => BufferKind::Default,
                BufferKindRecord::Infinite => BufferKind::Infinite,
                BufferKindRecord::Procure {
                    leadtime,
                    size_minimum,
                    size_maximum,
                    size_multiple,
                    min_interval,
                    max_interval,
                } => BufferKind::Procure {
                    leadtime: *leadtime,
                    size_minimum: *size_minimum,
                    size_maximum: *size_maximum,
                    size_multiple: *size_multiple,
                    min_interval: *min_interval,
                    max_interval: *max_interval,
                },
            };
            buffer.producing = rec
                .producing
                .as_deref()
                .and_then(|n| operations.get(n).copied());
            buffers.insert(rec.name.as_str(), model.add_buffer(buffer));
        }

        let mut resources: HashMap<&str, ResourceId> = HashMap::new();
        for rec in &self.resources {
            let mut resource = Resource::new(rec.name.clone(), rec.maximum);
            resource.kind = match &rec.kind {
                ResourceKindRecord::Default => ResourceKind::Default,
                ResourceKindRecord::Infinite => ResourceKind::Infinite,
                ResourceKindRecord::Buckets { max_early } => ResourceKind::Buckets {
                    max_early: *max_early,
                },
            };
            resource.maximum_calendar = rec
                .maximum_calendar
                .as_deref()
                .and_then(|n| calendars.get(n).copied());
            resource.skills = rec.skills.clone();
            resource.setup = rec.setup.clone();
            resource.setup_matrix = rec
                .setup_matrix
                .as_deref()
                .and_then(|n| matrices.get(n).copied());
            resources.insert(rec.name.as_str(), model.add_resource(resource));
        }
        // Parent links resolve after all resources exist.
        for rec in &self.resources {
            if let Some(parent) = rec.parent.as_deref() {
                match (
                    resources.get(rec.name.as_str()).copied(),
                    resources.get(parent).copied(),
                ) {
                    (Some(id), Some(pid)) => {
                        model.resource_mut(id).parent = Some(pid);
                    }
                    _ => issues.push(CoreError::Data(format!(
                        "resource '{}' references unknown parent '{parent}'",
                        rec.name
                    ))),
                }
            }
        }

        for rec in &self.flows {
            let (Some(op), Some(buf)) = (
                operations.get(rec.operation.as_str()).copied(),
                buffers.get(rec.buffer.as_str()).copied(),
            ) else {
                issues.push(CoreError::Data(format!(
                    "flow references unknown operation '{}' or buffer '{}'",
                    rec.operation, rec.buffer
                )));
                continue;
            };
            if rec.quantity == 0.0 {
                issues.push(CoreError::Data(format!(
                    "flow on operation '{}' has zero quantity",
                    rec.operation
                )));
                continue;
            }
            let mut flow = Flow::new(op, buf, rec.kind, rec.quantity);
            flow.effective = rec.effective;
            flow.alternate_group = rec.alternate_group.clone();
            flow.priority = rec.priority;
            model.add_flow(flow);
        }
        for rec in &self.loads {
            let (Some(op), Some(res)) = (
                operations.get(rec.operation.as_str()).copied(),
                resources.get(rec.resource.as_str()).copied(),
            ) else {
                issues.push(CoreError::Data(format!(
                    "load references unknown operation '{}' or resource '{}'",
                    rec.operation, rec.resource
                )));
                continue;
            };
            let mut load = Load::new(op, res, rec.quantity);
            load.skill = rec.skill.clone();
            load.setup = rec.setup.clone();
            load.effective = rec.effective;
            load.alternate_group = rec.alternate_group.clone();
            load.priority = rec.priority;
            model.add_load(load);
        }

        let mut demands: HashMap<&str, DemandId> = HashMap::new();
        for rec in &self.demands {
            if rec.quantity < 0.0 {
                issues.push(CoreError::Data(format!(
                    "demand '{}' has negative quantity",
                    rec.name
                )));
                continue;
            }
            let mut demand = Demand::new(rec.name.clone(), rec.quantity, rec.due);
            demand.item = rec.item.as_deref().and_then(|n| items.get(n).copied());
            demand.customer = rec.customer.as_deref().and_then(|n| customers.get(n).copied());
            demand.priority = rec.priority;
            demand.max_lateness = rec.max_lateness;
            demand.min_shipment = rec.min_shipment;
            demand.operation = rec
                .operation
                .as_deref()
                .and_then(|n| operations.get(n).copied());
            demands.insert(rec.name.as_str(), model.add_demand(demand));
        }

        let mut forecasts = ForecastRegistry::new();
        for rec in &self.forecasts {
            let Some(calendar) = calendars.get(rec.calendar.as_str()).copied() else {
                issues.push(CoreError::Data(format!(
                    "forecast '{}' references unknown calendar '{}'",
                    rec.name, rec.calendar
                )));
                continue;
            };
            let mut fcst = Forecast::new(rec.name.clone(), calendar)
                .with_discrete(rec.discrete)
                .with_methods(MethodSet(rec.methods));
            fcst.item = rec.item.as_deref().and_then(|n| items.get(n).copied());
            fcst.customer = rec.customer.as_deref().and_then(|n| customers.get(n).copied());
            fcst.operation = rec
                .operation
                .as_deref()
                .and_then(|n| operations.get(n).copied());
            fcst.priority = rec.priority;
            if !rec.buckets.is_empty() {
                fcst.instantiate(&model);
                for b in &rec.buckets {
                    let range = DateRange::new(b.start, b.end);
                    if let Some(bucket) = fcst
                        .buckets_mut()
                        .iter_mut()
                        .find(|x| x.range == range)
                    {
                        bucket.weight = b.weight;
                        bucket.total = b.total;
                        bucket.consumed = b.consumed;
                    } else {
                        issues.push(CoreError::Data(format!(
                            "forecast '{}' has a bucket {range} not on its calendar",
                            rec.name
                        )));
                    }
                }
            }
            forecasts.add(fcst);
        }

        let mut plan = PlanState::new();
        for rec in &self.operationplans {
            if let Err(e) = load_plan_record(&mut plan, &model, rec, None, &operations, &demands) {
                issues.push(e);
            }
        }

        if !issues.is_empty() {
            tracing::warn!(skipped = issues.len(), "document loaded with skipped records");
        }
        Ok(LoadedPlan {
            model,
            plan,
            forecasts,
            issues,
        })
    }

    /// Export a model, plan and forecasts back into a document.
    pub fn dump(model: &Model, plan: &PlanState, forecasts: &ForecastRegistry) -> Self {
        let op_name = |id: OperationId| model.operation(id).name.clone();
        let doc_items = model
            .items()
            .map(|(_, n)| HierarchyRecord {
                name: n.name.clone(),
                owner: n.parent.map(|p| model.item(ItemId::new(p)).name.clone()),
            })
            .collect();
        let doc_customers = model
            .customers()
            .map(|(_, n)| HierarchyRecord {
                name: n.name.clone(),
                owner: n.parent.map(|p| model.customer(CustomerId::new(p)).name.clone()),
            })
            .collect();

        let mut operationplans = Vec::new();
        for id in plan.plan_ids() {
            if plan.plan(id).owner.is_some() {
                continue;
            }
            operationplans.push(dump_plan_record(plan, model, id));
        }

        PlanDocument {
            current: model.current,
            items: doc_items,
            customers: doc_customers,
            locations: model.locations().map(|(_, l)| l.name.clone()).collect(),
            calendars: model
                .calendars()
                .map(|(_, c)| CalendarRecord {
                    name: c.name.clone(),
                    default_value: c.default_value,
                    buckets: c
                        .buckets()
                        .iter()
                        .map(|b| CalendarBucketRecord {
                            start: b.start,
                            value: b.value,
                        })
                        .collect(),
                })
                .collect(),
            setup_matrices: model
                .setup_matrices()
                .map(|(_, m)| SetupMatrixRecord {
                    name: m.name.clone(),
                    rules: m
                        .rules
                        .iter()
                        .map(|r| SetupRuleRecord {
                            from_setup: r.from_setup.clone(),
                            to_setup: r.to_setup.clone(),
                            duration: r.duration,
                            cost: r.cost,
                            priority: r.priority,
                        })
                        .collect(),
                })
                .collect(),
            operations: model
                .operations()
                .map(|(_, op)| OperationRecord {
                    name: op.name.clone(),
                    kind: match &op.kind {
                        OperationKind::FixedTime { duration } => OperationKindRecord::FixedTime {
                            duration: *duration,
                        },
                        OperationKind::TimePer {
                            duration,
                            duration_per,
                        } => OperationKindRecord::TimePer {
                            duration: *duration,
                            duration_per: *duration_per,
                        },
                        OperationKind::Routing { steps } => OperationKindRecord::Routing {
                            steps: steps.iter().map(|s| op_name(*s)).collect(),
                        },
                        OperationKind::Alternate { alternates, search } => {
                            OperationKindRecord::Alternate {
                                alternates: alternates
                                    .iter()
                                    .map(|a| AlternateRecord {
                                        operation: op_name(a.operation),
                                        priority: a.priority,
                                        effective: a.effective,
                                    })
                                    .collect(),
                                search: *search,
                            }
                        }
                        OperationKind::Split { shares } => OperationKindRecord::Split {
                            shares: shares
                                .iter()
                                .map(|s| ShareRecord {
                                    operation: op_name(s.operation),
                                    percentage: s.percentage,
                                    effective: s.effective,
                                })
                                .collect(),
                        },
                    },
                    fence: op.fence,
                    post_time: op.post_time,
                    size_minimum: op.size_minimum,
                    size_multiple: op.size_multiple,
                    size_maximum: op.size_maximum,
                    cost: op.cost,
                })
                .collect(),
            buffers: model
                .buffers()
                .map(|(_, b)| BufferRecord {
                    name: b.name.clone(),
                    item: b.item.map(|i| model.item(i).name.clone()),
                    location: b.location.map(|l| model.location(l).name.clone()),
                    onhand: b.onhand,
                    kind: match &b.kind {
                        BufferKind::Default => BufferKindRecord::Default,
                        BufferKind::Infinite => BufferKindRecord::Infinite,
                        BufferKind::Procure {
                            leadtime,
                            size_minimum,
                            size_maximum,
                            size_multiple,
                            min_interval,
                            max_interval,
                        } => BufferKindRecord::Procure {
                            leadtime: *leadtime,
                            size_minimum: *size_minimum,
                            size_maximum: *size_maximum,
                            size_multiple: *size_multiple,
                            min_interval: *min_interval,
                            max_interval: *max_interval,
                        },
                    },
                    minimum: b.minimum,
                    minimum_calendar: b.minimum_calendar.map(|c| model.calendar(c).name.clone()),
                    producing: b.producing.map(op_name),
                })
                .collect(),
            resources: model
                .resources()
                .map(|(_, r)| ResourceRecord {
                    name: r.name.clone(),
                    kind: match &r.kind {
                        ResourceKind::Default => ResourceKindRecord::Default,
                        ResourceKind::Infinite => ResourceKindRecord::Infinite,
                        ResourceKind::Buckets { max_early } => ResourceKindRecord::Buckets {
                            max_early: *max_early,
                        },
                    },
                    maximum: r.maximum,
                    maximum_calendar: r.maximum_calendar.map(|c| model.calendar(c).name.clone()),
                    skills: r.skills.clone(),
                    setup: r.setup.clone(),
                    setup_matrix: r.setup_matrix.map(|m| model.setup_matrix(m).name.clone()),
                    parent: r.parent.map(|p| model.resource(p).name.clone()),
                })
                .collect(),
            flows: model
                .flows()
                .map(|(_, f)| FlowRecord {
                    operation: op_name(f.operation),
                    buffer: model.buffer(f.buffer).name.clone(),
                    kind: f.kind,
                    quantity: f.quantity,
                    effective: f.effective,
                    alternate_group: f.alternate_group.clone(),
                    priority: f.priority,
                })
                .collect(),
            loads: model
                .loads()
                .map(|(_, l)| LoadRecord {
                    operation: op_name(l.operation),
                    resource: model.resource(l.resource).name.clone(),
                    quantity: l.quantity,
                    skill: l.skill.clone(),
                    setup: l.setup.clone(),
                    effective: l.effective,
                    alternate_group: l.alternate_group.clone(),
                    priority: l.priority,
                })
                .collect(),
            demands: model
                .demands()
                .map(|(_, d)| DemandRecord {
                    name: d.name.clone(),
                    item: d.item.map(|i| model.item(i).name.clone()),
                    customer: d.customer.map(|c| model.customer(c).name.clone()),
                    quantity: d.quantity,
                    due: d.due,
                    priority: d.priority,
                    max_lateness: d.max_lateness,
                    min_shipment: d.min_shipment,
                    operation: d.operation.map(op_name),
                })
                .collect(),
            forecasts: forecasts
                .iter()
                .map(|f| ForecastRecord {
                    name: f.name.clone(),
                    item: f.item.map(|i| model.item(i).name.clone()),
                    customer: f.customer.map(|c| model.customer(c).name.clone()),
                    operation: f.operation.map(op_name),
                    calendar: model.calendar(f.calendar).name.clone(),
                    discrete: f.discrete,
                    methods: f.methods.0,
                    priority: f.priority,
                    buckets: f
                        .buckets()
                        .iter()
                        .map(|b| ForecastBucketRecord {
                            start: b.range.start,
                            end: b.range.end,
                            weight: b.weight,
                            total: b.total,
                            consumed: b.consumed,
                        })
                        .collect(),
                })
                .collect(),
            operationplans,
        }
    }
}

fn dump_plan_record(plan: &PlanState, model: &Model, id: PlanId) -> OperationPlanRecord {
    let p = plan.plan(id);
    OperationPlanRecord {
        operation: model.operation(p.operation).name.clone(),
        start: p.dates.start,
        end: p.dates.end,
        quantity: p.quantity,
        locked: p.locked,
        demand: p.demand.map(|d| model.demand(d).name.clone()),
        children: p
            .children
            .iter()
            .map(|c| dump_plan_record(plan, model, *c))
            .collect(),
    }
}

fn load_plan_record(
    plan: &mut PlanState,
    model: &Model,
    rec: &OperationPlanRecord,
    owner: Option<PlanId>,
    operations: &HashMap<&str, OperationId>,
    demands: &HashMap<&str, DemandId>,
) -> Result<PlanId, CoreError> {
    let op = operations.get(rec.operation.as_str()).copied().ok_or_else(|| {
        CoreError::Data(format!(
            "operation plan references unknown operation '{}'",
            rec.operation
        ))
    })?;
    let demand = rec.demand.as_deref().and_then(|d| demands.get(d).copied());
    let id = plan.create_plan(
        model,
        op,
        rec.quantity,
        Some(rec.start),
        Some(rec.end),
        true,
        demand,
        owner,
        !rec.children.is_empty(),
    );
    // Loaded plans keep their recorded window verbatim, even off the
    // computed shape.
    plan.apply_shape(
        model,
        id,
        PlanShape {
            start: rec.start,
            end: rec.end,
            quantity: rec.quantity,
        },
    );
    plan.plan_mut(id).locked = rec.locked;
    for child in &rec.children {
        load_plan_record(plan, model, child, Some(id), operations, demands)?;
    }
    if !rec.children.is_empty() {
        plan.create_flow_loads(model, id);
    }
    Ok(id)
}
