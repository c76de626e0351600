//! Plan state: operation plans and their material/capacity events.
//!
//! All plans live in slab arenas indexed by typed ids. Buffers and
//! resources each keep a date-ordered event list referencing into those
//! arenas; the buffer onhand at any instant is the initial onhand plus
//! the signed cumulative flowplan quantity up to that instant.
//!
//! The arenas use tombstones so ids stay stable across delete/restore,
//! which is what lets the command journal undo a deletion by putting the
//! snapshot back under its original id.

use std::collections::HashMap;

use crate::dates::{Date, DateRange, TimeSpan, INFINITE_FUTURE};
use crate::model::Model;
use crate::operation::{PlanShape, ROUNDING_ERROR};
use crate::{BufferId, DemandId, FlowId, FlowPlanId, LoadId, LoadPlanId, OperationId, PlanId, ResourceId};

/// A planned instance of an operation over a date window.
#[derive(Debug, Clone)]
pub struct OperationPlan {
    pub operation: OperationId,
    pub dates: DateRange,
    pub quantity: f64,
    pub owner: Option<PlanId>,
    pub children: Vec<PlanId>,
    /// The demand this plan delivers, for top-level delivery plans.
    pub demand: Option<DemandId>,
    /// Frozen against every solver pass.
    pub locked: bool,
    pub consume_material: bool,
    pub consume_capacity: bool,
    pub flowplans: Vec<FlowPlanId>,
    pub loadplans: Vec<LoadPlanId>,
}

/// A single material movement of a plan against a buffer.
#[derive(Debug, Clone)]
pub struct FlowPlan {
    pub plan: PlanId,
    pub flow: FlowId,
    pub buffer: BufferId,
    pub date: Date,
    /// Signed: production positive, consumption negative.
    pub quantity: f64,
}

/// A capacity claim of a plan on a resource over its window.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub plan: PlanId,
    pub load: LoadId,
    pub resource: ResourceId,
    pub interval: DateRange,
    /// Occupancy level during the interval.
    pub quantity: f64,
}

/// One entry of a buffer inventory profile.
#[derive(Debug, Clone, Copy)]
pub struct ProfileEvent {
    pub flowplan: FlowPlanId,
    pub date: Date,
    pub quantity: f64,
    /// Onhand after this event.
    pub onhand: f64,
}

/// Snapshot of a deleted plan subtree, sufficient to restore it under
/// the original ids.
#[derive(Debug, Clone)]
pub struct PlanSnapshot {
    pub id: PlanId,
    plan: OperationPlan,
    flowplans: Vec<(FlowPlanId, FlowPlan)>,
    loadplans: Vec<(LoadPlanId, LoadPlan)>,
    children: Vec<PlanSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanState {
    plans: Vec<Option<OperationPlan>>,
    flowplans: Vec<Option<FlowPlan>>,
    loadplans: Vec<Option<LoadPlan>>,
    /// Per-buffer flowplan ids, kept sorted by (date, id).
    buffer_events: HashMap<BufferId, Vec<FlowPlanId>>,
    /// Per-resource loadplan ids, kept sorted by interval start.
    resource_events: HashMap<ResourceId, Vec<LoadPlanId>>,
    /// Delivery plans per demand.
    deliveries: HashMap<DemandId, Vec<PlanId>>,
}

impl PlanState {
    pub fn new() -> Self {
        PlanState::default()
    }

    // ----- accessors -------------------------------------------------

    pub fn plan(&self, id: PlanId) -> &OperationPlan {
        self.plans[id.value()].as_ref().expect("live operation plan")
    }

    pub fn plan_mut(&mut self, id: PlanId) -> &mut OperationPlan {
        self.plans[id.value()].as_mut().expect("live operation plan")
    }

    pub fn flowplan(&self, id: FlowPlanId) -> &FlowPlan {
        self.flowplans[id.value()].as_ref().expect("live flowplan")
    }

    pub fn loadplan(&self, id: LoadPlanId) -> &LoadPlan {
        self.loadplans[id.value()].as_ref().expect("live loadplan")
    }

    pub fn contains(&self, id: PlanId) -> bool {
        self.plans.get(id.value()).is_some_and(Option::is_some)
    }

    pub fn contains_flowplan(&self, id: FlowPlanId) -> bool {
        self.flowplans.get(id.value()).is_some_and(Option::is_some)
    }

    /// All live plan ids.
    pub fn plan_ids(&self) -> impl Iterator<Item = PlanId> + '_ {
        self.plans
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|_| PlanId::new(i)))
    }

    pub fn deliveries(&self, demand: DemandId) -> &[PlanId] {
        self.deliveries.get(&demand).map_or(&[], Vec::as_slice)
    }

    /// Total quantity delivered to a demand by its top-level plans.
    pub fn planned_quantity(&self, demand: DemandId) -> f64 {
        self.deliveries(demand)
            .iter()
            .map(|p| self.plan(*p).quantity)
            .sum()
    }

    pub fn buffer_events(&self, buffer: BufferId) -> &[FlowPlanId] {
        self.buffer_events.get(&buffer).map_or(&[], Vec::as_slice)
    }

    pub fn resource_events(&self, resource: ResourceId) -> &[LoadPlanId] {
        self.resource_events.get(&resource).map_or(&[], Vec::as_slice)
    }

    // ----- creation --------------------------------------------------

    /// Create a plan of `operation`, shaped into the given window.
    /// Flowplans and loadplans are created immediately unless
    /// `defer_flow_loads` is set (used by composite operations, whose
    /// own events are created only after the children are planned).
    #[allow(clippy::too_many_arguments)]
    pub fn create_plan(
        &mut self,
        model: &Model,
        operation: OperationId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        demand: Option<DemandId>,
        owner: Option<PlanId>,
        defer_flow_loads: bool,
    ) -> PlanId {
        let op = model.operation(operation);
        let shape = op.plan_shape(quantity, start, end, prefer_end);
        let plan = OperationPlan {
            operation,
            dates: DateRange::new(shape.start, shape.end),
            quantity: shape.quantity,
            owner,
            children: Vec::new(),
            demand,
            locked: false,
            consume_material: true,
            consume_capacity: true,
            flowplans: Vec::new(),
            loadplans: Vec::new(),
        };
        let id = self.insert_plan(plan);
        if let Some(owner) = owner {
            self.plan_mut(owner).children.push(id);
            self.refresh_owner_envelope(model, owner);
        }
        if let Some(demand) = demand {
            self.deliveries.entry(demand).or_default().push(id);
        }
        if !defer_flow_loads {
            self.create_flow_loads(model, id);
        }
        id
    }

    /// Materialize the flowplans and loadplans of a plan from its
    /// operation's flow and load definitions.
    pub fn create_flow_loads(&mut self, model: &Model, id: PlanId) {
        let (operation, dates, quantity, consume_material, consume_capacity) = {
            let p = self.plan(id);
            (
                p.operation,
                p.dates,
                p.quantity,
                p.consume_material,
                p.consume_capacity,
            )
        };
        let op = model.operation(operation);
        for &flow_id in &op.flows {
            // Alternate groups materialize one flowplan, on the leader;
            // the solver may switch it to another member later.
            if flow_id != model.flow_alternate_leader(flow_id) {
                continue;
            }
            let flow = model.flow(flow_id);
            let date = if flow.kind.at_start() {
                dates.start
            } else {
                dates.end
            };
            let mut qty = flow.plan_quantity(quantity, date);
            if flow.is_consumer() && !consume_material {
                qty = 0.0;
            }
            let fp = FlowPlan {
                plan: id,
                flow: flow_id,
                buffer: flow.buffer,
                date,
                quantity: qty,
            };
            let fp_id = self.insert_flowplan(fp);
            self.plan_mut(id).flowplans.push(fp_id);
            self.index_flowplan(fp_id);
        }
        for &load_id in &op.loads {
            let load = model.load(load_id);
            let mut qty = if load.effective.contains(dates.start) {
                load.quantity
            } else {
                0.0
            };
            if !consume_capacity {
                qty = 0.0;
            }
            let lp = LoadPlan {
                plan: id,
                load: load_id,
                resource: load.resource,
                interval: dates,
                quantity: qty,
            };
            let lp_id = self.insert_loadplan(lp);
            self.plan_mut(id).loadplans.push(lp_id);
            self.index_loadplan(lp_id);
        }
    }

    // ----- mutation --------------------------------------------------

    /// The current shape of a plan, as would be recorded for undo.
    pub fn shape_of(&self, id: PlanId) -> PlanShape {
        let p = self.plan(id);
        PlanShape {
            start: p.dates.start,
            end: p.dates.end,
            quantity: p.quantity,
        }
    }

    /// Reshape a plan into the given window and quantity, repositioning
    /// all its material and capacity events.
    pub fn set_shape(
        &mut self,
        model: &Model,
        id: PlanId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
    ) -> PlanShape {
        let operation = self.plan(id).operation;
        let op = model.operation(operation);
        let shape = if op.is_composite() && !self.plan(id).children.is_empty() {
            // Composite plans keep the envelope of their children; only
            // the quantity is restated.
            let dates = self.plan(id).dates;
            PlanShape {
                start: dates.start,
                end: dates.end,
                quantity: op.apply_size(quantity),
            }
        } else {
            op.plan_shape(quantity, start, end, prefer_end)
        };
        self.apply_shape(model, id, shape);
        shape
    }

    /// Apply an exact shape, bypassing window computation. Used by the
    /// journal to restore a recorded shape.
    pub fn apply_shape(&mut self, model: &Model, id: PlanId, shape: PlanShape) {
        {
            let p = self.plan_mut(id);
            p.dates = DateRange::new(shape.start, shape.end);
            p.quantity = shape.quantity;
        }
        self.reposition_events(model, id);
        if let Some(owner) = self.plan(id).owner {
            self.refresh_owner_envelope(model, owner);
        }
    }

    /// Resize a plan keeping its end date anchored.
    pub fn set_quantity(&mut self, model: &Model, id: PlanId, quantity: f64) -> PlanShape {
        let end = self.plan(id).dates.end;
        self.set_shape(model, id, quantity, None, Some(end), true)
    }

    /// Resize the owning plan so the given consuming flowplan moves as
    /// close as possible to `desired` units (in absolute value). The
    /// actual plan quantity still honors the operation's size grid.
    pub fn resize_plan_for_flow(
        &mut self,
        model: &Model,
        flowplan: FlowPlanId,
        desired: f64,
    ) -> f64 {
        let (plan, flow_id) = {
            let fp = self.flowplan(flowplan);
            (fp.plan, fp.flow)
        };
        let flow = model.flow(flow_id);
        let plan_qty = if flow.kind.is_fixed() {
            if desired <= ROUNDING_ERROR {
                0.0
            } else {
                self.plan(plan).quantity
            }
        } else {
            desired / flow.quantity.abs()
        };
        self.set_quantity(model, plan, plan_qty);
        self.flowplan(flowplan).quantity
    }

    /// Rebind a flowplan to another flow of the same operation (an
    /// alternate group member), recomputing its buffer, date and
    /// quantity. Returns the previous flow.
    pub fn switch_flowplan_flow(
        &mut self,
        model: &Model,
        id: FlowPlanId,
        new_flow: FlowId,
    ) -> FlowId {
        let prev = self.flowplan(id).flow;
        if prev == new_flow {
            return prev;
        }
        self.unindex_flowplan(id);
        let (dates, quantity, consume_material) = {
            let plan = self.plan(self.flowplan(id).plan);
            (plan.dates, plan.quantity, plan.consume_material)
        };
        {
            let flow = model.flow(new_flow);
            let date = if flow.kind.at_start() {
                dates.start
            } else {
                dates.end
            };
            let mut qty = flow.plan_quantity(quantity, date);
            if flow.is_consumer() && !consume_material {
                qty = 0.0;
            }
            let fp = self.flowplans[id.value()].as_mut().expect("live flowplan");
            fp.flow = new_flow;
            fp.buffer = flow.buffer;
            fp.date = date;
            fp.quantity = qty;
        }
        self.index_flowplan(id);
        prev
    }

    /// Rebind a loadplan to another resource (a pool child chosen for a
    /// skill). Returns the previous resource.
    pub fn switch_loadplan_resource(&mut self, id: LoadPlanId, resource: ResourceId) -> ResourceId {
        let prev = self.loadplan(id).resource;
        if prev == resource {
            return prev;
        }
        self.unindex_loadplan(id);
        self.loadplans[id.value()]
            .as_mut()
            .expect("live loadplan")
            .resource = resource;
        self.index_loadplan(id);
        prev
    }

    fn reposition_events(&mut self, model: &Model, id: PlanId) {
        let (dates, quantity, consume_material, consume_capacity, fps, lps) = {
            let p = self.plan(id);
            (
                p.dates,
                p.quantity,
                p.consume_material,
                p.consume_capacity,
                p.flowplans.clone(),
                p.loadplans.clone(),
            )
        };
        for fp_id in fps {
            self.unindex_flowplan(fp_id);
            {
                let flow = model.flow(self.flowplan(fp_id).flow);
                let date = if flow.kind.at_start() {
                    dates.start
                } else {
                    dates.end
                };
                let mut qty = flow.plan_quantity(quantity, date);
                if flow.is_consumer() && !consume_material {
                    qty = 0.0;
                }
                let fp = self.flowplans[fp_id.value()].as_mut().expect("live flowplan");
                fp.date = date;
                fp.quantity = qty;
            }
            self.index_flowplan(fp_id);
        }
        for lp_id in lps {
            self.unindex_loadplan(lp_id);
            {
                let load = model.load(self.loadplan(lp_id).load);
                let mut qty = if load.effective.contains(dates.start) {
                    load.quantity
                } else {
                    0.0
                };
                if !consume_capacity {
                    qty = 0.0;
                }
                let lp = self.loadplans[lp_id.value()].as_mut().expect("live loadplan");
                lp.interval = dates;
                lp.quantity = qty;
            }
            self.index_loadplan(lp_id);
        }
    }

    /// Recompute a composite plan's window as the envelope of its
    /// children, then reposition its own events. Walks up the chain.
    pub fn refresh_owner_envelope(&mut self, model: &Model, id: PlanId) {
        let children = self.plan(id).children.clone();
        if !children.is_empty() {
            let mut start = INFINITE_FUTURE;
            let mut end = self.plan(id).dates.end;
            let mut any = false;
            for child in &children {
                let c = self.plan(*child);
                if c.quantity > ROUNDING_ERROR || children.len() == 1 {
                    start = start.min(c.dates.start);
                    end = if any { end.max(c.dates.end) } else { c.dates.end };
                    any = true;
                }
            }
            if any {
                self.plan_mut(id).dates = DateRange::new(start, end);
                self.reposition_events(model, id);
            }
        }
        if let Some(owner) = self.plan(id).owner {
            self.refresh_owner_envelope(model, owner);
        }
    }

    /// Delete a plan and its whole subtree, returning a snapshot that
    /// [`PlanState::restore_plan`] can replay.
    pub fn delete_plan(&mut self, id: PlanId) -> PlanSnapshot {
        // Detach from the owner first so the recursive teardown below
        // doesn't have to know about it.
        if let Some(owner) = self.plan(id).owner {
            if self.contains(owner) {
                self.plan_mut(owner).children.retain(|c| *c != id);
            }
        }
        self.take_subtree(id)
    }

    fn take_subtree(&mut self, id: PlanId) -> PlanSnapshot {
        let children_ids = self.plan(id).children.clone();
        let children = children_ids
            .into_iter()
            .map(|c| self.take_subtree(c))
            .collect();
        let plan = self.plans[id.value()].take().expect("live operation plan");
        let mut flowplans = Vec::with_capacity(plan.flowplans.len());
        for fp_id in &plan.flowplans {
            self.unindex_flowplan(*fp_id);
            let fp = self.flowplans[fp_id.value()].take().expect("live flowplan");
            flowplans.push((*fp_id, fp));
        }
        let mut loadplans = Vec::with_capacity(plan.loadplans.len());
        for lp_id in &plan.loadplans {
            self.unindex_loadplan(*lp_id);
            let lp = self.loadplans[lp_id.value()].take().expect("live loadplan");
            loadplans.push((*lp_id, lp));
        }
        if let Some(demand) = plan.demand {
            if let Some(list) = self.deliveries.get_mut(&demand) {
                list.retain(|p| *p != id);
            }
        }
        PlanSnapshot {
            id,
            plan,
            flowplans,
            loadplans,
            children,
        }
    }

    /// Put a deleted subtree back under its original ids.
    pub fn restore_plan(&mut self, snapshot: PlanSnapshot) {
        let PlanSnapshot {
            id,
            plan,
            flowplans,
            loadplans,
            children,
        } = snapshot;
        if let Some(demand) = plan.demand {
            self.deliveries.entry(demand).or_default().push(id);
        }
        if let Some(owner) = plan.owner {
            if self.contains(owner) && !self.plan(owner).children.contains(&id) {
                self.plan_mut(owner).children.push(id);
            }
        }
        self.plans[id.value()] = Some(plan);
        for (fp_id, fp) in flowplans {
            self.flowplans[fp_id.value()] = Some(fp);
            self.index_flowplan(fp_id);
        }
        for (lp_id, lp) in loadplans {
            self.loadplans[lp_id.value()] = Some(lp);
            self.index_loadplan(lp_id);
        }
        for child in children {
            self.restore_plan(child);
        }
    }

    // ----- profiles --------------------------------------------------

    /// The full inventory profile of a buffer: every event in date order
    /// with the running onhand after it.
    pub fn buffer_profile(&self, model: &Model, buffer: BufferId) -> Vec<ProfileEvent> {
        let initial = model.buffer(buffer).onhand;
        let mut onhand = initial;
        self.buffer_events(buffer)
            .iter()
            .map(|fp_id| {
                let fp = self.flowplan(*fp_id);
                onhand += fp.quantity;
                ProfileEvent {
                    flowplan: *fp_id,
                    date: fp.date,
                    quantity: fp.quantity,
                    onhand,
                }
            })
            .collect()
    }

    /// Onhand after all events dated at or before `date`.
    pub fn onhand_at(&self, model: &Model, buffer: BufferId, date: Date) -> f64 {
        let mut onhand = model.buffer(buffer).onhand;
        for fp_id in self.buffer_events(buffer) {
            let fp = self.flowplan(*fp_id);
            if fp.date > date {
                break;
            }
            onhand += fp.quantity;
        }
        onhand
    }

    /// Onhand at the end of the horizon.
    pub fn final_onhand(&self, model: &Model, buffer: BufferId) -> f64 {
        self.onhand_at(model, buffer, INFINITE_FUTURE)
    }

    /// How much of a producing event is surplus: the smallest slack
    /// between onhand and the minimum level from the event onward,
    /// capped at the event's own quantity. Onhand is read only where
    /// the date changes, after all events of an instant settled.
    pub fn excess_of(&self, model: &Model, buffer: BufferId, flowplan: FlowPlanId) -> f64 {
        let fp = self.flowplan(flowplan);
        if fp.quantity <= 0.0 {
            return 0.0;
        }
        let min_level = model.buffer_minimum_at(buffer, fp.date);
        let profile = self.buffer_profile(model, buffer);
        let mut slack = f64::INFINITY;
        for (i, ev) in profile.iter().enumerate() {
            if ev.date < fp.date {
                continue;
            }
            if i + 1 < profile.len() && profile[i + 1].date == ev.date {
                continue;
            }
            let min_here = model.buffer_minimum_at(buffer, ev.date).max(min_level);
            slack = slack.min(ev.onhand - min_here);
        }
        slack.clamp(0.0, fp.quantity)
    }

    /// Occupancy of a continuous resource at an instant.
    pub fn resource_usage_at(&self, resource: ResourceId, t: Date) -> f64 {
        self.resource_events(resource)
            .iter()
            .map(|lp_id| {
                let lp = self.loadplan(*lp_id);
                if lp.interval.contains(t) && lp.interval.duration() > TimeSpan::ZERO {
                    lp.quantity
                } else {
                    0.0
                }
            })
            .sum()
    }

    /// Quantity consumed from a bucketized resource inside a window,
    /// `load quantity x plan quantity` per loadplan starting in it.
    pub fn resource_bucket_usage(&self, model: &Model, resource: ResourceId, bucket: &DateRange) -> f64 {
        self.resource_events(resource)
            .iter()
            .map(|lp_id| {
                let lp = self.loadplan(*lp_id);
                if bucket.contains(lp.interval.start) {
                    let load = model.load(lp.load);
                    load.quantity * self.plan(lp.plan).quantity
                } else {
                    0.0
                }
            })
            .sum()
    }

    // ----- cluster split and merge -----------------------------------

    /// Carve out the plans whose operations belong to one cluster into a
    /// fresh state. Ids are not preserved; parallel workers operate on
    /// such fragments and the results are merged back afterwards.
    pub fn extract_cluster(&self, clusters: &crate::cluster::Clusters, cluster: usize) -> PlanState {
        let mut out = PlanState::new();
        for id in self.plan_ids() {
            let plan = self.plan(id);
            if plan.owner.is_some() || clusters.operation(plan.operation) != cluster {
                continue;
            }
            self.copy_subtree(id, None, &mut out);
        }
        out
    }

    /// Append every top-level plan of another state into this one,
    /// under fresh ids.
    pub fn absorb(&mut self, other: &PlanState) {
        for id in other.plan_ids() {
            if other.plan(id).owner.is_some() {
                continue;
            }
            other.copy_subtree(id, None, self);
        }
    }

    fn copy_subtree(&self, id: PlanId, owner: Option<PlanId>, out: &mut PlanState) -> PlanId {
        let plan = self.plan(id);
        let new = out.insert_plan(OperationPlan {
            operation: plan.operation,
            dates: plan.dates,
            quantity: plan.quantity,
            owner,
            children: Vec::new(),
            demand: plan.demand,
            locked: plan.locked,
            consume_material: plan.consume_material,
            consume_capacity: plan.consume_capacity,
            flowplans: Vec::new(),
            loadplans: Vec::new(),
        });
        if let Some(owner) = owner {
            out.plan_mut(owner).children.push(new);
        }
        if let Some(demand) = plan.demand {
            out.deliveries.entry(demand).or_default().push(new);
        }
        for fp_id in &plan.flowplans {
            let mut fp = self.flowplan(*fp_id).clone();
            fp.plan = new;
            let nfp = out.insert_flowplan(fp);
            out.plan_mut(new).flowplans.push(nfp);
            out.index_flowplan(nfp);
        }
        for lp_id in &plan.loadplans {
            let mut lp = self.loadplan(*lp_id).clone();
            lp.plan = new;
            let nlp = out.insert_loadplan(lp);
            out.plan_mut(new).loadplans.push(nlp);
            out.index_loadplan(nlp);
        }
        for child in &plan.children {
            self.copy_subtree(*child, Some(new), out);
        }
        new
    }

    // ----- internals -------------------------------------------------

    fn insert_plan(&mut self, plan: OperationPlan) -> PlanId {
        self.plans.push(Some(plan));
        PlanId::new(self.plans.len() - 1)
    }

    fn insert_flowplan(&mut self, fp: FlowPlan) -> FlowPlanId {
        self.flowplans.push(Some(fp));
        FlowPlanId::new(self.flowplans.len() - 1)
    }

    fn insert_loadplan(&mut self, lp: LoadPlan) -> LoadPlanId {
        self.loadplans.push(Some(lp));
        LoadPlanId::new(self.loadplans.len() - 1)
    }

    fn index_flowplan(&mut self, id: FlowPlanId) {
        let (buffer, date) = {
            let fp = self.flowplan(id);
            (fp.buffer, fp.date)
        };
        let events = self.buffer_events.entry(buffer).or_default();
        let pos = events
            .binary_search_by(|other| {
                let o = self.flowplans[other.value()].as_ref().expect("live flowplan");
                o.date.cmp(&date).then(other.value().cmp(&id.value()))
            })
            .unwrap_or_else(|p| p);
        events.insert(pos, id);
    }

    fn unindex_flowplan(&mut self, id: FlowPlanId) {
        let buffer = self.flowplan(id).buffer;
        if let Some(events) = self.buffer_events.get_mut(&buffer) {
            events.retain(|e| *e != id);
        }
    }

    fn index_loadplan(&mut self, id: LoadPlanId) {
        let (resource, start) = {
            let lp = self.loadplan(id);
            (lp.resource, lp.interval.start)
        };
        let events = self.resource_events.entry(resource).or_default();
        let pos = events
            .binary_search_by(|other| {
                let o = self.loadplans[other.value()].as_ref().expect("live loadplan");
                o.interval
                    .start
                    .cmp(&start)
                    .then(other.value().cmp(&id.value()))
            })
            .unwrap_or_else(|p| p);
        events.insert(pos, id);
    }

    fn unindex_loadplan(&mut self, id: LoadPlanId) {
        let resource = self.loadplan(id).resource;
        if let Some(events) = self.resource_events.get_mut(&resource) {
            events.retain(|e| *e != id);
        }
    }

    /// Does the ownership chain from `id` reach `candidate`? Used to
    /// guard against ownership cycles.
    pub fn owner_chain_contains(&self, id: PlanId, candidate: PlanId) -> bool {
        let mut cursor = Some(id);
        while let Some(p) = cursor {
            if p == candidate {
                return true;
            }
            cursor = self.plan(p).owner;
        }
        false
    }
}

/// Walk the pegging network upstream and downstream from a plan and
/// collect every demand it ultimately serves.
pub fn pegged_demands(plan_state: &PlanState, model: &Model, start: PlanId) -> Vec<DemandId> {
    let mut out = Vec::new();
    let mut visited = Vec::new();
    peg_walk(plan_state, model, start, &mut visited, &mut out);
    out
}

fn peg_walk(
    plan_state: &PlanState,
    model: &Model,
    id: PlanId,
    visited: &mut Vec<PlanId>,
    out: &mut Vec<DemandId>,
) {
    if visited.contains(&id) {
        return;
    }
    visited.push(id);
    // Up the ownership chain: a top-level delivery plan pegs a demand.
    let plan = plan_state.plan(id);
    if let Some(demand) = plan.demand {
        if !out.contains(&demand) {
            out.push(demand);
        }
    }
    if let Some(owner) = plan.owner {
        peg_walk(plan_state, model, owner, visited, out);
    }
    // Downstream: whatever this plan produces is consumed later in the
    // same buffer by other plans.
    for fp_id in &plan.flowplans {
        let fp = plan_state.flowplan(*fp_id);
        if fp.quantity <= 0.0 {
            continue;
        }
        for other_id in plan_state.buffer_events(fp.buffer) {
            let other = plan_state.flowplan(*other_id);
            if other.quantity < 0.0 && other.date >= fp.date {
                peg_walk(plan_state, model, other.plan, visited, out);
            }
        }
    }
    let _ = model;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Flow, FlowKind};
    use crate::model::Model;
    use crate::operation::Operation;
    use crate::Buffer;

    fn day(n: i64) -> Date {
        // 2024-01-01 plus n days, comfortably inside the horizon.
        Date(1_704_067_200 + n * 86_400)
    }

    fn small_model() -> (Model, OperationId, BufferId) {
        let mut model = Model::new(day(0));
        let buffer = model.add_buffer(Buffer::new("stock").with_onhand(5.0));
        let op = model.add_operation(Operation::fixed_time("make", TimeSpan::days(1)));
        model.add_flow(Flow::new(op, buffer, FlowKind::End, 1.0));
        (model, op, buffer)
    }

    #[test]
    fn create_plan_produces_into_buffer() {
        let (model, op, buffer) = small_model();
        let mut plan = PlanState::new();
        let id = plan.create_plan(
            &model,
            op,
            10.0,
            None,
            Some(day(10)),
            true,
            None,
            None,
            false,
        );
        assert_eq!(plan.plan(id).dates.start, day(9));
        assert_eq!(plan.onhand_at(&model, buffer, day(9)), 5.0);
        assert_eq!(plan.onhand_at(&model, buffer, day(10)), 15.0);
    }

    #[test]
    fn delete_and_restore_round_trips() {
        let (model, op, buffer) = small_model();
        let mut plan = PlanState::new();
        let id = plan.create_plan(
            &model,
            op,
            10.0,
            None,
            Some(day(10)),
            true,
            None,
            None,
            false,
        );
        let snapshot = plan.delete_plan(id);
        assert_eq!(plan.onhand_at(&model, buffer, day(10)), 5.0);
        assert!(!plan.contains(id));
        plan.restore_plan(snapshot);
        assert!(plan.contains(id));
        assert_eq!(plan.onhand_at(&model, buffer, day(10)), 15.0);
    }

    #[test]
    fn set_shape_moves_events() {
        let (model, op, buffer) = small_model();
        let mut plan = PlanState::new();
        let id = plan.create_plan(
            &model,
            op,
            10.0,
            None,
            Some(day(10)),
            true,
            None,
            None,
            false,
        );
        plan.set_shape(&model, id, 10.0, None, Some(day(20)), true);
        assert_eq!(plan.onhand_at(&model, buffer, day(10)), 5.0);
        assert_eq!(plan.onhand_at(&model, buffer, day(20)), 15.0);
    }

    #[test]
    fn excess_detects_surplus_producer() {
        let (model, op, buffer) = small_model();
        let mut plan = PlanState::new();
        let id = plan.create_plan(
            &model,
            op,
            10.0,
            None,
            Some(day(10)),
            true,
            None,
            None,
            false,
        );
        let fp = plan.plan(id).flowplans[0];
        // Nothing consumes the production, so all 10 are excess.
        assert_eq!(plan.excess_of(&model, buffer, fp), 10.0);
    }
}
