//! The model: every static entity of a planning problem.
//!
//! Entities live in arenas indexed by the typed ids from the crate
//! root. During a planning run the model is read-only; everything the
//! solver mutates lives in [`crate::plan::PlanState`].

use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::calendar::Calendar;
use crate::dates::Date;
use crate::demand::Demand;
use crate::error::{CoreError, CoreResult};
use crate::flow::{Flow, Load};
use crate::operation::{Operation, OperationKind};
use crate::resource::{Resource, SetupMatrix};
use crate::{
    BufferId, CalendarId, CustomerId, DemandId, FlowId, ItemId, LoadId, LocationId, OperationId,
    ResourceId, SetupMatrixId,
};

/// A node of the item or customer hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub name: String,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Model {
    /// The current date of the plan; fences and lead times count from here.
    pub current: Date,
    items: Vec<HierarchyNode>,
    customers: Vec<HierarchyNode>,
    locations: Vec<Location>,
    calendars: Vec<Calendar>,
    operations: Vec<Operation>,
    flows: Vec<Flow>,
    loads: Vec<Load>,
    buffers: Vec<Buffer>,
    resources: Vec<Resource>,
    setup_matrices: Vec<SetupMatrix>,
    demands: Vec<Demand>,
}

impl Model {
    pub fn new(current: Date) -> Self {
        Model {
            current,
            items: Vec::new(),
            customers: Vec::new(),
            locations: Vec::new(),
            calendars: Vec::new(),
            operations: Vec::new(),
            flows: Vec::new(),
            loads: Vec::new(),
            buffers: Vec::new(),
            resources: Vec::new(),
            setup_matrices: Vec::new(),
            demands: Vec::new(),
        }
    }

    // ----- hierarchies -----------------------------------------------

    pub fn add_item(&mut self, name: impl Into<String>, parent: Option<ItemId>) -> CoreResult<ItemId> {
        let parent = parent.map(|p| p.value());
        self.check_hierarchy(&self.items, parent, "item")?;
        self.items.push(HierarchyNode {
            name: name.into(),
            parent,
        });
        Ok(ItemId::new(self.items.len() - 1))
    }

    pub fn add_customer(
        &mut self,
        name: impl Into<String>,
        parent: Option<CustomerId>,
    ) -> CoreResult<CustomerId> {
        let parent = parent.map(|p| p.value());
        self.check_hierarchy(&self.customers, parent, "customer")?;
        self.customers.push(HierarchyNode {
            name: name.into(),
            parent,
        });
        Ok(CustomerId::new(self.customers.len() - 1))
    }

    fn check_hierarchy(
        &self,
        arena: &[HierarchyNode],
        parent: Option<usize>,
        what: &str,
    ) -> CoreResult<()> {
        // Walking up from the proposed parent must terminate; a cycle
        // would make hierarchy climbs loop forever.
        let mut cursor = parent;
        let mut steps = 0;
        while let Some(p) = cursor {
            if p >= arena.len() {
                return Err(CoreError::Data(format!("unknown parent {what} #{p}")));
            }
            steps += 1;
            if steps > arena.len() {
                return Err(CoreError::Data(format!("cycle in {what} hierarchy")));
            }
            cursor = arena[p].parent;
        }
        Ok(())
    }

    pub fn item(&self, id: ItemId) -> &HierarchyNode {
        &self.items[id.value()]
    }

    pub fn item_parent(&self, id: ItemId) -> Option<ItemId> {
        self.items[id.value()].parent.map(ItemId::new)
    }

    pub fn customer(&self, id: CustomerId) -> &HierarchyNode {
        &self.customers[id.value()]
    }

    pub fn customer_parent(&self, id: CustomerId) -> Option<CustomerId> {
        self.customers[id.value()].parent.map(CustomerId::new)
    }

    pub fn items(&self) -> impl Iterator<Item = (ItemId, &HierarchyNode)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, n)| (ItemId::new(i), n))
    }

    pub fn customers(&self) -> impl Iterator<Item = (CustomerId, &HierarchyNode)> {
        self.customers
            .iter()
            .enumerate()
            .map(|(i, n)| (CustomerId::new(i), n))
    }

    pub fn add_location(&mut self, name: impl Into<String>) -> LocationId {
        self.locations.push(Location { name: name.into() });
        LocationId::new(self.locations.len() - 1)
    }

    pub fn location(&self, id: LocationId) -> &Location {
        &self.locations[id.value()]
    }

    pub fn locations(&self) -> impl Iterator<Item = (LocationId, &Location)> {
        self.locations
            .iter()
            .enumerate()
            .map(|(i, l)| (LocationId::new(i), l))
    }

    // ----- calendars -------------------------------------------------

    pub fn add_calendar(&mut self, calendar: Calendar) -> CalendarId {
        self.calendars.push(calendar);
        CalendarId::new(self.calendars.len() - 1)
    }

    pub fn calendar(&self, id: CalendarId) -> &Calendar {
        &self.calendars[id.value()]
    }

    pub fn calendar_mut(&mut self, id: CalendarId) -> &mut Calendar {
        &mut self.calendars[id.value()]
    }

    pub fn calendars(&self) -> impl Iterator<Item = (CalendarId, &Calendar)> {
        self.calendars
            .iter()
            .enumerate()
            .map(|(i, c)| (CalendarId::new(i), c))
    }

    // ----- operations, flows, loads ----------------------------------

    pub fn add_operation(&mut self, operation: Operation) -> OperationId {
        self.operations.push(operation);
        OperationId::new(self.operations.len() - 1)
    }

    pub fn operation(&self, id: OperationId) -> &Operation {
        &self.operations[id.value()]
    }

    pub fn operation_mut(&mut self, id: OperationId) -> &mut Operation {
        &mut self.operations[id.value()]
    }

    pub fn operations(&self) -> impl Iterator<Item = (OperationId, &Operation)> {
        self.operations
            .iter()
            .enumerate()
            .map(|(i, o)| (OperationId::new(i), o))
    }

    pub fn add_flow(&mut self, flow: Flow) -> FlowId {
        let operation = flow.operation;
        self.flows.push(flow);
        let id = FlowId::new(self.flows.len() - 1);
        self.operations[operation.value()].flows.push(id);
        id
    }

    pub fn flow(&self, id: FlowId) -> &Flow {
        &self.flows[id.value()]
    }

    pub fn flows(&self) -> impl Iterator<Item = (FlowId, &Flow)> {
        self.flows.iter().enumerate().map(|(i, f)| (FlowId::new(i), f))
    }

    pub fn add_load(&mut self, load: Load) -> LoadId {
        let operation = load.operation;
        self.loads.push(load);
        let id = LoadId::new(self.loads.len() - 1);
        self.operations[operation.value()].loads.push(id);
        id
    }

    pub fn load(&self, id: LoadId) -> &Load {
        &self.loads[id.value()]
    }

    pub fn loads(&self) -> impl Iterator<Item = (LoadId, &Load)> {
        self.loads.iter().enumerate().map(|(i, l)| (LoadId::new(i), l))
    }

    // ----- buffers, resources ----------------------------------------

    pub fn add_buffer(&mut self, buffer: Buffer) -> BufferId {
        let procure = match (&buffer.kind, buffer.producing) {
            (
                crate::buffer::BufferKind::Procure {
                    leadtime,
                    size_minimum,
                    size_maximum,
                    size_multiple,
                    ..
                },
                None,
            ) => Some((
                format!("procure {}", buffer.name),
                *leadtime,
                *size_minimum,
                *size_multiple,
                *size_maximum,
            )),
            _ => None,
        };
        self.buffers.push(buffer);
        let id = BufferId::new(self.buffers.len() - 1);
        // Procurement buffers replenish through an implicit purchasing
        // operation carrying the hard size constraints.
        if let Some((name, leadtime, min, multiple, max)) = procure {
            let op = self.add_operation(
                Operation::fixed_time(name, leadtime).with_sizes(min, multiple, max),
            );
            self.add_flow(crate::flow::Flow::new(op, id, crate::flow::FlowKind::End, 1.0));
            self.buffers[id.value()].producing = Some(op);
        }
        id
    }

    pub fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.value()]
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> &mut Buffer {
        &mut self.buffers[id.value()]
    }

    pub fn buffers(&self) -> impl Iterator<Item = (BufferId, &Buffer)> {
        self.buffers
            .iter()
            .enumerate()
            .map(|(i, b)| (BufferId::new(i), b))
    }

    /// The minimum (safety stock wish) level of a buffer at a date.
    pub fn buffer_minimum_at(&self, id: BufferId, date: Date) -> f64 {
        let buffer = self.buffer(id);
        match buffer.minimum_calendar {
            Some(cal) => self.calendar(cal).value_at(date),
            None => buffer.minimum,
        }
    }

    pub fn add_resource(&mut self, resource: Resource) -> ResourceId {
        self.resources.push(resource);
        ResourceId::new(self.resources.len() - 1)
    }

    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.value()]
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources
            .iter()
            .enumerate()
            .map(|(i, r)| (ResourceId::new(i), r))
    }

    /// Child resources of an aggregate pool.
    pub fn resource_children(&self, parent: ResourceId) -> Vec<ResourceId> {
        self.resources
            .iter()
            .enumerate()
            .filter_map(|(i, r)| (r.parent == Some(parent)).then(|| ResourceId::new(i)))
            .collect()
    }

    /// Capacity of a resource at a date.
    pub fn resource_capacity_at(&self, id: ResourceId, date: Date) -> f64 {
        let resource = self.resource(id);
        match resource.maximum_calendar {
            Some(cal) => self.calendar(cal).value_at(date),
            None => resource.maximum,
        }
    }

    pub fn add_setup_matrix(&mut self, matrix: SetupMatrix) -> SetupMatrixId {
        self.setup_matrices.push(matrix);
        SetupMatrixId::new(self.setup_matrices.len() - 1)
    }

    pub fn setup_matrix(&self, id: SetupMatrixId) -> &SetupMatrix {
        &self.setup_matrices[id.value()]
    }

    pub fn setup_matrices(&self) -> impl Iterator<Item = (SetupMatrixId, &SetupMatrix)> {
        self.setup_matrices
            .iter()
            .enumerate()
            .map(|(i, m)| (SetupMatrixId::new(i), m))
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> &mut Resource {
        &mut self.resources[id.value()]
    }

    // ----- demands ---------------------------------------------------

    pub fn add_demand(&mut self, demand: Demand) -> DemandId {
        self.demands.push(demand);
        DemandId::new(self.demands.len() - 1)
    }

    pub fn demand(&self, id: DemandId) -> &Demand {
        &self.demands[id.value()]
    }

    pub fn demands(&self) -> impl Iterator<Item = (DemandId, &Demand)> {
        self.demands
            .iter()
            .enumerate()
            .map(|(i, d)| (DemandId::new(i), d))
    }

    pub fn demand_count(&self) -> usize {
        self.demands.len()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Find the producing flow of an operation into a buffer, effective
    /// at the given date. Walks the operation's own flows only.
    pub fn find_producing_flow(
        &self,
        operation: OperationId,
        buffer: BufferId,
        date: Date,
    ) -> Option<FlowId> {
        self.operation(operation)
            .flows
            .iter()
            .copied()
            .find(|f| {
                let flow = self.flow(*f);
                flow.buffer == buffer && flow.quantity > 0.0 && flow.effective.contains(date)
            })
    }

    /// Members of an alternate flow group on one operation, in priority
    /// order.
    pub fn flow_group_members(&self, operation: OperationId, group: &str) -> Vec<FlowId> {
        let mut members: Vec<FlowId> = self
            .operation(operation)
            .flows
            .iter()
            .copied()
            .filter(|f| self.flow(*f).alternate_group.as_deref() == Some(group))
            .collect();
        members.sort_by_key(|f| (self.flow(*f).priority, f.value()));
        members
    }

    /// The leader of a flow's alternate group: the member with the best
    /// priority. A flow without a group leads itself.
    pub fn flow_alternate_leader(&self, flow: FlowId) -> FlowId {
        match &self.flow(flow).alternate_group {
            None => flow,
            Some(group) => self
                .flow_group_members(self.flow(flow).operation, group)
                .first()
                .copied()
                .unwrap_or(flow),
        }
    }

    // ----- validation ------------------------------------------------

    /// Check the model for inconsistencies that would break a planning
    /// run. Every finding is a data error; the list may be empty.
    pub fn validate(&self) -> Vec<CoreError> {
        let mut errors = Vec::new();
        for (id, flow) in self.flows() {
            if flow.quantity == 0.0 {
                errors.push(CoreError::Data(format!(
                    "flow #{} on operation '{}' has zero quantity",
                    id.value(),
                    self.operation(flow.operation).name
                )));
            }
        }
        for (id, op) in self.operations() {
            // One producing flow per buffer, and no mixed fixed and
            // proportional producers into the same buffer.
            for (i, &f1) in op.flows.iter().enumerate() {
                let flow1 = self.flow(f1);
                if !flow1.is_producer() {
                    continue;
                }
                for &f2 in &op.flows[i + 1..] {
                    let flow2 = self.flow(f2);
                    if flow2.is_producer()
                        && flow1.buffer == flow2.buffer
                        && flow1.effective.intersects(&flow2.effective)
                        && flow1.alternate_group.is_none()
                        && flow2.alternate_group.is_none()
                    {
                        errors.push(CoreError::Data(format!(
                            "operation '{}' has multiple producing flows into buffer '{}'",
                            op.name,
                            self.buffer(flow1.buffer).name
                        )));
                    }
                }
            }
            if let OperationKind::Routing { steps } = &op.kind {
                if steps.contains(&id) {
                    errors.push(CoreError::Data(format!(
                        "routing operation '{}' contains itself",
                        op.name
                    )));
                }
            }
            if let OperationKind::Alternate { alternates, .. } = &op.kind {
                if alternates.iter().all(|a| a.priority == 0) && !alternates.is_empty() {
                    errors.push(CoreError::Data(format!(
                        "alternate operation '{}' has no usable alternates",
                        op.name
                    )));
                }
            }
        }
        for (_, demand) in self.demands() {
            if demand.quantity < 0.0 {
                errors.push(CoreError::Data(format!(
                    "demand '{}' has negative quantity",
                    demand.name
                )));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::TimeSpan;
    use crate::flow::FlowKind;

    #[test]
    fn hierarchy_rejects_unknown_parent() {
        let mut model = Model::new(Date(0));
        let root = model.add_item("all", None).unwrap();
        let child = model.add_item("bikes", Some(root)).unwrap();
        assert_eq!(model.item_parent(child), Some(root));
        assert!(model.add_item("bad", Some(ItemId::new(99))).is_err());
    }

    #[test]
    fn validate_flags_double_producer() {
        let mut model = Model::new(Date(0));
        let buf = model.add_buffer(Buffer::new("stock"));
        let op = model.add_operation(Operation::fixed_time("make", TimeSpan::days(1)));
        model.add_flow(Flow::new(op, buf, FlowKind::End, 1.0));
        model.add_flow(Flow::new(op, buf, FlowKind::FixedEnd, 5.0));
        let errors = model.validate();
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("multiple producing flows")));
    }

    #[test]
    fn validate_flags_negative_demand() {
        let mut model = Model::new(Date(0));
        model.add_demand(Demand::new("bad", -5.0, Date(100)));
        assert!(!model.validate().is_empty());
    }
}
