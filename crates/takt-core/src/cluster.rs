//! Cluster and level analysis of the supply network.
//!
//! A cluster is a connected component of operations, buffers and
//! resources: entities joined by a flow, a load, a sub-operation link or
//! a producing-operation link end up in the same cluster. Clusters share
//! nothing, which is what makes them safe units of parallel planning.
//!
//! Levels count how far upstream a buffer or operation sits from the
//! demands: delivery operations are level 1, the buffers they consume
//! level 1, the producers of those buffers level 2, and so on. The
//! move-out operator repairs the deepest levels first so downstream
//! shortages see repaired upstream supply.

use petgraph::unionfind::UnionFind;
use std::collections::HashMap;
use tracing::debug;

use crate::model::Model;
use crate::operation::OperationKind;
use crate::{BufferId, DemandId, OperationId, ResourceId};

/// Cluster assignment for every entity of a model.
#[derive(Debug, Clone)]
pub struct Clusters {
    pub of_operation: Vec<usize>,
    pub of_buffer: Vec<usize>,
    pub of_resource: Vec<usize>,
    pub count: usize,
}

impl Clusters {
    pub fn operation(&self, id: OperationId) -> usize {
        self.of_operation[id.value()]
    }

    pub fn buffer(&self, id: BufferId) -> usize {
        self.of_buffer[id.value()]
    }

    pub fn resource(&self, id: ResourceId) -> usize {
        self.of_resource[id.value()]
    }

    /// Demands grouped by the cluster of their delivery operation.
    /// Demands without a delivery operation land in no cluster.
    pub fn demands_per_cluster(&self, model: &Model) -> Vec<Vec<DemandId>> {
        let mut out = vec![Vec::new(); self.count];
        for (id, demand) in model.demands() {
            if let Some(op) = demand.operation {
                out[self.operation(op)].push(id);
            }
        }
        out
    }
}

/// Union-find over all entities, joined along every structural edge.
pub fn compute_clusters(model: &Model) -> Clusters {
    let n_op = model.operation_count();
    let n_buf = model.buffer_count();
    let n_res = model.resource_count();
    let total = n_op + n_buf + n_res;
    let mut uf: UnionFind<usize> = UnionFind::new(total);
    let buf_node = |b: BufferId| n_op + b.value();
    let res_node = |r: ResourceId| n_op + n_buf + r.value();

    for (_, flow) in model.flows() {
        uf.union(flow.operation.value(), buf_node(flow.buffer));
    }
    for (_, load) in model.loads() {
        uf.union(load.operation.value(), res_node(load.resource));
    }
    for (id, op) in model.operations() {
        match &op.kind {
            OperationKind::Routing { steps } => {
                for s in steps {
                    uf.union(id.value(), s.value());
                }
            }
            OperationKind::Alternate { alternates, .. } => {
                for a in alternates {
                    uf.union(id.value(), a.operation.value());
                }
            }
            OperationKind::Split { shares } => {
                for s in shares {
                    uf.union(id.value(), s.operation.value());
                }
            }
            _ => {}
        }
    }
    for (id, buffer) in model.buffers() {
        if let Some(producing) = buffer.producing {
            uf.union(buf_node(id), producing.value());
        }
    }
    for (id, resource) in model.resources() {
        if let Some(parent) = resource.parent {
            uf.union(res_node(id), res_node(parent));
        }
    }

    // Compact the union-find roots into dense cluster numbers.
    let labels = uf.into_labeling();
    let mut dense: HashMap<usize, usize> = HashMap::new();
    let mut assign = |root: usize| {
        let next = dense.len();
        *dense.entry(root).or_insert(next)
    };
    let of_operation: Vec<usize> = (0..n_op).map(|i| assign(labels[i])).collect();
    let of_buffer: Vec<usize> = (0..n_buf).map(|i| assign(labels[n_op + i])).collect();
    let of_resource: Vec<usize> = (0..n_res).map(|i| assign(labels[n_op + n_buf + i])).collect();
    let count = dense.len();
    debug!(clusters = count, entities = total, "supply network partitioned");
    Clusters {
        of_operation,
        of_buffer,
        of_resource,
        count,
    }
}

/// Upstream depth per buffer and per operation, via bounded relaxation.
#[derive(Debug, Clone)]
pub struct Levels {
    pub of_buffer: Vec<u32>,
    pub of_operation: Vec<u32>,
    pub max_level: u32,
}

pub fn compute_levels(model: &Model) -> Levels {
    let mut of_operation = vec![0u32; model.operation_count()];
    let mut of_buffer = vec![0u32; model.buffer_count()];

    for (_, demand) in model.demands() {
        if let Some(op) = demand.operation {
            of_operation[op.value()] = of_operation[op.value()].max(1);
        }
    }

    // Relax until stable. The iteration cap guards against data cycles
    // in the routing network; levels are then simply capped.
    let cap = model.operation_count() + model.buffer_count() + 2;
    for _ in 0..cap {
        let mut changed = false;
        for (id, op) in model.operations() {
            let level = of_operation[id.value()];
            if level == 0 {
                continue;
            }
            // Sub-operations inherit at least the parent level.
            let subs: Vec<OperationId> = match &op.kind {
                OperationKind::Routing { steps } => steps.clone(),
                OperationKind::Alternate { alternates, .. } => {
                    alternates.iter().map(|a| a.operation).collect()
                }
                OperationKind::Split { shares } => shares.iter().map(|s| s.operation).collect(),
                _ => Vec::new(),
            };
            for sub in subs {
                if of_operation[sub.value()] < level {
                    of_operation[sub.value()] = level;
                    changed = true;
                }
            }
            // Consumed buffers sit at the operation's level.
            for &f in &op.flows {
                let flow = model.flow(f);
                if flow.is_consumer() && of_buffer[flow.buffer.value()] < level {
                    of_buffer[flow.buffer.value()] = level;
                    changed = true;
                }
            }
        }
        for (id, buffer) in model.buffers() {
            let level = of_buffer[id.value()];
            if level == 0 {
                continue;
            }
            if let Some(producing) = buffer.producing {
                if of_operation[producing.value()] < level + 1 {
                    of_operation[producing.value()] = level + 1;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    let max_level = of_buffer
        .iter()
        .chain(of_operation.iter())
        .copied()
        .max()
        .unwrap_or(0);
    Levels {
        of_buffer,
        of_operation,
        max_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::{Date, TimeSpan};
    use crate::demand::Demand;
    use crate::flow::{Flow, FlowKind};
    use crate::operation::Operation;
    use crate::Buffer;

    /// Two independent chains must land in two clusters.
    #[test]
    fn disjoint_chains_split_into_clusters() {
        let mut model = Model::new(Date(0));
        let b1 = model.add_buffer(Buffer::new("b1"));
        let b2 = model.add_buffer(Buffer::new("b2"));
        let o1 = model.add_operation(Operation::fixed_time("o1", TimeSpan::days(1)));
        let o2 = model.add_operation(Operation::fixed_time("o2", TimeSpan::days(1)));
        model.add_flow(Flow::new(o1, b1, FlowKind::End, 1.0));
        model.add_flow(Flow::new(o2, b2, FlowKind::End, 1.0));
        let clusters = compute_clusters(&model);
        assert_eq!(clusters.count, 2);
        assert_ne!(clusters.operation(o1), clusters.operation(o2));
        assert_eq!(clusters.operation(o1), clusters.buffer(b1));
    }

    #[test]
    fn chain_levels_increase_upstream() {
        let mut model = Model::new(Date(0));
        let raw = model.add_buffer(Buffer::new("raw"));
        let stock = model.add_buffer(Buffer::new("stock"));
        let make = model.add_operation(Operation::fixed_time("make", TimeSpan::days(1)));
        model.add_flow(Flow::new(make, stock, FlowKind::End, 1.0));
        model.add_flow(Flow::new(make, raw, FlowKind::Start, -1.0));
        model.buffer_mut(stock).producing = Some(make);
        let deliver = model.add_operation(Operation::fixed_time("deliver", TimeSpan::ZERO));
        model.add_flow(Flow::new(deliver, stock, FlowKind::Start, -1.0));
        model.add_demand(Demand::new("d", 10.0, Date(100)).with_operation(deliver));

        let levels = compute_levels(&model);
        assert_eq!(levels.of_operation[deliver.value()], 1);
        assert_eq!(levels.of_buffer[stock.value()], 1);
        assert_eq!(levels.of_operation[make.value()], 2);
        assert_eq!(levels.of_buffer[raw.value()], 2);
    }
}
