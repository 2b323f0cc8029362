//! Sync planning: turning a diff into an ordered, dependency-aware plan.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::app::SyncPolicy;
use crate::diff::{Diff, ResourceState};
use crate::error::{Result, StewardError};
use crate::resource::{DesiredResource, ResourceId};

/// The write a single operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// One planned write against the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub resource: ResourceId,
    pub kind: OperationKind,
    /// Identities whose operations must succeed before this one runs.
    /// Only operations present in the same plan appear here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ResourceId>,
}

/// An ordered apply plan for one reconciliation cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Operations in dependency order.
    pub operations: Vec<Operation>,
    /// Indices into `operations`, grouped into layers; operations within a
    /// layer have no dependency relation and may execute concurrently.
    pub layers: Vec<Vec<usize>>,
    /// Manual policy: the plan must be confirmed before it is applied.
    pub requires_confirmation: bool,
    /// Orphans left untouched because prune is off. Reported, never acted on.
    pub reported_orphans: Vec<ResourceId>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operation_for(&self, id: &ResourceId) -> Option<&Operation> {
        self.operations.iter().find(|op| &op.resource == id)
    }
}

/// Converts a diff into an ordered plan honoring the sync policy.
///
/// Ordering is a topological sort over the dependency graph derived from
/// resource kind (namespaces first, config objects before consumers) and
/// explicit references. A cycle fails the whole plan with zero operations.
pub fn plan(diff: &Diff, desired: &[DesiredResource], policy: &SyncPolicy) -> Result<SyncPlan> {
    let desired_by_id: BTreeMap<ResourceId, &DesiredResource> =
        desired.iter().map(|d| (d.id(), d)).collect();

    // Pending create/update work, keyed by identity.
    let mut writes: BTreeMap<ResourceId, OperationKind> = BTreeMap::new();
    let mut deletes: Vec<ResourceId> = Vec::new();
    let mut reported_orphans: Vec<ResourceId> = Vec::new();

    for (id, state) in &diff.entries {
        match state {
            ResourceState::Missing => {
                writes.insert(id.clone(), OperationKind::Create);
            }
            ResourceState::OutOfSync { .. } => {
                writes.insert(id.clone(), OperationKind::Update);
            }
            ResourceState::Orphaned => {
                if policy.prune {
                    deletes.push(id.clone());
                } else {
                    reported_orphans.push(id.clone());
                }
            }
            ResourceState::InSync => {}
        }
    }

    // Dependency graph over pending writes only: an edge dep -> consumer.
    let mut graph: DiGraph<ResourceId, ()> = DiGraph::new();
    let mut nodes: HashMap<ResourceId, NodeIndex> = HashMap::new();
    for id in writes.keys() {
        nodes.insert(id.clone(), graph.add_node(id.clone()));
    }
    for (id, node) in &nodes {
        let Some(d) = desired_by_id.get(id) else {
            continue;
        };
        for reference in d.references() {
            if let Some(dep_node) = nodes.get(&reference) {
                graph.add_edge(*dep_node, *node, ());
            }
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        let member = graph[cycle.node_id()].to_string();
        StewardError::PlanCycle(format!("cycle through {}", member))
    })?;

    // Longest-path layering: an operation lands one layer below its deepest
    // dependency, so each layer is dependency-free internally.
    let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
    for node in &order {
        let d = graph
            .neighbors_directed(*node, petgraph::Direction::Incoming)
            .map(|dep| depth.get(&dep).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depth.insert(*node, d);
    }

    let mut operations: Vec<Operation> = Vec::with_capacity(order.len() + deletes.len());
    let mut layers: Vec<Vec<usize>> = Vec::new();

    for node in &order {
        let id = graph[*node].clone();
        let kind = writes[&id];
        let depends_on: Vec<ResourceId> = graph
            .neighbors_directed(*node, petgraph::Direction::Incoming)
            .map(|dep| graph[dep].clone())
            .collect();

        let layer = depth[node];
        if layers.len() <= layer {
            layers.resize(layer + 1, Vec::new());
        }
        layers[layer].push(operations.len());
        operations.push(Operation {
            resource: id,
            kind,
            depends_on,
        });
    }

    // Prunes run after all creates and updates, in one final layer. The
    // platform owns whatever internal ordering deletion needs; references
    // of undeclared resources are unknown to the controller.
    if !deletes.is_empty() {
        deletes.sort();
        let mut delete_layer = Vec::with_capacity(deletes.len());
        for id in deletes {
            delete_layer.push(operations.len());
            operations.push(Operation {
                resource: id,
                kind: OperationKind::Delete,
                depends_on: Vec::new(),
            });
        }
        layers.push(delete_layer);
    }

    reported_orphans.sort();

    Ok(SyncPlan {
        operations,
        layers,
        requires_confirmation: !policy.auto_sync,
        reported_orphans,
    })
}
