use crate::catalog::{CapacityTier, ClassFamily};
use crate::fixed::Fixed64;
use crate::id::*;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::{BTreeMap, VecDeque};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Internal invariant violations. Never caused by input data.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeId),
    #[error("edge not found: {0:?}")]
    EdgeNotFound(EdgeId),
    #[error("object {0} already has a node")]
    DuplicateNode(ObjectId),
    #[error("edge {edge:?} endpoint {node:?} is not in the graph")]
    DanglingEndpoint { edge: EdgeId, node: NodeId },
}

impl From<GraphError> for crate::error::ParseError {
    fn from(err: GraphError) -> Self {
        crate::error::ParseError::GraphInconsistency(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Core data structures
// ---------------------------------------------------------------------------

/// Adjacency lists for a single node, tracking incoming and outgoing edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NodeAdjacency {
    /// Edges whose destination is this node.
    inputs: Vec<EdgeId>,
    /// Edges whose source is this node.
    outputs: Vec<EdgeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A classified in-world building.
    Building(ClassFamily),
    /// Where two connectors meet end to end.
    Joint,
    /// Stand-in for a referenced object that does not exist.
    Placeholder,
}

/// Recipe-driven throughput of a production, generator or extraction node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionProfile {
    /// Recipe slug, e.g. `Recipe_IngotIron`.
    pub recipe: Option<String>,
    /// Whether the recipe (or the extraction base rate) supplied the rates.
    pub rates_known: bool,
    /// Clock multiplier after clamping to `0..=2.5`.
    pub clock: Fixed64,
    /// Input demand per minute at the current clock.
    pub designed_input: Fixed64,
    /// Output per minute at the current clock.
    pub designed_output: Fixed64,
    /// `mIsProducing`, when stored.
    pub producing: Option<bool>,
    /// Last measured productivity in `0..=1`, when stored.
    pub productivity: Option<Fixed64>,
}

/// Per-node data stored in the production graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// The entity (or joint/missing object) this node stands for.
    pub object: ObjectId,
    pub kind: NodeKind,
    /// Short class name, empty for joints and placeholders.
    pub class: String,
    pub name: String,
    /// World position; `None` for joints and placeholders.
    pub position: Option<[f32; 3]>,
    pub production: Option<ProductionProfile>,
}

impl NodeData {
    pub fn family(&self) -> Option<ClassFamily> {
        match self.kind {
            NodeKind::Building(family) => Some(family),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == NodeKind::Placeholder
    }

    /// Joints and logistics buildings may be merged into links.
    pub fn may_pass_through(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Joint | NodeKind::Building(ClassFamily::Logistics(_))
        )
    }
}

/// Per-edge data stored in the production graph. One edge per connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    /// Source node.
    pub from: NodeId,
    /// Destination node.
    pub to: NodeId,
    /// The belt, lift or pipe entity.
    pub connector: ObjectId,
    /// Port component (or object) the connector delivers into.
    pub slot: ObjectId,
    pub tier: CapacityTier,
    /// Item or fluid carried, when stored.
    #[serde(default)]
    pub item: Option<String>,
}

impl EdgeData {
    pub fn capacity(&self) -> Fixed64 {
        self.tier.capacity()
    }
}

// ---------------------------------------------------------------------------
// ProductionGraph
// ---------------------------------------------------------------------------

/// The raw production multigraph: one node per building, joint or
/// placeholder and one edge per connected connector.
///
/// Adjacency is stored in a `SecondaryMap` keyed by `NodeId`, which keeps it
/// in sync with the primary `nodes` SlotMap. Nodes are also indexed by
/// object id so every traversal can run in ascending object order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductionGraph {
    nodes: SlotMap<NodeId, NodeData>,
    edges: SlotMap<EdgeId, EdgeData>,
    adjacency: SecondaryMap<NodeId, NodeAdjacency>,
    by_object: BTreeMap<ObjectId, NodeId>,
    by_connector: BTreeMap<ObjectId, EdgeId>,
}

impl ProductionGraph {
    /// Create a new, empty production graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Each object id may own at most one node.
    pub fn add_node(&mut self, data: NodeData) -> Result<NodeId, GraphError> {
        let object = data.object;
        if self.by_object.contains_key(&object) {
            return Err(GraphError::DuplicateNode(object));
        }
        let node_id = self.nodes.insert(data);
        self.adjacency.insert(node_id, NodeAdjacency::default());
        self.by_object.insert(object, node_id);
        Ok(node_id)
    }

    /// Connect two existing nodes. Returns the assigned `EdgeId`.
    pub fn connect(&mut self, data: EdgeData) -> Result<EdgeId, GraphError> {
        for node in [data.from, data.to] {
            if !self.nodes.contains_key(node) {
                return Err(GraphError::NodeNotFound(node));
            }
        }
        let (from, to, connector) = (data.from, data.to, data.connector);
        let edge_id = self.edges.insert(data);
        if let Some(adj) = self.adjacency.get_mut(from) {
            adj.outputs.push(edge_id);
        }
        if let Some(adj) = self.adjacency.get_mut(to) {
            adj.inputs.push(edge_id);
        }
        self.by_connector.insert(connector, edge_id);
        Ok(edge_id)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Get the node data for a given node ID.
    pub fn get_node(&self, node: NodeId) -> Option<&NodeData> {
        self.nodes.get(node)
    }

    /// Get the edge data for a given edge ID.
    pub fn get_edge(&self, edge: EdgeId) -> Option<&EdgeData> {
        self.edges.get(edge)
    }

    pub fn node_for(&self, object: ObjectId) -> Option<NodeId> {
        self.by_object.get(&object).copied()
    }

    pub fn edge_for(&self, connector: ObjectId) -> Option<EdgeId> {
        self.by_connector.get(&connector).copied()
    }

    /// Get the edges coming into a node (inputs).
    pub fn get_inputs(&self, node: NodeId) -> &[EdgeId] {
        self.adjacency
            .get(node)
            .map(|adj| adj.inputs.as_slice())
            .unwrap_or(&[])
    }

    /// Get the edges going out of a node (outputs).
    pub fn get_outputs(&self, node: NodeId) -> &[EdgeId] {
        self.adjacency
            .get(node)
            .map(|adj| adj.outputs.as_slice())
            .unwrap_or(&[])
    }

    /// Total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns true if the node exists in the graph.
    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    /// Nodes in ascending object id order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeData)> {
        self.by_object
            .values()
            .filter_map(|&nid| self.nodes.get(nid).map(|data| (nid, data)))
    }

    /// Edges in ascending connector id order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &EdgeData)> {
        self.by_connector
            .values()
            .filter_map(|&eid| self.edges.get(eid).map(|data| (eid, data)))
    }

    /// Object id of a node, or the null id for unknown nodes.
    pub fn object_of(&self, node: NodeId) -> ObjectId {
        self.nodes.get(node).map_or(ObjectId::NULL, |n| n.object)
    }

    /// Check that every edge endpoint is a node and adjacency agrees with
    /// the edge table.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (edge, data) in &self.edges {
            for node in [data.from, data.to] {
                if !self.nodes.contains_key(node) {
                    return Err(GraphError::DanglingEndpoint { edge, node });
                }
            }
            if !self.get_outputs(data.from).contains(&edge)
                || !self.get_inputs(data.to).contains(&edge)
            {
                return Err(GraphError::EdgeNotFound(edge));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------

    /// Returns a processing order even when cycles exist, plus the
    /// back-edges of that order.
    pub fn topological_order_with_feedback(&self) -> (Vec<NodeId>, Vec<EdgeId>) {
        let nodes: Vec<NodeId> = self.by_object.values().copied().collect();
        let arcs: Vec<(NodeId, NodeId)> = self.edges().map(|(_, e)| (e.from, e.to)).collect();
        let order = feedback_order(&nodes, &arcs);
        let position = position_map(&order);
        let back_edges = self
            .edges()
            .filter_map(|(eid, edge)| {
                let from_pos = position.get(edge.from).copied().unwrap_or(0);
                let to_pos = position.get(edge.to).copied().unwrap_or(0);
                if to_pos <= from_pos { Some(eid) } else { None }
            })
            .collect();
        (order, back_edges)
    }
}

/// Kahn's algorithm tolerant of cycles.
///
/// `nodes` fixes the tie order: the queue is seeded in that order and nodes
/// left over in cycles are appended in that order. Arcs whose endpoints are
/// not in `nodes` are ignored.
pub fn feedback_order(nodes: &[NodeId], arcs: &[(NodeId, NodeId)]) -> Vec<NodeId> {
    let mut in_degree: SecondaryMap<NodeId, usize> = SecondaryMap::new();
    let mut successors: SecondaryMap<NodeId, Vec<NodeId>> = SecondaryMap::new();
    for &nid in nodes {
        in_degree.insert(nid, 0);
        successors.insert(nid, Vec::new());
    }
    for &(from, to) in arcs {
        if !in_degree.contains_key(from) {
            continue;
        }
        if let Some(deg) = in_degree.get_mut(to) {
            *deg += 1;
            if let Some(list) = successors.get_mut(from) {
                list.push(to);
            }
        }
    }

    // Seed the queue with all zero-in-degree nodes.
    let mut queue: VecDeque<NodeId> = nodes
        .iter()
        .copied()
        .filter(|&nid| in_degree.get(nid) == Some(&0))
        .collect();
    let mut order: Vec<NodeId> = Vec::with_capacity(nodes.len());
    let mut placed: SecondaryMap<NodeId, ()> = SecondaryMap::new();

    while let Some(node) = queue.pop_front() {
        order.push(node);
        placed.insert(node, ());
        for &dest in successors.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(deg) = in_degree.get_mut(dest) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(dest);
                }
            }
        }
    }

    // Remaining nodes are in cycles.
    if order.len() < nodes.len() {
        order.extend(nodes.iter().copied().filter(|nid| !placed.contains_key(*nid)));
    }
    order
}

/// Index of every node in an order.
pub fn position_map(order: &[NodeId]) -> SecondaryMap<NodeId, usize> {
    let mut position = SecondaryMap::new();
    for (idx, &nid) in order.iter().enumerate() {
        position.insert(nid, idx);
    }
    position
}
