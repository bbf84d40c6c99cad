//! Collapsed view of the production graph.
//!
//! Chains through pure pass-through nodes (joints and logistics buildings
//! with exactly one input and one output) are merged into one logical link
//! between two non-pass-through nodes. A link's capacity is the smallest
//! capacity along its chain and it records every raw edge it covers.

use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};

use crate::fixed::Fixed64;
use crate::graph::{ProductionGraph, feedback_order};
use crate::id::{EdgeId, LinkId, NodeId, ObjectId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from: NodeId,
    pub to: NodeId,
    pub capacity: Fixed64,
    /// Raw edges in chain order.
    pub edges: Vec<EdgeId>,
    /// Connector ids of `edges`, in the same order.
    pub connectors: Vec<ObjectId>,
    /// Pass-through nodes merged into this link.
    pub via: Vec<NodeId>,
}

impl Link {
    pub fn first_connector(&self) -> ObjectId {
        self.connectors.first().copied().unwrap_or(ObjectId::NULL)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LinkAdjacency {
    inputs: Vec<LinkId>,
    outputs: Vec<LinkId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollapsedGraph {
    /// Non-pass-through nodes in ascending object id order.
    nodes: Vec<NodeId>,
    links: SlotMap<LinkId, Link>,
    adjacency: SecondaryMap<NodeId, LinkAdjacency>,
    edge_link: SecondaryMap<EdgeId, LinkId>,
}

impl CollapsedGraph {
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Links in creation order (by source node, then connector id).
    pub fn links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
        self.links.iter()
    }

    pub fn link(&self, link: LinkId) -> Option<&Link> {
        self.links.get(link)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn inputs(&self, node: NodeId) -> &[LinkId] {
        self.adjacency
            .get(node)
            .map(|adj| adj.inputs.as_slice())
            .unwrap_or(&[])
    }

    pub fn outputs(&self, node: NodeId) -> &[LinkId] {
        self.adjacency
            .get(node)
            .map(|adj| adj.outputs.as_slice())
            .unwrap_or(&[])
    }

    #[cfg(test)]
    pub(crate) fn link_mut(&mut self, link: LinkId) -> Option<&mut Link> {
        self.links.get_mut(link)
    }

    /// The link covering a raw edge, if any.
    pub fn link_of(&self, edge: EdgeId) -> Option<LinkId> {
        self.edge_link.get(edge).copied()
    }

    /// Feedback-tolerant topological order of the collapsed nodes.
    pub fn feedback_order(&self) -> Vec<NodeId> {
        let arcs: Vec<(NodeId, NodeId)> = self.links.values().map(|l| (l.from, l.to)).collect();
        feedback_order(&self.nodes, &arcs)
    }
}

/// A node is pass-through when it is a joint or logistics building with
/// exactly one input and one output edge.
pub fn is_pass_through(graph: &ProductionGraph, node: NodeId) -> bool {
    graph.get_node(node).is_some_and(|n| n.may_pass_through())
        && graph.get_inputs(node).len() == 1
        && graph.get_outputs(node).len() == 1
}

/// Merge pass-through chains into links.
///
/// Edges inside a closed ring of pass-through nodes belong to no link.
pub fn collapse(graph: &ProductionGraph) -> CollapsedGraph {
    let mut out = CollapsedGraph::default();
    for (nid, _) in graph.nodes() {
        if !is_pass_through(graph, nid) {
            out.nodes.push(nid);
            out.adjacency.insert(nid, LinkAdjacency::default());
        }
    }

    for &start in &out.nodes.clone() {
        let mut outputs: Vec<EdgeId> = graph.get_outputs(start).to_vec();
        outputs.sort_by_key(|&e| graph.get_edge(e).map(|d| d.connector));
        for first in outputs {
            let Some(mut edge) = graph.get_edge(first) else {
                continue;
            };
            let mut link = Link {
                from: start,
                to: edge.to,
                capacity: edge.capacity(),
                edges: vec![first],
                connectors: vec![edge.connector],
                via: Vec::new(),
            };
            // Each pass-through node has one input, so a walk from a
            // non-pass-through node visits each of them at most once.
            while is_pass_through(graph, link.to) && link.via.len() <= graph.node_count() {
                let through = link.to;
                let Some(&next) = graph.get_outputs(through).first() else {
                    break;
                };
                let Some(next_edge) = graph.get_edge(next) else {
                    break;
                };
                edge = next_edge;
                link.via.push(through);
                link.edges.push(next);
                link.connectors.push(edge.connector);
                link.capacity = link.capacity.min(edge.capacity());
                link.to = edge.to;
            }
            let (from, to) = (link.from, link.to);
            let edges = link.edges.clone();
            let id = out.links.insert(link);
            for e in edges {
                out.edge_link.insert(e, id);
            }
            if let Some(adj) = out.adjacency.get_mut(from) {
                adj.outputs.push(id);
            }
            if let Some(adj) = out.adjacency.get_mut(to) {
                adj.inputs.push(id);
            }
        }
    }
    out
}
