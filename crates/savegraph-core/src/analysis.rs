//! Production analyzer.
//!
//! Flows are propagated over the collapsed view in feedback-tolerant
//! topological order, followed by bounded relaxation passes until no link
//! changes. All arithmetic is `Fixed64`, so results are bit-for-bit
//! reproducible.
//!
//! Per node the analyzer derives available input, sufficiency, potential and
//! actual output, and raises classifications:
//!
//! - **Starvation**: required input exceeds available input.
//! - **Backpressure**: an outgoing link is offered more than its capacity.
//! - **Bottleneck**: actual output falls short of potential output.
//!
//! Only the highest-precedence classification per node is reported; the
//! others are kept on the node and surfaced as diagnostics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;

use crate::catalog::ClassFamily;
use crate::collapse::CollapsedGraph;
use crate::config::AnalysisConfig;
use crate::diagnostic::{ClassificationKind, Diagnostic, DiagnosticKind};
use crate::fixed::{Fixed64, ratio, sum};
use crate::graph::{NodeKind, ProductionGraph};
use crate::id::{LinkId, NodeId, ObjectId};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ClassificationKind,
    pub ratio: Fixed64,
    /// Connectors involved, ascending.
    pub connectors: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFlow {
    pub node: NodeId,
    pub object: ObjectId,
    pub required_input: Fixed64,
    pub available_input: Fixed64,
    /// `min(available / required, 1)`, or 1 when nothing is required.
    pub sufficiency: Fixed64,
    pub designed_output: Fixed64,
    pub potential_output: Fixed64,
    pub actual_output: Fixed64,
    /// Every classification that met the threshold, highest precedence first.
    pub classifications: Vec<Classification>,
}

impl NodeFlow {
    /// The classification that is reported for this node.
    pub fn reported(&self) -> Option<&Classification> {
        self.classifications.first()
    }

    /// Unmet input demand.
    pub fn deficit(&self) -> Fixed64 {
        (self.required_input - self.available_input).max(Fixed64::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFlow {
    /// Share offered by the source node.
    pub required: Fixed64,
    /// `min(required, capacity)`.
    pub delivered: Fixed64,
    pub capacity: Fixed64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Flows of every collapsed node, keyed by object id.
    pub nodes: BTreeMap<ObjectId, NodeFlow>,
    pub links: SecondaryMap<LinkId, LinkFlow>,
    /// Delivered flow per raw edge, keyed by connector id.
    pub edge_flows: BTreeMap<ObjectId, Fixed64>,
    /// Processing order used for propagation.
    pub order: Vec<NodeId>,
    /// Relaxation passes run after the first sweep.
    pub passes: u32,
    /// Whether the last pass changed nothing.
    pub converged: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisResult {
    pub fn node(&self, object: ObjectId) -> Option<&NodeFlow> {
        self.nodes.get(&object)
    }

    pub fn edge_flow(&self, connector: ObjectId) -> Fixed64 {
        self.edge_flows
            .get(&connector)
            .copied()
            .unwrap_or(Fixed64::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Propagation
// ---------------------------------------------------------------------------

struct NodeTotals {
    required: Fixed64,
    available: Fixed64,
    sufficiency: Fixed64,
    designed: Fixed64,
    potential: Fixed64,
}

fn evaluate(
    graph: &ProductionGraph,
    collapsed: &CollapsedGraph,
    links: &SecondaryMap<LinkId, LinkFlow>,
    node: NodeId,
) -> NodeTotals {
    let available = sum(
        collapsed
            .inputs(node)
            .iter()
            .filter_map(|l| links.get(*l))
            .map(|f| f.delivered),
    );

    let data = graph.get_node(node);
    let family = data.and_then(|d| d.family());
    let profile = data.and_then(|d| d.production.as_ref());
    let (designed_input, designed_output) = profile
        .map(|p| (p.designed_input, p.designed_output))
        .unwrap_or((Fixed64::ZERO, Fixed64::ZERO));

    match (family, data.map(|d| d.kind)) {
        (Some(ClassFamily::Production | ClassFamily::Generator), _) => {
            let sufficiency = if designed_input > Fixed64::ZERO {
                ratio(available, designed_input).min(Fixed64::ONE)
            } else {
                Fixed64::ONE
            };
            NodeTotals {
                required: designed_input,
                available,
                sufficiency,
                designed: designed_output,
                potential: designed_output.saturating_mul(sufficiency),
            }
        }
        (Some(ClassFamily::Extraction), _) => NodeTotals {
            required: Fixed64::ZERO,
            available,
            sufficiency: Fixed64::ONE,
            designed: designed_output,
            potential: designed_output,
        },
        (_, Some(NodeKind::Placeholder)) | (_, None) => NodeTotals {
            required: Fixed64::ZERO,
            available,
            sufficiency: Fixed64::ONE,
            designed: Fixed64::ZERO,
            potential: Fixed64::ZERO,
        },
        // Logistics, storage, stations and joints forward what they receive.
        _ => NodeTotals {
            required: Fixed64::ZERO,
            available,
            sufficiency: Fixed64::ONE,
            designed: available,
            potential: available,
        },
    }
}

/// Offer a node's potential output evenly over its outgoing links. Returns
/// whether any link changed.
fn distribute(
    collapsed: &CollapsedGraph,
    links: &mut SecondaryMap<LinkId, LinkFlow>,
    node: NodeId,
    potential: Fixed64,
) -> bool {
    let outputs = collapsed.outputs(node);
    if outputs.is_empty() {
        return false;
    }
    let share = ratio(potential, Fixed64::from_num(outputs.len() as i64));
    let mut changed = false;
    for &lid in outputs {
        if let Some(flow) = links.get_mut(lid) {
            let next = LinkFlow {
                required: share,
                delivered: share.min(flow.capacity),
                capacity: flow.capacity,
            };
            if next != *flow {
                *flow = next;
                changed = true;
            }
        }
    }
    changed
}

fn link_connectors(
    collapsed: &CollapsedGraph,
    ids: impl IntoIterator<Item = LinkId>,
) -> Vec<ObjectId> {
    let mut out: Vec<ObjectId> = ids
        .into_iter()
        .filter_map(|l| collapsed.link(l))
        .flat_map(|l| l.connectors.iter().copied())
        .collect();
    out.sort();
    out
}

/// Run the analyzer over the collapsed view of `graph`.
pub fn analyze(
    graph: &ProductionGraph,
    collapsed: &CollapsedGraph,
    config: &AnalysisConfig,
) -> AnalysisResult {
    let threshold = config.threshold();
    let order = collapsed.feedback_order();

    let mut links: SecondaryMap<LinkId, LinkFlow> = SecondaryMap::new();
    for (lid, link) in collapsed.links() {
        links.insert(
            lid,
            LinkFlow {
                required: Fixed64::ZERO,
                delivered: Fixed64::ZERO,
                capacity: link.capacity,
            },
        );
    }

    // First sweep, then relax feedback loops until stable.
    for &node in &order {
        let totals = evaluate(graph, collapsed, &links, node);
        distribute(collapsed, &mut links, node, totals.potential);
    }
    let mut passes = 0;
    let mut converged = false;
    while passes < config.max_relaxation_passes {
        passes += 1;
        let mut changed = false;
        for &node in &order {
            let totals = evaluate(graph, collapsed, &links, node);
            changed |= distribute(collapsed, &mut links, node, totals.potential);
        }
        if !changed {
            converged = true;
            break;
        }
    }
    if !converged {
        tracing::warn!(passes, "flow relaxation did not converge");
    }

    // Final node totals and classifications, in ascending object order.
    let mut nodes = BTreeMap::new();
    let mut diagnostics = Vec::new();
    for &node in collapsed.nodes() {
        let object = graph.object_of(node);
        let totals = evaluate(graph, collapsed, &links, node);
        let outputs = collapsed.outputs(node);
        let actual = if outputs.is_empty() {
            totals.potential
        } else {
            sum(
                outputs
                    .iter()
                    .filter_map(|l| links.get(*l))
                    .map(|f| f.delivered),
            )
        };

        let mut classifications = Vec::new();
        let raised = |r: Fixed64| r > Fixed64::ZERO && r >= threshold;

        if totals.required > totals.available {
            let r = ratio(totals.required - totals.available, totals.required);
            if raised(r) {
                classifications.push(Classification {
                    kind: ClassificationKind::Starvation,
                    ratio: r,
                    connectors: link_connectors(collapsed, collapsed.inputs(node).iter().copied()),
                });
            }
        }

        let over: Vec<(LinkId, Fixed64)> = outputs
            .iter()
            .filter_map(|&l| links.get(l).map(|f| (l, f)))
            .filter(|(_, f)| f.required > f.capacity)
            .map(|(l, f)| (l, ratio(f.required - f.capacity, f.required)))
            .filter(|(_, r)| raised(*r))
            .collect();
        if let Some(worst) = over.iter().map(|(_, r)| *r).max() {
            classifications.push(Classification {
                kind: ClassificationKind::Backpressure,
                ratio: worst,
                connectors: link_connectors(collapsed, over.iter().map(|(l, _)| *l)),
            });
        }

        if actual < totals.potential {
            let base = if totals.designed > Fixed64::ZERO {
                totals.designed
            } else {
                totals.potential
            };
            let r = ratio(totals.potential - actual, base);
            if raised(r) {
                classifications.push(Classification {
                    kind: ClassificationKind::Bottleneck,
                    ratio: r,
                    connectors: link_connectors(collapsed, outputs.iter().copied()),
                });
            }
        }

        classifications.sort_by(|a, b| b.kind.precedence().cmp(&a.kind.precedence()));
        if let Some((top, rest)) = classifications.split_first() {
            for hidden in rest {
                diagnostics.push(Diagnostic::new(DiagnosticKind::SuppressedClassification {
                    node: object,
                    kind: hidden.kind,
                    by: top.kind,
                    ratio: hidden.ratio,
                }));
            }
        }

        nodes.insert(
            object,
            NodeFlow {
                node,
                object,
                required_input: totals.required,
                available_input: totals.available,
                sufficiency: totals.sufficiency,
                designed_output: totals.designed,
                potential_output: totals.potential,
                actual_output: actual,
                classifications,
            },
        );
    }

    let mut edge_flows = BTreeMap::new();
    for (lid, link) in collapsed.links() {
        let delivered = links.get(lid).map_or(Fixed64::ZERO, |f| f.delivered);
        for &connector in &link.connectors {
            edge_flows.insert(connector, delivered);
        }
    }

    tracing::debug!(
        nodes = nodes.len(),
        links = links.len(),
        passes,
        converged,
        "analyzed production flows"
    );
    AnalysisResult {
        nodes,
        links,
        edge_flows,
        order,
        passes,
        converged,
        diagnostics,
    }
}
