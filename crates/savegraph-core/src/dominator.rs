//! Dominator trees over the collapsed view, and root-cause traces built on
//! them.
//!
//! In the **upstream** tree a node's dominators are the nodes all of its
//! supply must pass through. The tree is rooted at a virtual source that
//! feeds every extractor and every node without inputs. The **downstream**
//! tree is the same over reversed links, rooted at a virtual sink fed by
//! every storage node and every node without outputs.
//!
//! A trace walks a starved node up its upstream dominators (or a backed-up
//! node down its downstream dominators) until it reaches the first node or
//! link that limits the flow.

use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;

use crate::analysis::AnalysisResult;
use crate::builder::MAX_CLOCK;
use crate::catalog::ClassFamily;
use crate::collapse::{CollapsedGraph, Link};
use crate::diagnostic::ClassificationKind;
use crate::fixed::Fixed64;
use crate::graph::{NodeData, ProductionGraph};
use crate::id::{LinkId, NodeId, ObjectId};

/// Delivered share of capacity at which a link counts as saturated.
pub const SATURATION_RATIO: f64 = 0.99;
/// Sufficiency below which a dominating machine is itself starved.
pub const STARVED_SUFFICIENCY: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upstream,
    Downstream,
}

// ---------------------------------------------------------------------------
// Dominator trees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Dominators {
    /// Immediate dominator of every reachable node; `None` when only the
    /// virtual root dominates it.
    idom: SecondaryMap<NodeId, Option<NodeId>>,
}

impl Dominators {
    pub fn build(graph: &ProductionGraph, collapsed: &CollapsedGraph, direction: Direction) -> Self {
        let nodes = collapsed.nodes();
        let root = nodes.len();
        let mut index: SecondaryMap<NodeId, usize> = SecondaryMap::new();
        for (i, &node) in nodes.iter().enumerate() {
            index.insert(node, i);
        }

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); root + 1];
        for (i, &node) in nodes.iter().enumerate() {
            let family = graph.get_node(node).and_then(NodeData::family);
            let entry = match direction {
                Direction::Upstream => {
                    family == Some(ClassFamily::Extraction) || collapsed.inputs(node).is_empty()
                }
                Direction::Downstream => {
                    family == Some(ClassFamily::Storage) || collapsed.outputs(node).is_empty()
                }
            };
            if entry {
                successors[root].push(i);
            }
        }
        for (_, link) in collapsed.links() {
            let (Some(&from), Some(&to)) = (index.get(link.from), index.get(link.to)) else {
                continue;
            };
            match direction {
                Direction::Upstream => successors[from].push(to),
                Direction::Downstream => successors[to].push(from),
            }
        }

        let immediate = immediate_dominators(&successors, root);
        let mut idom = SecondaryMap::new();
        for (i, &node) in nodes.iter().enumerate() {
            if let Some(d) = immediate[i] {
                idom.insert(node, (d != root).then(|| nodes[d]));
            }
        }
        Self { idom }
    }

    /// Nearest dominator other than the virtual root.
    pub fn immediate(&self, node: NodeId) -> Option<NodeId> {
        self.idom.get(node).copied().flatten()
    }

    /// Whether `node` is reachable from the root.
    pub fn contains(&self, node: NodeId) -> bool {
        self.idom.contains_key(node)
    }

    /// Dominators of `node`, nearest first.
    pub fn chain(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = node;
        while let Some(dom) = self.immediate(current) {
            if chain.len() > self.idom.len() {
                break;
            }
            chain.push(dom);
            current = dom;
        }
        chain
    }
}

/// Iterative dominator computation over reverse postorder (Cooper, Harvey
/// and Kennedy). Unreachable vertices get `None`; the root dominates itself.
fn immediate_dominators(successors: &[Vec<usize>], root: usize) -> Vec<Option<usize>> {
    let n = successors.len();
    let mut visited = vec![false; n];
    let mut postorder_number = vec![0usize; n];
    let mut postorder = Vec::with_capacity(n);
    let mut stack = vec![(root, 0usize)];
    visited[root] = true;
    while let Some(top) = stack.last_mut() {
        let (v, next) = *top;
        if let Some(&w) = successors[v].get(next) {
            top.1 += 1;
            if !visited[w] {
                visited[w] = true;
                stack.push((w, 0));
            }
        } else {
            postorder_number[v] = postorder.len();
            postorder.push(v);
            stack.pop();
        }
    }

    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (v, list) in successors.iter().enumerate() {
        if visited[v] {
            for &w in list {
                predecessors[w].push(v);
            }
        }
    }

    let mut idom: Vec<Option<usize>> = vec![None; n];
    idom[root] = Some(root);
    let mut changed = true;
    while changed {
        changed = false;
        for &v in postorder.iter().rev() {
            if v == root {
                continue;
            }
            let mut candidate: Option<usize> = None;
            for &p in &predecessors[v] {
                if idom[p].is_none() {
                    continue;
                }
                candidate = Some(match candidate {
                    None => p,
                    Some(current) => intersect(&idom, &postorder_number, p, current),
                });
            }
            if candidate.is_some() && idom[v] != candidate {
                idom[v] = candidate;
                changed = true;
            }
        }
    }
    idom
}

fn intersect(idom: &[Option<usize>], postorder_number: &[usize], a: usize, b: usize) -> usize {
    let (mut a, mut b) = (a, b);
    while a != b {
        while postorder_number[a] < postorder_number[b] {
            match idom[a] {
                Some(up) if up != a => a = up,
                _ => return b,
            }
        }
        while postorder_number[b] < postorder_number[a] {
            match idom[b] {
                Some(up) if up != b => b = up,
                _ => return a,
            }
        }
    }
    a
}

// ---------------------------------------------------------------------------
// Root-cause traces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RootCause {
    /// The link between the chokepoint and the path runs at capacity.
    SaturatedLink,
    /// The chokepoint machine runs below the maximum clock.
    Underclocked,
    /// The chokepoint machine already runs at the maximum clock.
    CapacityLimited,
    /// The chokepoint is an extractor at the maximum clock.
    SourceLimited,
    /// No limiting dominator was found.
    Unresolved,
}

impl RootCause {
    pub fn label(self) -> &'static str {
        match self {
            RootCause::SaturatedLink => "saturated link",
            RootCause::Underclocked => "underclocked",
            RootCause::CapacityLimited => "capacity limited",
            RootCause::SourceLimited => "source limited",
            RootCause::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceStep {
    Node(ObjectId),
    /// A link, named by its first connector.
    Link(ObjectId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub cause: RootCause,
    pub chokepoint: Option<ObjectId>,
    /// From the traced node to the chokepoint.
    pub path: Vec<TraceStep>,
}

/// Both dominator trees of one collapsed graph.
#[derive(Debug, Clone, Default)]
pub struct RootCauses {
    pub upstream: Dominators,
    pub downstream: Dominators,
}

impl RootCauses {
    pub fn new(graph: &ProductionGraph, collapsed: &CollapsedGraph) -> Self {
        Self {
            upstream: Dominators::build(graph, collapsed, Direction::Upstream),
            downstream: Dominators::build(graph, collapsed, Direction::Downstream),
        }
    }

    /// Trace a starved node upstream or a backed-up node downstream.
    /// Bottlenecks are not traced.
    pub fn trace(
        &self,
        graph: &ProductionGraph,
        collapsed: &CollapsedGraph,
        analysis: &AnalysisResult,
        object: ObjectId,
        kind: ClassificationKind,
    ) -> Option<Trace> {
        let node = graph.node_for(object)?;
        match kind {
            ClassificationKind::Starvation => {
                Some(trace_upstream(graph, collapsed, analysis, &self.upstream, node))
            }
            ClassificationKind::Backpressure => {
                Some(trace_downstream(graph, collapsed, analysis, &self.downstream, node))
            }
            ClassificationKind::Bottleneck => None,
        }
    }
}

fn connecting_link(collapsed: &CollapsedGraph, from: NodeId, to: NodeId) -> Option<(LinkId, &Link)> {
    collapsed
        .outputs(from)
        .iter()
        .filter_map(|&lid| collapsed.link(lid).map(|link| (lid, link)))
        .filter(|(_, link)| link.to == to)
        .min_by_key(|(_, link)| link.first_connector())
}

fn saturated(analysis: &AnalysisResult, link: LinkId) -> bool {
    analysis.links.get(link).is_some_and(|flow| {
        flow.capacity > Fixed64::ZERO
            && flow.delivered >= flow.capacity.saturating_mul(Fixed64::from_num(SATURATION_RATIO))
    })
}

fn below_max_clock(data: &NodeData) -> bool {
    data.production
        .as_ref()
        .is_some_and(|p| p.clock < Fixed64::from_num(MAX_CLOCK))
}

fn found(cause: RootCause, chokepoint: ObjectId, path: Vec<TraceStep>) -> Trace {
    Trace {
        cause,
        chokepoint: Some(chokepoint),
        path,
    }
}

/// Step from `current` to `dom`, recording the link between them when one
/// exists. Returns the object id of `dom` and whether that link is saturated.
fn step(
    graph: &ProductionGraph,
    collapsed: &CollapsedGraph,
    analysis: &AnalysisResult,
    from: NodeId,
    to: NodeId,
    dom: NodeId,
    path: &mut Vec<TraceStep>,
) -> (ObjectId, bool) {
    let link = connecting_link(collapsed, from, to);
    if let Some((_, link)) = link {
        path.push(TraceStep::Link(link.first_connector()));
    }
    let object = graph.object_of(dom);
    path.push(TraceStep::Node(object));
    (object, link.is_some_and(|(lid, _)| saturated(analysis, lid)))
}

fn trace_upstream(
    graph: &ProductionGraph,
    collapsed: &CollapsedGraph,
    analysis: &AnalysisResult,
    dominators: &Dominators,
    start: NodeId,
) -> Trace {
    let mut path = vec![TraceStep::Node(graph.object_of(start))];
    let mut current = start;
    for dom in dominators.chain(start) {
        let (object, saturated) = step(graph, collapsed, analysis, dom, current, dom, &mut path);
        if saturated {
            return found(RootCause::SaturatedLink, object, path);
        }
        let Some(data) = graph.get_node(dom) else {
            break;
        };
        match data.family() {
            Some(ClassFamily::Production)
                if data.production.as_ref().is_some_and(|p| p.rates_known) =>
            {
                let starved = data
                    .production
                    .as_ref()
                    .is_some_and(|p| p.designed_input > Fixed64::ZERO)
                    && analysis.node(object).is_some_and(|flow| {
                        flow.sufficiency < Fixed64::from_num(STARVED_SUFFICIENCY)
                    });
                if !starved {
                    let cause = if below_max_clock(data) {
                        RootCause::Underclocked
                    } else {
                        RootCause::CapacityLimited
                    };
                    return found(cause, object, path);
                }
            }
            Some(ClassFamily::Extraction) => {
                let cause = if below_max_clock(data) {
                    RootCause::Underclocked
                } else {
                    RootCause::SourceLimited
                };
                return found(cause, object, path);
            }
            _ => {}
        }
        current = dom;
    }
    Trace {
        cause: RootCause::Unresolved,
        chokepoint: None,
        path,
    }
}

fn trace_downstream(
    graph: &ProductionGraph,
    collapsed: &CollapsedGraph,
    analysis: &AnalysisResult,
    dominators: &Dominators,
    start: NodeId,
) -> Trace {
    let mut path = vec![TraceStep::Node(graph.object_of(start))];
    let mut current = start;
    for dom in dominators.chain(start) {
        let (object, saturated) = step(graph, collapsed, analysis, current, dom, dom, &mut path);
        if saturated {
            return found(RootCause::SaturatedLink, object, path);
        }
        let underclocked_machine = graph.get_node(dom).is_some_and(|data| {
            data.family() == Some(ClassFamily::Production) && below_max_clock(data)
        });
        if underclocked_machine {
            return found(RootCause::Underclocked, object, path);
        }
        current = dom;
    }
    Trace {
        cause: RootCause::Unresolved,
        chokepoint: None,
        path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::catalog::{CapacityTier, LogisticsKind};
    use crate::collapse::collapse;
    use crate::config::AnalysisConfig;
    use crate::graph::{EdgeData, NodeKind, ProductionProfile};

    fn node(g: &mut ProductionGraph, id: u64, family: ClassFamily, io: Option<(i32, i32)>) -> NodeId {
        g.add_node(NodeData {
            object: ObjectId(id),
            kind: NodeKind::Building(family),
            class: String::new(),
            name: String::new(),
            position: Some([0.0; 3]),
            production: io.map(|(input, output)| ProductionProfile {
                recipe: Some("Recipe_Test".into()),
                rates_known: true,
                clock: Fixed64::ONE,
                designed_input: Fixed64::from_num(input),
                designed_output: Fixed64::from_num(output),
                producing: None,
                productivity: None,
            }),
        })
        .unwrap()
    }

    fn machine(g: &mut ProductionGraph, id: u64, input: i32, output: i32) -> NodeId {
        node(g, id, ClassFamily::Production, Some((input, output)))
    }

    fn logistics(g: &mut ProductionGraph, id: u64, kind: LogisticsKind) -> NodeId {
        node(g, id, ClassFamily::Logistics(kind), None)
    }

    fn belt(g: &mut ProductionGraph, id: u64, from: NodeId, to: NodeId, tier: CapacityTier) {
        g.connect(EdgeData {
            from,
            to,
            connector: ObjectId(id),
            slot: ObjectId(id + 1),
            tier,
            item: None,
        })
        .unwrap();
    }

    /// Source 1 -> splitter 2 -> {3, 4} -> merger 5 -> sink 6.
    fn diamond() -> ProductionGraph {
        let mut g = ProductionGraph::new();
        let src = machine(&mut g, 1, 0, 60);
        let split = logistics(&mut g, 2, LogisticsKind::Splitter);
        let a = machine(&mut g, 3, 30, 30);
        let b = machine(&mut g, 4, 30, 30);
        let merge = logistics(&mut g, 5, LogisticsKind::Merger);
        let sink = machine(&mut g, 6, 120, 0);
        belt(&mut g, 10, src, split, CapacityTier::BeltMk3);
        belt(&mut g, 20, split, a, CapacityTier::BeltMk3);
        belt(&mut g, 30, split, b, CapacityTier::BeltMk3);
        belt(&mut g, 40, a, merge, CapacityTier::BeltMk3);
        belt(&mut g, 50, b, merge, CapacityTier::BeltMk3);
        belt(&mut g, 60, merge, sink, CapacityTier::BeltMk3);
        g
    }

    fn idom_of(g: &ProductionGraph, tree: &Dominators, id: u64) -> Option<u64> {
        let node = g.node_for(ObjectId(id)).unwrap();
        tree.immediate(node).map(|d| g.object_of(d).0)
    }

    fn traced(g: &ProductionGraph, id: u64, kind: ClassificationKind) -> Trace {
        let collapsed = collapse(g);
        let analysis = analyze(g, &collapsed, &AnalysisConfig::default());
        RootCauses::new(g, &collapsed)
            .trace(g, &collapsed, &analysis, ObjectId(id), kind)
            .unwrap()
    }

    #[test]
    fn chain_dominators_follow_the_line() {
        let mut g = ProductionGraph::new();
        let miner = node(&mut g, 1, ClassFamily::Extraction, Some((0, 60)));
        let a = machine(&mut g, 2, 30, 30);
        let b = machine(&mut g, 3, 30, 30);
        belt(&mut g, 10, miner, a, CapacityTier::BeltMk1);
        belt(&mut g, 20, a, b, CapacityTier::BeltMk1);
        let collapsed = collapse(&g);

        let up = Dominators::build(&g, &collapsed, Direction::Upstream);
        assert_eq!(idom_of(&g, &up, 1), None);
        assert_eq!(idom_of(&g, &up, 2), Some(1));
        assert_eq!(idom_of(&g, &up, 3), Some(2));
        let chain: Vec<u64> = up.chain(b).iter().map(|&n| g.object_of(n).0).collect();
        assert_eq!(chain, vec![2, 1]);

        let down = Dominators::build(&g, &collapsed, Direction::Downstream);
        assert_eq!(idom_of(&g, &down, 3), None);
        assert_eq!(idom_of(&g, &down, 2), Some(3));
        assert_eq!(idom_of(&g, &down, 1), Some(2));
    }

    #[test]
    fn diamond_branches_are_skipped() {
        let g = diamond();
        let collapsed = collapse(&g);
        let up = Dominators::build(&g, &collapsed, Direction::Upstream);
        assert_eq!(idom_of(&g, &up, 3), Some(2));
        assert_eq!(idom_of(&g, &up, 4), Some(2));
        assert_eq!(idom_of(&g, &up, 5), Some(2));
        assert_eq!(idom_of(&g, &up, 6), Some(5));

        let down = Dominators::build(&g, &collapsed, Direction::Downstream);
        assert_eq!(idom_of(&g, &down, 2), Some(5));
        assert_eq!(idom_of(&g, &down, 3), Some(5));
        assert_eq!(idom_of(&g, &down, 1), Some(2));
    }

    #[test]
    fn cycle_still_yields_a_tree() {
        let mut g = ProductionGraph::new();
        let src = machine(&mut g, 1, 0, 60);
        let s1 = logistics(&mut g, 2, LogisticsKind::Splitter);
        let s2 = logistics(&mut g, 3, LogisticsKind::Splitter);
        let sink = machine(&mut g, 4, 30, 0);
        belt(&mut g, 10, src, s1, CapacityTier::BeltMk1);
        belt(&mut g, 20, s1, s2, CapacityTier::BeltMk1);
        belt(&mut g, 30, s2, s1, CapacityTier::BeltMk1);
        belt(&mut g, 40, s2, sink, CapacityTier::BeltMk1);
        let collapsed = collapse(&g);
        let up = Dominators::build(&g, &collapsed, Direction::Upstream);
        assert_eq!(idom_of(&g, &up, 4), Some(3));
        assert_eq!(idom_of(&g, &up, 3), Some(2));
        assert_eq!(idom_of(&g, &up, 2), Some(1));
    }

    #[test]
    fn starvation_behind_a_full_belt() {
        let mut g = ProductionGraph::new();
        let p = machine(&mut g, 1, 0, 150);
        let c = machine(&mut g, 2, 150, 0);
        belt(&mut g, 10, p, c, CapacityTier::BeltMk2);
        let trace = traced(&g, 2, ClassificationKind::Starvation);
        assert_eq!(trace.cause, RootCause::SaturatedLink);
        assert_eq!(trace.chokepoint, Some(ObjectId(1)));
        assert_eq!(
            trace.path,
            vec![
                TraceStep::Node(ObjectId(2)),
                TraceStep::Link(ObjectId(10)),
                TraceStep::Node(ObjectId(1)),
            ]
        );
    }

    #[test]
    fn starvation_walks_past_starved_machines() {
        let mut g = ProductionGraph::new();
        let src = machine(&mut g, 1, 0, 30);
        let mid = machine(&mut g, 2, 60, 60);
        let end = machine(&mut g, 3, 120, 0);
        belt(&mut g, 10, src, mid, CapacityTier::BeltMk3);
        belt(&mut g, 20, mid, end, CapacityTier::BeltMk3);
        let trace = traced(&g, 3, ClassificationKind::Starvation);
        assert_eq!(trace.cause, RootCause::Underclocked);
        assert_eq!(trace.chokepoint, Some(ObjectId(1)));
        assert_eq!(
            trace.path,
            vec![
                TraceStep::Node(ObjectId(3)),
                TraceStep::Link(ObjectId(20)),
                TraceStep::Node(ObjectId(2)),
                TraceStep::Link(ObjectId(10)),
                TraceStep::Node(ObjectId(1)),
            ]
        );
    }

    #[test]
    fn starvation_through_a_diamond() {
        let g = diamond();
        let trace = traced(&g, 6, ClassificationKind::Starvation);
        assert_eq!(trace.cause, RootCause::Underclocked);
        assert_eq!(trace.chokepoint, Some(ObjectId(1)));
        assert_eq!(
            trace.path,
            vec![
                TraceStep::Node(ObjectId(6)),
                TraceStep::Link(ObjectId(60)),
                TraceStep::Node(ObjectId(5)),
                TraceStep::Node(ObjectId(2)),
                TraceStep::Link(ObjectId(10)),
                TraceStep::Node(ObjectId(1)),
            ]
        );
    }

    #[test]
    fn maxed_extractor_is_the_source_limit() {
        let mut g = ProductionGraph::new();
        let miner = g
            .add_node(NodeData {
                object: ObjectId(1),
                kind: NodeKind::Building(ClassFamily::Extraction),
                class: String::new(),
                name: String::new(),
                position: None,
                production: Some(ProductionProfile {
                    recipe: None,
                    rates_known: true,
                    clock: Fixed64::from_num(MAX_CLOCK),
                    designed_input: Fixed64::ZERO,
                    designed_output: Fixed64::from_num(150),
                    producing: None,
                    productivity: None,
                }),
            })
            .unwrap();
        let c = machine(&mut g, 2, 200, 0);
        belt(&mut g, 10, miner, c, CapacityTier::BeltMk3);
        let trace = traced(&g, 2, ClassificationKind::Starvation);
        assert_eq!(trace.cause, RootCause::SourceLimited);
        assert_eq!(trace.chokepoint, Some(ObjectId(1)));
    }

    #[test]
    fn backpressure_finds_the_full_belt_downstream() {
        let mut g = ProductionGraph::new();
        let p = machine(&mut g, 1, 0, 150);
        let c = machine(&mut g, 2, 120, 0);
        belt(&mut g, 10, p, c, CapacityTier::BeltMk2);
        let trace = traced(&g, 1, ClassificationKind::Backpressure);
        assert_eq!(trace.cause, RootCause::SaturatedLink);
        assert_eq!(trace.chokepoint, Some(ObjectId(2)));
        assert_eq!(
            trace.path,
            vec![
                TraceStep::Node(ObjectId(1)),
                TraceStep::Link(ObjectId(10)),
                TraceStep::Node(ObjectId(2)),
            ]
        );
    }

    #[test]
    fn lone_node_is_unresolved() {
        let mut g = ProductionGraph::new();
        machine(&mut g, 1, 30, 0);
        let trace = traced(&g, 1, ClassificationKind::Starvation);
        assert_eq!(trace.cause, RootCause::Unresolved);
        assert_eq!(trace.chokepoint, None);
        assert_eq!(trace.path, vec![TraceStep::Node(ObjectId(1))]);
    }

    #[test]
    fn bottlenecks_are_not_traced() {
        let mut g = ProductionGraph::new();
        machine(&mut g, 1, 0, 30);
        let collapsed = collapse(&g);
        let analysis = analyze(&g, &collapsed, &AnalysisConfig::default());
        let causes = RootCauses::new(&g, &collapsed);
        assert!(
            causes
                .trace(&g, &collapsed, &analysis, ObjectId(1), ClassificationKind::Bottleneck)
                .is_none()
        );
    }
}
