//! Per-district item ledgers and manifold blocks.
//!
//! Items are named by the `mItemType` stored on connectors. A machine's
//! designed output is booked against the items of its outgoing links, split
//! evenly when they carry several; its designed input against the items of
//! its incoming links. Links without a stored item book under
//! [`UNKNOWN_ITEM`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use savegraph_core::analysis::AnalysisResult;
use savegraph_core::catalog::ClassFamily;
use savegraph_core::collapse::{CollapsedGraph, Link};
use savegraph_core::fixed::{Fixed64, ratio, sum};
use savegraph_core::graph::ProductionGraph;
use savegraph_core::id::{LinkId, NodeId, ObjectId};

pub const UNKNOWN_ITEM: &str = "(unknown)";

/// Net rates within this distance of zero count as balanced.
pub const BALANCE_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Deficit,
    /// Consumed but never produced inside the district.
    Imported,
    Surplus,
    Balanced,
    /// Only seen crossing the boundary.
    Unused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBalance {
    /// Designed output of member machines.
    pub produced: Fixed64,
    /// Designed input of member machines.
    pub consumed: Fixed64,
    /// `produced - consumed`; negative for a deficit.
    pub net: Fixed64,
    /// Delivered flow on links entering the district.
    pub external_in: Fixed64,
    /// Delivered flow on links leaving the district.
    pub external_out: Fixed64,
    pub status: ItemStatus,
}

impl Default for ItemBalance {
    fn default() -> Self {
        Self {
            produced: Fixed64::ZERO,
            consumed: Fixed64::ZERO,
            net: Fixed64::ZERO,
            external_in: Fixed64::ZERO,
            external_out: Fixed64::ZERO,
            status: ItemStatus::Unused,
        }
    }
}

impl ItemBalance {
    fn settle(&mut self) {
        self.net = self.produced.saturating_sub(self.consumed);
        let tolerance = Fixed64::from_num(BALANCE_TOLERANCE);
        self.status = if self.produced == Fixed64::ZERO && self.consumed == Fixed64::ZERO {
            ItemStatus::Unused
        } else if self.consumed == Fixed64::ZERO {
            ItemStatus::Surplus
        } else if self.produced == Fixed64::ZERO {
            ItemStatus::Imported
        } else if self.net > tolerance {
            ItemStatus::Surplus
        } else if self.net < -tolerance {
            ItemStatus::Deficit
        } else {
            ItemStatus::Balanced
        };
    }
}

fn link_item(graph: &ProductionGraph, link: &Link) -> String {
    link.edges
        .iter()
        .filter_map(|&e| graph.get_edge(e))
        .find_map(|edge| edge.item.clone())
        .unwrap_or_else(|| UNKNOWN_ITEM.to_string())
}

/// Distinct items over `links`, ascending.
fn items_of(graph: &ProductionGraph, collapsed: &CollapsedGraph, links: &[LinkId]) -> Vec<String> {
    let items: BTreeSet<String> = links
        .iter()
        .filter_map(|&l| collapsed.link(l))
        .map(|link| link_item(graph, link))
        .collect();
    items.into_iter().collect()
}

fn book(
    ledger: &mut BTreeMap<String, ItemBalance>,
    items: Vec<String>,
    rate: Fixed64,
    apply: impl Fn(&mut ItemBalance, Fixed64),
) {
    if rate <= Fixed64::ZERO {
        return;
    }
    let items = if items.is_empty() {
        vec![UNKNOWN_ITEM.to_string()]
    } else {
        items
    };
    let share = ratio(rate, Fixed64::from_num(items.len() as i64));
    for item in items {
        apply(ledger.entry(item).or_default(), share);
    }
}

/// Item balance sheet of one district. `members` must be ascending.
pub fn item_ledger(
    graph: &ProductionGraph,
    collapsed: &CollapsedGraph,
    analysis: &AnalysisResult,
    members: &[ObjectId],
) -> BTreeMap<String, ItemBalance> {
    let inside = |object: ObjectId| members.binary_search(&object).is_ok();
    let mut ledger: BTreeMap<String, ItemBalance> = BTreeMap::new();

    for &member in members {
        let Some(node) = graph.node_for(member) else {
            continue;
        };
        let Some(data) = graph.get_node(node) else {
            continue;
        };
        let (Some(family), Some(profile)) = (data.family(), data.production.as_ref()) else {
            continue;
        };
        if !family.is_production() || !profile.rates_known {
            continue;
        }
        book(
            &mut ledger,
            items_of(graph, collapsed, collapsed.outputs(node)),
            profile.designed_output,
            |b, r| b.produced = b.produced.saturating_add(r),
        );
        if family != ClassFamily::Extraction {
            book(
                &mut ledger,
                items_of(graph, collapsed, collapsed.inputs(node)),
                profile.designed_input,
                |b, r| b.consumed = b.consumed.saturating_add(r),
            );
        }
    }

    for (lid, link) in collapsed.links() {
        let from = inside(graph.object_of(link.from));
        let to = inside(graph.object_of(link.to));
        if from == to {
            continue;
        }
        let delivered = analysis
            .links
            .get(lid)
            .map_or(Fixed64::ZERO, |f| f.delivered);
        let balance = ledger.entry(link_item(graph, link)).or_default();
        if to {
            balance.external_in = balance.external_in.saturating_add(delivered);
        } else {
            balance.external_out = balance.external_out.saturating_add(delivered);
        }
    }

    for balance in ledger.values_mut() {
        balance.settle();
    }
    ledger
}

// ---------------------------------------------------------------------------
// Manifold blocks
// ---------------------------------------------------------------------------

/// Production machines sharing a recipe, the same suppliers and the same
/// consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifoldBlock {
    pub recipe: String,
    pub building: String,
    /// Ascending.
    pub members: Vec<ObjectId>,
    pub producing: usize,
    pub average_clock: Fixed64,
    pub expected_output: Fixed64,
    pub actual_output: Fixed64,
    /// `actual_output / expected_output`, zero when nothing is expected.
    pub efficiency: Fixed64,
    /// Shared suppliers, ascending.
    pub inputs: Vec<ObjectId>,
    /// Shared consumers, ascending.
    pub outputs: Vec<ObjectId>,
}

type BlockKey = (String, Vec<ObjectId>, Vec<ObjectId>);

/// Groups of two or more equivalent machines among `members`, largest
/// first; equal sizes keep ascending first-member order.
pub fn manifold_blocks(
    graph: &ProductionGraph,
    collapsed: &CollapsedGraph,
    analysis: &AnalysisResult,
    members: &[ObjectId],
) -> Vec<ManifoldBlock> {
    let neighbours = |links: &[LinkId], far: fn(&Link) -> NodeId| {
        let set: BTreeSet<ObjectId> = links
            .iter()
            .filter_map(|&l| collapsed.link(l))
            .map(|link| graph.object_of(far(link)))
            .collect();
        set.into_iter().collect::<Vec<_>>()
    };

    let mut groups: BTreeMap<BlockKey, Vec<ObjectId>> = BTreeMap::new();
    for &member in members {
        let Some(node) = graph.node_for(member) else {
            continue;
        };
        let Some(data) = graph.get_node(node) else {
            continue;
        };
        if data.family() != Some(ClassFamily::Production) {
            continue;
        }
        let Some(recipe) = data.production.as_ref().and_then(|p| p.recipe.clone()) else {
            continue;
        };
        let key = (
            recipe,
            neighbours(collapsed.inputs(node), |l| l.from),
            neighbours(collapsed.outputs(node), |l| l.to),
        );
        groups.entry(key).or_default().push(member);
    }

    let mut blocks: Vec<ManifoldBlock> = groups
        .into_iter()
        .filter(|(_, machines)| machines.len() >= 2)
        .map(|((recipe, inputs, outputs), machines)| {
            let profiles: Vec<_> = machines
                .iter()
                .filter_map(|&m| graph.node_for(m).and_then(|n| graph.get_node(n)))
                .collect();
            let building = profiles.first().map(|d| d.name.clone()).unwrap_or_default();
            let clocks = profiles
                .iter()
                .filter_map(|d| d.production.as_ref().map(|p| p.clock));
            let expected = sum(profiles
                .iter()
                .filter_map(|d| d.production.as_ref().map(|p| p.designed_output)));
            let actual = sum(machines
                .iter()
                .filter_map(|&m| analysis.node(m).map(|f| f.actual_output)));
            ManifoldBlock {
                recipe,
                building,
                producing: profiles
                    .iter()
                    .filter(|d| d.production.as_ref().and_then(|p| p.producing) == Some(true))
                    .count(),
                average_clock: ratio(sum(clocks), Fixed64::from_num(machines.len() as i64)),
                expected_output: expected,
                actual_output: actual,
                efficiency: ratio(actual, expected),
                inputs,
                outputs,
                members: machines,
            }
        })
        .collect();
    blocks.sort_by(|a, b| {
        b.members
            .len()
            .cmp(&a.members.len())
            .then_with(|| a.members.first().cmp(&b.members.first()))
    });
    blocks
}
