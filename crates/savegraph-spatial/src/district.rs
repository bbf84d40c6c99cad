//! Greedy single-linkage district clustering.
//!
//! Buildings are visited by ascending object id. A building joins the
//! lowest-numbered district that already has a member within the radius,
//! otherwise it seeds a new district. Districts are never merged, so a
//! building that bridges two districts joins the older one and the two stay
//! separate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use savegraph_core::analysis::AnalysisResult;
use savegraph_core::collapse::CollapsedGraph;
use savegraph_core::fixed::{Fixed64, sum};
use savegraph_core::graph::{NodeKind, ProductionGraph};
use savegraph_core::id::ObjectId;
use savegraph_core::recipe::recipe_display_name;

use crate::ledger::{ItemBalance, ManifoldBlock, item_ledger, manifold_blocks};
use crate::{SpatialError, SpatialGrid};

/// District number, starting at 1 in seeding order. Because seeding follows
/// ascending object id, a smaller district id also has a smaller first
/// member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DistrictId(pub u32);

impl fmt::Display for DistrictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct District {
    pub id: DistrictId,
    pub name: String,
    /// Member object ids, ascending.
    pub members: Vec<ObjectId>,
    pub centroid: [f32; 3],
    /// Member counts keyed by family label.
    pub families: BTreeMap<String, usize>,
    pub dominant_recipe: Option<String>,
    /// Designed output of production, generator and extraction members.
    pub designed_throughput: Fixed64,
    /// Actual output of the same members.
    pub actual_throughput: Fixed64,
    /// Required input of all members.
    pub total_demand: Fixed64,
    /// Input that actually reaches the members.
    pub total_supply: Fixed64,
    /// Sum of per-member input deficits.
    pub net_imbalance: Fixed64,
    /// Delivered flow on links entering the district.
    pub inbound: Fixed64,
    /// Delivered flow on links leaving the district.
    pub outbound: Fixed64,
    /// Balance sheet keyed by item.
    pub ledger: BTreeMap<String, ItemBalance>,
    pub blocks: Vec<ManifoldBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Districts {
    pub districts: Vec<District>,
    pub membership: BTreeMap<ObjectId, DistrictId>,
}

impl Districts {
    pub fn district_of(&self, object: ObjectId) -> Option<DistrictId> {
        self.membership.get(&object).copied()
    }

    pub fn get(&self, id: DistrictId) -> Option<&District> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.districts.get(index)
    }

    pub fn len(&self) -> usize {
        self.districts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }
}

/// Group points into districts. Returns member lists in district order,
/// each ascending.
pub fn assign_districts(
    points: &[(ObjectId, [f32; 3])],
    radius: f64,
) -> Result<Vec<Vec<ObjectId>>, SpatialError> {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|(id, _)| *id);

    let mut grid: SpatialGrid<usize> = SpatialGrid::new(radius)?;
    let mut groups: Vec<Vec<ObjectId>> = Vec::new();
    for (id, position) in sorted {
        let index = match grid.within(position, radius).into_iter().min() {
            Some(existing) => existing,
            None => {
                groups.push(Vec::new());
                groups.len() - 1
            }
        };
        groups[index].push(id);
        grid.insert(position, index);
    }
    Ok(groups)
}

/// Most frequent key; ties go to the smallest key.
fn dominant(counts: &BTreeMap<String, usize>) -> Option<String> {
    counts
        .iter()
        .fold(None::<(&String, usize)>, |best, (key, &n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((key, n)),
        })
        .map(|(key, _)| key.clone())
}

/// Cluster the positioned buildings of `graph` and aggregate the analysis
/// per district.
pub fn cluster_districts(
    graph: &ProductionGraph,
    collapsed: &CollapsedGraph,
    analysis: &AnalysisResult,
    radius: f64,
) -> Result<Districts, SpatialError> {
    let points: Vec<(ObjectId, [f32; 3])> = graph
        .nodes()
        .filter(|(_, n)| matches!(n.kind, NodeKind::Building(_)))
        .filter_map(|(_, n)| n.position.map(|p| (n.object, p)))
        .collect();
    let groups = assign_districts(&points, radius)?;
    let positions: BTreeMap<ObjectId, [f32; 3]> = points.into_iter().collect();

    let mut out = Districts::default();
    for (index, members) in groups.into_iter().enumerate() {
        let id = DistrictId(index as u32 + 1);
        for &m in &members {
            out.membership.insert(m, id);
        }

        let mut centre = [0f64; 3];
        let mut families: BTreeMap<String, usize> = BTreeMap::new();
        let mut recipes: BTreeMap<String, usize> = BTreeMap::new();
        let mut buildings: BTreeMap<String, usize> = BTreeMap::new();
        let mut designed = Vec::new();
        let mut actual = Vec::new();
        let mut demand = Vec::new();
        let mut supply = Vec::new();
        let mut deficits = Vec::new();

        for &m in &members {
            if let Some(p) = positions.get(&m) {
                for (c, v) in centre.iter_mut().zip(p) {
                    *c += f64::from(*v);
                }
            }
            let Some(data) = graph.node_for(m).and_then(|n| graph.get_node(n)) else {
                continue;
            };
            let family = data.family();
            if let Some(family) = family {
                *families.entry(family.label().to_string()).or_default() += 1;
            }
            if !data.name.is_empty() {
                *buildings.entry(data.name.clone()).or_default() += 1;
            }
            if let Some(recipe) = data.production.as_ref().and_then(|p| p.recipe.clone()) {
                *recipes.entry(recipe).or_default() += 1;
            }
            if let Some(flow) = analysis.node(m) {
                if family.is_some_and(|f| f.is_production()) {
                    designed.push(flow.designed_output);
                    actual.push(flow.actual_output);
                }
                demand.push(flow.required_input);
                supply.push(flow.available_input);
                deficits.push(flow.deficit());
            }
        }

        let n = members.len().max(1) as f64;
        let centroid = centre.map(|c| (c / n) as f32);
        let dominant_recipe = dominant(&recipes);
        let name = match (&dominant_recipe, dominant(&buildings)) {
            (Some(recipe), _) => format!("{} District", recipe_display_name(recipe)),
            (None, Some(building)) => format!("{building} Area"),
            (None, None) => format!("District {}", id.0),
        };

        let ledger = item_ledger(graph, collapsed, analysis, &members);
        let blocks = manifold_blocks(graph, collapsed, analysis, &members);
        out.districts.push(District {
            id,
            name,
            members,
            centroid,
            families,
            dominant_recipe,
            designed_throughput: sum(designed),
            actual_throughput: sum(actual),
            total_demand: sum(demand),
            total_supply: sum(supply),
            net_imbalance: sum(deficits),
            inbound: Fixed64::ZERO,
            outbound: Fixed64::ZERO,
            ledger,
            blocks,
        });
    }

    // Boundary flows over links whose endpoints lie in different districts
    // (or outside any district).
    for (lid, link) in collapsed.links() {
        let delivered = analysis
            .links
            .get(lid)
            .map_or(Fixed64::ZERO, |f| f.delivered);
        let from = out.district_of(graph.object_of(link.from));
        let to = out.district_of(graph.object_of(link.to));
        if from == to {
            continue;
        }
        if let Some(d) = from.and_then(|d| usize::try_from(d.0).ok()) {
            if let Some(district) = out.districts.get_mut(d - 1) {
                district.outbound = district.outbound.saturating_add(delivered);
            }
        }
        if let Some(d) = to.and_then(|d| usize::try_from(d.0).ok()) {
            if let Some(district) = out.districts.get_mut(d - 1) {
                district.inbound = district.inbound.saturating_add(delivered);
            }
        }
    }

    tracing::info!(
        districts = out.len(),
        clustered = out.membership.len(),
        radius,
        "clustered districts"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use savegraph_core::analysis::analyze;
    use savegraph_core::collapse::collapse;
    use savegraph_core::config::AnalysisConfig;
    use savegraph_core::test_utils::*;

    fn ids(raw: &[u64]) -> Vec<ObjectId> {
        raw.iter().map(|&i| ObjectId(i)).collect()
    }

    #[test]
    fn nearby_points_share_a_district() {
        let points = [
            (ObjectId(1), [0.0, 0.0, 0.0]),
            (ObjectId(2), [20.0, 0.0, 0.0]),
            (ObjectId(3), [500.0, 0.0, 0.0]),
        ];
        let groups = assign_districts(&points, 50.0).unwrap();
        assert_eq!(groups, vec![ids(&[1, 2]), ids(&[3])]);
    }

    #[test]
    fn chains_link_transitively() {
        let points = [
            (ObjectId(3), [80.0, 0.0, 0.0]),
            (ObjectId(1), [0.0, 0.0, 0.0]),
            (ObjectId(2), [40.0, 0.0, 0.0]),
        ];
        let groups = assign_districts(&points, 50.0).unwrap();
        assert_eq!(groups, vec![ids(&[1, 2, 3])]);
    }

    #[test]
    fn bridging_point_joins_smallest_district_without_merging() {
        // 1 and 2 are 100 apart; 3 sits between them and reaches both.
        let points = [
            (ObjectId(1), [0.0, 0.0, 0.0]),
            (ObjectId(2), [100.0, 0.0, 0.0]),
            (ObjectId(3), [50.0, 0.0, 0.0]),
        ];
        let groups = assign_districts(&points, 50.0).unwrap();
        assert_eq!(groups, vec![ids(&[1, 3]), ids(&[2])]);
    }

    #[test]
    fn height_counts_toward_distance() {
        let points = [
            (ObjectId(1), [0.0, 0.0, 0.0]),
            (ObjectId(2), [30.0, 0.0, 45.0]),
        ];
        assert_eq!(assign_districts(&points, 50.0).unwrap().len(), 2);
    }

    #[test]
    fn invalid_radius_is_rejected() {
        assert!(assign_districts(&[], -1.0).is_err());
    }

    #[test]
    fn dominant_prefers_count_then_name() {
        let mut counts = BTreeMap::new();
        counts.insert("b".to_string(), 2);
        counts.insert("a".to_string(), 2);
        counts.insert("c".to_string(), 1);
        assert_eq!(dominant(&counts).as_deref(), Some("a"));
        assert_eq!(dominant(&BTreeMap::new()), None);
    }

    #[test]
    fn aggregates_and_boundary_flows() {
        let config = line_config();
        let mut f = FactoryFixture::new();
        let miner = f.building(1, "Build_MinerMk1_C", [0.0; 3]);
        let near = f.building(2, "Build_SmelterMk1_C", [20.0, 0.0, 0.0]);
        let far = f.building(3, "Build_SmelterMk1_C", [5000.0, 0.0, 0.0]);
        f.set(near, vec![attr::text("mCurrentRecipe", LINE_RECIPE)]);
        f.set(far, vec![attr::text("mCurrentRecipe", LINE_RECIPE)]);
        f.convey(10, "Build_ConveyorBeltMk1_C", miner, near);
        f.convey(11, "Build_ConveyorBeltMk1_C", near, far);

        let built = f.graph(&config).unwrap();
        let collapsed = collapse(&built.graph);
        let analysis = analyze(&built.graph, &collapsed, &config);
        let districts = cluster_districts(&built.graph, &collapsed, &analysis, 50.0).unwrap();

        assert_eq!(districts.len(), 2);
        let home = districts.get(DistrictId(1)).unwrap();
        assert_eq!(home.members, ids(&[1, 2]));
        assert_eq!(home.name, "IngotIron District");
        assert_eq!(home.centroid, [10.0, 0.0, 0.0]);
        assert_eq!(home.families.get("extraction"), Some(&1));
        assert_eq!(home.designed_throughput, fixed(90.0));
        assert_eq!(home.outbound, fixed(30.0));
        assert_eq!(home.inbound, fixed(0.0));

        let away = districts.get(DistrictId(2)).unwrap();
        assert_eq!(away.inbound, fixed(30.0));
        assert_eq!(districts.district_of(far), Some(DistrictId(2)));
        assert_eq!(away.net_imbalance, fixed(0.0));

        let home_items = &home.ledger[crate::ledger::UNKNOWN_ITEM];
        assert_eq!(home_items.produced, fixed(90.0));
        assert_eq!(home_items.consumed, fixed(30.0));
        assert_eq!(home_items.external_out, fixed(30.0));
        let away_items = &away.ledger[crate::ledger::UNKNOWN_ITEM];
        assert_eq!(away_items.external_in, fixed(30.0));
        assert_eq!(away_items.status, crate::ledger::ItemStatus::Balanced);
        assert!(home.blocks.is_empty() && away.blocks.is_empty());
    }

    #[test]
    fn unnamed_recipes_fall_back_to_building_name() {
        let config = AnalysisConfig::default();
        let mut f = FactoryFixture::new();
        f.building(1, "Build_MinerMk1_C", [0.0; 3]);
        let built = f.graph(&config).unwrap();
        let collapsed = collapse(&built.graph);
        let analysis = analyze(&built.graph, &collapsed, &config);
        let districts = cluster_districts(&built.graph, &collapsed, &analysis, 50.0).unwrap();
        assert_eq!(districts.districts[0].name, "Miner Mk.1 Area");
    }

    /// Same greedy rule without the grid.
    fn brute_force(points: &[(ObjectId, [f32; 3])], radius: f64) -> Vec<Vec<ObjectId>> {
        let mut sorted = points.to_vec();
        sorted.sort_by_key(|(id, _)| *id);
        let mut groups: Vec<Vec<(ObjectId, [f32; 3])>> = Vec::new();
        for (id, p) in sorted {
            let eligible = groups
                .iter()
                .position(|g| g.iter().any(|(_, q)| crate::distance(p, *q) <= radius));
            match eligible {
                Some(i) => groups[i].push((id, p)),
                None => groups.push(vec![(id, p)]),
            }
        }
        groups
            .into_iter()
            .map(|g| g.into_iter().map(|(id, _)| id).collect())
            .collect()
    }

    proptest::proptest! {
        #[test]
        fn grid_matches_brute_force(
            coords in proptest::collection::btree_map(
                0u64..500,
                (0u8..200, 0u8..200, 0u8..20),
                0..40,
            ),
            radius in 1u8..60,
        ) {
            let points: Vec<(ObjectId, [f32; 3])> = coords
                .into_iter()
                .map(|(id, (x, y, z))| (ObjectId(id), [f32::from(x), f32::from(y), f32::from(z)]))
                .collect();
            let radius = f64::from(radius);
            proptest::prop_assert_eq!(
                assign_districts(&points, radius).unwrap(),
                brute_force(&points, radius)
            );
        }
    }
}
