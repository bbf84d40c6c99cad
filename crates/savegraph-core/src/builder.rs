//! Connection-graph builder: object model to production graph.
//!
//! Buildings become nodes. Each belt, lift or pipe becomes at most one edge,
//! found through the `mConnectedComponent` reference on its two end ports.
//! Two connectors meeting end to end share a joint node; a port pointing at a
//! missing object yields an isolated placeholder node instead of an edge.

use std::collections::BTreeMap;

use crate::attribute::{AttributeValue, Resolution};
use crate::catalog::{CapacityTier, ClassCatalog, ClassFamily, ClassInfo, short_class};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::error::ParseError;
use crate::fixed::{Fixed64, f64_to_fixed64, ratio};
use crate::graph::{EdgeData, NodeData, NodeKind, ProductionGraph, ProductionProfile};
use crate::id::{NodeId, ObjectId};
use crate::model::{Entity, ObjectModel, recipe_path};
use crate::recipe::{RecipeBook, recipe_slug};

pub const ATTR_CONNECTED: &str = "mConnectedComponent";
pub const ATTR_RECIPE: &str = "mCurrentRecipe";
pub const ATTR_CLOCK: &str = "mCurrentPotential";
pub const ATTR_IS_PRODUCING: &str = "mIsProducing";
pub const ATTR_PRODUCE_DURATION: &str = "mLastProductivityMeasurementProduceDuration";
pub const ATTR_MEASURE_DURATION: &str = "mLastProductivityMeasurementDuration";
pub const ATTR_ITEM: &str = "mItemType";

pub const MAX_CLOCK: f64 = 2.5;

// ---------------------------------------------------------------------------
// Port naming
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorEnd {
    Intake,
    Delivery,
}

impl ConnectorEnd {
    fn port_names(self) -> [&'static str; 2] {
        match self {
            ConnectorEnd::Intake => ["ConveyorAny0", "PipelineConnection0"],
            ConnectorEnd::Delivery => ["ConveyorAny1", "PipelineConnection1"],
        }
    }

    fn of_port(name: &str) -> Option<Self> {
        [ConnectorEnd::Intake, ConnectorEnd::Delivery]
            .into_iter()
            .find(|end| end.port_names().contains(&name))
    }
}

/// Joint between two connector ports. A delivery meeting an intake is named
/// after the intake port, so every connector delivering into that intake
/// reaches the same joint. Any other pairing takes the smaller port id.
fn joint_id(own: ObjectId, own_end: ConnectorEnd, far: ObjectId, far_name: &str) -> ObjectId {
    match (own_end, ConnectorEnd::of_port(far_name)) {
        (ConnectorEnd::Delivery, Some(ConnectorEnd::Intake)) => far,
        (ConnectorEnd::Intake, Some(ConnectorEnd::Delivery)) => own,
        _ => own.min(far),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortDirection {
    Input,
    Output,
}

/// Direction of a building port from its component name.
fn building_port_direction(name: &str) -> Option<PortDirection> {
    let name = name.rsplit('.').next().unwrap_or(name);
    let numbered = |prefix: &str| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    };
    if numbered("Input") || name.starts_with("PipeInputFactory") {
        Some(PortDirection::Input)
    } else if numbered("Output") || name.starts_with("PipeOutputFactory") {
        Some(PortDirection::Output)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// End resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Far {
    /// A graph node; `slot` is the port component (or the entity itself).
    Node {
        object: ObjectId,
        slot: ObjectId,
        direction: Option<PortDirection>,
    },
    /// Another connector's port, named by [`joint_id`].
    Joint { id: ObjectId, slot: ObjectId },
    Missing(ObjectId),
    Open(String),
}

fn resolve_end(
    model: &ObjectModel,
    catalog: &ClassCatalog,
    connector: &Entity,
    end: ConnectorEnd,
) -> Far {
    let names = end.port_names();
    let Some(port) = connector
        .components
        .iter()
        .find(|c| names.contains(&c.name.as_str()))
    else {
        return Far::Open(names[0].to_string());
    };
    let Some(reference) = port.attribute(ATTR_CONNECTED).and_then(AttributeValue::as_reference)
    else {
        return Far::Open(port.name.clone());
    };
    let target = reference.target;
    match reference.resolution {
        Resolution::Dangling => Far::Missing(target),
        Resolution::Entity => match model.entity(target) {
            Some(entity) if catalog.classify(&entity.class).family.is_graph_node() => Far::Node {
                object: target,
                slot: target,
                direction: None,
            },
            _ => Far::Open(port.name.clone()),
        },
        Resolution::Component { owner } => {
            let Some((owner_entity, far_port)) = model.component(target) else {
                return Far::Open(port.name.clone());
            };
            match catalog.classify(&owner_entity.class).family {
                ClassFamily::Connector(_) if owner != connector.id => Far::Joint {
                    id: joint_id(port.id, end, target, &far_port.name),
                    slot: target,
                },
                family if family.is_graph_node() => Far::Node {
                    object: owner,
                    slot: target,
                    direction: building_port_direction(&far_port.name),
                },
                _ => Far::Open(port.name.clone()),
            }
        }
        Resolution::Null | Resolution::Pending => Far::Open(port.name.clone()),
    }
}

/// Pipes are not directional by port name; if the building ports say the
/// fluid runs the other way, swap the ends.
fn orient_pipe(intake: Far, delivery: Far) -> (Far, Far) {
    let reversed = matches!(
        intake,
        Far::Node {
            direction: Some(PortDirection::Input),
            ..
        }
    ) || matches!(
        delivery,
        Far::Node {
            direction: Some(PortDirection::Output),
            ..
        }
    );
    if reversed {
        (delivery, intake)
    } else {
        (intake, delivery)
    }
}

// ---------------------------------------------------------------------------
// Node profiles
// ---------------------------------------------------------------------------

fn read_clock(entity: &Entity, diagnostics: &mut Vec<Diagnostic>) -> f64 {
    let Some(raw) = entity.attribute(ATTR_CLOCK).and_then(AttributeValue::as_f64) else {
        return 1.0;
    };
    let used = if raw.is_nan() {
        1.0
    } else {
        raw.clamp(0.0, MAX_CLOCK)
    };
    if used != raw {
        tracing::warn!(node = %entity.id, raw, used, "clock speed out of range");
        diagnostics.push(Diagnostic::new(DiagnosticKind::InvalidClock {
            node: entity.id,
            raw,
            used,
        }));
    }
    used
}

fn production_profile(
    entity: &Entity,
    info: &ClassInfo,
    recipes: &RecipeBook,
    diagnostics: &mut Vec<Diagnostic>,
) -> ProductionProfile {
    let recipe = entity
        .attribute(ATTR_RECIPE)
        .and_then(recipe_path)
        .map(|path| recipe_slug(path).to_string());
    let clock = f64_to_fixed64(read_clock(entity, diagnostics)).unwrap_or(Fixed64::ONE);

    let book_rates = recipe.as_deref().and_then(|r| recipes.rates(r));
    let (input, output, rates_known) = match (book_rates, info.family, info.base_rate) {
        (Some(rates), _, _) => (rates.input, rates.output, true),
        (None, ClassFamily::Extraction, Some(base)) => (Fixed64::ZERO, base, true),
        _ => (Fixed64::ZERO, Fixed64::ZERO, false),
    };

    let productivity = match (
        entity.attribute(ATTR_PRODUCE_DURATION).and_then(AttributeValue::as_f64),
        entity.attribute(ATTR_MEASURE_DURATION).and_then(AttributeValue::as_f64),
    ) {
        (Some(produced), Some(measured)) if measured > 0.0 => {
            match (f64_to_fixed64(produced), f64_to_fixed64(measured)) {
                (Some(p), Some(m)) => Some(ratio(p, m).clamp(Fixed64::ZERO, Fixed64::ONE)),
                _ => None,
            }
        }
        _ => None,
    };

    ProductionProfile {
        recipe,
        rates_known,
        clock,
        designed_input: input.saturating_mul(clock),
        designed_output: output.saturating_mul(clock),
        producing: entity
            .attribute(ATTR_IS_PRODUCING)
            .and_then(AttributeValue::as_bool),
        productivity,
    }
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Production graph plus the diagnostics raised while building it.
#[derive(Debug, Clone, Default)]
pub struct GraphBuild {
    pub graph: ProductionGraph,
    pub diagnostics: Vec<Diagnostic>,
}

struct Candidate {
    connector: ObjectId,
    source: Far,
    dest: Far,
    tier: CapacityTier,
    item: Option<String>,
}

impl Candidate {
    /// Node and slot the connector delivers into. Slots are object ids of
    /// their own, so the slot alone identifies the destination.
    fn dest_key(&self) -> (ObjectId, ObjectId) {
        match &self.dest {
            Far::Node { object, slot, .. } => (*object, *slot),
            Far::Joint { id, slot } => (*id, *slot),
            _ => (ObjectId::NULL, ObjectId::NULL),
        }
    }
}

/// Build the raw production graph.
///
/// When several connectors deliver into the same slot, the one with the
/// smallest id wins and the others are reported as unused.
pub fn build_graph(
    model: &ObjectModel,
    catalog: &ClassCatalog,
    recipes: &RecipeBook,
) -> Result<GraphBuild, ParseError> {
    let mut graph = ProductionGraph::new();
    let mut diagnostics = Vec::new();
    let mut connectors = Vec::new();

    for entity in model.entities() {
        let info = catalog.classify(&entity.class);
        match info.family {
            ClassFamily::Connector(tier) => connectors.push((entity, tier)),
            family if family.is_graph_node() => {
                let production = family
                    .is_production()
                    .then(|| production_profile(entity, &info, recipes, &mut diagnostics));
                graph.add_node(NodeData {
                    object: entity.id,
                    kind: NodeKind::Building(family),
                    class: short_class(&entity.class).to_string(),
                    name: info.display_name.clone(),
                    position: Some(entity.transform.position),
                    production,
                })?;
            }
            _ => {}
        }
    }

    // Resolve both ends of every connector, ascending by connector id.
    let mut winners: BTreeMap<ObjectId, (ObjectId, ObjectId)> = BTreeMap::new();
    let mut accepted = Vec::new();
    for (entity, tier) in connectors {
        let intake = resolve_end(model, catalog, entity, ConnectorEnd::Intake);
        let delivery = resolve_end(model, catalog, entity, ConnectorEnd::Delivery);
        let (source, dest) = if tier.is_pipe() {
            orient_pipe(intake, delivery)
        } else {
            (intake, delivery)
        };

        let mut usable = true;
        for far in [&source, &dest] {
            match far {
                Far::Missing(target) => {
                    usable = false;
                    if graph.node_for(*target).is_none() {
                        graph.add_node(placeholder(*target))?;
                    }
                }
                Far::Open(port) => {
                    usable = false;
                    diagnostics.push(Diagnostic::new(DiagnosticKind::OpenConnector {
                        connector: entity.id,
                        port: port.clone(),
                    }));
                }
                _ => {}
            }
        }
        if !usable {
            continue;
        }

        let candidate = Candidate {
            connector: entity.id,
            source,
            dest,
            tier,
            item: entity
                .attribute(ATTR_ITEM)
                .and_then(AttributeValue::as_text)
                .map(str::to_owned),
        };
        let (node, slot) = candidate.dest_key();
        match winners.get(&slot) {
            Some(&(node, winner)) => {
                tracing::warn!(connector = %entity.id, %winner, "slot already fed");
                diagnostics.push(Diagnostic::new(DiagnosticKind::UnusedConnector {
                    connector: entity.id,
                    node,
                    slot,
                    winner,
                }));
            }
            None => {
                winners.insert(slot, (node, entity.id));
                accepted.push(candidate);
            }
        }
    }

    for candidate in accepted {
        let from = endpoint(&mut graph, &candidate.source)?;
        let to = endpoint(&mut graph, &candidate.dest)?;
        let slot = candidate.dest_key().1;
        graph.connect(EdgeData {
            from,
            to,
            connector: candidate.connector,
            slot,
            tier: candidate.tier,
            item: candidate.item,
        })?;
    }

    graph.validate()?;
    tracing::debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "built production graph"
    );
    Ok(GraphBuild { graph, diagnostics })
}

fn placeholder(object: ObjectId) -> NodeData {
    NodeData {
        object,
        kind: NodeKind::Placeholder,
        class: String::new(),
        name: format!("Missing {object}"),
        position: None,
        production: None,
    }
}

/// Node for a resolved end, creating joints on first use.
fn endpoint(graph: &mut ProductionGraph, far: &Far) -> Result<NodeId, ParseError> {
    match far {
        Far::Node { object, .. } => graph.node_for(*object).ok_or_else(|| {
            ParseError::GraphInconsistency(format!("building {object} has no node"))
        }),
        Far::Joint { id, .. } => match graph.node_for(*id) {
            Some(node) => Ok(node),
            None => Ok(graph.add_node(NodeData {
                object: *id,
                kind: NodeKind::Joint,
                class: String::new(),
                name: format!("Joint {id}"),
                position: None,
                production: None,
            })?),
        },
        Far::Missing(_) | Far::Open(_) => Err(ParseError::GraphInconsistency(
            "unusable connector end reached edge creation".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::recipe::RecipeRate;
    use crate::test_utils::{FactoryFixture, attr};

    fn build(fixture: FactoryFixture) -> GraphBuild {
        fixture.graph(&AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn port_directions() {
        assert_eq!(building_port_direction("Input0"), Some(PortDirection::Input));
        assert_eq!(building_port_direction("Output12"), Some(PortDirection::Output));
        assert_eq!(
            building_port_direction("PipeInputFactory1"),
            Some(PortDirection::Input)
        );
        assert_eq!(building_port_direction("InputInventory"), None);
        assert_eq!(building_port_direction("PowerInput"), None);
    }

    #[test]
    fn belt_between_two_buildings_is_one_edge() {
        let mut f = FactoryFixture::new();
        let a = f.building(100, "Build_MinerMk1_C", [0.0; 3]);
        let b = f.building(200, "Build_SmelterMk1_C", [10.0, 0.0, 0.0]);
        let out = f.port(a, "Output0");
        let inp = f.port(b, "Input0");
        f.belt(300, "Build_ConveyorBeltMk2_C", Some(out), Some(inp));
        let built = build(f);
        assert!(built.diagnostics.is_empty(), "{:?}", built.diagnostics);
        let graph = &built.graph;
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        let (_, edge) = graph.edges().next().unwrap();
        assert_eq!(graph.object_of(edge.from), ObjectId(100));
        assert_eq!(graph.object_of(edge.to), ObjectId(200));
        assert_eq!(edge.slot, inp);
        assert_eq!(edge.tier, CapacityTier::BeltMk2);
    }

    #[test]
    fn belts_end_to_end_meet_at_a_joint() {
        let mut f = FactoryFixture::new();
        let a = f.building(100, "Build_MinerMk1_C", [0.0; 3]);
        let b = f.building(200, "Build_SmelterMk1_C", [0.0; 3]);
        let out = f.port(a, "Output0");
        let inp = f.port(b, "Input0");
        let (_, first_end) = f.belt(300, "Build_ConveyorBeltMk1_C", Some(out), None);
        let (second_start, _) = f.belt(400, "Build_ConveyorBeltMk1_C", None, Some(inp));
        f.link_ports(first_end, second_start);
        let built = build(f);
        assert!(built.diagnostics.is_empty(), "{:?}", built.diagnostics);
        let graph = &built.graph;
        assert_eq!(graph.edge_count(), 2);
        let joint = graph.node_for(second_start).unwrap();
        assert_eq!(graph.get_node(joint).unwrap().kind, NodeKind::Joint);
        assert_eq!(graph.get_inputs(joint).len(), 1);
        assert_eq!(graph.get_outputs(joint).len(), 1);
    }

    #[test]
    fn dangling_end_becomes_isolated_placeholder() {
        let mut f = FactoryFixture::new();
        let a = f.building(100, "Build_MinerMk1_C", [0.0; 3]);
        let out = f.port(a, "Output0");
        f.belt(300, "Build_ConveyorBeltMk1_C", Some(out), Some(ObjectId(9999)));
        let (model_diags, built) = f.model_and_graph(&AnalysisConfig::default()).unwrap();
        assert!(model_diags.iter().any(Diagnostic::is_dangling));
        let graph = &built.graph;
        assert_eq!(graph.edge_count(), 0);
        let placeholder = graph.node_for(ObjectId(9999)).unwrap();
        assert!(graph.get_node(placeholder).unwrap().is_placeholder());
        assert!(graph.get_inputs(placeholder).is_empty());
        let source = graph.node_for(ObjectId(100)).unwrap();
        assert!(graph.get_outputs(source).is_empty());
    }

    #[test]
    fn open_end_is_diagnostic() {
        let mut f = FactoryFixture::new();
        let a = f.building(100, "Build_MinerMk1_C", [0.0; 3]);
        let out = f.port(a, "Output0");
        f.belt(300, "Build_ConveyorBeltMk1_C", Some(out), None);
        let built = build(f);
        assert_eq!(built.graph.edge_count(), 0);
        assert!(matches!(
            &built.diagnostics[..],
            [Diagnostic {
                kind: DiagnosticKind::OpenConnector { connector: ObjectId(300), .. },
                ..
            }]
        ));
    }

    #[test]
    fn smallest_connector_wins_contested_slot() {
        let mut f = FactoryFixture::new();
        let a = f.building(100, "Build_MinerMk1_C", [0.0; 3]);
        let b = f.building(200, "Build_SmelterMk1_C", [0.0; 3]);
        let out0 = f.port(a, "Output0");
        let out1 = f.port(a, "Output1");
        let inp = f.port(b, "Input0");
        f.belt(520, "Build_ConveyorBeltMk1_C", Some(out1), Some(inp));
        f.belt(510, "Build_ConveyorBeltMk1_C", Some(out0), Some(inp));
        let built = build(f);
        assert_eq!(built.graph.edge_count(), 1);
        assert!(built.graph.edge_for(ObjectId(510)).is_some());
        assert_eq!(
            built.diagnostics,
            vec![Diagnostic::new(DiagnosticKind::UnusedConnector {
                connector: ObjectId(520),
                node: ObjectId(200),
                slot: inp,
                winner: ObjectId(510),
            })]
        );
    }

    #[test]
    fn belts_merging_into_one_intake_share_the_joint() {
        // Whichever delivery port the intake links back to, belt 10 wins.
        for link_back_to_first in [true, false] {
            let mut f = FactoryFixture::new();
            let a = f.building(1, "Build_MinerMk1_C", [0.0; 3]);
            let b = f.building(2, "Build_MinerMk1_C", [0.0; 3]);
            let store = f.building(3, "Build_StorageContainerMk1_C", [0.0; 3]);
            let out_a = f.port(a, "Output0");
            let out_b = f.port(b, "Output0");
            let inp = f.port(store, "Input0");
            let (_, first_end) = f.belt(10, "Build_ConveyorBeltMk1_C", Some(out_a), None);
            let (_, second_end) = f.belt(20, "Build_ConveyorBeltMk1_C", Some(out_b), None);
            let (intake, _) = f.belt(30, "Build_ConveyorBeltMk1_C", None, Some(inp));
            if link_back_to_first {
                f.link_ports(second_end, intake);
                f.link_ports(first_end, intake);
            } else {
                f.link_ports(first_end, intake);
                f.link_ports(second_end, intake);
            }
            assert!(first_end < intake && second_end < intake);

            let built = build(f);
            let graph = &built.graph;
            assert_eq!(graph.edge_count(), 2);
            assert!(graph.edge_for(ObjectId(20)).is_none());
            assert_eq!(
                built.diagnostics,
                vec![Diagnostic::new(DiagnosticKind::UnusedConnector {
                    connector: ObjectId(20),
                    node: intake,
                    slot: intake,
                    winner: ObjectId(10),
                })]
            );
            let joint = graph.node_for(intake).unwrap();
            assert_eq!(graph.get_node(joint).unwrap().kind, NodeKind::Joint);
            assert_eq!(graph.get_inputs(joint).len(), 1);
            assert_eq!(graph.get_outputs(joint).len(), 1);
        }
    }

    #[test]
    fn pipe_direction_follows_building_ports() {
        let mut f = FactoryFixture::new();
        let pump = f.building(100, "Build_WaterPump_C", [0.0; 3]);
        let refinery = f.building(200, "Build_OilRefinery_C", [0.0; 3]);
        let out = f.port(pump, "PipeOutputFactory");
        let inp = f.port(refinery, "PipeInputFactory");
        // Laid backwards: connection 0 touches the consumer.
        f.pipe(300, "Build_PipelineMK2_C", Some(inp), Some(out));
        let built = build(f);
        let (_, edge) = built.graph.edges().next().unwrap();
        assert_eq!(built.graph.object_of(edge.from), ObjectId(100));
        assert_eq!(built.graph.object_of(edge.to), ObjectId(200));
        assert_eq!(edge.capacity(), Fixed64::from_num(600));
    }

    #[test]
    fn production_profile_uses_recipe_and_clock() {
        let mut config = AnalysisConfig::default();
        config
            .recipes
            .insert("Recipe_IngotIron", RecipeRate::new(30.0, 30.0));
        let mut f = FactoryFixture::new();
        let smelter = f.building(100, "Build_SmelterMk1_C", [0.0; 3]);
        f.set(smelter, vec![
            attr::text(ATTR_RECIPE, "/Game/Recipes/Recipe_IngotIron.Recipe_IngotIron_C"),
            attr::float(ATTR_CLOCK, 1.5),
            attr::float(ATTR_PRODUCE_DURATION, 3.0),
            attr::float(ATTR_MEASURE_DURATION, 4.0),
        ]);
        let built = f.graph(&config).unwrap();
        let node = built.graph.node_for(smelter).unwrap();
        let profile = built.graph.get_node(node).unwrap().production.clone().unwrap();
        assert_eq!(profile.recipe.as_deref(), Some("Recipe_IngotIron"));
        assert!(profile.rates_known);
        assert_eq!(profile.designed_output, Fixed64::from_num(45));
        assert_eq!(profile.productivity, Some(Fixed64::from_num(0.75)));
    }

    #[test]
    fn extraction_uses_base_rate() {
        let mut f = FactoryFixture::new();
        let miner = f.building(100, "Build_MinerMk3_C", [0.0; 3]);
        f.set(miner, vec![attr::float(ATTR_CLOCK, 0.5)]);
        let built = build(f);
        let node = built.graph.node_for(miner).unwrap();
        let profile = built.graph.get_node(node).unwrap().production.clone().unwrap();
        assert_eq!(profile.designed_output, Fixed64::from_num(120));
        assert_eq!(profile.designed_input, Fixed64::ZERO);
    }

    #[test]
    fn clock_out_of_range_is_clamped() {
        let mut f = FactoryFixture::new();
        let miner = f.building(100, "Build_MinerMk1_C", [0.0; 3]);
        f.set(miner, vec![attr::float(ATTR_CLOCK, 4.0)]);
        let built = build(f);
        let node = built.graph.node_for(miner).unwrap();
        let profile = built.graph.get_node(node).unwrap().production.clone().unwrap();
        assert_eq!(profile.clock, Fixed64::from_num(2.5));
        assert!(matches!(
            built.diagnostics[0].kind,
            DiagnosticKind::InvalidClock { raw, used, .. } if raw == 4.0 && used == 2.5
        ));
    }

    #[test]
    fn non_graph_entities_are_ignored() {
        let mut f = FactoryFixture::new();
        f.building(100, "Build_Foundation_8x4_01_C", [0.0; 3]);
        f.building(101, "Build_StorageContainerMk1_C", [0.0; 3]);
        let built = build(f);
        assert_eq!(built.graph.node_count(), 1);
    }
}
