//! Class-tag classification.
//!
//! Every entity carries a class tag (a full asset path or a short class name
//! such as `Build_SmelterMk1_C`). The catalog maps the short name to a
//! [`ClassFamily`], which carries the capability predicates used by the graph
//! builder instead of a type hierarchy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::fixed::{Fixed64, f64_to_fixed64};

// ---------------------------------------------------------------------------
// Capacity tiers
// ---------------------------------------------------------------------------

/// Rated capacity of a connector. The set of tiers is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityTier {
    BeltMk1,
    BeltMk2,
    BeltMk3,
    BeltMk4,
    BeltMk5,
    BeltMk6,
    LiftMk1,
    LiftMk2,
    LiftMk3,
    LiftMk4,
    LiftMk5,
    LiftMk6,
    PipeMk1,
    PipeMk2,
}

impl CapacityTier {
    /// Throughput in items (or m³) per minute.
    pub fn rate_per_min(self) -> u32 {
        use CapacityTier::*;
        match self {
            BeltMk1 | LiftMk1 => 60,
            BeltMk2 | LiftMk2 => 120,
            BeltMk3 | LiftMk3 => 270,
            BeltMk4 | LiftMk4 => 480,
            BeltMk5 | LiftMk5 => 780,
            BeltMk6 | LiftMk6 => 1200,
            PipeMk1 => 300,
            PipeMk2 => 600,
        }
    }

    pub fn capacity(self) -> Fixed64 {
        Fixed64::from_num(self.rate_per_min())
    }

    pub fn is_pipe(self) -> bool {
        matches!(self, CapacityTier::PipeMk1 | CapacityTier::PipeMk2)
    }

    pub fn label(self) -> &'static str {
        use CapacityTier::*;
        match self {
            BeltMk1 => "Belt Mk.1",
            BeltMk2 => "Belt Mk.2",
            BeltMk3 => "Belt Mk.3",
            BeltMk4 => "Belt Mk.4",
            BeltMk5 => "Belt Mk.5",
            BeltMk6 => "Belt Mk.6",
            LiftMk1 => "Lift Mk.1",
            LiftMk2 => "Lift Mk.2",
            LiftMk3 => "Lift Mk.3",
            LiftMk4 => "Lift Mk.4",
            LiftMk5 => "Lift Mk.5",
            LiftMk6 => "Lift Mk.6",
            PipeMk1 => "Pipe Mk.1",
            PipeMk2 => "Pipe Mk.2",
        }
    }
}

// ---------------------------------------------------------------------------
// Families
// ---------------------------------------------------------------------------

/// Logistics buildings pass items through without transforming them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogisticsKind {
    Splitter,
    Merger,
    PipeJunction,
    Pump,
}

/// Capability class of an entity, derived from its class tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassFamily {
    /// Recipe-driven machine.
    Production,
    /// Burns fuel; modelled as a recipe-driven consumer.
    Generator,
    /// Miner or extractor with a base output rate.
    Extraction,
    Logistics(LogisticsKind),
    Storage,
    /// Truck, drone and train stations.
    Station,
    /// Belt, lift or pipe segment.
    Connector(CapacityTier),
    /// Anything else (foundations, decorations, players).
    Other,
}

impl ClassFamily {
    /// Connectors and logistics buildings move items without a recipe.
    pub fn is_transport(self) -> bool {
        matches!(self, ClassFamily::Connector(_) | ClassFamily::Logistics(_))
    }

    /// Machines whose throughput is set by a recipe or a base rate.
    pub fn is_production(self) -> bool {
        matches!(
            self,
            ClassFamily::Production | ClassFamily::Generator | ClassFamily::Extraction
        )
    }

    /// Entities that become nodes of the production graph.
    pub fn is_graph_node(self) -> bool {
        !matches!(self, ClassFamily::Connector(_) | ClassFamily::Other)
    }

    /// Families that forward their input unchanged.
    pub fn forwards_input(self) -> bool {
        matches!(
            self,
            ClassFamily::Logistics(_) | ClassFamily::Storage | ClassFamily::Station
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ClassFamily::Production => "production",
            ClassFamily::Generator => "generator",
            ClassFamily::Extraction => "extraction",
            ClassFamily::Logistics(_) => "logistics",
            ClassFamily::Storage => "storage",
            ClassFamily::Station => "station",
            ClassFamily::Connector(_) => "connector",
            ClassFamily::Other => "other",
        }
    }
}

/// Catalog entry for one short class name.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub family: ClassFamily,
    pub display_name: String,
    /// Output per minute at 100% clock for extraction buildings.
    pub base_rate: Option<Fixed64>,
}

impl ClassInfo {
    fn other(short: &str) -> Self {
        Self {
            family: ClassFamily::Other,
            display_name: short.to_string(),
            base_rate: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config-supplied entries
// ---------------------------------------------------------------------------

/// Family names accepted in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilySpec {
    Production,
    Generator,
    Extraction,
    Splitter,
    Merger,
    PipeJunction,
    Pump,
    Storage,
    Station,
    Connector,
    Other,
}

/// An extra or overriding catalog entry from configuration.
///
/// ```toml
/// [classes.Build_ModdedBelt_C]
/// family = "connector"
/// tier = "belt_mk3"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub family: FamilySpec,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_rate: Option<f64>,
    #[serde(default)]
    pub tier: Option<CapacityTier>,
}

impl ClassSpec {
    fn to_info(&self, short: &str) -> Result<ClassInfo, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidClass {
            name: short.to_string(),
            reason: reason.to_string(),
        };
        let family = match self.family {
            FamilySpec::Production => ClassFamily::Production,
            FamilySpec::Generator => ClassFamily::Generator,
            FamilySpec::Extraction => ClassFamily::Extraction,
            FamilySpec::Splitter => ClassFamily::Logistics(LogisticsKind::Splitter),
            FamilySpec::Merger => ClassFamily::Logistics(LogisticsKind::Merger),
            FamilySpec::PipeJunction => ClassFamily::Logistics(LogisticsKind::PipeJunction),
            FamilySpec::Pump => ClassFamily::Logistics(LogisticsKind::Pump),
            FamilySpec::Storage => ClassFamily::Storage,
            FamilySpec::Station => ClassFamily::Station,
            FamilySpec::Connector => {
                let tier = self.tier.ok_or_else(|| invalid("connector requires a tier"))?;
                ClassFamily::Connector(tier)
            }
            FamilySpec::Other => ClassFamily::Other,
        };
        let base_rate = match self.base_rate {
            Some(rate) if rate >= 0.0 => {
                Some(f64_to_fixed64(rate).ok_or_else(|| invalid("base_rate out of range"))?)
            }
            Some(_) => return Err(invalid("base_rate must not be negative")),
            None => None,
        };
        Ok(ClassInfo {
            family,
            display_name: self.name.clone().unwrap_or_else(|| short.to_string()),
            base_rate,
        })
    }
}

// ---------------------------------------------------------------------------
// Built-in tables
// ---------------------------------------------------------------------------

const PRODUCTION: &[(&str, &str)] = &[
    ("Build_SmelterMk1_C", "Smelter"),
    ("Build_ConstructorMk1_C", "Constructor"),
    ("Build_AssemblerMk1_C", "Assembler"),
    ("Build_FoundryMk1_C", "Foundry"),
    ("Build_ManufacturerMk1_C", "Manufacturer"),
    ("Build_OilRefinery_C", "Refinery"),
    ("Build_Packager_C", "Packager"),
    ("Build_Blender_C", "Blender"),
    ("Build_HadronCollider_C", "Particle Accelerator"),
    ("Build_Converter_C", "Converter"),
    ("Build_QuantumEncoder_C", "Quantum Encoder"),
];

const GENERATORS: &[(&str, &str)] = &[
    ("Build_GeneratorCoal_C", "Coal Generator"),
    ("Build_GeneratorFuel_C", "Fuel Generator"),
    ("Build_GeneratorNuclear_C", "Nuclear Power Plant"),
    ("Build_GeneratorGeoThermal_C", "Geothermal Generator"),
    ("Build_GeneratorBiomass_Automated_C", "Biomass Burner"),
    ("Build_GeneratorBiomass_C", "Biomass Burner"),
];

const EXTRACTORS: &[(&str, &str, u32)] = &[
    ("Build_MinerMk1_C", "Miner Mk.1", 60),
    ("Build_MinerMk2_C", "Miner Mk.2", 120),
    ("Build_MinerMk3_C", "Miner Mk.3", 240),
    ("Build_OilPump_C", "Oil Extractor", 120),
    ("Build_WaterPump_C", "Water Extractor", 120),
    ("Build_FrackingExtractor_C", "Resource Well Extractor", 60),
    ("Build_FrackingSmasher_C", "Resource Well Pressurizer", 0),
];

const LOGISTICS: &[(&str, &str, LogisticsKind)] = &[
    ("Build_ConveyorAttachmentSplitter_C", "Splitter", LogisticsKind::Splitter),
    ("Build_ConveyorAttachmentSplitterSmart_C", "Smart Splitter", LogisticsKind::Splitter),
    (
        "Build_ConveyorAttachmentSplitterProgrammable_C",
        "Programmable Splitter",
        LogisticsKind::Splitter,
    ),
    ("Build_ConveyorAttachmentMerger_C", "Merger", LogisticsKind::Merger),
    ("Build_PipelineJunction_Cross_C", "Pipe Junction", LogisticsKind::PipeJunction),
    ("Build_PipelinePumpMk2_C", "Pipeline Pump Mk.2", LogisticsKind::Pump),
    ("Build_PipelinePump_C", "Pipeline Pump", LogisticsKind::Pump),
];

const STORAGE: &[(&str, &str)] = &[
    ("Build_StorageContainerMk1_C", "Storage Container"),
    ("Build_StorageContainerMk2_C", "Industrial Storage"),
    ("Build_CentralStorage_C", "Dimensional Depot"),
    ("Build_IndustrialTank_C", "Industrial Fluid Buffer"),
    ("Build_PipeStorageTank_C", "Fluid Buffer"),
    ("Build_StorageBlueprint_C", "Blueprint Storage"),
];

const STATIONS: &[(&str, &str)] = &[
    ("Build_TruckStation_C", "Truck Station"),
    ("Build_DroneStation_C", "Drone Port"),
    ("Build_TrainStation_C", "Train Station"),
    ("Build_TrainDockingStation_C", "Freight Platform"),
    ("Build_TrainDockingStationLiquid_C", "Fluid Freight Platform"),
];

const CONNECTORS: &[(&str, CapacityTier)] = &[
    ("Build_ConveyorBeltMk1_C", CapacityTier::BeltMk1),
    ("Build_ConveyorBeltMk2_C", CapacityTier::BeltMk2),
    ("Build_ConveyorBeltMk3_C", CapacityTier::BeltMk3),
    ("Build_ConveyorBeltMk4_C", CapacityTier::BeltMk4),
    ("Build_ConveyorBeltMk5_C", CapacityTier::BeltMk5),
    ("Build_ConveyorBeltMk6_C", CapacityTier::BeltMk6),
    ("Build_ConveyorLiftMk1_C", CapacityTier::LiftMk1),
    ("Build_ConveyorLiftMk2_C", CapacityTier::LiftMk2),
    ("Build_ConveyorLiftMk3_C", CapacityTier::LiftMk3),
    ("Build_ConveyorLiftMk4_C", CapacityTier::LiftMk4),
    ("Build_ConveyorLiftMk5_C", CapacityTier::LiftMk5),
    ("Build_ConveyorLiftMk6_C", CapacityTier::LiftMk6),
    ("Build_Pipeline_C", CapacityTier::PipeMk1),
    ("Build_Pipeline_NoIndicator_C", CapacityTier::PipeMk1),
    ("Build_PipelineMK2_C", CapacityTier::PipeMk2),
    ("Build_PipelineMK2_NoIndicator_C", CapacityTier::PipeMk2),
];

/// Short class name: the text after the last `.` of an asset path.
pub fn short_class(tag: &str) -> &str {
    tag.rsplit('.').next().unwrap_or(tag)
}

// ---------------------------------------------------------------------------
// ClassCatalog
// ---------------------------------------------------------------------------

/// Immutable lookup table from short class name to [`ClassInfo`].
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    entries: BTreeMap<String, ClassInfo>,
}

impl Default for ClassCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ClassCatalog {
    /// The built-in catalog of known building classes.
    pub fn builtin() -> Self {
        let mut entries = BTreeMap::new();
        let mut put = |short: &str, family: ClassFamily, name: &str, rate: Option<u32>| {
            entries.insert(
                short.to_string(),
                ClassInfo {
                    family,
                    display_name: name.to_string(),
                    base_rate: rate.map(Fixed64::from_num),
                },
            );
        };
        for (short, name) in PRODUCTION {
            put(short, ClassFamily::Production, name, None);
        }
        for (short, name) in GENERATORS {
            put(short, ClassFamily::Generator, name, None);
        }
        for (short, name, rate) in EXTRACTORS {
            put(short, ClassFamily::Extraction, name, Some(*rate));
        }
        for (short, name, kind) in LOGISTICS {
            put(short, ClassFamily::Logistics(*kind), name, None);
        }
        for (short, name) in STORAGE {
            put(short, ClassFamily::Storage, name, None);
        }
        for (short, name) in STATIONS {
            put(short, ClassFamily::Station, name, None);
        }
        for (short, tier) in CONNECTORS {
            put(short, ClassFamily::Connector(*tier), tier.label(), None);
        }
        Self { entries }
    }

    /// The built-in catalog extended (or overridden) by configured entries.
    pub fn with_overrides(specs: &BTreeMap<String, ClassSpec>) -> Result<Self, ConfigError> {
        let mut catalog = Self::builtin();
        for (short, spec) in specs {
            catalog
                .entries
                .insert(short.clone(), spec.to_info(short)?);
        }
        Ok(catalog)
    }

    /// Classify a class tag. Unknown classes are [`ClassFamily::Other`].
    pub fn classify(&self, class_tag: &str) -> ClassInfo {
        let short = short_class(class_tag);
        self.entries
            .get(short)
            .cloned()
            .unwrap_or_else(|| ClassInfo::other(short))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_class_strips_asset_path() {
        assert_eq!(
            short_class("/Game/FactoryGame/Buildable/Build_SmelterMk1.Build_SmelterMk1_C"),
            "Build_SmelterMk1_C"
        );
        assert_eq!(short_class("Build_SmelterMk1_C"), "Build_SmelterMk1_C");
    }

    #[test]
    fn classifies_known_families() {
        let catalog = ClassCatalog::builtin();
        assert_eq!(
            catalog.classify("Build_SmelterMk1_C").family,
            ClassFamily::Production
        );
        assert_eq!(
            catalog.classify("Build_ConveyorBeltMk2_C").family,
            ClassFamily::Connector(CapacityTier::BeltMk2)
        );
        assert_eq!(
            catalog.classify("Build_ConveyorAttachmentMerger_C").family,
            ClassFamily::Logistics(LogisticsKind::Merger)
        );
        let miner = catalog.classify("Build_MinerMk2_C");
        assert_eq!(miner.family, ClassFamily::Extraction);
        assert_eq!(miner.base_rate, Some(Fixed64::from_num(120)));
    }

    #[test]
    fn unknown_class_is_other() {
        let info = ClassCatalog::builtin().classify("Build_Foundation_8x4_C");
        assert_eq!(info.family, ClassFamily::Other);
        assert_eq!(info.display_name, "Build_Foundation_8x4_C");
    }

    #[test]
    fn tier_rates_match_game_values() {
        assert_eq!(CapacityTier::BeltMk1.rate_per_min(), 60);
        assert_eq!(CapacityTier::BeltMk6.rate_per_min(), 1200);
        assert_eq!(CapacityTier::LiftMk3.rate_per_min(), 270);
        assert_eq!(CapacityTier::PipeMk2.rate_per_min(), 600);
        assert!(CapacityTier::PipeMk1.is_pipe());
        assert!(!CapacityTier::BeltMk1.is_pipe());
    }

    #[test]
    fn capability_predicates() {
        assert!(ClassFamily::Connector(CapacityTier::BeltMk1).is_transport());
        assert!(ClassFamily::Logistics(LogisticsKind::Splitter).is_transport());
        assert!(ClassFamily::Extraction.is_production());
        assert!(!ClassFamily::Storage.is_production());
        assert!(!ClassFamily::Connector(CapacityTier::PipeMk1).is_graph_node());
        assert!(!ClassFamily::Other.is_graph_node());
        assert!(ClassFamily::Station.forwards_input());
    }

    #[test]
    fn overrides_add_and_replace_entries() {
        let mut specs = BTreeMap::new();
        specs.insert(
            "Build_ModdedBelt_C".to_string(),
            ClassSpec {
                family: FamilySpec::Connector,
                name: Some("Modded Belt".into()),
                base_rate: None,
                tier: Some(CapacityTier::BeltMk3),
            },
        );
        specs.insert(
            "Build_SmelterMk1_C".to_string(),
            ClassSpec {
                family: FamilySpec::Storage,
                name: None,
                base_rate: None,
                tier: None,
            },
        );
        let catalog = ClassCatalog::with_overrides(&specs).unwrap();
        let belt = catalog.classify("Build_ModdedBelt_C");
        assert_eq!(belt.family, ClassFamily::Connector(CapacityTier::BeltMk3));
        assert_eq!(belt.display_name, "Modded Belt");
        assert_eq!(
            catalog.classify("Build_SmelterMk1_C").family,
            ClassFamily::Storage
        );
    }

    #[test]
    fn connector_override_requires_tier() {
        let mut specs = BTreeMap::new();
        specs.insert(
            "Build_Bad_C".to_string(),
            ClassSpec {
                family: FamilySpec::Connector,
                name: None,
                base_rate: None,
                tier: None,
            },
        );
        assert!(matches!(
            ClassCatalog::with_overrides(&specs),
            Err(ConfigError::InvalidClass { .. })
        ));
    }
}
