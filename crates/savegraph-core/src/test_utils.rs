//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).
//!
//! [`SaveWriter`] produces well-formed save bytes record by record;
//! [`FactoryFixture`] sits on top of it and lays out buildings, ports and
//! connectors the way a real save stores them.

use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Range;

use flate2::Compression as ZlibLevel;
use flate2::write::ZlibEncoder;
use xxhash_rust::xxh32::xxh32;

use crate::attribute::{Attribute, AttributeValue};
use crate::builder::{ATTR_CONNECTED, GraphBuild, build_graph};
use crate::chunk::{CHECKSUM_SEED, CHUNK_TAG, CURRENT_VERSION, Compression, SAVE_MAGIC};
use crate::config::AnalysisConfig;
use crate::deserialize::decode_save;
use crate::diagnostic::Diagnostic;
use crate::error::ParseError;
use crate::fixed::Fixed64;
use crate::id::ObjectId;
use crate::model::{ObjectModel, build_model};
use crate::schema::{AttributeKind, ROTATION_SINCE, attribute_tag};

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Primitive encoding
// ===========================================================================

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn put_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

// ===========================================================================
// Record encoding
// ===========================================================================

/// Encoders for record payloads and attribute values.
pub struct RecordWriter;

impl RecordWriter {
    /// A full record: tag, id, length, payload.
    pub fn record(tag: u8, id: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(13 + payload.len());
        out.push(tag);
        put_u64(&mut out, id);
        put_len_prefixed(&mut out, payload);
        out
    }

    pub fn entity_payload(version: u32, class: &str, position: [f32; 3]) -> Vec<u8> {
        let mut out = Vec::new();
        put_str(&mut out, class);
        for p in position {
            out.extend_from_slice(&p.to_le_bytes());
        }
        if version >= ROTATION_SINCE {
            for q in [0.0f32, 0.0, 0.0, 1.0] {
                out.extend_from_slice(&q.to_le_bytes());
            }
        }
        out
    }

    pub fn component_payload(owner: u64, name: &str, attributes: &[Attribute]) -> Vec<u8> {
        let mut out = Vec::new();
        put_u64(&mut out, owner);
        put_str(&mut out, name);
        Self::attribute_list(&mut out, attributes);
        out
    }

    pub fn properties_payload(attributes: &[Attribute]) -> Vec<u8> {
        let mut out = Vec::new();
        Self::attribute_list(&mut out, attributes);
        out
    }

    pub fn attribute_list(out: &mut Vec<u8>, attributes: &[Attribute]) {
        put_u32(out, attributes.len() as u32);
        for attribute in attributes {
            put_str(out, &attribute.name);
            let (tag, bytes) = Self::value(&attribute.value);
            out.push(tag);
            put_len_prefixed(out, &bytes);
        }
    }

    /// Tag and encoded bytes of a value. Opaque values are written verbatim.
    pub fn value(value: &AttributeValue) -> (u8, Vec<u8>) {
        let mut out = Vec::new();
        let kind = match value {
            AttributeValue::Bool(b) => {
                out.push(u8::from(*b));
                AttributeKind::Bool
            }
            AttributeValue::Int(i) => {
                out.extend_from_slice(&i.to_le_bytes());
                AttributeKind::Int
            }
            AttributeValue::Float(f) => {
                out.extend_from_slice(&f.to_le_bytes());
                AttributeKind::Float
            }
            AttributeValue::Double(d) => {
                out.extend_from_slice(&d.to_le_bytes());
                AttributeKind::Double
            }
            AttributeValue::Text(s) => {
                put_str(&mut out, s);
                AttributeKind::Text
            }
            AttributeValue::Reference(r) => {
                put_u64(&mut out, r.target.0);
                AttributeKind::Reference
            }
            AttributeValue::Enum { type_name, symbol } => {
                put_str(&mut out, type_name);
                put_str(&mut out, symbol);
                AttributeKind::Enum
            }
            AttributeValue::Struct { type_name, fields } => {
                put_str(&mut out, type_name);
                Self::attribute_list(&mut out, fields);
                AttributeKind::Struct
            }
            AttributeValue::Array {
                element_tag,
                elements,
            } => {
                out.push(*element_tag);
                put_u32(&mut out, elements.len() as u32);
                for element in elements {
                    let (_, bytes) = Self::value(element);
                    put_len_prefixed(&mut out, &bytes);
                }
                AttributeKind::Array
            }
            AttributeValue::Opaque { tag, bytes } => return (*tag, bytes.clone()),
        };
        (attribute_tag(kind), out)
    }
}

/// Attribute constructors.
pub mod attr {
    use super::*;
    use crate::attribute::ObjectReference;

    pub fn boolean(name: &str, v: bool) -> Attribute {
        Attribute::new(name, AttributeValue::Bool(v))
    }

    pub fn int(name: &str, v: i64) -> Attribute {
        Attribute::new(name, AttributeValue::Int(v))
    }

    pub fn float(name: &str, v: f32) -> Attribute {
        Attribute::new(name, AttributeValue::Float(v))
    }

    pub fn double(name: &str, v: f64) -> Attribute {
        Attribute::new(name, AttributeValue::Double(v))
    }

    pub fn text(name: &str, v: &str) -> Attribute {
        Attribute::new(name, AttributeValue::Text(v.to_string()))
    }

    pub fn reference(name: &str, target: u64) -> Attribute {
        Attribute::new(
            name,
            AttributeValue::Reference(ObjectReference::pending(ObjectId(target))),
        )
    }

    pub fn reference_array(name: &str, targets: &[u64]) -> Attribute {
        Attribute::new(
            name,
            AttributeValue::Array {
                element_tag: attribute_tag(AttributeKind::Reference),
                elements: targets
                    .iter()
                    .map(|t| AttributeValue::Reference(ObjectReference::pending(ObjectId(*t))))
                    .collect(),
            },
        )
    }

    pub fn enumeration(name: &str, type_name: &str, symbol: &str) -> Attribute {
        Attribute::new(
            name,
            AttributeValue::Enum {
                type_name: type_name.to_string(),
                symbol: symbol.to_string(),
            },
        )
    }

    pub fn structure(name: &str, type_name: &str, fields: Vec<Attribute>) -> Attribute {
        Attribute::new(
            name,
            AttributeValue::Struct {
                type_name: type_name.to_string(),
                fields,
            },
        )
    }

    /// A value written with an arbitrary tag and payload.
    pub fn raw(name: &str, tag: u8, bytes: Vec<u8>) -> Attribute {
        Attribute::new(name, AttributeValue::Opaque { tag, bytes })
    }
}

// ===========================================================================
// Save encoding
// ===========================================================================

/// One chunk of the body as laid out by [`SaveWriter`].
#[derive(Debug, Clone)]
pub struct ChunkSpec {
    pub index: u32,
    pub range: Range<usize>,
    pub compression: Compression,
    /// Stored checksum; the correct one when `None`.
    pub checksum: Option<u32>,
}

impl ChunkSpec {
    pub fn range(index: u32, range: Range<usize>, compression: Compression) -> Self {
        Self {
            index,
            range,
            compression,
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: u32) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

/// Builder for complete save files.
///
/// Records are appended to the body in call order. Without explicit
/// [`chunks`](SaveWriter::chunks) the whole body goes into one zlib chunk
/// (no chunk at all when the body is empty).
#[derive(Debug, Clone)]
pub struct SaveWriter {
    version: u32,
    build_number: u32,
    session: String,
    play_seconds: u64,
    body: Vec<u8>,
    chunks: Option<Vec<ChunkSpec>>,
}

impl SaveWriter {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            build_number: 1,
            session: String::new(),
            play_seconds: 0,
            body: Vec::new(),
            chunks: None,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn session(mut self, name: &str) -> Self {
        self.session = name.to_string();
        self
    }

    pub fn play_seconds(mut self, seconds: u64) -> Self {
        self.play_seconds = seconds;
        self
    }

    pub fn build_number(mut self, build: u32) -> Self {
        self.build_number = build;
        self
    }

    pub fn raw_body(mut self, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(bytes);
        self
    }

    pub fn raw_record(self, tag: u8, id: u64, payload: &[u8]) -> Self {
        let record = RecordWriter::record(tag, id, payload);
        self.raw_body(&record)
    }

    pub fn entity(self, id: u64, class: &str, position: [f32; 3]) -> Self {
        let payload = RecordWriter::entity_payload(self.version, class, position);
        self.raw_record(0x01, id, &payload)
    }

    pub fn component(self, id: u64, owner: u64, name: &str, attributes: Vec<Attribute>) -> Self {
        let payload = RecordWriter::component_payload(owner, name, &attributes);
        self.raw_record(0x02, id, &payload)
    }

    pub fn properties(self, id: u64, attributes: Vec<Attribute>) -> Self {
        let payload = RecordWriter::properties_payload(&attributes);
        self.raw_record(0x03, id, &payload)
    }

    pub fn chunks(mut self, chunks: Vec<ChunkSpec>) -> Self {
        self.chunks = Some(chunks);
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn finish(self) -> Vec<u8> {
        let chunks = match self.chunks {
            Some(chunks) => chunks,
            None if self.body.is_empty() => Vec::new(),
            None => vec![ChunkSpec::range(0, 0..self.body.len(), Compression::Zlib)],
        };

        let mut out = Vec::new();
        out.extend_from_slice(&SAVE_MAGIC);
        put_u32(&mut out, self.version);
        put_u32(&mut out, self.build_number);
        put_str(&mut out, &self.session);
        put_u64(&mut out, self.play_seconds);
        put_u32(&mut out, chunks.len() as u32);

        for spec in chunks {
            let data = &self.body[spec.range.clone()];
            let payload = match spec.compression {
                Compression::Stored => data.to_vec(),
                Compression::Zlib => zlib(data),
            };
            put_u32(&mut out, CHUNK_TAG);
            put_u32(&mut out, spec.index);
            out.push(spec.compression.as_u8());
            put_u32(&mut out, payload.len() as u32);
            put_u32(&mut out, data.len() as u32);
            put_u32(
                &mut out,
                spec.checksum.unwrap_or_else(|| xxh32(data, CHECKSUM_SEED)),
            );
            out.extend_from_slice(&payload);
        }
        out
    }
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), ZlibLevel::default());
    encoder.write_all(data).expect("write to Vec");
    encoder.finish().expect("finish zlib stream")
}

// ===========================================================================
// Factory fixture
// ===========================================================================

#[derive(Debug, Clone)]
struct FixtureComponent {
    id: ObjectId,
    name: String,
    attributes: Vec<Attribute>,
}

#[derive(Debug, Clone)]
struct FixtureEntity {
    class: String,
    position: [f32; 3],
    components: Vec<FixtureComponent>,
    properties: Vec<Attribute>,
}

/// First id handed out to generated port components.
const FIRST_PORT_ID: u64 = 1_000_000;

/// A factory laid out as entities, port components and connectors.
///
/// Connector ports reference the building ports they touch and vice versa,
/// matching how saves link both sides.
#[derive(Debug, Clone)]
pub struct FactoryFixture {
    entities: BTreeMap<ObjectId, FixtureEntity>,
    port_owner: BTreeMap<ObjectId, ObjectId>,
    next_port: u64,
}

impl Default for FactoryFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl FactoryFixture {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            port_owner: BTreeMap::new(),
            next_port: FIRST_PORT_ID,
        }
    }

    pub fn building(&mut self, id: u64, class: &str, position: [f32; 3]) -> ObjectId {
        let id = ObjectId(id);
        self.entities.insert(
            id,
            FixtureEntity {
                class: class.to_string(),
                position,
                components: Vec::new(),
                properties: Vec::new(),
            },
        );
        id
    }

    /// Add a named port component to an entity.
    pub fn port(&mut self, owner: ObjectId, name: &str) -> ObjectId {
        let id = ObjectId(self.next_port);
        self.next_port += 1;
        if let Some(entity) = self.entities.get_mut(&owner) {
            entity.components.push(FixtureComponent {
                id,
                name: name.to_string(),
                attributes: Vec::new(),
            });
            self.port_owner.insert(id, owner);
        }
        id
    }

    fn port_mut(&mut self, port: ObjectId) -> Option<&mut FixtureComponent> {
        let owner = self.port_owner.get(&port)?;
        self.entities
            .get_mut(owner)?
            .components
            .iter_mut()
            .find(|c| c.id == port)
    }

    /// Point `port` at `target`, replacing any earlier link.
    fn point(&mut self, port: ObjectId, target: ObjectId) {
        if let Some(component) = self.port_mut(port) {
            component.attributes.retain(|a| a.name != ATTR_CONNECTED);
            component.attributes.push(attr::reference(ATTR_CONNECTED, target.0));
        }
    }

    fn connector(
        &mut self,
        id: u64,
        class: &str,
        names: [&str; 2],
        from: Option<ObjectId>,
        to: Option<ObjectId>,
    ) -> (ObjectId, ObjectId) {
        let connector = self.building(id, class, [0.0; 3]);
        let intake = self.port(connector, names[0]);
        let delivery = self.port(connector, names[1]);
        for (own, far) in [(intake, from), (delivery, to)] {
            if let Some(far) = far {
                self.point(own, far);
                if self.port_owner.contains_key(&far) {
                    self.point(far, own);
                }
            }
        }
        (intake, delivery)
    }

    /// A belt or lift; returns its intake and delivery ports.
    pub fn belt(
        &mut self,
        id: u64,
        class: &str,
        from: Option<ObjectId>,
        to: Option<ObjectId>,
    ) -> (ObjectId, ObjectId) {
        self.connector(id, class, ["ConveyorAny0", "ConveyorAny1"], from, to)
    }

    /// A pipe; `from` touches connection 0.
    pub fn pipe(
        &mut self,
        id: u64,
        class: &str,
        from: Option<ObjectId>,
        to: Option<ObjectId>,
    ) -> (ObjectId, ObjectId) {
        self.connector(
            id,
            class,
            ["PipelineConnection0", "PipelineConnection1"],
            from,
            to,
        )
    }

    /// Belt from a fresh output port of `from` to a fresh input port of `to`.
    pub fn convey(&mut self, id: u64, class: &str, from: ObjectId, to: ObjectId) -> ObjectId {
        let out = self.next_port_named(from, "Output");
        let inp = self.next_port_named(to, "Input");
        self.belt(id, class, Some(out), Some(inp));
        ObjectId(id)
    }

    fn next_port_named(&mut self, owner: ObjectId, prefix: &str) -> ObjectId {
        let n = self.entities.get(&owner).map_or(0, |e| {
            e.components
                .iter()
                .filter(|c| c.name.starts_with(prefix))
                .count()
        });
        self.port(owner, &format!("{prefix}{n}"))
    }

    /// Link two connector ports end to end.
    pub fn link_ports(&mut self, a: ObjectId, b: ObjectId) {
        self.point(a, b);
        self.point(b, a);
    }

    /// Append properties to an entity.
    pub fn set(&mut self, entity: ObjectId, attributes: Vec<Attribute>) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.properties.extend(attributes);
        }
    }

    /// Entities with their components, then one properties record per
    /// entity that has any.
    pub fn writer(&self, version: u32) -> SaveWriter {
        let mut writer = SaveWriter::new(version).session("Fixture");
        for (id, entity) in &self.entities {
            writer = writer.entity(id.0, &entity.class, entity.position);
            for c in &entity.components {
                writer = writer.component(c.id.0, id.0, &c.name, c.attributes.clone());
            }
        }
        for (id, entity) in &self.entities {
            if !entity.properties.is_empty() {
                writer = writer.properties(id.0, entity.properties.clone());
            }
        }
        writer
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.writer(CURRENT_VERSION).finish()
    }

    pub fn model(&self, config: &AnalysisConfig) -> Result<(ObjectModel, Vec<Diagnostic>), ParseError> {
        let decoded = decode_save(&self.bytes(), config)?;
        let (model, model_diagnostics) = build_model(decoded.records, decoded.trailing)?;
        let mut diagnostics = decoded.diagnostics;
        diagnostics.extend(model_diagnostics);
        Ok((model, diagnostics))
    }

    /// Decode and model diagnostics, plus the graph build.
    pub fn model_and_graph(
        &self,
        config: &AnalysisConfig,
    ) -> Result<(Vec<Diagnostic>, GraphBuild), ParseError> {
        let (model, diagnostics) = self.model(config)?;
        let catalog = config.catalog()?;
        let built = build_graph(&model, &catalog, &config.recipes)?;
        Ok((diagnostics, built))
    }

    pub fn graph(&self, config: &AnalysisConfig) -> Result<GraphBuild, ParseError> {
        self.model_and_graph(config).map(|(_, built)| built)
    }
}

// ===========================================================================
// Factory builders
// ===========================================================================

/// Recipe used by the factory builders: 30/min in, 30/min out.
pub const LINE_RECIPE: &str = "/Game/Recipes/Recipe_IngotIron.Recipe_IngotIron_C";

/// Configuration with [`LINE_RECIPE`] registered.
pub fn line_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config
        .recipes
        .insert("Recipe_IngotIron", crate::recipe::RecipeRate::new(30.0, 30.0));
    config
}

/// A miner feeding a chain of `length` smelters on Mk.1 belts.
pub fn chain_factory(length: usize) -> FactoryFixture {
    let mut f = FactoryFixture::new();
    let mut previous = f.building(1, "Build_MinerMk1_C", [0.0; 3]);
    for i in 0..length as u64 {
        let smelter = f.building(10 + i, "Build_SmelterMk1_C", [(i + 1) as f32 * 100.0, 0.0, 0.0]);
        f.set(smelter, vec![attr::text("mCurrentRecipe", LINE_RECIPE)]);
        f.convey(100_000 + i, "Build_ConveyorBeltMk1_C", previous, smelter);
        previous = smelter;
    }
    f
}

/// `rows` x `cols` smelters in a grid; each row is a chain fed by a miner.
pub fn grid_factory(rows: usize, cols: usize) -> FactoryFixture {
    let mut f = FactoryFixture::new();
    let mut next_id = 1u64;
    let mut belt_id = 500_000u64;
    for r in 0..rows {
        let mut previous = f.building(next_id, "Build_MinerMk2_C", [0.0, r as f32 * 100.0, 0.0]);
        next_id += 1;
        for c in 0..cols {
            let pos = [(c + 1) as f32 * 100.0, r as f32 * 100.0, 0.0];
            let smelter = f.building(next_id, "Build_SmelterMk1_C", pos);
            next_id += 1;
            f.set(smelter, vec![attr::text("mCurrentRecipe", LINE_RECIPE)]);
            f.convey(belt_id, "Build_ConveyorBeltMk1_C", previous, smelter);
            belt_id += 1;
            previous = smelter;
        }
    }
    f
}
