//! Object model: entities with their components and resolved references.
//!
//! Built in two passes over the decoded records. The first registers every
//! entity and component id; the second attaches components, properties and
//! opaque blobs to their owners and resolves references against the id
//! registry. Resolution never follows a reference, so reference cycles are
//! harmless.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::attribute::{self, Attribute, AttributeValue, Resolution};
use crate::catalog::{ClassCatalog, ClassFamily};
use crate::deserialize::{RawRecord, RecordBody};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::error::{CorruptKind, ParseError};
use crate::id::ObjectId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: [f32; 3],
    /// Quaternion `[x, y, z, w]`.
    pub rotation: [f32; 4],
}

impl Transform {
    pub const IDENTITY_ROTATION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            rotation: Self::IDENTITY_ROTATION,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::at([0.0; 3])
    }
}

/// Bytes preserved from unknown records or unconsumed payload tails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueBlob {
    /// Record tag for unknown records, `None` for trailing bytes.
    pub tag: Option<u8>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: ObjectId,
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub opaque: Vec<OpaqueBlob>,
}

impl Component {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        attribute::find(&self.attributes, name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: ObjectId,
    pub class: String,
    pub transform: Transform,
    pub attributes: Vec<Attribute>,
    /// Owned components in record order.
    pub components: Vec<Component>,
    pub opaque: Vec<OpaqueBlob>,
}

impl Entity {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        attribute::find(&self.attributes, name)
    }

    pub fn component(&self, id: ObjectId) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn component_named(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// What an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Entity,
    Component { owner: ObjectId },
}

/// All entities of a save, keyed and iterated by ascending id.
#[derive(Debug, Clone, Default)]
pub struct ObjectModel {
    entities: BTreeMap<ObjectId, Entity>,
    component_owner: BTreeMap<ObjectId, ObjectId>,
    /// Bytes after the last complete record of the body.
    pub trailing: Vec<u8>,
}

impl ObjectModel {
    pub fn entity(&self, id: ObjectId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn component_count(&self) -> usize {
        self.component_owner.len()
    }

    /// The owning entity and the component for a component id.
    pub fn component(&self, id: ObjectId) -> Option<(&Entity, &Component)> {
        let owner = self.entities.get(self.component_owner.get(&id)?)?;
        Some((owner, owner.component(id)?))
    }

    pub fn kind_of(&self, id: ObjectId) -> Option<ObjectKind> {
        if self.entities.contains_key(&id) {
            Some(ObjectKind::Entity)
        } else {
            self.component_owner
                .get(&id)
                .map(|owner| ObjectKind::Component { owner: *owner })
        }
    }
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Build the object model from decoded records.
///
/// Duplicate ids are fatal. Orphaned records and dangling references are
/// returned as diagnostics.
pub fn build_model(
    records: Vec<RawRecord>,
    body_trailing: Vec<u8>,
) -> Result<(ObjectModel, Vec<Diagnostic>), ParseError> {
    let mut diagnostics = Vec::new();

    // Pass 1: id registry.
    let mut seen: BTreeSet<ObjectId> = BTreeSet::new();
    let mut entities: BTreeMap<ObjectId, Entity> = BTreeMap::new();
    let mut declared_owner: BTreeMap<ObjectId, ObjectId> = BTreeMap::new();
    for record in &records {
        let registers = match &record.body {
            RecordBody::EntityHeader { class, transform } => {
                entities.insert(
                    record.id,
                    Entity {
                        id: record.id,
                        class: class.clone(),
                        transform: *transform,
                        attributes: Vec::new(),
                        components: Vec::new(),
                        opaque: Vec::new(),
                    },
                );
                true
            }
            RecordBody::Component { owner, .. } => {
                declared_owner.insert(record.id, *owner);
                true
            }
            _ => false,
        };
        if !registers {
            continue;
        }
        if record.id.is_null() {
            return Err(ParseError::corrupt(
                record.offset,
                CorruptKind::InvalidValue("null object id"),
            ));
        }
        if !seen.insert(record.id) {
            return Err(ParseError::corrupt(
                record.offset,
                CorruptKind::DuplicateObjectId(record.id),
            ));
        }
    }

    // Components whose owner is not an entity are dropped.
    let mut component_owner = BTreeMap::new();
    for (id, owner) in declared_owner {
        if entities.contains_key(&owner) {
            component_owner.insert(id, owner);
        }
    }

    // Pass 2a: attach components.
    let mut pending_properties = Vec::new();
    for record in records {
        let RawRecord {
            id,
            offset,
            body,
            trailing,
        } = record;
        let tail = (!trailing.is_empty()).then_some(OpaqueBlob {
            tag: None,
            bytes: trailing,
        });
        match body {
            RecordBody::EntityHeader { .. } => {
                if let (Some(entity), Some(blob)) = (entities.get_mut(&id), tail) {
                    entity.opaque.push(blob);
                }
            }
            RecordBody::Component {
                owner,
                name,
                attributes,
            } => match entities.get_mut(&owner) {
                Some(entity) => entity.components.push(Component {
                    id,
                    name,
                    attributes,
                    opaque: tail.into_iter().collect(),
                }),
                None => {
                    tracing::warn!(%id, %owner, "component without owner");
                    diagnostics.push(Diagnostic::at(
                        offset,
                        DiagnosticKind::OrphanRecord { id, owner },
                    ));
                }
            },
            RecordBody::Properties { attributes } => {
                pending_properties.push((id, offset, Attached::Attributes(attributes), tail));
            }
            RecordBody::Unknown { tag, bytes } => {
                let blob = OpaqueBlob {
                    tag: Some(tag),
                    bytes,
                };
                pending_properties.push((id, offset, Attached::Opaque(blob), tail));
            }
        }
    }

    // Pass 2b: properties and opaque records, now that components exist.
    for (id, offset, attached, tail) in pending_properties {
        let target = match component_owner.get(&id) {
            Some(owner) => entities
                .get_mut(owner)
                .and_then(|e| e.components.iter_mut().find(|c| c.id == id))
                .map(|c| (&mut c.attributes, &mut c.opaque)),
            None => entities
                .get_mut(&id)
                .map(|e| (&mut e.attributes, &mut e.opaque)),
        };
        let Some((attributes, opaque)) = target else {
            diagnostics.push(Diagnostic::at(
                offset,
                DiagnosticKind::OrphanRecord {
                    id,
                    owner: id,
                },
            ));
            continue;
        };
        match attached {
            Attached::Attributes(extra) => attributes.extend(extra),
            Attached::Opaque(blob) => opaque.push(blob),
        }
        opaque.extend(tail);
    }

    // Pass 2c: resolve references in ascending holder order.
    let registry = Registry {
        entities: entities.keys().copied().collect(),
        component_owner: &component_owner,
    };
    for entity in entities.values_mut() {
        registry.resolve(entity.id, &mut entity.attributes, &mut diagnostics);
        for component in &mut entity.components {
            registry.resolve(component.id, &mut component.attributes, &mut diagnostics);
        }
    }

    let model = ObjectModel {
        entities,
        component_owner,
        trailing: body_trailing,
    };
    tracing::debug!(
        entities = model.entity_count(),
        components = model.component_count(),
        "built object model"
    );
    Ok((model, diagnostics))
}

enum Attached {
    Attributes(Vec<Attribute>),
    Opaque(OpaqueBlob),
}

struct Registry<'a> {
    entities: BTreeSet<ObjectId>,
    component_owner: &'a BTreeMap<ObjectId, ObjectId>,
}

impl Registry<'_> {
    fn resolve(
        &self,
        holder: ObjectId,
        attributes: &mut [Attribute],
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        attribute::for_each_reference_mut(attributes, &mut |name, reference| {
            let target = reference.target;
            reference.resolution = if target.is_null() {
                Resolution::Null
            } else if self.entities.contains(&target) {
                Resolution::Entity
            } else if let Some(owner) = self.component_owner.get(&target) {
                Resolution::Component { owner: *owner }
            } else {
                tracing::warn!(%holder, attribute = name, %target, "dangling reference");
                diagnostics.push(Diagnostic::new(DiagnosticKind::DanglingReference {
                    holder,
                    attribute: name.to_string(),
                    target,
                }));
                Resolution::Dangling
            };
        });
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Counts over the object model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStats {
    pub total_objects: usize,
    pub entities: usize,
    pub components: usize,
    /// Entities that become graph nodes.
    pub buildings: usize,
    pub connectors: usize,
    pub by_family: BTreeMap<String, usize>,
    pub by_recipe: BTreeMap<String, usize>,
    pub producing: usize,
    pub idle: usize,
}

impl ModelStats {
    pub fn collect(model: &ObjectModel, catalog: &ClassCatalog) -> Self {
        let mut stats = ModelStats {
            entities: model.entity_count(),
            components: model.component_count(),
            total_objects: model.entity_count() + model.component_count(),
            ..ModelStats::default()
        };
        for entity in model.entities() {
            let family = catalog.classify(&entity.class).family;
            *stats.by_family.entry(family.label().to_string()).or_default() += 1;
            match family {
                ClassFamily::Connector(_) => stats.connectors += 1,
                f if f.is_graph_node() => stats.buildings += 1,
                _ => {}
            }
            if family.is_production() {
                if let Some(recipe) = entity
                    .attribute(crate::builder::ATTR_RECIPE)
                    .and_then(recipe_path)
                {
                    *stats
                        .by_recipe
                        .entry(crate::recipe::recipe_display_name(recipe))
                        .or_default() += 1;
                }
                match entity
                    .attribute(crate::builder::ATTR_IS_PRODUCING)
                    .and_then(AttributeValue::as_bool)
                {
                    Some(false) => stats.idle += 1,
                    _ => stats.producing += 1,
                }
            }
        }
        stats
    }
}

/// Recipe path stored in a recipe attribute (text or soft object path).
pub(crate) fn recipe_path(value: &AttributeValue) -> Option<&str> {
    match value {
        AttributeValue::Text(path) if !path.is_empty() => Some(path),
        AttributeValue::Struct { fields, .. } => {
            attribute::find(fields, "PathName").and_then(recipe_path)
        }
        _ => None,
    }
}
