//! Typed attribute values.
//!
//! A flat tagged union covers every attribute shape the format knows; values
//! with unknown tags are kept verbatim as [`AttributeValue::Opaque`].

use serde::{Deserialize, Serialize};

use crate::id::ObjectId;

/// State of a reference after the object model has been built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// Not yet resolved (only seen between decoding and model building).
    Pending,
    Entity,
    Component { owner: ObjectId },
    /// Target id is the null id.
    Null,
    /// Target id does not exist in the save.
    Dangling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
    pub target: ObjectId,
    pub resolution: Resolution,
}

impl ObjectReference {
    pub fn pending(target: ObjectId) -> Self {
        Self {
            target,
            resolution: Resolution::Pending,
        }
    }

    pub fn is_dangling(&self) -> bool {
        self.resolution == Resolution::Dangling
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Struct {
        type_name: String,
        fields: Vec<Attribute>,
    },
    Array {
        element_tag: u8,
        elements: Vec<AttributeValue>,
    },
    Reference(ObjectReference),
    Enum {
        type_name: String,
        symbol: String,
    },
    /// Unknown tag, stored bytes preserved.
    Opaque { tag: u8, bytes: Vec<u8> },
}

impl AttributeValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            AttributeValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Numeric value of Int, Float or Double.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Float(f) => Some(f64::from(*f)),
            AttributeValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Enum { symbol, .. } => Some(symbol),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ObjectReference> {
        match self {
            AttributeValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Visit every reference in this value, depth first, with the name of
    /// the innermost named attribute holding it.
    pub fn for_each_reference_mut<F>(&mut self, name: &str, f: &mut F)
    where
        F: FnMut(&str, &mut ObjectReference),
    {
        match self {
            AttributeValue::Reference(r) => f(name, r),
            AttributeValue::Struct { fields, .. } => {
                for field in fields {
                    field.value.for_each_reference_mut(&field.name, f);
                }
            }
            AttributeValue::Array { elements, .. } => {
                for element in elements {
                    element.for_each_reference_mut(name, f);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// First attribute with the given name.
pub fn find<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a AttributeValue> {
    attributes.iter().find(|a| a.name == name).map(|a| &a.value)
}

/// Visit every reference in an attribute list.
pub fn for_each_reference_mut<F>(attributes: &mut [Attribute], f: &mut F)
where
    F: FnMut(&str, &mut ObjectReference),
{
    for attribute in attributes {
        attribute.value.for_each_reference_mut(&attribute.name, f);
    }
}
