//! Version-keyed tag tables for records and attribute values.
//!
//! A tag is known only from the version that introduced it. Tags that are
//! unknown for the save's version are skipped by their stored length.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    EntityHeader,
    Component,
    Properties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Bool,
    Int,
    Float,
    Text,
    Struct,
    Array,
    Reference,
    Enum,
    Double,
}

pub struct TagEntry<K> {
    pub tag: u8,
    pub kind: K,
    /// First format version that writes this tag.
    pub since: u32,
}

pub const RECORD_TAGS: &[TagEntry<RecordKind>] = &[
    TagEntry { tag: 0x01, kind: RecordKind::EntityHeader, since: 1 },
    TagEntry { tag: 0x02, kind: RecordKind::Component, since: 1 },
    TagEntry { tag: 0x03, kind: RecordKind::Properties, since: 1 },
];

pub const ATTRIBUTE_TAGS: &[TagEntry<AttributeKind>] = &[
    TagEntry { tag: 0x01, kind: AttributeKind::Bool, since: 1 },
    TagEntry { tag: 0x02, kind: AttributeKind::Int, since: 1 },
    TagEntry { tag: 0x03, kind: AttributeKind::Float, since: 1 },
    TagEntry { tag: 0x04, kind: AttributeKind::Text, since: 1 },
    TagEntry { tag: 0x05, kind: AttributeKind::Struct, since: 1 },
    TagEntry { tag: 0x06, kind: AttributeKind::Array, since: 1 },
    TagEntry { tag: 0x07, kind: AttributeKind::Reference, since: 1 },
    TagEntry { tag: 0x08, kind: AttributeKind::Enum, since: 2 },
    TagEntry { tag: 0x09, kind: AttributeKind::Double, since: 3 },
];

/// Version from which entity headers carry a rotation quaternion.
pub const ROTATION_SINCE: u32 = 2;

fn lookup<K: Copy>(table: &[TagEntry<K>], tag: u8, version: u32) -> Option<K> {
    table
        .iter()
        .find(|e| e.tag == tag && e.since <= version)
        .map(|e| e.kind)
}

pub fn record_kind(tag: u8, version: u32) -> Option<RecordKind> {
    lookup(RECORD_TAGS, tag, version)
}

pub fn attribute_kind(tag: u8, version: u32) -> Option<AttributeKind> {
    lookup(ATTRIBUTE_TAGS, tag, version)
}

/// Tag byte written for an attribute kind.
pub fn attribute_tag(kind: AttributeKind) -> u8 {
    ATTRIBUTE_TAGS
        .iter()
        .find(|e| e.kind == kind)
        .map_or(0, |e| e.tag)
}
