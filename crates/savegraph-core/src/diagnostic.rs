//! Recoverable findings collected alongside a successful parse.
//!
//! Diagnostics never abort a parse. Each stage appends to the list in the
//! order it visits the input, so the combined list is deterministic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::id::ObjectId;

/// Where an unknown tag was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipContext {
    Record,
    Attribute,
}

/// Where unconsumed bytes were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailingContext {
    /// Inside a known record's payload.
    Record,
    /// After the last complete record of the body.
    Body,
    /// After the last chunk of the file.
    File,
}

/// Classification kinds, ordered by reporting precedence (lowest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassificationKind {
    Bottleneck,
    Backpressure,
    Starvation,
}

impl ClassificationKind {
    /// Higher wins when several apply to the same node.
    pub fn precedence(self) -> u8 {
        match self {
            ClassificationKind::Starvation => 3,
            ClassificationKind::Backpressure => 2,
            ClassificationKind::Bottleneck => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ClassificationKind::Starvation => "starvation",
            ClassificationKind::Backpressure => "backpressure",
            ClassificationKind::Bottleneck => "bottleneck",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// An unknown record or attribute tag was skipped by its stored length
    /// and preserved as an opaque blob.
    SkippedUnknown {
        context: SkipContext,
        tag: u8,
        len: u64,
    },
    TrailingBytes { context: TrailingContext, len: u64 },
    DanglingReference {
        holder: ObjectId,
        attribute: String,
        target: ObjectId,
    },
    /// A component or properties record whose owner does not exist.
    OrphanRecord { id: ObjectId, owner: ObjectId },
    /// A connector end with no usable far side.
    OpenConnector { connector: ObjectId, port: String },
    /// A connector that lost the tie-break for a destination slot.
    UnusedConnector {
        connector: ObjectId,
        /// Node the contested slot belongs to.
        node: ObjectId,
        slot: ObjectId,
        winner: ObjectId,
    },
    /// Clock speed outside `0..=2.5` or not a number; the stored value is
    /// replaced.
    InvalidClock {
        node: ObjectId,
        raw: f64,
        used: f64,
    },
    /// A classification hidden by a higher-precedence one on the same node.
    SuppressedClassification {
        node: ObjectId,
        kind: ClassificationKind,
        by: ClassificationKind,
        ratio: Fixed64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Byte offset for diagnostics raised while decoding.
    pub offset: Option<u64>,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind) -> Self {
        Self { offset: None, kind }
    }

    pub fn at(offset: u64, kind: DiagnosticKind) -> Self {
        Self {
            offset: Some(offset),
            kind,
        }
    }

    pub fn is_dangling(&self) -> bool {
        matches!(self.kind, DiagnosticKind::DanglingReference { .. })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(offset) = self.offset {
            write!(f, "@{offset}: ")?;
        }
        match &self.kind {
            DiagnosticKind::SkippedUnknown { context, tag, len } => {
                write!(f, "skipped unknown {context:?} tag 0x{tag:02X} ({len} bytes)")
            }
            DiagnosticKind::TrailingBytes { context, len } => {
                write!(f, "{len} trailing bytes kept ({context:?})")
            }
            DiagnosticKind::DanglingReference {
                holder,
                attribute,
                target,
            } => write!(f, "{holder}.{attribute} references missing object {target}"),
            DiagnosticKind::OrphanRecord { id, owner } => {
                write!(f, "record {id} dropped, owner {owner} does not exist")
            }
            DiagnosticKind::OpenConnector { connector, port } => {
                write!(f, "connector {connector} port {port} is open")
            }
            DiagnosticKind::UnusedConnector {
                connector,
                node,
                slot,
                winner,
            } => write!(
                f,
                "connector {connector} unused, slot {slot} of {node} already fed by {winner}"
            ),
            DiagnosticKind::InvalidClock { node, raw, used } => {
                write!(f, "node {node} clock {raw} replaced by {used}")
            }
            DiagnosticKind::SuppressedClassification {
                node,
                kind,
                by,
                ratio,
            } => write!(
                f,
                "node {node} {} ({ratio}) suppressed by {}",
                kind.label(),
                by.label()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_orders_kinds() {
        assert!(
            ClassificationKind::Starvation.precedence()
                > ClassificationKind::Backpressure.precedence()
        );
        assert!(
            ClassificationKind::Backpressure.precedence()
                > ClassificationKind::Bottleneck.precedence()
        );
        assert!(ClassificationKind::Starvation > ClassificationKind::Bottleneck);
    }

    #[test]
    fn display_includes_offset_and_ids() {
        let d = Diagnostic::at(
            12,
            DiagnosticKind::DanglingReference {
                holder: ObjectId(5),
                attribute: "mConnectedComponent".into(),
                target: ObjectId(99),
            },
        );
        let text = d.to_string();
        assert!(text.starts_with("@12: "), "{text}");
        assert!(text.contains("#99"), "{text}");
        assert!(d.is_dangling());
    }
}
