//! Fatal error taxonomy shared by every parsing stage.

use crate::id::ObjectId;
use std::fmt;

/// Why a save was rejected as structurally corrupt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptKind {
    /// The stream ended before a declared structure was complete.
    Truncated { needed: u64, available: u64 },
    BadMagic([u8; 4]),
    BadChunkTag(u32),
    /// Chunk indices are not exactly `0..chunk_count`.
    ChunkIndex { index: u32, chunk_count: u32 },
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Decompressed size differs from the declared size.
    LengthMismatch { declared: u64, actual: u64 },
    UnknownCompression(u8),
    Decompress(String),
    InvalidUtf8,
    DuplicateObjectId(ObjectId),
    NestingTooDeep { limit: usize },
    /// A tag that has a fixed meaning in this version carried an invalid value.
    InvalidValue(&'static str),
}

impl fmt::Display for CorruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptKind::Truncated { needed, available } => {
                write!(f, "truncated: need {needed} bytes, {available} available")
            }
            CorruptKind::BadMagic(m) => write!(f, "bad magic {m:02X?}"),
            CorruptKind::BadChunkTag(t) => write!(f, "bad chunk tag 0x{t:08X}"),
            CorruptKind::ChunkIndex { index, chunk_count } => {
                write!(f, "chunk index {index} invalid for {chunk_count} chunks")
            }
            CorruptKind::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch (expected {expected:#010X}, got {actual:#010X})"
            ),
            CorruptKind::LengthMismatch { declared, actual } => {
                write!(f, "declared {declared} bytes, decoded {actual}")
            }
            CorruptKind::UnknownCompression(c) => write!(f, "unknown compression {c}"),
            CorruptKind::Decompress(msg) => write!(f, "decompression failed: {msg}"),
            CorruptKind::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            CorruptKind::DuplicateObjectId(id) => write!(f, "duplicate object id {id}"),
            CorruptKind::NestingTooDeep { limit } => {
                write!(f, "attribute nesting deeper than {limit}")
            }
            CorruptKind::InvalidValue(what) => write!(f, "invalid {what}"),
        }
    }
}

/// Fatal errors. A parse either succeeds (possibly with diagnostics) or
/// returns exactly one of these; no partial result accompanies an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unsupported save version {found} (supported {min}..={max})")]
    UnsupportedVersion { found: u32, min: u32, max: u32 },
    #[error("corrupt save at byte {offset}: {kind}")]
    CorruptSave { offset: u64, kind: CorruptKind },
    #[error("declared length {declared} at byte {offset} exceeds limit {limit}")]
    ResourceLimitExceeded { declared: u64, limit: u64, offset: u64 },
    /// The analysis configuration was rejected before any byte was read.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("internal graph inconsistency: {0}")]
    GraphInconsistency(String),
}

impl ParseError {
    pub fn corrupt(offset: u64, kind: CorruptKind) -> Self {
        ParseError::CorruptSave { offset, kind }
    }

    /// Byte offset for errors tied to a stream position.
    pub fn offset(&self) -> Option<u64> {
        match self {
            ParseError::CorruptSave { offset, .. }
            | ParseError::ResourceLimitExceeded { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_error_mentions_offset() {
        let err = ParseError::corrupt(
            128,
            CorruptKind::ChecksumMismatch {
                expected: 1,
                actual: 2,
            },
        );
        let msg = err.to_string();
        assert!(msg.contains("128"), "{msg}");
        assert!(msg.contains("checksum mismatch"), "{msg}");
        assert_eq!(err.offset(), Some(128));
    }

    #[test]
    fn version_error_has_no_offset() {
        let err = ParseError::UnsupportedVersion {
            found: 9,
            min: 1,
            max: 3,
        };
        assert_eq!(err.offset(), None);
        assert!(err.to_string().contains("9"));
    }
}
