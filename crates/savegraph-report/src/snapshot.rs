//! Binary report snapshots.
//!
//! A snapshot is the bitcode encoding of a versioned header followed by the
//! full [`AnalysisReport`]. Encoding is deterministic, so two analyses of the
//! same save produce byte-identical snapshots.

use serde::{Deserialize, Serialize};

use crate::pipeline::AnalysisReport;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a savegraph report snapshot.
pub const REPORT_MAGIC: u32 = 0x5347_5250;

/// Current snapshot format version. Increment when the report layout changes.
pub const REPORT_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", REPORT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported snapshot version {0} (expected {REPORT_FORMAT_VERSION})")]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {REPORT_FORMAT_VERSION})")]
    FutureVersion(u32),
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Format version of the save the report was built from.
    pub save_version: u32,
}

impl SnapshotHeader {
    pub fn new(save_version: u32) -> Self {
        Self {
            magic: REPORT_MAGIC,
            version: REPORT_FORMAT_VERSION,
            save_version,
        }
    }

    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.magic != REPORT_MAGIC {
            return Err(SnapshotError::InvalidMagic(self.magic));
        }
        if self.version > REPORT_FORMAT_VERSION {
            return Err(SnapshotError::FutureVersion(self.version));
        }
        if self.version < REPORT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SnapshotRef<'a> {
    header: SnapshotHeader,
    report: &'a AnalysisReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub header: SnapshotHeader,
    pub report: AnalysisReport,
}

impl ReportSnapshot {
    /// Encode a report with a current-version header.
    pub fn encode(report: &AnalysisReport) -> Result<Vec<u8>, SnapshotError> {
        let snapshot = SnapshotRef {
            header: SnapshotHeader::new(report.header.format_version),
            report,
        };
        bitcode::serialize(&snapshot).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    /// Decode a snapshot and validate its header.
    ///
    /// bitcode cannot decode a prefix, so the whole snapshot is decoded
    /// before the header is checked.
    pub fn decode(data: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: ReportSnapshot =
            bitcode::deserialize(data).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        snapshot.header.validate()?;
        Ok(snapshot)
    }
}
