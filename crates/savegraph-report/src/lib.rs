//! Savegraph Report -- the public entry point.
//!
//! [`analyze_save`] runs the whole pipeline over the bytes of one save and
//! returns an [`AnalysisReport`]: header, object-model statistics, raw and
//! collapsed graphs, flow analysis, districts, ranked issues and every
//! recoverable diagnostic. Reports can be handed off as deterministic
//! bitcode snapshots via [`ReportSnapshot`].
//!
//! The library never installs a `tracing` subscriber; callers decide where
//! the per-stage spans go.

pub mod issue;
pub mod pipeline;
pub mod snapshot;

pub use issue::{Issue, IssueKind, Severity, detect_all, detect_issues, detect_structural_issues};
pub use pipeline::{AnalysisReport, analyze_save};
pub use snapshot::{REPORT_FORMAT_VERSION, REPORT_MAGIC, ReportSnapshot, SnapshotError};
