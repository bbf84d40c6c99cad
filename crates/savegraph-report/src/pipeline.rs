//! End-to-end analysis of one save.
//!
//! [`analyze_save`] runs every stage in order and either returns a complete
//! [`AnalysisReport`] or exactly one [`ParseError`]. Each stage runs inside
//! its own `tracing` span.

use savegraph_core::analysis::{AnalysisResult, analyze};
use savegraph_core::builder::build_graph;
use savegraph_core::chunk::SaveHeader;
use savegraph_core::collapse::{CollapsedGraph, collapse};
use savegraph_core::config::AnalysisConfig;
use savegraph_core::deserialize::decode_save;
use savegraph_core::diagnostic::Diagnostic;
use savegraph_core::error::ParseError;
use savegraph_core::graph::ProductionGraph;
use savegraph_core::model::{ModelStats, build_model};
use savegraph_spatial::{Districts, SpatialError, cluster_districts};
use serde::{Deserialize, Serialize};

use crate::issue::{Issue, Severity, detect_all};

/// Everything learned from one save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub header: SaveHeader,
    pub model_stats: ModelStats,
    pub graph: ProductionGraph,
    pub collapsed: CollapsedGraph,
    pub analysis: AnalysisResult,
    pub districts: Districts,
    /// Canonically ordered.
    pub issues: Vec<Issue>,
    /// Recoverable findings of every stage, in stage order.
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisReport {
    pub fn issues_at_least(&self, severity: Severity) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.severity >= severity)
    }

    pub fn has_errors(&self) -> bool {
        self.issues_at_least(Severity::Error).next().is_some()
    }
}

fn spatial_error(err: SpatialError) -> ParseError {
    ParseError::InvalidConfig(err.to_string())
}

/// Decode, model, graph, analyze, cluster and detect issues.
///
/// The configuration is validated before any byte is read.
pub fn analyze_save(bytes: &[u8], config: &AnalysisConfig) -> Result<AnalysisReport, ParseError> {
    config.validate()?;
    let catalog = config.catalog()?;

    let decoded = {
        let _span = tracing::info_span!("decode", bytes = bytes.len()).entered();
        let decoded = decode_save(bytes, config)?;
        tracing::info!(
            version = decoded.header.format_version,
            records = decoded.records.len(),
            "save decoded"
        );
        decoded
    };
    let header = decoded.header;
    let mut diagnostics = decoded.diagnostics;

    let (model, model_stats) = {
        let _span = tracing::info_span!("model").entered();
        let (model, model_diagnostics) = build_model(decoded.records, decoded.trailing)?;
        diagnostics.extend(model_diagnostics);
        let stats = ModelStats::collect(&model, &catalog);
        tracing::info!(
            objects = stats.total_objects,
            buildings = stats.buildings,
            connectors = stats.connectors,
            "object model built"
        );
        (model, stats)
    };

    let (graph, collapsed) = {
        let _span = tracing::info_span!("graph").entered();
        let built = build_graph(&model, &catalog, &config.recipes)?;
        diagnostics.extend(built.diagnostics);
        let collapsed = collapse(&built.graph);
        tracing::info!(
            nodes = built.graph.node_count(),
            edges = built.graph.edge_count(),
            links = collapsed.link_count(),
            "graph built"
        );
        (built.graph, collapsed)
    };

    let analysis = {
        let _span = tracing::info_span!("analyze").entered();
        let analysis = analyze(&graph, &collapsed, config);
        diagnostics.extend(analysis.diagnostics.iter().cloned());
        analysis
    };

    let districts = {
        let _span = tracing::info_span!("cluster").entered();
        cluster_districts(&graph, &collapsed, &analysis, config.district_radius)
            .map_err(spatial_error)?
    };

    let issues = {
        let _span = tracing::info_span!("issues").entered();
        let issues = detect_all(
            &graph,
            &collapsed,
            &analysis,
            &diagnostics,
            &districts,
            config,
        );
        tracing::info!(
            issues = issues.len(),
            errors = issues.iter().filter(|i| i.severity == Severity::Error).count(),
            diagnostics = diagnostics.len(),
            "issues detected"
        );
        issues
    };

    Ok(AnalysisReport {
        header,
        model_stats,
        graph,
        collapsed,
        analysis,
        districts,
        issues,
        diagnostics,
    })
}
