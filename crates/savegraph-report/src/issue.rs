//! Issue detection.
//!
//! Issues are the user-facing findings of a report. Flow issues come from the
//! classification the analyzer reported for each node; structural issues come
//! from the graph and the diagnostics collected along the pipeline. Both are
//! pure functions of their inputs and return issues in one canonical order.
//!
//! Starvation and backpressure issues carry a root-cause [`Trace`] along the
//! dominator trees of the collapsed graph.

use std::cmp::Reverse;
use std::fmt;

use savegraph_core::analysis::AnalysisResult;
use savegraph_core::catalog::ClassFamily;
use savegraph_core::collapse::CollapsedGraph;
use savegraph_core::config::AnalysisConfig;
use savegraph_core::diagnostic::{ClassificationKind, Diagnostic, DiagnosticKind};
use savegraph_core::dominator::{RootCauses, Trace};
use savegraph_core::fixed::{Fixed64, fixed64_to_f64};
use savegraph_core::graph::{NodeData, ProductionGraph};
use savegraph_core::id::ObjectId;
use savegraph_spatial::{DistrictId, Districts};
use serde::{Deserialize, Serialize};

/// Ratio below which a deficit is informational.
pub const WARNING_RATIO: f64 = 0.25;
/// Ratio at and above which a deficit is an error.
pub const ERROR_RATIO: f64 = 0.5;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Severity of a deficit ratio. Monotone: a larger ratio never maps to a
    /// lower severity.
    pub fn from_ratio(ratio: Fixed64) -> Self {
        if ratio >= Fixed64::from_num(ERROR_RATIO) {
            Severity::Error
        } else if ratio >= Fixed64::from_num(WARNING_RATIO) {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Issue kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    Starvation,
    Backpressure,
    Bottleneck,
    /// Production building without a recipe.
    NoRecipe,
    /// Production node with demand or output but no edges.
    Unconnected,
    /// Recipe set but the building reports it is not producing.
    Idle,
    /// Producing building whose output goes nowhere.
    DeadEnd,
    /// Connector that lost the tie-break for its destination slot.
    UnusedConnector,
    DanglingReference,
    /// Recipe missing from the recipe book.
    UnknownRecipe,
}

impl IssueKind {
    /// Tie-break rank within one node, lowest first.
    pub fn rank(self) -> u8 {
        match self {
            IssueKind::Starvation => 0,
            IssueKind::Backpressure => 1,
            IssueKind::Bottleneck => 2,
            IssueKind::NoRecipe => 3,
            IssueKind::Unconnected => 4,
            IssueKind::Idle => 5,
            IssueKind::DeadEnd => 6,
            IssueKind::UnusedConnector => 7,
            IssueKind::DanglingReference => 8,
            IssueKind::UnknownRecipe => 9,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            IssueKind::Starvation => "starvation",
            IssueKind::Backpressure => "backpressure",
            IssueKind::Bottleneck => "bottleneck",
            IssueKind::NoRecipe => "no recipe",
            IssueKind::Unconnected => "unconnected",
            IssueKind::Idle => "idle",
            IssueKind::DeadEnd => "dead end",
            IssueKind::UnusedConnector => "unused connector",
            IssueKind::DanglingReference => "dangling reference",
            IssueKind::UnknownRecipe => "unknown recipe",
        }
    }
}

impl From<ClassificationKind> for IssueKind {
    fn from(kind: ClassificationKind) -> Self {
        match kind {
            ClassificationKind::Starvation => IssueKind::Starvation,
            ClassificationKind::Backpressure => IssueKind::Backpressure,
            ClassificationKind::Bottleneck => IssueKind::Bottleneck,
        }
    }
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    /// The node the issue is attributed to.
    pub node: ObjectId,
    /// Connectors involved, ascending.
    pub edges: Vec<ObjectId>,
    pub district: Option<DistrictId>,
    /// Deficit ratio for flow issues.
    pub ratio: Option<Fixed64>,
    /// Upstream or downstream chokepoint for flow issues.
    pub root_cause: Option<Trace>,
    pub summary: String,
}

impl Issue {
    pub fn first_edge(&self) -> Option<ObjectId> {
        self.edges.first().copied()
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind.label(), self.summary)
    }
}

/// Canonical issue order: severity descending, then node id, then kind
/// rank, then first edge id.
pub fn sort_issues(issues: &mut [Issue]) {
    issues.sort_by_key(|i| (Reverse(i.severity), i.node, i.kind.rank(), i.first_edge()));
}

fn percent(ratio: Fixed64) -> f64 {
    fixed64_to_f64(ratio) * 100.0
}

// ---------------------------------------------------------------------------
// Flow issues
// ---------------------------------------------------------------------------

fn with_cause(summary: String, trace: Option<&Trace>) -> String {
    match trace {
        Some(Trace {
            cause,
            chokepoint: Some(chokepoint),
            ..
        }) => format!("{summary}; limited at {chokepoint} ({})", cause.label()),
        _ => summary,
    }
}

/// One issue per node with a reported classification.
///
/// Suppressed classifications stay in the analysis and diagnostics. The
/// threshold was already applied by the analyzer; it is applied again here
/// so a result analyzed under a lower threshold can be re-filtered.
pub fn detect_issues(
    graph: &ProductionGraph,
    collapsed: &CollapsedGraph,
    analysis: &AnalysisResult,
    districts: &Districts,
    config: &AnalysisConfig,
) -> Vec<Issue> {
    let threshold = config.threshold();
    let causes = RootCauses::new(graph, collapsed);
    let mut issues: Vec<Issue> = analysis
        .nodes
        .values()
        .filter_map(|flow| {
            let reported = flow.reported()?;
            if reported.ratio <= Fixed64::ZERO || reported.ratio < threshold {
                return None;
            }
            let summary = match reported.kind {
                ClassificationKind::Starvation => format!(
                    "node {} receives {} of {} per minute ({:.1}% short)",
                    flow.object,
                    flow.available_input,
                    flow.required_input,
                    percent(reported.ratio)
                ),
                ClassificationKind::Backpressure => format!(
                    "node {} offers more than its outgoing connectors carry ({:.1}% over capacity)",
                    flow.object,
                    percent(reported.ratio)
                ),
                ClassificationKind::Bottleneck => format!(
                    "node {} ships {} of a potential {} per minute ({:.1}% lost)",
                    flow.object,
                    flow.actual_output,
                    flow.potential_output,
                    percent(reported.ratio)
                ),
            };
            let root_cause = causes.trace(graph, collapsed, analysis, flow.object, reported.kind);
            Some(Issue {
                kind: reported.kind.into(),
                severity: Severity::from_ratio(reported.ratio),
                node: flow.object,
                edges: reported.connectors.clone(),
                district: districts.district_of(flow.object),
                ratio: Some(reported.ratio),
                summary: with_cause(summary, root_cause.as_ref()),
                root_cause,
            })
        })
        .collect();
    sort_issues(&mut issues);
    issues
}

// ---------------------------------------------------------------------------
// Structural issues
// ---------------------------------------------------------------------------

fn structural(
    kind: IssueKind,
    severity: Severity,
    node: ObjectId,
    edges: Vec<ObjectId>,
    districts: &Districts,
    summary: String,
) -> Issue {
    Issue {
        kind,
        severity,
        node,
        edges,
        district: districts.district_of(node),
        ratio: None,
        root_cause: None,
        summary,
    }
}

fn node_issues(
    graph: &ProductionGraph,
    analysis: &AnalysisResult,
    districts: &Districts,
    data: &NodeData,
    out: &mut Vec<Issue>,
) {
    let (Some(family), Some(profile)) = (data.family(), data.production.as_ref()) else {
        return;
    };
    let Some(node) = graph.node_for(data.object) else {
        return;
    };
    let inputs = graph.get_inputs(node);
    let outputs = graph.get_outputs(node);
    let label = if data.name.is_empty() {
        data.class.as_str()
    } else {
        data.name.as_str()
    };

    if family == ClassFamily::Production {
        match &profile.recipe {
            None => out.push(structural(
                IssueKind::NoRecipe,
                Severity::Error,
                data.object,
                Vec::new(),
                districts,
                format!("{label} {} has no recipe", data.object),
            )),
            Some(recipe) if !profile.rates_known => out.push(structural(
                IssueKind::UnknownRecipe,
                Severity::Info,
                data.object,
                Vec::new(),
                districts,
                format!("{label} {} uses {recipe}, which is not in the recipe book", data.object),
            )),
            Some(recipe) if profile.producing == Some(false) => out.push(structural(
                IssueKind::Idle,
                Severity::Warning,
                data.object,
                Vec::new(),
                districts,
                format!("{label} {} is set to {recipe} but is not producing", data.object),
            )),
            Some(_) => {}
        }
    }

    let has_demand = profile.designed_input > Fixed64::ZERO;
    let has_output = profile.designed_output > Fixed64::ZERO;
    if inputs.is_empty() && outputs.is_empty() && (has_demand || has_output) {
        out.push(structural(
            IssueKind::Unconnected,
            Severity::Error,
            data.object,
            Vec::new(),
            districts,
            format!("{label} {} is not connected to anything", data.object),
        ));
    } else if family == ClassFamily::Production
        && profile.producing == Some(true)
        && has_output
        && outputs.is_empty()
    {
        let potential = analysis
            .node(data.object)
            .map_or(profile.designed_output, |flow| flow.potential_output);
        out.push(structural(
            IssueKind::DeadEnd,
            Severity::Warning,
            data.object,
            Vec::new(),
            districts,
            format!(
                "{label} {} produces {potential} per minute with no outgoing connector",
                data.object
            ),
        ));
    }
}

/// Issues derived from the graph and the collected diagnostics.
pub fn detect_structural_issues(
    graph: &ProductionGraph,
    analysis: &AnalysisResult,
    diagnostics: &[Diagnostic],
    districts: &Districts,
    config: &AnalysisConfig,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (_, data) in graph.nodes() {
        node_issues(graph, analysis, districts, data, &mut issues);
    }

    for diagnostic in diagnostics {
        match &diagnostic.kind {
            DiagnosticKind::UnusedConnector {
                connector,
                node,
                winner,
                ..
            } => issues.push(structural(
                IssueKind::UnusedConnector,
                Severity::Warning,
                *node,
                vec![*connector],
                districts,
                format!("connector {connector} is unused, {node} is already fed by {winner}"),
            )),
            DiagnosticKind::DanglingReference {
                holder,
                attribute,
                target,
            } if config.include_dangling_as_issues => issues.push(structural(
                IssueKind::DanglingReference,
                Severity::Warning,
                *holder,
                Vec::new(),
                districts,
                format!("{holder}.{attribute} references missing object {target}"),
            )),
            _ => {}
        }
    }
    sort_issues(&mut issues);
    issues
}

/// Flow and structural issues merged in canonical order.
pub fn detect_all(
    graph: &ProductionGraph,
    collapsed: &CollapsedGraph,
    analysis: &AnalysisResult,
    diagnostics: &[Diagnostic],
    districts: &Districts,
    config: &AnalysisConfig,
) -> Vec<Issue> {
    let mut issues = detect_issues(graph, collapsed, analysis, districts, config);
    issues.extend(detect_structural_issues(
        graph,
        analysis,
        diagnostics,
        districts,
        config,
    ));
    sort_issues(&mut issues);
    issues
}
