//! Savegraph Core -- save-file decoding and production-graph analysis.
//!
//! This crate turns the bytes of a factory save into an object model, builds
//! the production graph the conveyors and pipes describe, and analyzes
//! throughput over it with deterministic fixed-point arithmetic.
//!
//! # Pipeline
//!
//! 1. **Container** -- [`chunk::read_container`] validates the header and
//!    assembles the body from its (possibly compressed, possibly reordered)
//!    chunks.
//! 2. **Records** -- [`deserialize::decode_records`] decodes entity,
//!    component and properties records through the version-keyed tag tables
//!    in [`schema`].
//! 3. **Object model** -- [`model::build_model`] attaches components and
//!    properties to their entities and resolves every object reference.
//! 4. **Graph** -- [`builder::build_graph`] classifies entities via the
//!    [`catalog`] and links buildings through connector ports.
//! 5. **Collapse** -- [`collapse::collapse`] merges pass-through chains into
//!    logical links.
//! 6. **Analysis** -- [`analysis::analyze`] propagates flows and classifies
//!    starvation, backpressure and bottlenecks.
//! 7. **Root causes** -- [`dominator::RootCauses`] traces starved and
//!    backed-up nodes along their dominator trees to the limiting node.
//!
//! Every stage either succeeds, possibly with [`diagnostic::Diagnostic`]s,
//! or fails with exactly one [`error::ParseError`].
//!
//! # Key Types
//!
//! - [`model::ObjectModel`] -- Entities with their components and resolved
//!   references.
//! - [`graph::ProductionGraph`] -- Nodes (buildings, joints, placeholders)
//!   and one edge per connected connector.
//! - [`analysis::AnalysisResult`] -- Per-node and per-link flows.
//! - [`config::AnalysisConfig`] -- Limits, thresholds, recipes and class
//!   overrides, loadable from TOML or JSON.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.

pub mod analysis;
pub mod attribute;
pub mod builder;
pub mod catalog;
pub mod chunk;
pub mod collapse;
pub mod config;
pub mod deserialize;
pub mod diagnostic;
pub mod dominator;
pub mod error;
pub mod fixed;
pub mod graph;
pub mod id;
pub mod model;
pub mod reader;
pub mod recipe;
pub mod schema;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
