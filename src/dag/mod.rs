// src/dag/mod.rs

//! Data-flow dependency graph.
//!
//! - [`graph`] is the arena of task nodes, with edges kept as records in
//!   by-source / by-target index maps, plus the recursive pruning walk.
//! - [`analyser`] is the single actor that mutates the graph, the version
//!   store and the checkpoint blocks.
//! - [`export`] renders the live graph through petgraph for diagnostics.

pub mod analyser;
pub mod export;
pub mod graph;

pub use analyser::{Analyser, AnalyserRequest, AnalyserStep};
pub use export::{execution_levels, to_dot, to_graphmap};
pub use graph::{DependencyGraph, Edge, GraphNode, NodeStatus, PruneOutcome};
