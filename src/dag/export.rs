// src/dag/export.rs

use petgraph::algo::toposort;
use petgraph::dot::{Config, Dot};
use petgraph::graphmap::DiGraphMap;

use crate::dag::graph::DependencyGraph;
use crate::errors::{FlowdagError, Result};
use crate::types::TaskId;

/// Copy the live graph into a petgraph map. Edge weights are the access
/// entries rendered as text, e.g. `R d0v1`.
///
/// Edge direction: writer -> reader.
pub fn to_graphmap(graph: &DependencyGraph) -> DiGraphMap<TaskId, String> {
    let mut map: DiGraphMap<TaskId, String> = DiGraphMap::new();

    for node in graph.nodes() {
        map.add_node(node.id());
    }
    for edge in graph.edges() {
        // Two parameters can link the same pair; keep both labels.
        let label = match map.edge_weight(edge.from, edge.to) {
            Some(existing) => format!("{}, {}", existing, edge.entry),
            None => edge.entry.to_string(),
        };
        map.add_edge(edge.from, edge.to, label);
    }
    map
}

/// Graphviz rendering of the live graph.
pub fn to_dot(graph: &DependencyGraph) -> String {
    let map = to_graphmap(graph);
    let mut out = String::from("digraph flowdag {\n");
    let body = format!("{:?}", Dot::with_config(&map, &[Config::GraphContentOnly]));
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        out.push_str("    ");
        out.push_str(line.trim());
        out.push('\n');
    }
    out.push_str("}\n");
    out
}

/// Group tasks into levels: level 0 has no predecessors, level n waits on
/// at least one task of level n-1.
pub fn execution_levels(graph: &DependencyGraph) -> Result<Vec<Vec<TaskId>>> {
    let map = to_graphmap(graph);

    // Edges only ever point from older to newer tasks, so a cycle means the
    // graph was corrupted.
    let order = toposort(&map, None).map_err(|cycle| {
        FlowdagError::Other(anyhow::anyhow!(
            "cycle detected in dependency graph involving task {}",
            cycle.node_id()
        ))
    })?;

    let mut level_of = std::collections::HashMap::new();
    let mut levels: Vec<Vec<TaskId>> = Vec::new();
    for task in order {
        let level = map
            .neighbors_directed(task, petgraph::Direction::Incoming)
            .filter_map(|p| level_of.get(&p).map(|l: &usize| l + 1))
            .max()
            .unwrap_or(0);
        level_of.insert(task, level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(task);
    }
    for level in &mut levels {
        level.sort();
    }
    Ok(levels)
}
