// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace};

use crate::data::{AccessEntry, Task};
use crate::types::{BlockId, DataId, TaskId, VersionId};

/// Graph-level status of a task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Not yet completed; later readers of its outputs must wait for it.
    Pending,
    /// Outputs produced and registered; outgoing edges are resolved.
    Completed,
    /// Failed or cancelled; outgoing edges stay unresolved.
    Failed,
}

/// A task plus its per-parameter access entries.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub task: Task,
    /// One entry per parameter; `None` for basic (by-value) parameters.
    pub accesses: Vec<Option<AccessEntry>>,
    pub status: NodeStatus,
    pub block: BlockId,
    unresolved: usize,
}

impl GraphNode {
    pub fn new(task: Task, accesses: Vec<Option<AccessEntry>>, block: BlockId) -> Self {
        Self {
            task,
            accesses,
            status: NodeStatus::Pending,
            block,
            unresolved: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id
    }

    /// Number of predecessor edges that have not been resolved yet.
    pub fn unresolved_predecessors(&self) -> usize {
        self.unresolved
    }

    pub fn read_versions(&self) -> impl Iterator<Item = VersionId> + '_ {
        self.accesses.iter().flatten().filter_map(|a| a.read_version())
    }

    pub fn written_versions(&self) -> impl Iterator<Item = VersionId> + '_ {
        self.accesses
            .iter()
            .flatten()
            .filter_map(|a| a.written_version())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(u64);

/// A `from -> to` dependency created by `to`'s access entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: TaskId,
    pub to: TaskId,
    pub entry: AccessEntry,
    /// Set once `from` completed. Resolved edges are kept as lineage until
    /// one of their endpoints is pruned.
    pub resolved: bool,
}

/// What a pruning walk removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub removed: Vec<TaskId>,
    /// Edge labels dropped together with the removed nodes, one per edge.
    pub released_edges: Vec<AccessEntry>,
    /// Versions read or written by the removed nodes.
    pub touched_versions: Vec<VersionId>,
}

/// Arena of task nodes with edges stored as records in two index maps.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<TaskId, GraphNode>,
    edges: HashMap<EdgeId, Edge>,
    by_source: HashMap<TaskId, Vec<EdgeId>>,
    by_target: HashMap<TaskId, Vec<EdgeId>>,
    last_writer: HashMap<DataId, TaskId>,
    /// Reverse of `last_writer`; may hold stale items a later writer took over.
    written_by: HashMap<TaskId, Vec<DataId>>,
    next_edge: u64,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: GraphNode) {
        let id = node.id();
        self.nodes.insert(id, node);
        self.by_source.entry(id).or_default();
        self.by_target.entry(id).or_default();
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.nodes.contains_key(&task)
    }

    pub fn node(&self, task: TaskId) -> Option<&GraphNode> {
        self.nodes.get(&task)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Resident, not-yet-completed writer of the current version of `data`.
    pub fn pending_writer(&self, data: DataId) -> Option<TaskId> {
        let writer = *self.last_writer.get(&data)?;
        match self.nodes.get(&writer)?.status {
            NodeStatus::Completed => None,
            NodeStatus::Pending | NodeStatus::Failed => Some(writer),
        }
    }

    pub fn set_writer(&mut self, data: DataId, task: TaskId) {
        self.last_writer.insert(data, task);
        self.written_by.entry(task).or_default().push(data);
    }

    /// Add an unresolved edge `from -> to` labelled with `entry`.
    pub fn add_edge(&mut self, from: TaskId, to: TaskId, entry: AccessEntry) -> EdgeId {
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;

        self.edges.insert(
            id,
            Edge {
                from,
                to,
                entry,
                resolved: false,
            },
        );
        self.by_source.entry(from).or_default().push(id);
        self.by_target.entry(to).or_default().push(id);
        if let Some(node) = self.nodes.get_mut(&to) {
            node.unresolved += 1;
        }
        trace!(%from, %to, %entry, "added edge");
        id
    }

    /// Predecessors of `task` in edge-creation (parameter) order.
    pub fn predecessors(&self, task: TaskId) -> Vec<TaskId> {
        self.by_target
            .get(&task)
            .map(|ids| ids.iter().filter_map(|e| self.edges.get(e)).map(|e| e.from).collect())
            .unwrap_or_default()
    }

    pub fn successors(&self, task: TaskId) -> Vec<TaskId> {
        self.by_source
            .get(&task)
            .map(|ids| ids.iter().filter_map(|e| self.edges.get(e)).map(|e| e.to).collect())
            .unwrap_or_default()
    }

    pub fn incoming(&self, task: TaskId) -> Vec<&Edge> {
        self.by_target
            .get(&task)
            .map(|ids| ids.iter().filter_map(|e| self.edges.get(e)).collect())
            .unwrap_or_default()
    }

    pub fn is_dependency_free(&self, task: TaskId) -> bool {
        self.nodes
            .get(&task)
            .map(|n| n.unresolved == 0)
            .unwrap_or(false)
    }

    /// Mark `task` completed and resolve its outgoing edges.
    ///
    /// Returns successors whose unresolved count dropped to zero, in edge order.
    pub fn complete(&mut self, task: TaskId) -> Vec<TaskId> {
        match self.nodes.get_mut(&task) {
            Some(node) if node.status == NodeStatus::Pending => node.status = NodeStatus::Completed,
            _ => return Vec::new(),
        }

        let mut newly_free = Vec::new();
        let out = self.by_source.get(&task).cloned().unwrap_or_default();
        for edge_id in out {
            let Some(edge) = self.edges.get_mut(&edge_id) else {
                continue;
            };
            if edge.resolved {
                continue;
            }
            edge.resolved = true;
            let to = edge.to;

            if let Some(succ) = self.nodes.get_mut(&to) {
                succ.unresolved = succ.unresolved.saturating_sub(1);
                if succ.unresolved == 0
                    && succ.status == NodeStatus::Pending
                    && !newly_free.contains(&to)
                {
                    newly_free.push(to);
                }
            }
        }

        debug!(%task, freed = newly_free.len(), "resolved outgoing edges");
        newly_free
    }

    /// Park `task` in the failed state. Its outgoing edges stay unresolved so
    /// successors remain blocked.
    pub fn fail(&mut self, task: TaskId) {
        if let Some(node) = self.nodes.get_mut(&task) {
            if node.status == NodeStatus::Pending {
                node.status = NodeStatus::Failed;
            }
        }
    }

    /// Remove `task` if it is completed, has no successor edges and
    /// `allowed` agrees, then walk its predecessors transitively.
    ///
    /// Calling this on a task that is not present is a no-op.
    pub fn prune<F>(&mut self, task: TaskId, allowed: F) -> PruneOutcome
    where
        F: Fn(&GraphNode) -> bool,
    {
        let mut outcome = PruneOutcome::default();
        let mut stack = vec![task];
        let mut seen = HashSet::new();

        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if !self.is_prunable(id, &allowed) {
                continue;
            }

            let incoming = self.by_target.remove(&id).unwrap_or_default();
            self.by_source.remove(&id);

            for edge_id in incoming {
                let Some(edge) = self.edges.remove(&edge_id) else {
                    continue;
                };
                if let Some(list) = self.by_source.get_mut(&edge.from) {
                    list.retain(|e| *e != edge_id);
                }
                outcome.released_edges.push(edge.entry);
                // The predecessor may have just lost its last successor.
                seen.remove(&edge.from);
                stack.push(edge.from);
            }

            if let Some(node) = self.nodes.remove(&id) {
                outcome.touched_versions.extend(node.read_versions());
                outcome.touched_versions.extend(node.written_versions());
            }
            for data in self.written_by.remove(&id).unwrap_or_default() {
                if self.last_writer.get(&data) == Some(&id) {
                    self.last_writer.remove(&data);
                }
            }
            outcome.removed.push(id);
            debug!(task = %id, "pruned node");
        }

        outcome
    }

    fn is_prunable<F>(&self, task: TaskId, allowed: &F) -> bool
    where
        F: Fn(&GraphNode) -> bool,
    {
        let Some(node) = self.nodes.get(&task) else {
            return false;
        };
        node.status == NodeStatus::Completed
            && self
                .by_source
                .get(&task)
                .map(|out| out.is_empty())
                .unwrap_or(true)
            && allowed(node)
    }
}
