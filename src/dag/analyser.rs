// src/dag/analyser.rs

//! The graph actor.
//!
//! Every mutation of the dependency graph, the version store and the
//! checkpoint blocks goes through [`Analyser::process`], one request at a
//! time. The scheduler core owns the request queue and drains it in order,
//! so concurrent submissions and completions never race on edge construction.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::checkpoint::BlockTracker;
use crate::dag::graph::{DependencyGraph, GraphNode, NodeStatus};
use crate::data::{AccessEntry, DataVersionStore, ParamValue, Task};
use crate::errors::Result;
use crate::types::{BlockId, CheckpointPolicy, Location, TaskId, VersionId};

/// Requests processed by the analyser, in arrival order.
#[derive(Debug, Clone)]
pub enum AnalyserRequest {
    /// Insert a new task and compute its edges.
    NewTask(Task),
    /// The task reached COMPLETED; its outputs now live at `location`.
    TaskCompleted { task: TaskId, location: Location },
    /// The task failed after it was analysed.
    TaskFailed(TaskId),
    /// The caller withdrew the task before it executed.
    Cancel(TaskId),
    /// The task's outputs were durably saved.
    DataSaved(TaskId),
}

/// Structured result of processing one request.
#[derive(Debug, Clone, Default)]
pub struct AnalyserStep {
    /// Task inserted by this step, with its number of predecessor edges.
    pub analysed: Option<(TaskId, usize)>,
    /// Tasks that became dependency-free, in edge order.
    pub newly_free: Vec<TaskId>,
    /// Nodes removed from the graph.
    pub pruned: Vec<TaskId>,
    /// Version records removed from the store.
    pub retired: Vec<VersionId>,
    /// Block whose contents became fully saved.
    pub saved_block: Option<BlockId>,
}

#[derive(Debug)]
pub struct Analyser {
    graph: DependencyGraph,
    store: DataVersionStore,
    blocks: BlockTracker,
}

impl Analyser {
    pub fn new(block_size: usize, policy: CheckpointPolicy) -> Self {
        Self {
            graph: DependencyGraph::new(),
            store: DataVersionStore::new(),
            blocks: BlockTracker::new(block_size, policy),
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn store(&self) -> &DataVersionStore {
        &self.store
    }

    pub fn blocks(&self) -> &BlockTracker {
        &self.blocks
    }

    pub fn process(&mut self, request: AnalyserRequest) -> Result<AnalyserStep> {
        match request {
            AnalyserRequest::NewTask(task) => self.analyse(task),
            AnalyserRequest::TaskCompleted { task, location } => {
                Ok(self.complete(task, location))
            }
            AnalyserRequest::TaskFailed(task) | AnalyserRequest::Cancel(task) => {
                Ok(self.fail(task))
            }
            AnalyserRequest::DataSaved(task) => Ok(self.data_saved(task)),
        }
    }

    /// Insert `task`, wiring an edge from the pending writer of every version
    /// it reads or updates, then record it as writer of what it produces.
    fn analyse(&mut self, task: Task) -> Result<AnalyserStep> {
        let id = task.id;

        // Reads resolve against the versions current *before* this task, so
        // a task that reads and writes the same item depends on the previous
        // writer, not on itself.
        let mut reads: Vec<Option<VersionId>> = Vec::with_capacity(task.params.len());
        for param in &task.params {
            let read = match (&param.value, param.direction.reads()) {
                (ParamValue::Data(key), true) => {
                    let data = self.store.register(key);
                    let version = match self.store.current_version(data) {
                        Some(v) => v,
                        None => {
                            // First access of client-provided data.
                            let v = self.store.new_version(data)?;
                            self.store.mark_local(v);
                            v
                        }
                    };
                    Some(version)
                }
                _ => None,
            };
            reads.push(read);
        }

        let mut accesses = Vec::with_capacity(task.params.len());
        for (idx, param) in task.params.iter().enumerate() {
            let entry = match &param.value {
                ParamValue::Basic(_) => None,
                ParamValue::Data(key) => {
                    let data = self.store.register(key);
                    let read = reads[idx];
                    let new = if param.direction.writes() {
                        Some(self.store.new_version(data)?)
                    } else {
                        None
                    };
                    match (read, new) {
                        (Some(version), None) => Some(AccessEntry::Read { version }),
                        (None, Some(new_version)) => Some(AccessEntry::Write { new_version }),
                        (Some(version), Some(new_version)) => Some(AccessEntry::ReadWrite {
                            version,
                            new_version,
                        }),
                        (None, None) => None,
                    }
                }
            };
            accesses.push(entry);
        }

        let produced: Vec<VersionId> = accesses
            .iter()
            .flatten()
            .filter_map(|a| a.written_version())
            .collect();
        let block = self.blocks.assign(id, produced);

        self.graph.insert(GraphNode::new(task, accesses.clone(), block));

        // Step 1: edges from pending writers, in parameter order.
        let mut predecessors = 0;
        for entry in accesses.iter().flatten() {
            let Some(read) = entry.read_version() else {
                continue;
            };
            self.store.add_reader(read);
            if let Some(writer) = self.graph.pending_writer(read.data) {
                if writer != id {
                    self.graph.add_edge(writer, id, *entry);
                    for v in labelled_versions(*entry) {
                        self.store.add_edge_ref(v);
                    }
                    predecessors += 1;
                }
            }
        }

        // Step 2: this task becomes the writer later readers will find.
        for entry in accesses.iter().flatten() {
            if let Some(written) = entry.written_version() {
                self.graph.set_writer(written.data, id);
            }
        }

        debug!(task = %id, predecessors, %block, "analysed task");

        let mut step = AnalyserStep {
            analysed: Some((id, predecessors)),
            ..AnalyserStep::default()
        };
        // Step 3: no incoming edges means dependency-free right away.
        if predecessors == 0 {
            step.newly_free.push(id);
        }
        Ok(step)
    }

    fn complete(&mut self, task: TaskId, location: Location) -> AnalyserStep {
        let mut step = AnalyserStep::default();

        let Some(node) = self.graph.node(task) else {
            warn!(%task, "completion for task not in graph; ignoring");
            return step;
        };
        if node.status != NodeStatus::Pending {
            warn!(%task, status = ?node.status, "completion for non-pending task; ignoring");
            return step;
        }

        let reads: Vec<VersionId> = node.read_versions().collect();
        let writes: Vec<VersionId> = node.written_versions().collect();

        for v in &writes {
            self.store.mark(*v, location);
        }
        for v in &reads {
            self.store.remove_reader(*v);
        }

        step.newly_free = self.graph.complete(task);
        self.prune_from(task, &mut step);

        let mut candidates: BTreeSet<VersionId> = reads.into_iter().collect();
        candidates.extend(writes.iter().map(|w| {
            // The version this write superseded may now be unused.
            VersionId::new(w.data, w.version.saturating_sub(1))
        }));
        self.retire_unused(candidates, &mut step);
        step
    }

    fn fail(&mut self, task: TaskId) -> AnalyserStep {
        let mut step = AnalyserStep::default();
        let Some(node) = self.graph.node(task) else {
            return step;
        };
        let reads: Vec<VersionId> = node.read_versions().collect();
        for v in reads {
            self.store.remove_reader(v);
        }
        self.graph.fail(task);
        info!(%task, "task failed; successors stay blocked");
        step
    }

    /// Only `task`'s own outputs matter for pruning it; the block
    /// notification is informational.
    fn data_saved(&mut self, task: TaskId) -> AnalyserStep {
        let mut step = AnalyserStep {
            saved_block: self.blocks.record_saved(task),
            ..AnalyserStep::default()
        };
        self.prune_from(task, &mut step);
        step
    }

    /// Prune `task` and walk its predecessors, then retire what that freed.
    pub fn prune(&mut self, task: TaskId) -> AnalyserStep {
        let mut step = AnalyserStep::default();
        self.prune_from(task, &mut step);
        step
    }

    fn prune_from(&mut self, task: TaskId, step: &mut AnalyserStep) {
        let blocks = &self.blocks;
        let outcome = self
            .graph
            .prune(task, |node| blocks.allows_pruning(node.id()));
        if outcome.removed.is_empty() {
            return;
        }

        for entry in &outcome.released_edges {
            for v in labelled_versions(*entry) {
                self.store.remove_edge_ref(v);
            }
        }
        for removed in &outcome.removed {
            self.blocks.forget_task(*removed);
        }

        step.pruned.extend(outcome.removed.iter().copied());
        let candidates: BTreeSet<VersionId> = outcome.touched_versions.into_iter().collect();
        self.retire_unused(candidates, step);
    }

    /// The store's edge counts keep any version labelling an edge alive.
    fn retire_unused(&mut self, candidates: BTreeSet<VersionId>, step: &mut AnalyserStep) {
        for v in candidates {
            if self.store.retire_if_superseded(v) {
                step.retired.push(v);
            }
        }
    }
}

/// Versions an edge labelled with `entry` refers to.
fn labelled_versions(entry: AccessEntry) -> impl Iterator<Item = VersionId> {
    entry.read_version().into_iter().chain(entry.written_version())
}
