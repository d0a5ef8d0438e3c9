// src/checkpoint/blocks.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info};

use crate::types::{BlockId, CheckpointPolicy, TaskId, VersionId};

/// A fixed-size group of consecutively submitted tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub tasks: Vec<TaskId>,
    /// Versions written by the block's tasks.
    pub produced: Vec<VersionId>,
    pub durable: bool,
    saved_tasks: usize,
    /// Members still resident in the graph.
    resident: usize,
    pub saved: bool,
}

/// Assigns tasks to blocks in submission order and tracks which tasks of
/// durable blocks have had their outputs saved.
#[derive(Debug)]
pub struct BlockTracker {
    size: usize,
    policy: CheckpointPolicy,
    blocks: BTreeMap<BlockId, Block>,
    task_block: HashMap<TaskId, BlockId>,
    saved_tasks: HashSet<TaskId>,
    assigned: u64,
}

impl BlockTracker {
    /// `size` is clamped to at least 1.
    pub fn new(size: usize, policy: CheckpointPolicy) -> Self {
        Self {
            size: size.max(1),
            policy,
            blocks: BTreeMap::new(),
            task_block: HashMap::new(),
            saved_tasks: HashSet::new(),
            assigned: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.size
    }

    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    /// Place `task` in the current block.
    pub fn assign(&mut self, task: TaskId, produced: impl IntoIterator<Item = VersionId>) -> BlockId {
        let id = BlockId(self.assigned / self.size as u64);
        self.assigned += 1;

        let durable = self.policy.is_durable(id);
        let block = self.blocks.entry(id).or_insert_with(|| Block {
            id,
            tasks: Vec::new(),
            produced: Vec::new(),
            durable,
            saved_tasks: 0,
            resident: 0,
            saved: false,
        });
        block.tasks.push(task);
        block.resident += 1;
        block.produced.extend(produced);
        self.task_block.insert(task, id);
        id
    }

    pub fn block_of(&self, task: TaskId) -> Option<BlockId> {
        self.task_block.get(&task).copied()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    /// Whether `task`'s outputs must be durably saved before it can be pruned.
    pub fn is_durable(&self, task: TaskId) -> bool {
        self.block_of(task)
            .and_then(|b| self.blocks.get(&b))
            .map(|b| b.durable)
            .unwrap_or(false)
    }

    /// Record that `task`'s outputs were durably saved.
    ///
    /// Returns the block once it is full and every task in it has been saved.
    pub fn record_saved(&mut self, task: TaskId) -> Option<BlockId> {
        let id = self.block_of(task)?;
        if !self.saved_tasks.insert(task) {
            return None;
        }
        let size = self.size;
        let block = self.blocks.get_mut(&id)?;
        block.saved_tasks += 1;
        debug!(%task, block = %id, saved = block.saved_tasks, "task outputs saved");

        if !block.saved && block.tasks.len() == size && block.saved_tasks >= size {
            block.saved = true;
            info!(block = %id, versions = block.produced.len(), "checkpoint block saved");
            Some(id)
        } else {
            None
        }
    }

    pub fn is_saved(&self, task: TaskId) -> bool {
        self.saved_tasks.contains(&task)
    }

    /// `task` may leave the graph unless its block is durable and its own
    /// outputs have not been saved yet.
    pub fn allows_pruning(&self, task: TaskId) -> bool {
        !self.is_durable(task) || self.is_saved(task)
    }

    /// Drop `task`; its block goes once no member is resident and no more
    /// tasks can join it.
    pub fn forget_task(&mut self, task: TaskId) {
        let Some(id) = self.task_block.remove(&task) else {
            return;
        };
        self.saved_tasks.remove(&task);
        let current = BlockId(self.assigned.saturating_sub(1) / self.size as u64);
        let Some(block) = self.blocks.get_mut(&id) else {
            return;
        };
        block.resident = block.resident.saturating_sub(1);
        if block.resident == 0 && id != current {
            self.blocks.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
