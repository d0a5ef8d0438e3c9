// src/engine/jobs.rs

use std::collections::{HashMap, VecDeque};

use crate::types::TaskId;

/// Disjoint sets a live job moves through inside the scheduler core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobSet {
    /// Accepted, waiting for the analyser.
    Unanalysed,
    /// In the graph with unresolved predecessors.
    Pending,
    /// No predecessors left; existence checks and fetches in flight.
    DependencyFree,
    /// All values obtained; backend preparation in flight.
    DataPresent,
    /// Prepared; waiting for a concurrency token (FIFO).
    DataReady,
    Executing,
    /// Executed; outputs being stored.
    AwaitingStore,
}

impl JobSet {
    pub const ALL: [JobSet; 7] = [
        JobSet::Unanalysed,
        JobSet::Pending,
        JobSet::DependencyFree,
        JobSet::DataPresent,
        JobSet::DataReady,
        JobSet::Executing,
        JobSet::AwaitingStore,
    ];

    /// Sets whose newcomers the core has to act on.
    fn tracks_arrivals(self) -> bool {
        matches!(
            self,
            JobSet::DependencyFree | JobSet::DataPresent | JobSet::DataReady | JobSet::AwaitingStore
        )
    }
}

/// Membership of every live job, plus arrival queues.
///
/// A job is in exactly one set. Sets the core acts on keep the ids that
/// entered them in arrival order; ids that left the set in the meantime are
/// skipped when taken.
#[derive(Debug, Default)]
pub struct JobSets {
    membership: HashMap<TaskId, JobSet>,
    arrivals: HashMap<JobSet, VecDeque<TaskId>>,
}

impl JobSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: TaskId, set: JobSet) {
        self.membership.insert(task, set);
        if set.tracks_arrivals() {
            self.arrivals.entry(set).or_default().push_back(task);
        }
    }

    pub fn move_to(&mut self, task: TaskId, set: JobSet) {
        self.insert(task, set);
    }

    pub fn remove(&mut self, task: TaskId) -> Option<JobSet> {
        self.membership.remove(&task)
    }

    pub fn set_of(&self, task: TaskId) -> Option<JobSet> {
        self.membership.get(&task).copied()
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.membership.contains_key(&task)
    }

    /// Take every job that arrived in `set` and is still there.
    pub fn take_arrivals(&mut self, set: JobSet) -> Vec<TaskId> {
        let Some(queue) = self.arrivals.get_mut(&set) else {
            return Vec::new();
        };
        let membership = &self.membership;
        queue
            .drain(..)
            .filter(|t| membership.get(t) == Some(&set))
            .collect()
    }

    /// Oldest job still waiting in `set`, without removing it.
    pub fn front(&mut self, set: JobSet) -> Option<TaskId> {
        let queue = self.arrivals.get_mut(&set)?;
        while let Some(task) = queue.front().copied() {
            if self.membership.get(&task) == Some(&set) {
                return Some(task);
            }
            queue.pop_front();
        }
        None
    }

    /// Drop the oldest arrival of `set`.
    pub fn pop_front(&mut self, set: JobSet) -> Option<TaskId> {
        let task = self.front(set)?;
        if let Some(queue) = self.arrivals.get_mut(&set) {
            queue.pop_front();
        }
        Some(task)
    }

    pub fn count(&self, set: JobSet) -> usize {
        self.membership.values().filter(|s| **s == set).count()
    }

    pub fn members(&self, set: JobSet) -> Vec<TaskId> {
        let mut out: Vec<TaskId> = self
            .membership
            .iter()
            .filter(|(_, s)| **s == set)
            .map(|(t, _)| *t)
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.membership.len()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_belong_to_exactly_one_set() {
        let mut sets = JobSets::new();
        sets.insert(TaskId(1), JobSet::Pending);
        sets.move_to(TaskId(1), JobSet::DependencyFree);

        assert_eq!(sets.set_of(TaskId(1)), Some(JobSet::DependencyFree));
        assert_eq!(sets.count(JobSet::Pending), 0);
        assert!(sets.take_arrivals(JobSet::Pending).is_empty());
        assert_eq!(sets.take_arrivals(JobSet::DependencyFree), vec![TaskId(1)]);
        assert!(sets.take_arrivals(JobSet::DependencyFree).is_empty());
    }

    #[test]
    fn ready_queue_is_fifo_and_skips_departed_jobs() {
        let mut sets = JobSets::new();
        for i in 1..=3 {
            sets.insert(TaskId(i), JobSet::DataReady);
        }
        sets.remove(TaskId(1));

        assert_eq!(sets.pop_front(JobSet::DataReady), Some(TaskId(2)));
        assert_eq!(sets.front(JobSet::DataReady), Some(TaskId(3)));
        assert_eq!(sets.pop_front(JobSet::DataReady), Some(TaskId(3)));
        assert_eq!(sets.pop_front(JobSet::DataReady), None);
    }
}
