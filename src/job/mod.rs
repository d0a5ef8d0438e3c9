// src/job/mod.rs

//! Execution-bound view of a task.
//!
//! - [`state`] is the lifecycle state machine (`JobExecution`).
//! - [`profile`] collects timings, energy and cost for one run.
//!
//! A [`Job`] is materialized from a graph node once the task becomes
//! dependency-free; it carries the selected backend and implementation and
//! the inputs the data provider returned.

pub mod profile;
pub mod state;

pub use profile::JobProfile;
pub use state::{JobEvent, JobExecution, JobState, Transition};

use crate::data::{AccessEntry, ParamValue, Task};
use crate::exec::Implementation;
use crate::provider::{DataRef, DataValue};
use crate::types::{BackendName, CoreElementId, DataKey, Direction, ParamKind, TaskId};

/// One parameter as seen by the backend.
#[derive(Debug, Clone)]
pub struct JobParam {
    pub index: usize,
    pub kind: ParamKind,
    pub direction: Direction,
    /// Plain value, for basic parameters.
    pub basic: Option<String>,
    pub key: Option<DataKey>,
    pub access: Option<AccessEntry>,
    /// Fetched contents of the version read, once obtained.
    pub input: Option<DataValue>,
}

impl JobParam {
    /// Version this parameter reads, as a provider reference.
    pub fn read_ref(&self) -> Option<DataRef> {
        let version = self.access?.read_version()?;
        Some(DataRef::new(version, self.key.clone()?))
    }

    /// Version this parameter produces, as a provider reference.
    pub fn written_ref(&self) -> Option<DataRef> {
        let version = self.access?.written_version()?;
        Some(DataRef::new(version, self.key.clone()?))
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub task: TaskId,
    pub core_element: CoreElementId,
    pub params: Vec<JobParam>,
    pub backend: Option<BackendName>,
    pub implementation: Option<Implementation>,
    pub offloaded: bool,
    pub profile: JobProfile,
}

impl Job {
    /// Build a job from an analysed task and its access entries.
    pub fn new(task: &Task, accesses: &[Option<AccessEntry>]) -> Self {
        let params = task
            .params
            .iter()
            .enumerate()
            .map(|(index, p)| JobParam {
                index,
                kind: p.kind,
                direction: p.direction,
                basic: match &p.value {
                    ParamValue::Basic(v) => Some(v.clone()),
                    ParamValue::Data(_) => None,
                },
                key: p.data_key().cloned(),
                access: accesses.get(index).copied().flatten(),
                input: None,
            })
            .collect();

        Self {
            task: task.id,
            core_element: task.core_element.clone(),
            params,
            backend: None,
            implementation: None,
            offloaded: task.offloaded,
            profile: JobProfile::new(task.submitted_at),
        }
    }

    /// Versions whose existence must be confirmed before fetching.
    pub fn reads(&self) -> Vec<(usize, DataRef)> {
        self.params
            .iter()
            .filter_map(|p| p.read_ref().map(|r| (p.index, r)))
            .collect()
    }

    pub fn writes(&self) -> Vec<(usize, DataRef)> {
        self.params
            .iter()
            .filter_map(|p| p.written_ref().map(|r| (p.index, r)))
            .collect()
    }

    pub fn set_input(&mut self, index: usize, value: DataValue, size: u64) {
        if let Some(p) = self.params.get_mut(index) {
            self.profile.input_bytes += size;
            p.input = Some(value);
        }
    }
}
