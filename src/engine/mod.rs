// src/engine/mod.rs

//! Scheduler engine.
//!
//! This module ties together:
//! - the analyser (dependency graph, versions, checkpoint blocks)
//! - the job sets and the concurrency tokens
//! - platform selection
//! - the runtime event loop that reacts to:
//!   - task submissions and cancellations
//!   - data provider answers
//!   - backend completions
//!   - registration updates, drain and shutdown requests
//!
//! The pure core state machine lives in [`core`] and [`event_handlers`]; the
//! async/IO shell is implemented in [`runtime`]. Clients talk to a running
//! scheduler through [`handle::SchedulerHandle`], created by
//! [`builder::SchedulerBuilder`].

use std::time::Duration;

use crate::data::Task;
use crate::errors::TaskFailure;
use crate::exec::ExecutedJob;
use crate::job::JobProfile;
use crate::provider::DataValue;
use crate::types::{BackendName, CoreElementId, TaskId};

pub mod builder;
pub mod core;
pub mod event_handlers;
pub mod handle;
pub mod jobs;
pub mod observe;
pub mod runtime;
pub mod tokens;

pub use builder::{Scheduler, SchedulerBuilder};
pub use self::core::{CoreRuntime, CoreSnapshot};
pub use event_handlers::{CoreCommand, CoreStep};
pub use handle::SchedulerHandle;
pub use jobs::{JobSet, JobSets};
pub use observe::{FanoutSink, JsonLinesSink, TracingSink, TransitionEvent, TransitionSink};
pub use runtime::{Runtime, RuntimeParts};
pub use tokens::TokenPool;

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeOptions {
    /// Jobs allowed in EXECUTING at once; `None` is unbounded.
    pub max_concurrent_jobs: Option<usize>,
    /// Liveness fallback: re-run the core this often when no event arrives.
    pub idle_timeout: Duration,
    /// Exit once every submitted task has finished or is blocked.
    pub exit_when_idle: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: None,
            idle_timeout: Duration::from_millis(500),
            exit_when_idle: false,
        }
    }
}

/// Size of each output written by a job, by parameter index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredOutputs {
    pub sizes: Vec<(usize, u64)>,
    /// Outputs were also written to the checkpoint store.
    pub checkpointed: bool,
}

/// Events flowing into the runtime from clients, the data provider and
/// backends. Collaborator errors travel as their display text.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    TaskSubmitted(Task),
    ExistenceChecked {
        task: TaskId,
        index: usize,
        result: Result<bool, String>,
    },
    ValueObtained {
        task: TaskId,
        index: usize,
        result: Result<(DataValue, u64), String>,
    },
    Prepared {
        task: TaskId,
        result: Result<(), String>,
    },
    JobExecuted {
        task: TaskId,
        result: Result<ExecutedJob, String>,
    },
    OutputsStored {
        task: TaskId,
        result: Result<StoredOutputs, String>,
    },
    CancelRequested(TaskId),
    /// A backend's implementations for `core_element` changed.
    RegistrationUpdated {
        backend: BackendName,
        core_element: CoreElementId,
    },
    /// Finish outstanding work, cancel what can never run, then exit.
    DrainRequested,
    ShutdownRequested,
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(JobProfile),
    Failed(TaskFailure),
}

/// Final word on one submitted task; exactly one is sent per task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub task: TaskId,
    pub core_element: CoreElementId,
    pub backend: Option<BackendName>,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Completed(_))
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match &self.outcome {
            TaskOutcome::Failed(f) => Some(f),
            TaskOutcome::Completed(_) => None,
        }
    }
}
