// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info, warn};

use crate::dag::AnalyserRequest;
use crate::engine::core::CoreRuntime;
use crate::engine::jobs::JobSet;
use crate::engine::observe::TransitionEvent;
use crate::engine::{StoredOutputs, TaskOutcome, TaskReport};
use crate::errors::{FailureKind, TaskFailure};
use crate::exec::ExecutedJob;
use crate::job::{Job, JobEvent, JobState};
use crate::provider::{DataRef, DataValue};
use crate::types::{BackendName, BlockId, Location, TaskId};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Ask the provider whether an input version exists.
    CheckExistence {
        task: TaskId,
        index: usize,
        data: DataRef,
    },
    /// Fetch an input, as bytes or materialized as a file.
    ObtainValue {
        task: TaskId,
        index: usize,
        data: DataRef,
        as_file: bool,
    },
    /// Run backend-specific staging for a job.
    Prepare {
        task: TaskId,
        backend: BackendName,
        job: Job,
    },
    /// Hand a job that holds a token to its backend.
    Dispatch {
        task: TaskId,
        backend: BackendName,
        job: Job,
    },
    /// Write produced versions (keyed by parameter index) back to the
    /// provider, and to the checkpoint store when `checkpoint` names a
    /// durable block.
    StoreOutputs {
        task: TaskId,
        outputs: Vec<(usize, DataRef, DataValue)>,
        location: Location,
        checkpoint: Option<BlockId>,
    },
    /// Tell the submitter how a task ended.
    Report(TaskReport),
    /// Request that the process exits (drain, or idle with `exit_when_idle`).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Lifecycle transitions, in the order they happened.
    pub transitions: Vec<TransitionEvent>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            transitions: Vec::new(),
            keep_running: true,
        }
    }

    pub fn reports(&self) -> impl Iterator<Item = &TaskReport> {
        self.commands.iter().filter_map(|c| match c {
            CoreCommand::Report(report) => Some(report),
            _ => None,
        })
    }
}

impl Default for CoreStep {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreRuntime {
    fn is_live(&self, task: TaskId, what: &str) -> bool {
        let live = self.live.contains_key(&task);
        if !live {
            debug!(%task, event = what, "ignoring event for finished task");
        }
        live
    }

    fn input_failure(&self, task: TaskId, index: usize, message: String) -> TaskFailure {
        let live = self.live.get(&task);
        let core_element = live.map(|l| l.core_element.clone()).unwrap_or_default();
        let data = live
            .and_then(|l| l.job.as_ref())
            .and_then(|j| j.params.get(index))
            .and_then(|p| p.read_ref())
            .map(|d| d.rename())
            .unwrap_or_else(|| format!("parameter {index}"));
        TaskFailure::new(
            task,
            core_element,
            FailureKind::DataAcquisition,
            format!("{data}: {message}"),
        )
    }

    fn job_failure(&self, task: TaskId, kind: FailureKind, message: impl Into<String>) -> TaskFailure {
        let core_element = self
            .live
            .get(&task)
            .map(|l| l.core_element.clone())
            .unwrap_or_default();
        TaskFailure::new(task, core_element, kind, message)
    }

    /// Handle an existence answer for one input.
    ///
    /// - A missing version or a provider error fails the task.
    /// - The last positive answer starts fetching the values.
    pub(super) fn on_existence_checked(
        &mut self,
        task: TaskId,
        index: usize,
        result: Result<bool, String>,
        out: &mut CoreStep,
    ) {
        if !self.is_live(task, "existence") {
            return;
        }

        match result {
            Ok(true) => {
                let transition = self.advance(task, JobEvent::ExistenceConfirmed, out);
                if transition.map(|t| t.to) == Some(JobState::ParamExistenceChecked) {
                    self.start_fetch(task, out);
                }
            }
            Ok(false) => {
                let failure = self.input_failure(task, index, "version does not exist".into());
                self.fail(task, failure, out);
            }
            Err(message) => {
                let failure = self.input_failure(task, index, message);
                self.fail(task, failure, out);
            }
        }
    }

    /// Handle one fetched input value.
    pub(super) fn on_value_obtained(
        &mut self,
        task: TaskId,
        index: usize,
        result: Result<(DataValue, u64), String>,
        out: &mut CoreStep,
    ) {
        if !self.is_live(task, "value") {
            return;
        }

        let (value, size) = match result {
            Ok(obtained) => obtained,
            Err(message) => {
                let failure = self.input_failure(task, index, message);
                self.fail(task, failure, out);
                return;
            }
        };

        if let Some(live) = self.live.get_mut(&task) {
            if let Some(job) = live.job.as_mut() {
                job.set_input(index, value, size);
            }
            self.history
                .record_param_size(&live.core_element, index, size);
        }

        let transition = self.advance(task, JobEvent::ValueObtained, out);
        if transition.map(|t| t.to) == Some(JobState::AllValuesObtained) {
            self.sets.move_to(task, JobSet::DataPresent);
        }
    }

    pub(super) fn on_prepared(&mut self, task: TaskId, result: Result<(), String>, out: &mut CoreStep) {
        if !self.is_live(task, "prepared") {
            return;
        }

        match result {
            Ok(()) => {
                if self.advance(task, JobEvent::Prepared, out).is_some() {
                    self.sets.move_to(task, JobSet::DataReady);
                }
            }
            Err(message) => {
                let failure =
                    self.job_failure(task, FailureKind::Execution, format!("preparation failed: {message}"));
                self.fail(task, failure, out);
            }
        }
    }

    /// Handle a backend completion. The token stays held until the outputs
    /// are stored.
    pub(super) fn on_executed(
        &mut self,
        task: TaskId,
        result: Result<ExecutedJob, String>,
        out: &mut CoreStep,
    ) {
        if !self.is_live(task, "executed") {
            return;
        }

        let executed = match result {
            Ok(executed) => executed,
            Err(message) => {
                let failure = self.job_failure(task, FailureKind::Execution, message);
                self.fail(task, failure, out);
                return;
            }
        };

        if self.advance(task, JobEvent::Executed, out).is_none() {
            return;
        }
        if let Some(live) = self.live.get_mut(&task) {
            live.job = Some(executed.job);
            live.outputs = Some((executed.outputs, executed.location));
        }
        self.sets.move_to(task, JobSet::AwaitingStore);
    }

    /// Handle the end of output storage: the job completes, gives back its
    /// token, and the analyser resolves its outgoing edges.
    pub(super) fn on_outputs_stored(
        &mut self,
        task: TaskId,
        result: Result<StoredOutputs, String>,
        out: &mut CoreStep,
    ) {
        if !self.is_live(task, "stored") {
            return;
        }

        let stored = match result {
            Ok(stored) => stored,
            Err(message) => {
                let failure = self.job_failure(
                    task,
                    FailureKind::DataAcquisition,
                    format!("storing outputs failed: {message}"),
                );
                self.fail(task, failure, out);
                return;
            }
        };

        if self.advance(task, JobEvent::Stored, out).is_none() {
            return;
        }
        self.tokens.release();
        self.sets.remove(task);

        let Some(live) = self.live.remove(&task) else {
            return;
        };
        let location = live
            .job
            .as_ref()
            .and_then(|j| j.backend.as_deref())
            .and_then(|b| self.backends.get(b))
            .map(|b| b.kind().location())
            .unwrap_or(Location::LOCAL);

        let mut job = live.job;
        if let Some(job) = job.as_mut() {
            job.profile.output_bytes = stored.sizes.iter().map(|(_, size)| size).sum();
            for (index, size) in &stored.sizes {
                self.history
                    .record_param_size(&live.core_element, *index, *size);
            }
            if let (Some(backend), Some(implementation)) = (&job.backend, &job.implementation) {
                self.history
                    .record_execution(backend, &implementation.id, &job.profile);
            }
        }

        self.requests
            .push_back(AnalyserRequest::TaskCompleted { task, location });
        if stored.checkpointed {
            self.requests.push_back(AnalyserRequest::DataSaved(task));
        }
        self.completed += 1;

        let (backend, profile) = match job {
            Some(job) => (job.backend, job.profile),
            None => (None, crate::job::JobProfile::new(std::time::Instant::now())),
        };
        info!(
            %task,
            backend = backend.as_deref().unwrap_or("-"),
            elapsed_ms = profile.elapsed_ms,
            "task completed"
        );
        out.commands.push(CoreCommand::Report(TaskReport {
            task,
            core_element: live.core_element,
            backend,
            outcome: TaskOutcome::Completed(profile),
        }));
    }

    /// Withdraw a task that has not started executing.
    pub(super) fn on_cancel(&mut self, task: TaskId, out: &mut CoreStep) {
        let Some(state) = self.job_state(task) else {
            warn!(%task, "cancel for unknown or finished task");
            return;
        };
        if state.holds_token() {
            warn!(%task, %state, "task already executing; cancel ignored");
            return;
        }

        let failure = self.job_failure(task, FailureKind::Cancelled, "cancelled by caller");
        self.fail(task, failure, out);
    }

    pub(super) fn on_registration_updated(&mut self, backend: &str, core_element: &str) {
        info!(backend, core_element, "implementations changed; refreshing candidates");
        self.capable.remove(core_element);
    }
}
