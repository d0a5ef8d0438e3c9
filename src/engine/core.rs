// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of commands describing what the IO shell should do next
//! - the lifecycle transitions that happened along the way
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for talking
//! to the data provider, the backends and the checkpoint store, and for
//! feeding their answers back as events. The core itself has no channels,
//! no Tokio types and performs no IO, so it can be driven step by step in
//! tests.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::dag::{Analyser, AnalyserRequest};
use crate::data::{Task, TaskIdAllocator, TaskSpec};
use crate::engine::event_handlers::{CoreCommand, CoreStep};
use crate::engine::jobs::{JobSet, JobSets};
use crate::engine::observe::TransitionEvent;
use crate::engine::tokens::TokenPool;
use crate::engine::{RuntimeEvent, RuntimeOptions, TaskOutcome, TaskReport};
use crate::errors::{FailureKind, Result, TaskFailure};
use crate::exec::{BackendSet, ComputingBackend};
use crate::forecast::{ForecastInput, ForecastRequest, PlatformSelector, ProfileHistory};
use crate::job::{Job, JobEvent, JobExecution, JobState, Transition};
use crate::provider::DataValue;
use crate::types::{CheckpointPolicy, CoreElementId, Location, ParamKind, TaskId};

/// Everything the core tracks about one live task.
#[derive(Debug)]
pub(super) struct LiveJob {
    pub(super) execution: JobExecution,
    pub(super) core_element: CoreElementId,
    /// Materialized once the task is dependency-free.
    pub(super) job: Option<Job>,
    /// Raw results between EXECUTED and COMPLETED.
    pub(super) outputs: Option<(Vec<(usize, DataValue)>, Location)>,
}

/// Counts per job set and graph size, for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreSnapshot {
    pub unanalysed: usize,
    pub pending: usize,
    pub dependency_free: usize,
    pub data_present: usize,
    pub data_ready: usize,
    pub executing: usize,
    pub awaiting_store: usize,
    pub tokens_in_use: usize,
    pub tokens_granted: u64,
    pub tokens_released: u64,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub data_items: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Pure scheduler core.
///
/// Owns the analyser (and through it the graph, the version store and the
/// checkpoint blocks), the job sets, the concurrency tokens and the
/// platform selector.
pub struct CoreRuntime {
    pub(super) analyser: Analyser,
    pub(super) requests: VecDeque<AnalyserRequest>,
    pub(super) live: HashMap<TaskId, LiveJob>,
    pub(super) sets: JobSets,
    pub(super) tokens: TokenPool,
    pub(super) backends: BackendSet,
    pub(super) capable: HashMap<CoreElementId, Vec<Arc<dyn ComputingBackend>>>,
    pub(super) selector: PlatformSelector,
    pub(super) history: ProfileHistory,
    pub(super) options: RuntimeOptions,
    pub(super) ids: TaskIdAllocator,
    pub(super) draining: bool,
    pub(super) seen: u64,
    pub(super) completed: u64,
    pub(super) failed: u64,
}

impl fmt::Debug for CoreRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreRuntime")
            .field("snapshot", &self.snapshot())
            .field("backends", &self.backends)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl CoreRuntime {
    pub fn new(
        backends: BackendSet,
        selector: PlatformSelector,
        options: RuntimeOptions,
        block_size: usize,
        policy: CheckpointPolicy,
    ) -> Self {
        Self {
            analyser: Analyser::new(block_size, policy),
            requests: VecDeque::new(),
            live: HashMap::new(),
            sets: JobSets::new(),
            tokens: TokenPool::new(options.max_concurrent_jobs),
            backends,
            capable: HashMap::new(),
            selector,
            history: ProfileHistory::new(),
            options,
            ids: TaskIdAllocator::new(),
            draining: false,
            seen: 0,
            completed: 0,
            failed: 0,
        }
    }

    pub fn with_history(mut self, history: ProfileHistory) -> Self {
        self.history = history;
        self
    }

    /// Share the task id allocator with submission handles.
    pub fn ids(&self) -> TaskIdAllocator {
        self.ids.clone()
    }

    pub fn analyser(&self) -> &Analyser {
        &self.analyser
    }

    pub fn history(&self) -> &ProfileHistory {
        &self.history
    }

    pub fn tokens(&self) -> &TokenPool {
        &self.tokens
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// State of a live task; `None` once it completed or failed.
    pub fn job_state(&self, task: TaskId) -> Option<JobState> {
        self.live.get(&task).map(|l| l.execution.state())
    }

    pub fn job_set(&self, task: TaskId) -> Option<JobSet> {
        self.sets.set_of(task)
    }

    /// The job materialized for `task`, once it is dependency-free.
    pub fn job(&self, task: TaskId) -> Option<&Job> {
        self.live.get(&task).and_then(|l| l.job.as_ref())
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            unanalysed: self.sets.count(JobSet::Unanalysed),
            pending: self.sets.count(JobSet::Pending),
            dependency_free: self.sets.count(JobSet::DependencyFree),
            data_present: self.sets.count(JobSet::DataPresent),
            data_ready: self.sets.count(JobSet::DataReady),
            executing: self.sets.count(JobSet::Executing),
            awaiting_store: self.sets.count(JobSet::AwaitingStore),
            tokens_in_use: self.tokens.in_use(),
            tokens_granted: self.tokens.granted(),
            tokens_released: self.tokens.released(),
            graph_nodes: self.analyser.graph().node_count(),
            graph_edges: self.analyser.graph().edge_count(),
            data_items: self.analyser.store().len(),
            completed: self.completed,
            failed: self.failed,
        }
    }

    /// Nothing is in flight: no analyser request is queued and every live
    /// job is blocked in the graph.
    pub fn is_quiescent(&self) -> bool {
        self.requests.is_empty()
            && JobSet::ALL
                .iter()
                .filter(|s| **s != JobSet::Pending)
                .all(|s| self.sets.count(*s) == 0)
    }

    /// Validate and accept a task without going through a handle.
    ///
    /// Malformed tasks are rejected here and never reach the graph. The task
    /// is analysed on the next [`step`](Self::step) or [`tick`](Self::tick).
    pub fn submit(&mut self, spec: TaskSpec) -> Result<TaskId> {
        spec.validate()?;
        let id = self.ids.allocate();
        self.accept(Task::from_spec(id, spec));
        Ok(id)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let mut out = CoreStep::new();

        match event {
            RuntimeEvent::TaskSubmitted(task) => self.accept(task),
            RuntimeEvent::ExistenceChecked {
                task,
                index,
                result,
            } => self.on_existence_checked(task, index, result, &mut out),
            RuntimeEvent::ValueObtained {
                task,
                index,
                result,
            } => self.on_value_obtained(task, index, result, &mut out),
            RuntimeEvent::Prepared { task, result } => self.on_prepared(task, result, &mut out),
            RuntimeEvent::JobExecuted { task, result } => self.on_executed(task, result, &mut out),
            RuntimeEvent::OutputsStored { task, result } => {
                self.on_outputs_stored(task, result, &mut out)
            }
            RuntimeEvent::CancelRequested(task) => self.on_cancel(task, &mut out),
            RuntimeEvent::RegistrationUpdated {
                backend,
                core_element,
            } => self.on_registration_updated(&backend, &core_element),
            RuntimeEvent::DrainRequested => {
                info!("drain requested");
                self.draining = true;
            }
            RuntimeEvent::ShutdownRequested => {
                out.keep_running = false;
                return out;
            }
        }

        self.pump(&mut out);
        self.check_exit(&mut out);
        out
    }

    /// Run the scheduling loop without a new event.
    pub fn tick(&mut self) -> CoreStep {
        let mut out = CoreStep::new();
        self.pump(&mut out);
        self.check_exit(&mut out);
        out
    }

    pub(super) fn accept(&mut self, task: Task) {
        let id = task.id;
        debug!(task = %id, core_element = %task.core_element, "task submitted");

        self.live.insert(
            id,
            LiveJob {
                execution: JobExecution::new(id),
                core_element: task.core_element.clone(),
                job: None,
                outputs: None,
            },
        );
        self.sets.insert(id, JobSet::Unanalysed);
        self.requests.push_back(AnalyserRequest::NewTask(task));
        self.seen += 1;
    }

    /// Repeat until nothing changes:
    /// - drain analyser requests into the graph
    /// - hand executed jobs to the store
    /// - start data acquisition for dependency-free jobs
    /// - start preparation for data-present jobs
    /// - grant free tokens to data-ready jobs, oldest first
    fn pump(&mut self, out: &mut CoreStep) {
        loop {
            let mut progressed = false;

            while let Some(request) = self.requests.pop_front() {
                progressed = true;
                self.apply_analysis(request, out);
            }

            for task in self.sets.take_arrivals(JobSet::AwaitingStore) {
                progressed = true;
                self.store_outputs(task, out);
            }

            for task in self.sets.take_arrivals(JobSet::DependencyFree) {
                progressed = true;
                self.start_acquisition(task, out);
            }

            for task in self.sets.take_arrivals(JobSet::DataPresent) {
                progressed = true;
                self.start_preparation(task, out);
            }

            while self.tokens.has_free() {
                let Some(task) = self.sets.pop_front(JobSet::DataReady) else {
                    break;
                };
                progressed = true;
                self.start_execution(task, out);
            }

            if !progressed {
                break;
            }
        }
    }

    fn apply_analysis(&mut self, request: AnalyserRequest, out: &mut CoreStep) {
        let new_task = match &request {
            AnalyserRequest::NewTask(task) => Some((task.id, task.core_element.clone())),
            _ => None,
        };

        let step = match self.analyser.process(request) {
            Ok(step) => step,
            Err(err) => {
                error!(error = %err, "analyser rejected request");
                if let Some((task, core_element)) = new_task {
                    let failure = TaskFailure::new(
                        task,
                        core_element,
                        FailureKind::Execution,
                        format!("analysis failed: {err}"),
                    );
                    self.fail(task, failure, out);
                }
                return;
            }
        };

        if let Some((task, predecessors)) = step.analysed {
            if self.advance(task, JobEvent::Analysed, out).is_some() {
                self.sets.move_to(task, JobSet::Pending);
                debug!(%task, predecessors, "task in graph");
            }
        }

        for task in step.newly_free {
            self.mark_dependency_free(task, out);
        }

        if !step.pruned.is_empty() {
            debug!(pruned = ?step.pruned, "pruned completed tasks");
        }
        if !step.retired.is_empty() {
            debug!(retired = ?step.retired, "retired versions");
        }
        if let Some(block) = step.saved_block {
            info!(%block, "checkpoint block durable");
        }
    }

    fn mark_dependency_free(&mut self, task: TaskId, out: &mut CoreStep) {
        if self.advance(task, JobEvent::DependenciesResolved, out).is_none() {
            return;
        }

        let Some(node) = self.analyser.graph().node(task) else {
            warn!(%task, "dependency-free task missing from graph");
            return;
        };
        let job = Job::new(&node.task, &node.accesses);

        if let Some(live) = self.live.get_mut(&task) {
            live.job = Some(job);
        }
        self.sets.move_to(task, JobSet::DependencyFree);
    }

    /// Select a backend, then ask the provider whether every input exists.
    fn start_acquisition(&mut self, task: TaskId, out: &mut CoreStep) {
        let Some(job) = self.live.get(&task).and_then(|l| l.job.as_ref()) else {
            return;
        };
        let request = self.forecast_request(job);
        let candidates = self.candidates(&request.core_element);

        let selection = match self.selector.select(&candidates, &request, &self.history) {
            Ok(selection) => selection,
            Err(failure) => {
                self.fail(task, failure, out);
                return;
            }
        };
        info!(
            %task,
            backend = %selection.backend,
            implementation = %selection.implementation.id,
            forecast_ms = selection.score.time.avg,
            "selected backend"
        );

        let Some(job) = self.live.get_mut(&task).and_then(|l| l.job.as_mut()) else {
            return;
        };
        job.backend = Some(selection.backend);
        job.implementation = Some(selection.implementation);
        let reads = job.reads();

        match self.advance(task, JobEvent::AwaitAnswers(reads.len()), out) {
            Some(t) if t.to == JobState::ParamExistenceChecked => self.start_fetch(task, out),
            Some(_) => {}
            None => {
                for (index, data) in reads {
                    out.commands.push(CoreCommand::CheckExistence { task, index, data });
                }
            }
        }
    }

    /// Ask the provider for the contents of every input.
    pub(super) fn start_fetch(&mut self, task: TaskId, out: &mut CoreStep) {
        let Some(job) = self.live.get(&task).and_then(|l| l.job.as_ref()) else {
            return;
        };
        let reads: Vec<_> = job
            .reads()
            .into_iter()
            .map(|(index, data)| {
                let as_file = job.params[index].kind == ParamKind::File;
                (index, data, as_file)
            })
            .collect();

        match self.advance(task, JobEvent::AwaitAnswers(reads.len()), out) {
            Some(t) if t.to == JobState::AllValuesObtained => {
                self.sets.move_to(task, JobSet::DataPresent)
            }
            Some(_) => {}
            None => {
                for (index, data, as_file) in reads {
                    out.commands.push(CoreCommand::ObtainValue {
                        task,
                        index,
                        data,
                        as_file,
                    });
                }
            }
        }
    }

    fn start_preparation(&mut self, task: TaskId, out: &mut CoreStep) {
        let Some(job) = self.live.get(&task).and_then(|l| l.job.as_ref()) else {
            return;
        };
        let Some(backend) = job.backend.as_deref().and_then(|b| self.backends.get(b)) else {
            let failure = TaskFailure::new(
                task,
                job.core_element.clone(),
                FailureKind::NoEligibleBackend,
                "selected backend is no longer registered",
            );
            self.fail(task, failure, out);
            return;
        };

        if backend.needs_preparation() {
            out.commands.push(CoreCommand::Prepare {
                task,
                backend: backend.name().to_string(),
                job: job.clone(),
            });
        } else if self.advance(task, JobEvent::Prepared, out).is_some() {
            self.sets.move_to(task, JobSet::DataReady);
        }
    }

    fn start_execution(&mut self, task: TaskId, out: &mut CoreStep) {
        if !self.tokens.try_acquire() {
            return;
        }
        if self.advance(task, JobEvent::Started, out).is_none() {
            self.tokens.release();
            return;
        }

        let Some(job) = self.live.get(&task).and_then(|l| l.job.as_ref()) else {
            return;
        };
        let backend = job.backend.clone().unwrap_or_default();
        debug!(%task, %backend, in_use = self.tokens.in_use(), "token granted");

        out.commands.push(CoreCommand::Dispatch {
            task,
            backend,
            job: job.clone(),
        });
        self.sets.move_to(task, JobSet::Executing);
    }

    fn store_outputs(&mut self, task: TaskId, out: &mut CoreStep) {
        let Some(live) = self.live.get_mut(&task) else {
            return;
        };
        let Some(job) = live.job.as_ref() else {
            return;
        };
        let (produced, location) = live.outputs.take().unwrap_or((Vec::new(), Location::LOCAL));

        let mut outputs = Vec::with_capacity(produced.len());
        for (index, value) in produced {
            match job.params.get(index).and_then(|p| p.written_ref()) {
                Some(data) => outputs.push((index, data, value)),
                None => warn!(%task, index, "backend returned a value for a parameter it does not write"),
            }
        }

        let blocks = self.analyser.blocks();
        let checkpoint = if blocks.is_durable(task) {
            blocks.block_of(task)
        } else {
            None
        };

        out.commands.push(CoreCommand::StoreOutputs {
            task,
            outputs,
            location,
            checkpoint,
        });
    }

    /// Park `task` in the failed state and report it.
    ///
    /// The task leaves every job set and gives back its token if it held
    /// one. Its graph node stays, so its successors remain blocked.
    pub(super) fn fail(&mut self, task: TaskId, failure: TaskFailure, out: &mut CoreStep) {
        let Some(mut live) = self.live.remove(&task) else {
            return;
        };

        let before = live.execution.state();
        match live.execution.advance(JobEvent::Failed(failure.clone())) {
            Ok(Some(transition)) => out.transitions.push(TransitionEvent::now(task, transition)),
            Ok(None) => {}
            Err(err) => warn!(%task, error = %err, "failure on finished job"),
        }
        if before.holds_token() {
            self.tokens.release();
        }
        self.sets.remove(task);

        let request = match failure.kind {
            FailureKind::Cancelled => AnalyserRequest::Cancel(task),
            _ => AnalyserRequest::TaskFailed(task),
        };
        self.requests.push_back(request);
        self.failed += 1;

        warn!(%task, kind = ?failure.kind, message = %failure.message, "task failed");
        out.commands.push(CoreCommand::Report(TaskReport {
            task,
            core_element: live.core_element,
            backend: live.job.and_then(|j| j.backend),
            outcome: TaskOutcome::Failed(failure),
        }));
    }

    /// Feed `event` to the job's state machine and record the transition.
    pub(super) fn advance(
        &mut self,
        task: TaskId,
        event: JobEvent,
        out: &mut CoreStep,
    ) -> Option<Transition> {
        let live = self.live.get_mut(&task)?;
        match live.execution.advance(event) {
            Ok(Some(transition)) => {
                debug!(%task, from = %transition.from, to = %transition.to, "job transition");
                out.transitions.push(TransitionEvent::now(task, transition));
                Some(transition)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%task, error = %err, "ignoring out-of-order job event");
                None
            }
        }
    }

    fn forecast_request(&self, job: &Job) -> ForecastRequest {
        let store = self.analyser.store();
        ForecastRequest {
            task: job.task,
            core_element: job.core_element.clone(),
            submitted_at: job.profile.submitted_at,
            inputs: job
                .reads()
                .into_iter()
                .map(|(index, data)| ForecastInput {
                    index,
                    location: store.location(data.version),
                    size: None,
                })
                .collect(),
            outputs: job.writes().into_iter().map(|(index, _)| index).collect(),
        }
    }

    /// Backends to consider for `core_element`. Capable backends are cached
    /// per core element until a registration update invalidates them.
    fn candidates(&mut self, core_element: &str) -> Vec<Arc<dyn ComputingBackend>> {
        if self.selector.pinned(core_element).is_some() {
            return self.backends.iter().cloned().collect();
        }
        let backends = &self.backends;
        self.capable
            .entry(core_element.to_string())
            .or_insert_with(|| backends.capable(core_element))
            .clone()
    }

    /// Exit once idle when draining (or when configured to), cancelling
    /// tasks that can never run because a predecessor failed.
    fn check_exit(&mut self, out: &mut CoreStep) {
        let wants_exit = self.draining || (self.options.exit_when_idle && self.seen > 0);
        if !wants_exit || !self.is_quiescent() {
            return;
        }

        for task in self.sets.members(JobSet::Pending) {
            let core_element = self
                .live
                .get(&task)
                .map(|l| l.core_element.clone())
                .unwrap_or_default();
            let failure = TaskFailure::new(
                task,
                core_element,
                FailureKind::Cancelled,
                "blocked by a failed predecessor",
            );
            self.fail(task, failure, out);
        }
        self.pump(out);

        info!(
            completed = self.completed,
            failed = self.failed,
            "scheduler idle; requesting exit"
        );
        out.commands.push(CoreCommand::RequestExit);
        out.keep_running = false;
    }
}
