#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use flowdag::data::TaskSpec;
use flowdag::engine::{
    CoreCommand, CoreRuntime, CoreStep, RuntimeEvent, RuntimeOptions, StoredOutputs, TaskReport,
    TransitionEvent,
};
use flowdag::exec::{BackendSet, ComputingBackend, ExecutedJob};
use flowdag::forecast::PlatformSelector;
use flowdag::job::{Job, JobState};
use flowdag::provider::DataValue;
use flowdag::types::{BlockId, CheckpointPolicy, Location, TaskId};
use flowdag_test_utils::builders::cpu_backend;
use flowdag_test_utils::fake_kernel::FakeKernel;

pub use flowdag_test_utils::init_tracing;

/// Core elements the default test backend can run.
pub const CORE_ELEMENTS: &[&str] = &["work", "produce", "consume", "update"];

pub fn core_with(
    limit: Option<usize>,
    backends: Vec<Arc<dyn ComputingBackend>>,
    selector: PlatformSelector,
    block_size: usize,
    policy: CheckpointPolicy,
) -> CoreRuntime {
    let mut set = BackendSet::new();
    for backend in backends {
        set.push(backend).expect("unique backend names");
    }
    let options = RuntimeOptions {
        max_concurrent_jobs: limit,
        exit_when_idle: false,
        ..RuntimeOptions::default()
    };
    CoreRuntime::new(set, selector, options, block_size, policy)
}

/// Drives a `CoreRuntime` step by step without Tokio.
///
/// Provider and storage commands are answered immediately. Dispatched jobs
/// stay in EXECUTING until the test calls [`CoreDriver::finish`] or
/// [`CoreDriver::fail_execution`].
pub struct CoreDriver {
    pub core: CoreRuntime,
    /// Names of data items the provider claims not to have.
    pub missing: HashSet<String>,
    executing: Vec<(TaskId, Job)>,
    pub dispatched: Vec<TaskId>,
    pub prepared: Vec<TaskId>,
    pub stored: Vec<(TaskId, Option<BlockId>)>,
    pub reports: Vec<TaskReport>,
    pub transitions: Vec<TransitionEvent>,
    pub exit_requested: bool,
}

impl CoreDriver {
    pub fn new(core: CoreRuntime) -> Self {
        Self {
            core,
            missing: HashSet::new(),
            executing: Vec::new(),
            dispatched: Vec::new(),
            prepared: Vec::new(),
            stored: Vec::new(),
            reports: Vec::new(),
            transitions: Vec::new(),
            exit_requested: false,
        }
    }

    /// One CPU backend able to run [`CORE_ELEMENTS`], no checkpointing.
    pub fn with_limit(limit: Option<usize>) -> Self {
        let backend = cpu_backend("cpu", Arc::new(FakeKernel::new()), CORE_ELEMENTS);
        Self::new(core_with(
            limit,
            vec![backend],
            PlatformSelector::default(),
            3,
            CheckpointPolicy::None,
        ))
    }

    pub fn submit(&mut self, spec: TaskSpec) -> TaskId {
        let id = self.core.submit(spec).expect("task should be accepted");
        self.tick();
        id
    }

    pub fn tick(&mut self) {
        let step = self.core.tick();
        self.absorb(step);
    }

    pub fn send(&mut self, event: RuntimeEvent) {
        let step = self.core.step(event);
        self.absorb(step);
    }

    /// Tasks currently holding a token, oldest dispatch first.
    pub fn executing(&self) -> Vec<TaskId> {
        self.executing.iter().map(|(task, _)| *task).collect()
    }

    /// Complete the execution of `task`, writing `<rename>` into every output.
    pub fn finish(&mut self, task: TaskId) {
        let pos = self
            .executing
            .iter()
            .position(|(t, _)| *t == task)
            .expect("task is not executing");
        let (_, job) = self.executing.remove(pos);
        let outputs = job
            .writes()
            .into_iter()
            .map(|(index, data)| (index, DataValue::Object(data.rename().into_bytes())))
            .collect();
        self.send(RuntimeEvent::JobExecuted {
            task,
            result: Ok(ExecutedJob {
                job,
                outputs,
                location: Location::LOCAL,
            }),
        });
    }

    pub fn fail_execution(&mut self, task: TaskId, message: &str) {
        let pos = self
            .executing
            .iter()
            .position(|(t, _)| *t == task)
            .expect("task is not executing");
        self.executing.remove(pos);
        self.send(RuntimeEvent::JobExecuted {
            task,
            result: Err(message.to_string()),
        });
    }

    /// Finish the oldest executing job, if any.
    pub fn finish_next(&mut self) -> Option<TaskId> {
        let task = self.executing.first().map(|(t, _)| *t)?;
        self.finish(task);
        Some(task)
    }

    pub fn run_until_idle(&mut self) {
        while self.finish_next().is_some() {}
    }

    pub fn report(&self, task: TaskId) -> Option<&TaskReport> {
        self.reports.iter().find(|r| r.task == task)
    }

    /// Index of the transition that moved `task` into `state`.
    pub fn position(&self, task: TaskId, state: JobState) -> Option<usize> {
        self.transitions
            .iter()
            .position(|e| e.task == task && e.to == state)
    }

    pub fn states_of(&self, task: TaskId) -> Vec<JobState> {
        self.transitions
            .iter()
            .filter(|e| e.task == task)
            .map(|e| e.to)
            .collect()
    }

    fn absorb(&mut self, step: CoreStep) {
        let mut queue = VecDeque::from([step]);
        while let Some(step) = queue.pop_front() {
            self.transitions.extend(step.transitions);
            for command in step.commands {
                if let Some(event) = self.answer(command) {
                    queue.push_back(self.core.step(event));
                }
            }
        }
    }

    fn answer(&mut self, command: CoreCommand) -> Option<RuntimeEvent> {
        match command {
            CoreCommand::CheckExistence { task, index, data } => {
                let exists = !self.missing.contains(data.key.name());
                Some(RuntimeEvent::ExistenceChecked {
                    task,
                    index,
                    result: Ok(exists),
                })
            }
            CoreCommand::ObtainValue {
                task, index, data, ..
            } => {
                let bytes = data.rename().into_bytes();
                let size = bytes.len() as u64;
                Some(RuntimeEvent::ValueObtained {
                    task,
                    index,
                    result: Ok((DataValue::Object(bytes), size)),
                })
            }
            CoreCommand::Prepare { task, .. } => {
                self.prepared.push(task);
                Some(RuntimeEvent::Prepared {
                    task,
                    result: Ok(()),
                })
            }
            CoreCommand::Dispatch { task, job, .. } => {
                self.dispatched.push(task);
                self.executing.push((task, job));
                None
            }
            CoreCommand::StoreOutputs {
                task,
                outputs,
                checkpoint,
                ..
            } => {
                self.stored.push((task, checkpoint));
                let sizes = outputs
                    .iter()
                    .map(|(index, _, value)| match value {
                        DataValue::Object(bytes) => (*index, bytes.len() as u64),
                        DataValue::File(_) => (*index, 0),
                    })
                    .collect();
                Some(RuntimeEvent::OutputsStored {
                    task,
                    result: Ok(StoredOutputs {
                        sizes,
                        checkpointed: checkpoint.is_some(),
                    }),
                })
            }
            CoreCommand::Report(report) => {
                self.reports.push(report);
                None
            }
            CoreCommand::RequestExit => {
                self.exit_requested = true;
                None
            }
        }
    }
}
