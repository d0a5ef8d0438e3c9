// src/engine/builder.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::checkpoint::CheckpointStore;
use crate::data::TaskSpec;
use crate::errors::{FlowdagError, Result};
use crate::exec::{BackendSet, ComputingBackend};
use crate::forecast::{PlatformSelector, ProfileHistory};
use crate::provider::DataProvider;
use crate::types::{CheckpointPolicy, TaskId};

use super::core::CoreRuntime;
use super::handle::SchedulerHandle;
use super::observe::{TracingSink, TransitionSink};
use super::runtime::{Runtime, RuntimeParts};
use super::{RuntimeEvent, RuntimeOptions, TaskReport};

const DEFAULT_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_BLOCK_SIZE: usize = 3;

/// Assembles a [`Scheduler`] from its collaborators.
pub struct SchedulerBuilder {
    options: RuntimeOptions,
    block_size: usize,
    policy: CheckpointPolicy,
    backends: BackendSet,
    selector: PlatformSelector,
    history: ProfileHistory,
    provider: Option<Arc<dyn DataProvider>>,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
    sink: Arc<dyn TransitionSink>,
    channel_capacity: usize,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            options: RuntimeOptions::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            policy: CheckpointPolicy::None,
            backends: BackendSet::new(),
            selector: PlatformSelector::default(),
            history: ProfileHistory::new(),
            provider: None,
            checkpoint: None,
            sink: Arc::new(TracingSink),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_concurrent_jobs(mut self, limit: Option<usize>) -> Self {
        self.options.max_concurrent_jobs = limit;
        self
    }

    pub fn exit_when_idle(mut self, exit: bool) -> Self {
        self.options.exit_when_idle = exit;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.options.idle_timeout = timeout;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ComputingBackend>) -> Result<Self> {
        self.backends.push(backend)?;
        Ok(self)
    }

    pub fn backends(mut self, backends: BackendSet) -> Self {
        self.backends = backends;
        self
    }

    pub fn selector(mut self, selector: PlatformSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn history(mut self, history: ProfileHistory) -> Self {
        self.history = history;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn TransitionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        let provider = self
            .provider
            .ok_or_else(|| FlowdagError::ConfigError("no data provider configured".to_string()))?;
        if self.backends.is_empty() {
            warn!("scheduler built without backends; every task will fail");
        }
        // Durable tasks are only pruned after their outputs are saved.
        if self.policy != CheckpointPolicy::None && self.checkpoint.is_none() {
            return Err(FlowdagError::ConfigError(format!(
                "checkpoint policy {:?} needs a checkpoint store",
                self.policy
            )));
        }

        let core = CoreRuntime::new(
            self.backends,
            self.selector,
            self.options,
            self.block_size,
            self.policy,
        )
        .with_history(self.history);
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        Ok(Scheduler {
            core,
            tx,
            rx,
            provider,
            checkpoint: self.checkpoint,
            sink: self.sink,
        })
    }
}

/// A configured scheduler that has not started running yet.
pub struct Scheduler {
    core: CoreRuntime,
    tx: mpsc::Sender<RuntimeEvent>,
    rx: mpsc::Receiver<RuntimeEvent>,
    provider: Arc<dyn DataProvider>,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
    sink: Arc<dyn TransitionSink>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn core(&self) -> &CoreRuntime {
        &self.core
    }

    /// Queue a task before the event loop starts.
    pub fn submit(&mut self, spec: TaskSpec) -> Result<TaskId> {
        self.core.submit(spec)
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.tx.clone(), self.core.ids(), self.core.backends().clone())
    }

    /// Split into the event loop, a handle to it, and the report stream.
    pub fn into_runtime(self) -> (Runtime, SchedulerHandle, mpsc::UnboundedReceiver<TaskReport>) {
        let handle = self.handle();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let parts = RuntimeParts {
            provider: self.provider,
            checkpoint: self.checkpoint,
            sink: self.sink,
            reports: reports_tx,
        };
        let runtime = Runtime::new(self.core, self.rx, self.tx, parts);
        (runtime, handle, reports_rx)
    }

    /// Run the event loop on its own Tokio task.
    pub fn spawn(
        self,
    ) -> (
        SchedulerHandle,
        mpsc::UnboundedReceiver<TaskReport>,
        JoinHandle<Result<()>>,
    ) {
        let (runtime, handle, reports) = self.into_runtime();
        let join = tokio::spawn(runtime.run());
        (handle, reports, join)
    }
}
