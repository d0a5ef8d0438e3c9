// src/engine/handle.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::data::{Task, TaskIdAllocator, TaskSpec};
use crate::errors::{FlowdagError, Result};
use crate::exec::BackendSet;
use crate::types::TaskId;

use super::RuntimeEvent;

/// Client side of a running scheduler.
///
/// Cheap to clone; every clone feeds the same event loop and draws ids
/// from the same allocator.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<RuntimeEvent>,
    ids: TaskIdAllocator,
    backends: BackendSet,
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    pub(super) fn new(
        tx: mpsc::Sender<RuntimeEvent>,
        ids: TaskIdAllocator,
        backends: BackendSet,
    ) -> Self {
        Self { tx, ids, backends }
    }

    /// Submit a task and return its id.
    ///
    /// A malformed task is rejected here, before it is given an id.
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId> {
        spec.validate()?;
        let id = self.ids.allocate();
        debug!(task = %id, core_element = %spec.core_element, "submitting task");
        self.send(RuntimeEvent::TaskSubmitted(Task::from_spec(id, spec)))
            .await?;
        Ok(id)
    }

    /// Withdraw a task that has not started executing.
    pub async fn cancel(&self, task: TaskId) -> Result<()> {
        self.send(RuntimeEvent::CancelRequested(task)).await
    }

    /// Replace `backend`'s implementations of `core_element`. An empty list
    /// removes them.
    pub async fn register_implementations(
        &self,
        backend: &str,
        core_element: &str,
        ids: Vec<String>,
    ) -> Result<()> {
        let target = self
            .backends
            .get(backend)
            .ok_or_else(|| FlowdagError::ConfigError(format!("unknown backend '{backend}'")))?;
        target.register_implementations(core_element, ids);

        self.send(RuntimeEvent::RegistrationUpdated {
            backend: backend.to_string(),
            core_element: core_element.to_string(),
        })
        .await
    }

    /// Let outstanding work finish, cancel what can never run, then stop.
    pub async fn drain(&self) -> Result<()> {
        self.send(RuntimeEvent::DrainRequested).await
    }

    /// Stop immediately; in-flight collaborator calls are abandoned.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(RuntimeEvent::ShutdownRequested).await
    }

    async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| FlowdagError::ChannelClosed)
    }
}
