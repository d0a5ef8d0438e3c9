// src/engine/runtime.rs

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::errors::Result;
use crate::exec::BackendSet;
use crate::provider::{DataProvider, DataRef, DataValue};
use crate::types::{BlockId, Location, TaskId};

use super::core::CoreRuntime;
use super::observe::TransitionSink;
use super::{CoreCommand, CoreStep, RuntimeEvent, StoredOutputs, TaskReport};

/// Drives the scheduler core in response to `RuntimeEvent`s, and delegates
/// the data provider, backend and checkpoint work it asks for.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. Every collaborator call runs in its own Tokio task
/// and reports back through the event channel, so the loop never blocks on
/// a provider or a backend.
pub struct Runtime {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    provider: Arc<dyn DataProvider>,
    backends: BackendSet,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
    sink: Arc<dyn TransitionSink>,
    reports: mpsc::UnboundedSender<TaskReport>,
    idle_timeout: Duration,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

/// Collaborators the shell talks to on behalf of the core.
pub struct RuntimeParts {
    pub provider: Arc<dyn DataProvider>,
    pub checkpoint: Option<Arc<dyn CheckpointStore>>,
    pub sink: Arc<dyn TransitionSink>,
    pub reports: mpsc::UnboundedSender<TaskReport>,
}

impl Runtime {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        parts: RuntimeParts,
    ) -> Self {
        let backends = core.backends().clone();
        let idle_timeout = core.options().idle_timeout;
        Self {
            core,
            event_rx,
            event_tx,
            provider: parts.provider,
            backends,
            checkpoint: parts.checkpoint,
            sink: parts.sink,
            reports: parts.reports,
            idle_timeout,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime; when nothing arrives within the
    ///   idle timeout, lets the core re-run its scheduling loop anyway.
    /// - Records transitions and executes the commands the core returns.
    pub async fn run(mut self) -> Result<()> {
        info!("flowdag runtime started");

        let step = self.core.tick();
        let mut keep_running = self.apply(step);

        while keep_running {
            let step = match tokio::time::timeout(self.idle_timeout, self.event_rx.recv()).await {
                Ok(Some(event)) => {
                    debug!(?event, "runtime received event");
                    self.core.step(event)
                }
                Ok(None) => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
                Err(_) => self.core.tick(),
            };
            keep_running = self.apply(step);
        }

        let snapshot = self.core.snapshot();
        info!(
            completed = snapshot.completed,
            failed = snapshot.failed,
            graph_nodes = snapshot.graph_nodes,
            "runtime exiting"
        );
        Ok(())
    }

    /// Record transitions and execute commands; returns whether to continue.
    fn apply(&mut self, step: CoreStep) -> bool {
        for transition in &step.transitions {
            self.sink.record(transition);
        }
        for command in step.commands {
            self.execute_command(command);
        }
        if !step.keep_running {
            info!("core requested exit; stopping runtime");
        }
        step.keep_running
    }

    /// Execute a single command from the core.
    fn execute_command(&self, command: CoreCommand) {
        match command {
            CoreCommand::CheckExistence { task, index, data } => {
                let provider = Arc::clone(&self.provider);
                self.reply(async move {
                    let result = provider
                        .request_existence(data)
                        .await
                        .map_err(|e| format!("{e:#}"));
                    RuntimeEvent::ExistenceChecked {
                        task,
                        index,
                        result,
                    }
                });
            }
            CoreCommand::ObtainValue {
                task,
                index,
                data,
                as_file,
            } => {
                let provider = Arc::clone(&self.provider);
                self.reply(async move {
                    let result = obtain(provider.as_ref(), data, as_file)
                        .await
                        .map_err(|e| format!("{e:#}"));
                    RuntimeEvent::ValueObtained {
                        task,
                        index,
                        result,
                    }
                });
            }
            CoreCommand::Prepare { task, backend, job } => {
                let Some(backend) = self.backends.get(&backend).cloned() else {
                    self.reply(async move {
                        RuntimeEvent::Prepared {
                            task,
                            result: Err(format!("backend '{backend}' is not registered")),
                        }
                    });
                    return;
                };
                self.reply(async move {
                    let result = backend
                        .prepare(job)
                        .await
                        .map(|_| ())
                        .map_err(|e| format!("{e:#}"));
                    RuntimeEvent::Prepared { task, result }
                });
            }
            CoreCommand::Dispatch { task, backend, job } => {
                let Some(backend) = self.backends.get(&backend).cloned() else {
                    self.reply(async move {
                        RuntimeEvent::JobExecuted {
                            task,
                            result: Err(format!("backend '{backend}' is not registered")),
                        }
                    });
                    return;
                };
                debug!(%task, backend = backend.name(), "dispatching job");
                self.reply(async move {
                    let result = backend.submit(job).await.map_err(|e| format!("{e:#}"));
                    RuntimeEvent::JobExecuted { task, result }
                });
            }
            CoreCommand::StoreOutputs {
                task,
                outputs,
                location,
                checkpoint,
            } => {
                let provider = Arc::clone(&self.provider);
                let store = checkpoint.and(self.checkpoint.clone());
                self.reply(async move {
                    let result = store_outputs(
                        provider.as_ref(),
                        store,
                        task,
                        outputs,
                        location,
                        checkpoint,
                    )
                    .await
                    .map_err(|e| format!("{e:#}"));
                    RuntimeEvent::OutputsStored { task, result }
                });
            }
            CoreCommand::Report(report) => {
                if self.reports.send(report).is_err() {
                    debug!("report receiver dropped");
                }
            }
            CoreCommand::RequestExit => {
                info!("core issued RequestExit command");
            }
        }
    }

    /// Run `work` on its own task and feed its result back into the loop.
    fn reply<F>(&self, work: F)
    where
        F: Future<Output = RuntimeEvent> + Send + 'static,
    {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let event = work.await;
            if tx.send(event).await.is_err() {
                debug!("runtime stopped; dropping collaborator answer");
            }
        });
    }
}

async fn obtain(
    provider: &dyn DataProvider,
    data: DataRef,
    as_file: bool,
) -> anyhow::Result<(DataValue, u64)> {
    if as_file {
        let path = provider.obtain_as_file(data.clone()).await?;
        let size = provider.obtain_size(data).await?;
        Ok((DataValue::File(path), size))
    } else {
        let bytes = provider.obtain_as_object(data).await?;
        let size = bytes.len() as u64;
        Ok((DataValue::Object(bytes), size))
    }
}

async fn store_outputs(
    provider: &dyn DataProvider,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
    task: TaskId,
    outputs: Vec<(usize, DataRef, DataValue)>,
    location: Location,
    block: Option<BlockId>,
) -> anyhow::Result<StoredOutputs> {
    let mut stored = StoredOutputs::default();

    for (index, data, value) in outputs {
        match &value {
            DataValue::Object(bytes) => provider.store_object(data.clone(), bytes.clone()).await?,
            DataValue::File(path) => provider.store_file(data.clone(), path.clone()).await?,
        }
        let size = provider.obtain_size(data.clone()).await?;
        provider.advertise(data.clone(), location).await?;
        stored.sizes.push((index, size));

        if let (Some(store), Some(block)) = (&checkpoint, block) {
            let store = Arc::clone(store);
            let rename = data.rename();
            // Checkpoint writes are blocking file IO.
            let saved = tokio::task::spawn_blocking(move || store.save(block, &data, &value))
                .await
                .map_err(|e| anyhow!("checkpoint writer for {rename} stopped: {e}"))?;
            match saved {
                Ok(digest) => debug!(%task, %block, version = %rename, %digest, "checkpointed"),
                Err(err) => {
                    warn!(%task, %block, error = %err, "checkpoint failed");
                    return Err(err);
                }
            }
        }
    }

    stored.checkpointed = checkpoint.is_some() && block.is_some();
    Ok(stored)
}
