// src/exec/backend.rs

//! Computing backends.
//!
//! The scheduler talks to every backend through [`ComputingBackend`]. The
//! concrete [`Backend`] covers the closed set of variants in
//! [`BackendKind`]; the variants differ only in where their data lives and
//! whether jobs need a preparation step, so one struct tagged by kind is
//! enough. Forecasting math is shared through [`crate::forecast::model`].
//!
//! Each backend runs jobs on its own worker pool, bounded by a semaphore
//! with one permit per slot. `submit` returns a future; the runtime spawns
//! it, so the scheduler loop never waits for a kernel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Instant;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::exec::kernel::KernelRunner;
use crate::forecast::model::{self, BackendCoefficients, ForecastRequest};
use crate::forecast::{ExecutionScore, ProfileHistory};
use crate::job::Job;
use crate::provider::DataValue;
use crate::types::{BackendKind, BackendName, BoxFuture, CoreElementId, Location};

/// A concrete way to run a core element on one backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Implementation {
    pub id: String,
    pub core_element: CoreElementId,
    pub backend: BackendName,
}

/// Static description of a backend, usually taken from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSpec {
    pub name: BackendName,
    pub kind: BackendKind,
    pub slots: usize,
    pub power_watts: f64,
    pub cost_per_second: f64,
    pub bandwidth_mb_per_s: f64,
    /// Initial registrations: core element -> implementation ids.
    pub implementations: HashMap<CoreElementId, Vec<String>>,
}

impl BackendSpec {
    pub fn new(name: impl Into<BackendName>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            slots: 1,
            power_watts: 0.0,
            cost_per_second: 0.0,
            bandwidth_mb_per_s: 0.0,
            implementations: HashMap::new(),
        }
    }
}

/// Raw result of running a job, before its outputs are stored.
#[derive(Debug, Clone)]
pub struct ExecutedJob {
    pub job: Job,
    pub outputs: Vec<(usize, DataValue)>,
    /// Where the outputs were left.
    pub location: Location,
}

pub trait ComputingBackend: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Implementations registered for `core_element`, in registration order.
    fn implementations(&self, core_element: &str) -> Vec<Implementation>;

    /// Replace the registrations for `core_element`.
    fn register_implementations(&self, core_element: &str, ids: Vec<String>);

    fn can_run(&self, core_element: &str) -> bool {
        !self.implementations(core_element).is_empty()
    }

    fn coefficients(&self) -> BackendCoefficients;

    fn forecast(
        &self,
        implementation: &Implementation,
        request: &ForecastRequest,
        history: &ProfileHistory,
    ) -> ExecutionScore {
        model::estimate(
            history,
            self.name(),
            &implementation.id,
            &self.coefficients(),
            request,
            Instant::now(),
        )
    }

    fn needs_preparation(&self) -> bool;

    /// Backend-specific staging between ALL_VALUES_OBTAINED and
    /// ALL_VALUES_READY.
    fn prepare(&self, job: Job) -> BoxFuture<'_, Result<Job>>;

    /// Run `job` on the worker pool. Resolves once the kernel finished.
    fn submit(&self, job: Job) -> BoxFuture<'_, Result<ExecutedJob>>;
}

type Registrations = HashMap<CoreElementId, Vec<Implementation>>;

/// The CPU, accelerator and remote backend variants.
#[derive(Debug)]
pub struct Backend {
    name: BackendName,
    kind: BackendKind,
    slots: usize,
    power_watts: f64,
    cost_per_second: f64,
    bandwidth_mb_per_s: f64,
    workers: Semaphore,
    busy: AtomicUsize,
    implementations: RwLock<Registrations>,
    kernel: Arc<dyn KernelRunner>,
}

impl Backend {
    pub fn new(spec: BackendSpec, kernel: Arc<dyn KernelRunner>) -> Self {
        let slots = spec.slots.max(1);
        let backend = Self {
            name: spec.name,
            kind: spec.kind,
            slots,
            power_watts: spec.power_watts,
            cost_per_second: spec.cost_per_second,
            bandwidth_mb_per_s: spec.bandwidth_mb_per_s,
            workers: Semaphore::new(slots),
            busy: AtomicUsize::new(0),
            implementations: RwLock::new(HashMap::new()),
            kernel,
        };
        for (core_element, ids) in spec.implementations {
            backend.register_implementations(&core_element, ids);
        }
        backend
    }

    /// Jobs submitted and not finished, queued ones included.
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    fn read_impls(&self) -> RwLockReadGuard<'_, Registrations> {
        match self.implementations.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn run(&self, mut job: Job) -> Result<ExecutedJob> {
        let implementation = job.implementation.clone().ok_or_else(|| {
            anyhow!("job {} reached {} without an implementation", job.task, self.name)
        })?;

        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| anyhow!("worker pool of backend {} is closed", self.name))?;

        job.profile.start(Instant::now());
        if self.kind == BackendKind::Remote {
            job.offloaded = true;
        }
        debug!(
            task = %job.task,
            backend = %self.name,
            implementation = %implementation.id,
            "running job"
        );

        let output = self.kernel.run(&implementation, &job).await?;
        job.profile
            .finish(Instant::now(), self.power_watts, self.cost_per_second);

        Ok(ExecutedJob {
            job,
            outputs: output.outputs,
            location: self.kind.location(),
        })
    }
}

/// Decrements the busy counter when a submission ends, however it ends.
struct BusyGuard<'a>(&'a AtomicUsize);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ComputingBackend for Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn implementations(&self, core_element: &str) -> Vec<Implementation> {
        self.read_impls()
            .get(core_element)
            .cloned()
            .unwrap_or_default()
    }

    fn register_implementations(&self, core_element: &str, ids: Vec<String>) {
        let impls: Vec<Implementation> = ids
            .into_iter()
            .map(|id| Implementation {
                id,
                core_element: core_element.to_string(),
                backend: self.name.clone(),
            })
            .collect();

        info!(backend = %self.name, core_element, count = impls.len(), "registered implementations");
        let mut guard = match self.implementations.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if impls.is_empty() {
            guard.remove(core_element);
        } else {
            guard.insert(core_element.to_string(), impls);
        }
    }

    fn coefficients(&self) -> BackendCoefficients {
        BackendCoefficients {
            location: self.kind.location(),
            power_watts: self.power_watts,
            cost_per_second: self.cost_per_second,
            bandwidth_mb_per_s: self.bandwidth_mb_per_s,
            slots: self.slots,
            busy: self.busy(),
        }
    }

    fn needs_preparation(&self) -> bool {
        self.kind == BackendKind::Accelerator
    }

    fn prepare(&self, job: Job) -> BoxFuture<'_, Result<Job>> {
        Box::pin(async move {
            if self.needs_preparation() {
                self.kernel.stage(&job).await?;
            }
            Ok(job)
        })
    }

    fn submit(&self, job: Job) -> BoxFuture<'_, Result<ExecutedJob>> {
        self.busy.fetch_add(1, Ordering::SeqCst);
        let busy = BusyGuard(&self.busy);
        Box::pin(async move {
            let _busy = busy;
            self.run(job).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::kernel::SimulatedKernel;
    use crate::fs::mock::MockFileSystem;

    fn backend(kind: BackendKind) -> Backend {
        let kernel = Arc::new(SimulatedKernel::new(Arc::new(MockFileSystem::new()), "work"));
        let mut spec = BackendSpec::new("b", kind);
        spec.implementations
            .insert("matmul".into(), vec!["matmul_a".into(), "matmul_b".into()]);
        Backend::new(spec, kernel)
    }

    #[test]
    fn registration_drives_can_run() {
        let b = backend(BackendKind::Cpu);
        assert!(b.can_run("matmul"));
        assert!(!b.can_run("fft"));

        b.register_implementations("fft", vec!["fft_cpu".into()]);
        assert!(b.can_run("fft"));
        assert_eq!(b.implementations("fft")[0].backend, "b");

        b.register_implementations("matmul", vec![]);
        assert!(!b.can_run("matmul"));
    }

    #[test]
    fn only_accelerators_need_preparation() {
        assert!(!backend(BackendKind::Cpu).needs_preparation());
        assert!(backend(BackendKind::Accelerator).needs_preparation());
        assert!(!backend(BackendKind::Remote).needs_preparation());
        assert_eq!(backend(BackendKind::Remote).coefficients().location, Location::REMOTE);
    }
}
