// src/exec/kernel.rs

//! Boundary to the code that actually computes a job.
//!
//! Native and accelerator kernels live outside this crate. A backend hands
//! them a fully prepared [`Job`] and gets back the contents of every
//! parameter the job writes.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::trace;

use crate::exec::backend::Implementation;
use crate::fs::{self, FileSystem};
use crate::job::Job;
use crate::provider::DataValue;
use crate::types::{BoxFuture, CoreElementId, ParamKind};

/// Values produced by one kernel run, keyed by parameter index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelOutput {
    pub outputs: Vec<(usize, DataValue)>,
}

pub trait KernelRunner: Send + Sync + Debug {
    fn run<'a>(
        &'a self,
        implementation: &'a Implementation,
        job: &'a Job,
    ) -> BoxFuture<'a, Result<KernelOutput>>;

    /// Stage inputs into an execution-ready form. Only backends that need
    /// preparation call this.
    fn stage<'a>(&'a self, _job: &'a Job) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Kernel that sleeps for a configured time per core element and derives
/// its outputs from its inputs.
///
/// Object outputs are returned in memory; file outputs are written under
/// `workdir` and returned by path.
#[derive(Debug, Clone)]
pub struct SimulatedKernel {
    base_ms: HashMap<CoreElementId, u64>,
    speedup: f64,
    stage_ms: u64,
    fs: Arc<dyn FileSystem>,
    workdir: PathBuf,
}

impl SimulatedKernel {
    pub fn new(fs: Arc<dyn FileSystem>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            base_ms: HashMap::new(),
            speedup: 1.0,
            stage_ms: 0,
            fs,
            workdir: workdir.into(),
        }
    }

    pub fn with_base_ms(mut self, core_element: impl Into<CoreElementId>, ms: u64) -> Self {
        self.base_ms.insert(core_element.into(), ms);
        self
    }

    /// Divide every run time by `speedup` (values below 0.01 are clamped).
    pub fn with_speedup(mut self, speedup: f64) -> Self {
        self.speedup = speedup.max(0.01);
        self
    }

    pub fn with_stage_ms(mut self, ms: u64) -> Self {
        self.stage_ms = ms;
        self
    }

    fn run_time(&self, core_element: &str) -> Duration {
        let base = self.base_ms.get(core_element).copied().unwrap_or(0) as f64;
        Duration::from_secs_f64(base / self.speedup / 1000.0)
    }

    fn input_bytes(&self, value: &DataValue) -> Result<Vec<u8>> {
        match value {
            DataValue::Object(bytes) => Ok(bytes.clone()),
            DataValue::File(path) => self.fs.read(path),
        }
    }
}

impl KernelRunner for SimulatedKernel {
    fn run<'a>(
        &'a self,
        implementation: &'a Implementation,
        job: &'a Job,
    ) -> BoxFuture<'a, Result<KernelOutput>> {
        Box::pin(async move {
            let duration = self.run_time(&job.core_element);
            if !duration.is_zero() {
                tokio::time::sleep(duration).await;
            }

            let args: Vec<String> = job
                .params
                .iter()
                .filter_map(|p| p.basic.clone())
                .collect();

            let mut output = KernelOutput::default();
            for param in &job.params {
                let Some(written) = param.written_ref() else {
                    continue;
                };

                let mut bytes = match &param.input {
                    Some(value) => self.input_bytes(value)?,
                    None => Vec::new(),
                };
                bytes.extend_from_slice(
                    format!("|{}({})", implementation.id, args.join(",")).as_bytes(),
                );

                let value = match param.kind {
                    ParamKind::File => {
                        let path = fs::join(&self.workdir, &format!("{}.out", written.rename()));
                        self.fs
                            .write(&path, &bytes)
                            .with_context(|| format!("writing output of {}", job.task))?;
                        DataValue::File(path)
                    }
                    _ => DataValue::Object(bytes),
                };
                output.outputs.push((param.index, value));
            }

            trace!(task = %job.task, implementation = %implementation.id, ?duration, "simulated run");
            Ok(output)
        })
    }

    fn stage<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.stage_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.stage_ms)).await;
            }
            trace!(task = %job.task, "staged inputs");
            Ok(())
        })
    }
}
