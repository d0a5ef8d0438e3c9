use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::Semaphore;

use flowdag::exec::{Implementation, KernelOutput, KernelRunner};
use flowdag::job::Job;
use flowdag::provider::DataValue;
use flowdag::types::{BoxFuture, TaskId};

/// One recorded kernel run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub task: TaskId,
    pub core_element: String,
    pub implementation: String,
    pub backend: String,
    pub inputs: Vec<(usize, Option<DataValue>)>,
}

#[derive(Debug, Default)]
struct Inner {
    invocations: Mutex<Vec<Invocation>>,
    staged: Mutex<Vec<TaskId>>,
    failing: Mutex<HashSet<String>>,
    gate: Option<Semaphore>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

/// A fake kernel that:
/// - records every invocation (and every staging call)
/// - optionally waits on a gate, holding jobs in EXECUTING until released
/// - fails runs of the core elements listed with [`FakeKernel::fail_on`]
/// - writes `<input>|<implementation>` for every output parameter
#[derive(Debug, Clone, Default)]
pub struct FakeKernel {
    inner: Arc<Inner>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run blocks until [`FakeKernel::release`] lets it through.
    pub fn gated() -> Self {
        Self {
            inner: Arc::new(Inner {
                gate: Some(Semaphore::new(0)),
                ..Inner::default()
            }),
        }
    }

    pub fn fail_on(&self, core_element: &str) {
        self.inner
            .failing
            .lock()
            .unwrap()
            .insert(core_element.to_string());
    }

    /// Let `n` gated runs proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.inner.gate {
            gate.add_permits(n);
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.inner.invocations.lock().unwrap().clone()
    }

    /// Tasks in the order their runs started.
    pub fn started(&self) -> Vec<TaskId> {
        self.invocations().iter().map(|i| i.task).collect()
    }

    pub fn staged(&self) -> Vec<TaskId> {
        self.inner.staged.lock().unwrap().clone()
    }

    /// Runs currently inside the kernel.
    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Highest number of runs ever inside the kernel at once.
    pub fn max_running(&self) -> usize {
        self.inner.max_running.load(Ordering::SeqCst)
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl KernelRunner for FakeKernel {
    fn run<'a>(
        &'a self,
        implementation: &'a Implementation,
        job: &'a Job,
    ) -> BoxFuture<'a, anyhow::Result<KernelOutput>> {
        Box::pin(async move {
            self.inner.invocations.lock().unwrap().push(Invocation {
                task: job.task,
                core_element: job.core_element.clone(),
                implementation: implementation.id.clone(),
                backend: implementation.backend.clone(),
                inputs: job.params.iter().map(|p| (p.index, p.input.clone())).collect(),
            });

            let now = self.inner.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.max_running.fetch_max(now, Ordering::SeqCst);
            let _running = RunningGuard(&self.inner.running);

            if let Some(gate) = &self.inner.gate {
                gate.acquire()
                    .await
                    .map_err(|_| anyhow!("gate closed"))?
                    .forget();
            }

            if self.inner.failing.lock().unwrap().contains(&job.core_element) {
                return Err(anyhow!("injected failure in {}", job.core_element));
            }

            let mut output = KernelOutput::default();
            for param in &job.params {
                if param.written_ref().is_none() {
                    continue;
                }
                let mut bytes = match &param.input {
                    Some(DataValue::Object(bytes)) => bytes.clone(),
                    _ => Vec::new(),
                };
                bytes.extend_from_slice(format!("|{}", implementation.id).as_bytes());
                output.outputs.push((param.index, DataValue::Object(bytes)));
            }
            Ok(output)
        })
    }

    fn stage<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.inner.staged.lock().unwrap().push(job.task);
            Ok(())
        })
    }
}
