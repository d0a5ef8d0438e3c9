#![allow(dead_code)]

use std::sync::Arc;

use flowdag::config::model::{BackendConfig, ParamConfig, TaskConfig};
use flowdag::config::{ConfigFile, RawConfigFile};
use flowdag::data::{Parameter, TaskSpec};
use flowdag::errors::Result;
use flowdag::exec::{Backend, BackendSpec, ComputingBackend, KernelRunner};
use flowdag::types::{BackendKind, Direction, ParamKind, ParamRole};

/// Builder for `TaskSpec`.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    core_element: String,
    params: Vec<Parameter>,
}

impl TaskBuilder {
    pub fn new(core_element: &str) -> Self {
        Self {
            core_element: core_element.to_string(),
            params: Vec::new(),
        }
    }

    pub fn reads(mut self, object: &str) -> Self {
        self.params.push(Parameter::object(object, Direction::In));
        self
    }

    pub fn writes(mut self, object: &str) -> Self {
        self.params.push(Parameter::object(object, Direction::Out));
        self
    }

    pub fn updates(mut self, object: &str) -> Self {
        self.params.push(Parameter::object(object, Direction::InOut));
        self
    }

    pub fn reads_file(mut self, file: &str) -> Self {
        self.params.push(Parameter::file(file, Direction::In));
        self
    }

    pub fn writes_file(mut self, file: &str) -> Self {
        self.params.push(Parameter::file(file, Direction::Out));
        self
    }

    pub fn basic(mut self, value: &str) -> Self {
        self.params.push(Parameter::basic(value));
        self
    }

    pub fn param(mut self, param: Parameter) -> Self {
        self.params.push(param);
        self
    }

    pub fn target(mut self, object: &str, direction: Direction) -> Self {
        self.params
            .push(Parameter::object(object, direction).with_role(ParamRole::Target));
        self
    }

    pub fn returns(mut self, object: &str) -> Self {
        self.params
            .push(Parameter::object(object, Direction::Out).with_role(ParamRole::Return));
        self
    }

    pub fn build(self) -> TaskSpec {
        TaskSpec::new(self.core_element, self.params)
    }
}

/// Builder for `ConfigFile` to simplify test setup.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend with one implementation per listed core element.
    pub fn backend(mut self, name: &str, kind: &str, core_elements: &[&str]) -> Self {
        self.config.backend.push(BackendConfig {
            name: name.to_string(),
            kind: kind.to_string(),
            slots: 1,
            power_watts: 0.0,
            cost_per_second: 0.0,
            bandwidth_mb_per_s: 1000.0,
            speedup: 1.0,
            stage_ms: 0,
            implementations: core_elements
                .iter()
                .map(|ce| (ce.to_string(), vec![format!("{ce}_{name}")]))
                .collect(),
        });
        self
    }

    pub fn raw_backend(mut self, backend: BackendConfig) -> Self {
        self.config.backend.push(backend);
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.scheduler.max_concurrent_jobs = n;
        self
    }

    pub fn idle_timeout(mut self, timeout: &str) -> Self {
        self.config.scheduler.idle_timeout = timeout.to_string();
        self
    }

    pub fn checkpoint(mut self, policy: &str, block_size: usize) -> Self {
        self.config.checkpoint.policy = policy.to_string();
        self.config.checkpoint.block_size = block_size;
        self
    }

    pub fn pin(mut self, core_element: &str, backend: &str) -> Self {
        self.config
            .pin
            .insert(core_element.to_string(), backend.to_string());
        self
    }

    /// Add a workload task; `params` are `(type, direction, data-or-value)`.
    pub fn task(mut self, core_element: &str, params: &[(&str, &str, &str)]) -> Self {
        let params = params
            .iter()
            .map(|(kind, direction, name)| {
                let kind = match *kind {
                    "basic" => ParamKind::Basic,
                    "file" => ParamKind::File,
                    _ => ParamKind::Object,
                };
                let direction = direction.parse::<Direction>().ok();
                let (data, value) = if kind == ParamKind::Basic {
                    (None, Some(name.to_string()))
                } else {
                    (Some(name.to_string()), None)
                };
                ParamConfig {
                    kind,
                    direction,
                    data,
                    value,
                    role: ParamRole::Argument,
                }
            })
            .collect();
        self.config.task.push(TaskConfig {
            core_element: core_element.to_string(),
            params,
        });
        self
    }

    pub fn seed_object(mut self, name: &str, contents: &str) -> Self {
        self.config
            .data
            .objects
            .insert(name.to_string(), contents.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

/// A backend running `kernel` with one implementation `<ce>_<name>` per
/// listed core element.
pub fn backend(
    name: &str,
    kind: BackendKind,
    slots: usize,
    kernel: Arc<dyn KernelRunner>,
    core_elements: &[&str],
) -> Arc<dyn ComputingBackend> {
    let mut spec = BackendSpec::new(name, kind);
    spec.slots = slots;
    spec.bandwidth_mb_per_s = 1000.0;
    for ce in core_elements {
        spec.implementations
            .insert(ce.to_string(), vec![format!("{ce}_{name}")]);
    }
    Arc::new(Backend::new(spec, kernel))
}

pub fn cpu_backend(
    name: &str,
    kernel: Arc<dyn KernelRunner>,
    core_elements: &[&str],
) -> Arc<dyn ComputingBackend> {
    backend(name, BackendKind::Cpu, 8, kernel, core_elements)
}
