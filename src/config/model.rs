// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::data::TaskSpec;
use crate::engine::RuntimeOptions;
use crate::exec::BackendSpec;
use crate::forecast::PlatformSelector;
use crate::types::{CheckpointPolicy, Direction, ParamKind, ParamRole};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [scheduler]
/// max_concurrent_jobs = 4
///
/// [[backend]]
/// name = "cpu"
/// kind = "cpu"
/// implementations = { matmul = ["matmul_cpu"] }
///
/// [[task]]
/// core_element = "matmul"
/// params = [{ type = "object", direction = "in", data = "a" }]
/// ```
///
/// Every section except `[[backend]]` is optional.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub checkpoint: CheckpointSection,

    /// `[pin]`: core element -> backend name, consulted before forecasting.
    #[serde(default)]
    pub pin: BTreeMap<String, String>,

    #[serde(default)]
    pub backend: Vec<BackendConfig>,

    /// `[core_element.<id>]`: simulated kernel costs.
    #[serde(default)]
    pub core_element: BTreeMap<String, CoreElementConfig>,

    /// `[[task]]`: workload submitted by the CLI, in order.
    #[serde(default)]
    pub task: Vec<TaskConfig>,

    /// `[data]`: initial contents of client-provided data.
    #[serde(default)]
    pub data: DataSection,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Jobs allowed to execute at once; `0` means unbounded.
    #[serde(default)]
    pub max_concurrent_jobs: usize,

    /// Duration string (e.g. `"500ms"`). The loop re-runs at least this often
    /// even when no event arrives.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    #[serde(default = "default_true")]
    pub exit_when_idle: bool,

    /// Where simulated kernels and the in-memory provider materialize files.
    #[serde(default = "default_workdir")]
    pub workdir: String,
}

fn default_idle_timeout() -> String {
    "500ms".to_string()
}

fn default_true() -> bool {
    true
}

fn default_workdir() -> String {
    ".flowdag/work".to_string()
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 0,
            idle_timeout: default_idle_timeout(),
            exit_when_idle: true,
            workdir: default_workdir(),
        }
    }
}

/// `[checkpoint]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointSection {
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// `"none"`, `"every_block"` or `"every_nth"`.
    #[serde(default = "default_policy")]
    pub policy: String,

    /// Only used by `every_nth`.
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default = "default_checkpoint_dir")]
    pub dir: String,
}

fn default_block_size() -> usize {
    3
}

fn default_policy() -> String {
    "none".to_string()
}

fn default_interval() -> u64 {
    1
}

fn default_checkpoint_dir() -> String {
    ".flowdag/checkpoints".to_string()
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            policy: default_policy(),
            interval: default_interval(),
            dir: default_checkpoint_dir(),
        }
    }
}

/// `[[backend]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub name: String,

    /// `"cpu"`, `"accelerator"` (alias `"gpu"`) or `"remote"` (alias `"cloud"`).
    pub kind: String,

    #[serde(default = "default_slots")]
    pub slots: usize,

    #[serde(default)]
    pub power_watts: f64,

    #[serde(default)]
    pub cost_per_second: f64,

    #[serde(default = "default_bandwidth")]
    pub bandwidth_mb_per_s: f64,

    /// Divides the simulated kernel time.
    #[serde(default = "default_speedup")]
    pub speedup: f64,

    /// Simulated staging time for accelerators.
    #[serde(default)]
    pub stage_ms: u64,

    /// Core element -> implementation ids.
    #[serde(default)]
    pub implementations: BTreeMap<String, Vec<String>>,
}

fn default_slots() -> usize {
    1
}

fn default_bandwidth() -> f64 {
    1000.0
}

fn default_speedup() -> f64 {
    1.0
}

/// `[core_element.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreElementConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
}

fn default_base_ms() -> u64 {
    10
}

/// `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub core_element: String,

    #[serde(default)]
    pub params: Vec<ParamConfig>,
}

/// One parameter of a `[[task]]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamConfig {
    #[serde(rename = "type")]
    pub kind: ParamKind,

    #[serde(default)]
    pub direction: Option<Direction>,

    /// Data item name, for `object` and `file` parameters.
    #[serde(default)]
    pub data: Option<String>,

    /// Literal value, for `basic` parameters.
    #[serde(default)]
    pub value: Option<String>,

    #[serde(default)]
    pub role: ParamRole,
}

/// `[data]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DataSection {
    /// Object name -> initial contents.
    #[serde(default)]
    pub objects: BTreeMap<String, String>,

    /// File name -> initial contents.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// Validated `[scheduler]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub max_concurrent_jobs: Option<usize>,
    pub idle_timeout: Duration,
    pub exit_when_idle: bool,
    pub workdir: PathBuf,
}

/// Validated `[checkpoint]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSettings {
    pub block_size: usize,
    pub policy: CheckpointPolicy,
    pub dir: PathBuf,
}

/// A backend plus the knobs of its simulated kernel.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub spec: BackendSpec,
    pub speedup: f64,
    pub stage_ms: u64,
}

/// Configuration that passed validation.
///
/// Produced by `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerSettings,
    pub checkpoint: CheckpointSettings,
    pub pins: BTreeMap<String, String>,
    pub backends: Vec<BackendSettings>,
    pub core_elements: BTreeMap<String, u64>,
    pub tasks: Vec<TaskSpec>,
    pub data: DataSection,
}

impl ConfigFile {
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            max_concurrent_jobs: self.scheduler.max_concurrent_jobs,
            idle_timeout: self.scheduler.idle_timeout,
            exit_when_idle: self.scheduler.exit_when_idle,
        }
    }

    pub fn selector(&self) -> PlatformSelector {
        let mut selector = PlatformSelector::default();
        for (core_element, backend) in &self.pins {
            selector.pin(core_element.clone(), backend.clone());
        }
        selector
    }
}
