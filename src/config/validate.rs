// src/config/validate.rs

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::model::{
    BackendConfig, BackendSettings, CheckpointSettings, ConfigFile, ParamConfig, RawConfigFile,
    SchedulerSettings, TaskConfig,
};
use crate::data::{Parameter, TaskSpec};
use crate::errors::{FlowdagError, Result};
use crate::exec::BackendSpec;
use crate::types::{BackendKind, CheckpointPolicy, Direction, ParamKind};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FlowdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_backends(&raw)?;
        let scheduler = validate_scheduler(&raw)?;
        let checkpoint = validate_checkpoint(&raw)?;
        let backends = validate_backends(&raw.backend)?;
        validate_pins(&raw)?;
        let tasks = validate_tasks(&raw)?;

        Ok(ConfigFile {
            scheduler,
            checkpoint,
            pins: raw.pin,
            backends,
            core_elements: raw
                .core_element
                .into_iter()
                .map(|(id, ce)| (id, ce.base_ms))
                .collect(),
            tasks,
            data: raw.data,
        })
    }
}

fn config_error(message: impl Into<String>) -> FlowdagError {
    FlowdagError::ConfigError(message.into())
}

fn ensure_has_backends(cfg: &RawConfigFile) -> Result<()> {
    if cfg.backend.is_empty() {
        return Err(config_error(
            "config must contain at least one [[backend]] section",
        ));
    }
    Ok(())
}

fn validate_scheduler(cfg: &RawConfigFile) -> Result<SchedulerSettings> {
    let idle_timeout = parse_duration(&cfg.scheduler.idle_timeout)
        .map_err(|e| config_error(format!("[scheduler].idle_timeout: {e}")))?;
    if idle_timeout.is_zero() {
        return Err(config_error("[scheduler].idle_timeout must be > 0"));
    }

    let max_concurrent_jobs = match cfg.scheduler.max_concurrent_jobs {
        0 => None,
        n => Some(n),
    };

    Ok(SchedulerSettings {
        max_concurrent_jobs,
        idle_timeout,
        exit_when_idle: cfg.scheduler.exit_when_idle,
        workdir: PathBuf::from(&cfg.scheduler.workdir),
    })
}

fn validate_checkpoint(cfg: &RawConfigFile) -> Result<CheckpointSettings> {
    let section = &cfg.checkpoint;
    if section.block_size == 0 {
        return Err(config_error("[checkpoint].block_size must be >= 1 (got 0)"));
    }

    let policy = match section.policy.trim().to_lowercase().as_str() {
        "none" => CheckpointPolicy::None,
        "every_block" => CheckpointPolicy::EveryBlock,
        "every_nth" => {
            if section.interval == 0 {
                return Err(config_error("[checkpoint].interval must be >= 1 (got 0)"));
            }
            CheckpointPolicy::EveryNth {
                interval: section.interval,
            }
        }
        other => {
            return Err(config_error(format!(
                "[checkpoint].policy: invalid value '{other}' (expected \"none\", \"every_block\" or \"every_nth\")"
            )));
        }
    };

    Ok(CheckpointSettings {
        block_size: section.block_size,
        policy,
        dir: PathBuf::from(&section.dir),
    })
}

fn validate_backends(backends: &[BackendConfig]) -> Result<Vec<BackendSettings>> {
    let mut names = HashSet::new();
    let mut out = Vec::with_capacity(backends.len());

    for backend in backends {
        if backend.name.trim().is_empty() {
            return Err(config_error("[[backend]] name must not be empty"));
        }
        if !names.insert(backend.name.as_str()) {
            return Err(config_error(format!(
                "backend '{}' is declared more than once",
                backend.name
            )));
        }
        let kind: BackendKind = backend
            .kind
            .parse()
            .map_err(|e| config_error(format!("backend '{}': {e}", backend.name)))?;
        if backend.slots == 0 {
            return Err(config_error(format!(
                "backend '{}': slots must be >= 1 (got 0)",
                backend.name
            )));
        }
        if backend.speedup <= 0.0 {
            return Err(config_error(format!(
                "backend '{}': speedup must be > 0",
                backend.name
            )));
        }
        if backend.power_watts < 0.0 || backend.cost_per_second < 0.0 || backend.bandwidth_mb_per_s < 0.0 {
            return Err(config_error(format!(
                "backend '{}': coefficients must not be negative",
                backend.name
            )));
        }

        let mut spec = BackendSpec::new(backend.name.clone(), kind);
        spec.slots = backend.slots;
        spec.power_watts = backend.power_watts;
        spec.cost_per_second = backend.cost_per_second;
        spec.bandwidth_mb_per_s = backend.bandwidth_mb_per_s;
        spec.implementations = backend
            .implementations
            .iter()
            .map(|(ce, ids)| (ce.clone(), ids.clone()))
            .collect();

        out.push(BackendSettings {
            spec,
            speedup: backend.speedup,
            stage_ms: backend.stage_ms,
        });
    }

    Ok(out)
}

fn validate_pins(cfg: &RawConfigFile) -> Result<()> {
    for (core_element, backend) in &cfg.pin {
        if !cfg.backend.iter().any(|b| &b.name == backend) {
            return Err(config_error(format!(
                "[pin] {core_element} refers to unknown backend '{backend}'"
            )));
        }
    }
    Ok(())
}

/// Core elements are declared by a `[core_element.<id>]` section or by any
/// backend implementation.
fn declared_core_elements(cfg: &RawConfigFile) -> BTreeSet<&str> {
    let mut declared: BTreeSet<&str> = cfg.core_element.keys().map(String::as_str).collect();
    for backend in &cfg.backend {
        declared.extend(backend.implementations.keys().map(String::as_str));
    }
    declared
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<Vec<TaskSpec>> {
    let declared = declared_core_elements(cfg);

    cfg.task
        .iter()
        .enumerate()
        .map(|(idx, task)| {
            if !declared.contains(task.core_element.as_str()) {
                return Err(config_error(format!(
                    "task #{idx} uses undeclared core element '{}'",
                    task.core_element
                )));
            }
            let spec = task_spec(idx, task)?;
            spec.validate()
                .map_err(|e| config_error(format!("task #{idx}: {e}")))?;
            Ok(spec)
        })
        .collect()
}

fn task_spec(idx: usize, task: &TaskConfig) -> Result<TaskSpec> {
    let params = task
        .params
        .iter()
        .enumerate()
        .map(|(pidx, p)| {
            parameter(p).map_err(|e| config_error(format!("task #{idx} param #{pidx}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TaskSpec::new(task.core_element.clone(), params))
}

fn parameter(p: &ParamConfig) -> std::result::Result<Parameter, String> {
    let direction = p.direction.unwrap_or(Direction::In);
    let param = match p.kind {
        ParamKind::Basic => {
            let value = p
                .value
                .as_ref()
                .ok_or_else(|| "basic parameter needs a `value`".to_string())?;
            Parameter {
                direction,
                ..Parameter::basic(value.clone())
            }
        }
        ParamKind::Object | ParamKind::File => {
            let name = p
                .data
                .as_ref()
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| format!("{:?} parameter needs a `data` name", p.kind).to_lowercase())?;
            if p.kind == ParamKind::Object {
                Parameter::object(name.clone(), direction)
            } else {
                Parameter::file(name.clone(), direction)
            }
        }
    };
    Ok(param.with_role(p.role))
}

/// Parse a duration string like `"500ms"`, `"3s"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_the_four_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("3s"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("").is_err());
    }
}
