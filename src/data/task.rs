// src/data/task.rs

//! Client-facing task model and submission-time validation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::errors::{FlowdagError, Result};
use crate::types::{CoreElementId, DataKey, Direction, ParamKind, ParamRole, TaskId};

/// Value carried by a parameter: a plain value, or a reference to a data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Basic(String),
    Data(DataKey),
}

/// One declared parameter of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub kind: ParamKind,
    pub direction: Direction,
    pub role: ParamRole,
    pub value: ParamValue,
}

impl Parameter {
    /// Plain by-value input.
    pub fn basic(value: impl Into<String>) -> Self {
        Self {
            kind: ParamKind::Basic,
            direction: Direction::In,
            role: ParamRole::Argument,
            value: ParamValue::Basic(value.into()),
        }
    }

    pub fn object(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            kind: ParamKind::Object,
            direction,
            role: ParamRole::Argument,
            value: ParamValue::Data(DataKey::Object(name.into())),
        }
    }

    pub fn file(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            kind: ParamKind::File,
            direction,
            role: ParamRole::Argument,
            value: ParamValue::Data(DataKey::File(name.into())),
        }
    }

    pub fn with_role(mut self, role: ParamRole) -> Self {
        self.role = role;
        self
    }

    pub fn data_key(&self) -> Option<&DataKey> {
        match &self.value {
            ParamValue::Data(key) => Some(key),
            ParamValue::Basic(_) => None,
        }
    }

    fn check(&self) -> std::result::Result<(), String> {
        match (&self.value, self.kind) {
            (ParamValue::Basic(_), ParamKind::Basic) => {}
            (ParamValue::Data(key), kind) if kind.is_reference() && key.kind() == kind => {}
            (ParamValue::Basic(_), kind) => {
                return Err(format!("{kind:?} parameter carries a plain value"));
            }
            (ParamValue::Data(key), kind) => {
                return Err(format!("{kind:?} parameter references {key}"));
            }
        }

        if self.kind == ParamKind::Basic && self.direction != Direction::In {
            return Err(format!(
                "plain value parameter declared {:?}; only IN is allowed",
                self.direction
            ));
        }

        match self.role {
            ParamRole::Argument => Ok(()),
            ParamRole::Target => {
                if self.kind != ParamKind::Object {
                    Err("target must be an object reference".to_string())
                } else if self.direction == Direction::In {
                    Err("target object declared IN; expected INOUT or OUT".to_string())
                } else {
                    Ok(())
                }
            }
            ParamRole::Return => {
                if self.direction != Direction::Out || !self.kind.is_reference() {
                    Err("return value must be an OUT reference".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// A task as submitted by a client, before it is given an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub core_element: CoreElementId,
    pub params: Vec<Parameter>,
}

impl TaskSpec {
    pub fn new(core_element: impl Into<CoreElementId>, params: Vec<Parameter>) -> Self {
        Self {
            core_element: core_element.into(),
            params,
        }
    }

    /// Check every parameter's declared direction against its role.
    ///
    /// This runs synchronously at submission, so a malformed task never
    /// reaches the dependency graph.
    pub fn validate(&self) -> Result<()> {
        if self.core_element.trim().is_empty() {
            return Err(FlowdagError::MalformedTask {
                core_element: self.core_element.clone(),
                param: 0,
                reason: "empty core element id".to_string(),
            });
        }

        let mut targets = 0;
        for (idx, param) in self.params.iter().enumerate() {
            param.check().map_err(|reason| FlowdagError::MalformedTask {
                core_element: self.core_element.clone(),
                param: idx,
                reason,
            })?;
            if param.role == ParamRole::Target {
                targets += 1;
                if targets > 1 {
                    return Err(FlowdagError::MalformedTask {
                        core_element: self.core_element.clone(),
                        param: idx,
                        reason: "more than one target object".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// A task accepted by the scheduler.
///
/// Once analysed, the dependency graph owns it; the task only holds
/// references (data keys) and never data by value.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub core_element: CoreElementId,
    pub params: Vec<Parameter>,
    /// Set once the job has been shipped to a remote backend.
    pub offloaded: bool,
    pub submitted_at: Instant,
}

impl Task {
    pub fn from_spec(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            core_element: spec.core_element,
            params: spec.params,
            offloaded: false,
            submitted_at: Instant::now(),
        }
    }
}

/// Hands out task ids for one scheduler instance.
///
/// Cloned into every submission handle; ids start at 1 and never repeat.
#[derive(Debug, Clone, Default)]
pub struct TaskIdAllocator {
    next: Arc<AtomicU64>,
}

impl TaskIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> TaskId {
        TaskId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
