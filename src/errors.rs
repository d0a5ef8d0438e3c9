// src/errors.rs

//! Crate-wide error type, per-task failure reports and result alias.

use thiserror::Error;

use crate::job::JobState;
use crate::types::{DataId, TaskId};

#[derive(Error, Debug)]
pub enum FlowdagError {
    /// A parameter declares a direction that is inconsistent with its role.
    /// Raised synchronously at submission; the task never enters the graph.
    #[error("malformed task for core element '{core_element}': parameter {param}: {reason}")]
    MalformedTask {
        core_element: String,
        param: usize,
        reason: String,
    },

    #[error("no eligible backend for task {task} (core element '{core_element}'): {reason}")]
    NoEligibleBackend {
        task: TaskId,
        core_element: String,
        reason: String,
    },

    #[error("data acquisition failed for task {task}: {message}")]
    DataAcquisition { task: TaskId, message: String },

    #[error("execution failed for task {task}: {message}")]
    Execution { task: TaskId, message: String },

    #[error("task {task} cancelled: {message}")]
    Cancelled { task: TaskId, message: String },

    #[error("invalid transition for task {task}: {event} while {state}")]
    InvalidTransition {
        task: TaskId,
        state: JobState,
        event: String,
    },

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Unknown data item: {0}")]
    UnknownData(DataId),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("scheduler event channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowdagError>;

/// Category of a per-task failure surfaced to the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoEligibleBackend,
    DataAcquisition,
    Execution,
    Cancelled,
}

/// Cloneable description of why a job ended in the failed terminal state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskFailure {
    pub task: TaskId,
    pub core_element: String,
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(
        task: TaskId,
        core_element: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task,
            core_element: core_element.into(),
            kind,
            message: message.into(),
        }
    }
}

impl From<TaskFailure> for FlowdagError {
    fn from(f: TaskFailure) -> Self {
        match f.kind {
            FailureKind::NoEligibleBackend => FlowdagError::NoEligibleBackend {
                task: f.task,
                core_element: f.core_element,
                reason: f.message,
            },
            FailureKind::DataAcquisition => FlowdagError::DataAcquisition {
                task: f.task,
                message: f.message,
            },
            FailureKind::Execution => FlowdagError::Execution {
                task: f.task,
                message: f.message,
            },
            FailureKind::Cancelled => FlowdagError::Cancelled {
                task: f.task,
                message: f.message,
            },
        }
    }
}
