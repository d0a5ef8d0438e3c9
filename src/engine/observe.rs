// src/engine/observe.rs

//! Lifecycle observability.
//!
//! The core emits one [`TransitionEvent`] per state change; the runtime
//! hands each of them to a [`TransitionSink`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::Result;
use crate::job::{JobState, Transition};
use crate::types::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub task: TaskId,
    pub from: JobState,
    pub to: JobState,
    pub timestamp: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn now(task: TaskId, transition: Transition) -> Self {
        Self {
            task,
            from: transition.from,
            to: transition.to,
            timestamp: Utc::now(),
        }
    }
}

pub trait TransitionSink: Send + Sync {
    fn record(&self, event: &TransitionEvent);
}

/// Logs every transition through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TransitionSink for TracingSink {
    fn record(&self, event: &TransitionEvent) {
        info!(
            task = %event.task,
            from = %event.from,
            to = %event.to,
            at = %event.timestamp.to_rfc3339(),
            "transition"
        );
    }
}

/// Writes every transition as one JSON object per line.
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

impl JsonLinesSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Create (or truncate) `path` and write events to it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    fn write_line(&self, event: &TransitionEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

impl TransitionSink for JsonLinesSink {
    fn record(&self, event: &TransitionEvent) {
        if let Err(err) = self.write_line(event) {
            warn!(task = %event.task, error = %err, "failed to write transition event");
        }
    }
}

/// Sends every event to each inner sink in turn.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn TransitionSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn TransitionSink>>) -> Self {
        Self { sinks }
    }
}

impl TransitionSink for FanoutSink {
    fn record(&self, event: &TransitionEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
