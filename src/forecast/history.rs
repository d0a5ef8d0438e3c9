// src/forecast/history.rs

use std::collections::HashMap;

use crate::forecast::score::{Aggregate, ExecutionScore};
use crate::job::JobProfile;
use crate::types::{BackendName, CoreElementId};

/// Running statistics fed by completed jobs.
///
/// Execution scores are kept per (backend, implementation); parameter sizes
/// per (core element, parameter index) so transfer penalties can be
/// estimated before the bytes are known.
#[derive(Debug, Clone, Default)]
pub struct ProfileHistory {
    executions: HashMap<(BackendName, String), ExecutionScore>,
    param_sizes: HashMap<(CoreElementId, usize), Aggregate>,
}

impl ProfileHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&mut self, backend: &str, implementation: &str, profile: &JobProfile) {
        let sample = ExecutionScore::point(profile.elapsed_ms, profile.energy_j, profile.cost);
        self.executions
            .entry((backend.to_string(), implementation.to_string()))
            .or_default()
            .merge(&sample);
    }

    pub fn record_param_size(&mut self, core_element: &str, index: usize, bytes: u64) {
        self.param_sizes
            .entry((core_element.to_string(), index))
            .or_default()
            .record(bytes as f64);
    }

    /// Install a prior for an implementation that has not run yet.
    pub fn seed(&mut self, backend: &str, implementation: &str, score: ExecutionScore) {
        self.executions
            .insert((backend.to_string(), implementation.to_string()), score);
    }

    pub fn execution(&self, backend: &str, implementation: &str) -> Option<&ExecutionScore> {
        self.executions
            .get(&(backend.to_string(), implementation.to_string()))
    }

    pub fn param_size(&self, core_element: &str, index: usize) -> Option<&Aggregate> {
        self.param_sizes.get(&(core_element.to_string(), index))
    }
}
