// src/forecast/selector.rs

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{FailureKind, TaskFailure};
use crate::exec::{ComputingBackend, Implementation};
use crate::forecast::history::ProfileHistory;
use crate::forecast::model::ForecastRequest;
use crate::forecast::score::{ExecutionScore, ScoreComparator, TimeEnergyCost};
use crate::types::{BackendName, CoreElementId};

/// The backend and implementation chosen for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub backend: BackendName,
    pub implementation: Implementation,
    pub score: ExecutionScore,
}

/// Chooses where a dependency-free job runs.
pub struct PlatformSelector {
    pins: HashMap<CoreElementId, BackendName>,
    comparator: Box<dyn ScoreComparator>,
}

impl std::fmt::Debug for PlatformSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformSelector")
            .field("pins", &self.pins)
            .finish_non_exhaustive()
    }
}

impl Default for PlatformSelector {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl PlatformSelector {
    pub fn new(pins: HashMap<CoreElementId, BackendName>) -> Self {
        Self {
            pins,
            comparator: Box::new(TimeEnergyCost),
        }
    }

    pub fn with_comparator(mut self, comparator: Box<dyn ScoreComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn pin(&mut self, core_element: impl Into<CoreElementId>, backend: impl Into<BackendName>) {
        self.pins.insert(core_element.into(), backend.into());
    }

    pub fn pinned(&self, core_element: &str) -> Option<&BackendName> {
        self.pins.get(core_element)
    }

    /// Pick a backend for the job described by `request`.
    ///
    /// A pinned backend is used when it can run the task; otherwise the
    /// task fails immediately. Unpinned tasks go to the best-scoring
    /// implementation across `candidates`; on equal scores the earlier
    /// candidate wins.
    pub fn select(
        &self,
        candidates: &[Arc<dyn ComputingBackend>],
        request: &ForecastRequest,
        history: &ProfileHistory,
    ) -> Result<Selection, TaskFailure> {
        let failure = |reason: String| {
            TaskFailure::new(
                request.task,
                request.core_element.clone(),
                FailureKind::NoEligibleBackend,
                reason,
            )
        };

        let eligible: Vec<&Arc<dyn ComputingBackend>> = match self.pins.get(&request.core_element) {
            Some(pinned) => {
                let Some(backend) = candidates.iter().find(|b| b.name() == pinned.as_str()) else {
                    warn!(task = %request.task, backend = %pinned, "pinned backend not registered");
                    return Err(failure(format!("pinned backend '{pinned}' is not registered")));
                };
                if !backend.can_run(&request.core_element) {
                    warn!(task = %request.task, backend = %pinned, "pinned backend cannot run task");
                    return Err(failure(format!(
                        "pinned backend '{pinned}' has no implementation of '{}'",
                        request.core_element
                    )));
                }
                vec![backend]
            }
            None => candidates
                .iter()
                .filter(|b| b.can_run(&request.core_element))
                .collect(),
        };

        let mut best: Option<Selection> = None;
        for backend in eligible {
            for implementation in backend.implementations(&request.core_element) {
                let score = backend.forecast(&implementation, request, history);
                debug!(
                    task = %request.task,
                    backend = backend.name(),
                    implementation = %implementation.id,
                    time = score.time.avg,
                    energy = score.energy.avg,
                    cost = score.cost.avg,
                    "forecast"
                );

                let better = match &best {
                    None => true,
                    Some(current) => {
                        self.comparator.compare(&score, &current.score) == Ordering::Less
                    }
                };
                if better {
                    best = Some(Selection {
                        backend: backend.name().to_string(),
                        implementation,
                        score,
                    });
                }
            }
        }

        best.ok_or_else(|| {
            failure(format!(
                "no registered backend can run core element '{}'",
                request.core_element
            ))
        })
    }
}
