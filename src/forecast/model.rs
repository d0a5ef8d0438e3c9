// src/forecast/model.rs

//! Forecasting math shared by every backend variant.
//!
//! A forecast starts from the historical score of the implementation on the
//! backend, then adds the time (and the energy and cost of that time) needed
//! to move data that is not already where the backend runs, plus a queueing
//! delay when every slot of the backend is busy.

use std::time::Instant;

use crate::forecast::history::ProfileHistory;
use crate::forecast::score::ExecutionScore;
use crate::types::{CoreElementId, Location, TaskId};

/// One input the job will read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastInput {
    pub index: usize,
    pub location: Location,
    /// Exact size, when the provider already reported it.
    pub size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ForecastRequest {
    pub task: TaskId,
    pub core_element: CoreElementId,
    pub submitted_at: Instant,
    pub inputs: Vec<ForecastInput>,
    /// Indexes of the parameters the job produces.
    pub outputs: Vec<usize>,
}

/// Static and live properties of a backend that the model needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendCoefficients {
    pub location: Location,
    pub power_watts: f64,
    pub cost_per_second: f64,
    pub bandwidth_mb_per_s: f64,
    pub slots: usize,
    pub busy: usize,
}

/// Forecast `implementation` on `backend`.
///
/// Implementations that never ran forecast at zero, so every candidate is
/// tried at least once before history takes over.
pub fn estimate(
    history: &ProfileHistory,
    backend: &str,
    implementation: &str,
    coefficients: &BackendCoefficients,
    request: &ForecastRequest,
    now: Instant,
) -> ExecutionScore {
    let base = history
        .execution(backend, implementation)
        .copied()
        .unwrap_or_default();

    let transfer_ms = transfer_ms(history, coefficients, request);
    let queue_ms = queue_ms(&base, coefficients, request, now);

    let transfer_s = transfer_ms / 1000.0;
    ExecutionScore::new(
        base.time.shifted(transfer_ms + queue_ms),
        base.energy.shifted(transfer_s * coefficients.power_watts),
        base.cost.shifted(transfer_s * coefficients.cost_per_second),
    )
}

fn transfer_ms(
    history: &ProfileHistory,
    coefficients: &BackendCoefficients,
    request: &ForecastRequest,
) -> f64 {
    let resident = |loc: Location| {
        (coefficients.location.local && loc.local) || (coefficients.location.remote && loc.remote)
    };
    let expected = |index: usize| {
        history
            .param_size(&request.core_element, index)
            .map(|a| a.avg)
            .unwrap_or(0.0)
    };

    let mut bytes: f64 = request
        .inputs
        .iter()
        .filter(|i| !resident(i.location))
        .map(|i| i.size.map(|s| s as f64).unwrap_or_else(|| expected(i.index)))
        .sum();

    // Results produced away from the client have to be shipped back.
    if !coefficients.location.local {
        bytes += request.outputs.iter().map(|i| expected(*i)).sum::<f64>();
    }

    if bytes <= 0.0 || coefficients.bandwidth_mb_per_s <= 0.0 {
        return 0.0;
    }
    bytes / (coefficients.bandwidth_mb_per_s * 1_000_000.0) * 1000.0
}

fn queue_ms(
    base: &ExecutionScore,
    coefficients: &BackendCoefficients,
    request: &ForecastRequest,
    now: Instant,
) -> f64 {
    let slots = coefficients.slots.max(1);
    if coefficients.busy < slots {
        return 0.0;
    }
    let waves = (coefficients.busy - slots + 1) as f64 / slots as f64;
    let waited_ms = now
        .saturating_duration_since(request.submitted_at)
        .as_secs_f64()
        * 1000.0;
    (base.time.avg * waves - waited_ms).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coefficients(location: Location) -> BackendCoefficients {
        BackendCoefficients {
            location,
            power_watts: 100.0,
            cost_per_second: 1.0,
            bandwidth_mb_per_s: 1.0,
            slots: 1,
            busy: 0,
        }
    }

    fn request(inputs: Vec<ForecastInput>) -> ForecastRequest {
        ForecastRequest {
            task: TaskId(1),
            core_element: "k".into(),
            submitted_at: Instant::now(),
            inputs,
            outputs: vec![],
        }
    }

    #[test]
    fn untried_implementation_forecasts_zero() {
        let history = ProfileHistory::new();
        let req = request(vec![]);
        let at = req.submitted_at;
        let score = estimate(&history, "cpu", "k_cpu", &coefficients(Location::LOCAL), &req, at);
        assert_eq!(score.time.avg, 0.0);
        assert_eq!(score.energy.avg, 0.0);
    }

    #[test]
    fn non_resident_inputs_add_transfer_penalty() {
        let history = ProfileHistory::new();
        let req = request(vec![ForecastInput {
            index: 0,
            location: Location::LOCAL,
            size: Some(2_000_000),
        }]);

        let at = req.submitted_at;
        let local = estimate(&history, "cpu", "k", &coefficients(Location::LOCAL), &req, at);
        let remote = estimate(&history, "cloud", "k", &coefficients(Location::REMOTE), &req, at);

        assert_eq!(local.time.avg, 0.0);
        // 2 MB over 1 MB/s.
        assert!((remote.time.avg - 2000.0).abs() < 1e-6);
        assert!((remote.energy.avg - 200.0).abs() < 1e-6);
        assert!((remote.cost.avg - 2.0).abs() < 1e-6);
    }

    #[test]
    fn busy_backend_adds_queue_delay() {
        let mut history = ProfileHistory::new();
        history.seed("cpu", "k", ExecutionScore::point(50.0, 1.0, 0.0));
        let req = request(vec![]);
        let mut c = coefficients(Location::LOCAL);
        c.busy = 1;

        let score = estimate(&history, "cpu", "k", &c, &req, req.submitted_at);
        assert!((score.time.avg - 100.0).abs() < 1e-6);
    }
}
