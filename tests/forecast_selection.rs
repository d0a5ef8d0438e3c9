// tests/forecast_selection.rs

mod common;
use crate::common::init_tracing;

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use flowdag::errors::FailureKind;
use flowdag::exec::ComputingBackend;
use flowdag::forecast::{
    ExecutionScore, ForecastRequest, PlatformSelector, ProfileHistory, ScoreComparator,
};
use flowdag::types::TaskId;
use flowdag_test_utils::builders::cpu_backend;
use flowdag_test_utils::fake_kernel::FakeKernel;

fn request(core_element: &str) -> ForecastRequest {
    ForecastRequest {
        task: TaskId(1),
        core_element: core_element.to_string(),
        submitted_at: Instant::now(),
        inputs: Vec::new(),
        outputs: Vec::new(),
    }
}

fn two_backends() -> Vec<Arc<dyn ComputingBackend>> {
    let kernel = Arc::new(FakeKernel::new());
    vec![
        cpu_backend("b1", kernel.clone(), &["work"]),
        cpu_backend("b2", kernel, &["work"]),
    ]
}

#[test]
fn equal_time_prefers_lower_energy() {
    init_tracing();
    let mut history = ProfileHistory::new();
    history.seed("b1", "work_b1", ExecutionScore::point(10.0, 5.0, 0.0));
    history.seed("b2", "work_b2", ExecutionScore::point(10.0, 3.0, 0.0));

    let selection = PlatformSelector::default()
        .select(&two_backends(), &request("work"), &history)
        .expect("selection");
    assert_eq!(selection.backend, "b2");
    assert_eq!(selection.implementation.id, "work_b2");
}

#[test]
fn equal_time_and_energy_prefers_lower_cost() {
    init_tracing();
    let mut history = ProfileHistory::new();
    history.seed("b1", "work_b1", ExecutionScore::point(10.0, 3.0, 0.5));
    history.seed("b2", "work_b2", ExecutionScore::point(10.0, 3.0, 0.2));

    let selection = PlatformSelector::default()
        .select(&two_backends(), &request("work"), &history)
        .expect("selection");
    assert_eq!(selection.backend, "b2");
}

#[test]
fn faster_backend_wins_regardless_of_energy() {
    init_tracing();
    let mut history = ProfileHistory::new();
    history.seed("b1", "work_b1", ExecutionScore::point(8.0, 50.0, 9.0));
    history.seed("b2", "work_b2", ExecutionScore::point(10.0, 1.0, 0.0));

    let selection = PlatformSelector::default()
        .select(&two_backends(), &request("work"), &history)
        .expect("selection");
    assert_eq!(selection.backend, "b1");
}

/// Energy first, then time.
struct Frugal;

impl ScoreComparator for Frugal {
    fn compare(&self, a: &ExecutionScore, b: &ExecutionScore) -> Ordering {
        a.energy
            .avg
            .total_cmp(&b.energy.avg)
            .then_with(|| a.time.avg.total_cmp(&b.time.avg))
    }
}

#[test]
fn custom_comparator_changes_the_winner() {
    init_tracing();
    let mut history = ProfileHistory::new();
    history.seed("b1", "work_b1", ExecutionScore::point(8.0, 50.0, 0.0));
    history.seed("b2", "work_b2", ExecutionScore::point(10.0, 1.0, 0.0));

    let selection = PlatformSelector::default()
        .with_comparator(Box::new(Frugal))
        .select(&two_backends(), &request("work"), &history)
        .expect("selection");
    assert_eq!(selection.backend, "b2");
}

#[test]
fn untried_implementation_is_tried_first() {
    init_tracing();
    let mut history = ProfileHistory::new();
    history.seed("b1", "work_b1", ExecutionScore::point(10.0, 1.0, 0.0));

    let selection = PlatformSelector::default()
        .select(&two_backends(), &request("work"), &history)
        .expect("selection");
    assert_eq!(selection.backend, "b2");
    assert_eq!(selection.score.time.avg, 0.0);
}

#[test]
fn pinned_backend_overrides_forecast() {
    init_tracing();
    let mut history = ProfileHistory::new();
    history.seed("b1", "work_b1", ExecutionScore::point(100.0, 100.0, 100.0));
    history.seed("b2", "work_b2", ExecutionScore::point(1.0, 1.0, 1.0));

    let mut selector = PlatformSelector::default();
    selector.pin("work", "b1");
    let selection = selector
        .select(&two_backends(), &request("work"), &history)
        .expect("selection");
    assert_eq!(selection.backend, "b1");
}

#[test]
fn pinned_backend_without_implementation_fails() {
    init_tracing();
    let kernel = Arc::new(FakeKernel::new());
    let backends = vec![
        cpu_backend("b1", kernel.clone(), &["work"]),
        cpu_backend("b2", kernel, &["other"]),
    ];
    let mut selector = PlatformSelector::default();
    selector.pin("work", "b2");

    let failure = selector
        .select(&backends, &request("work"), &ProfileHistory::new())
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::NoEligibleBackend);
    assert!(failure.message.contains("no implementation"), "{}", failure.message);
}

#[test]
fn history_records_executions_and_sizes() {
    init_tracing();
    let mut history = ProfileHistory::new();
    history.record_param_size("work", 0, 100);
    history.record_param_size("work", 0, 300);

    let size = history.param_size("work", 0).expect("recorded");
    assert_eq!(size.count, 2);
    assert_eq!(size.avg, 200.0);
    assert_eq!(size.min, 100.0);
    assert_eq!(size.max, 300.0);
    assert!(history.execution("b1", "work_b1").is_none());
}
