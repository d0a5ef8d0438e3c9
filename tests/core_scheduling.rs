// tests/core_scheduling.rs

mod common;
use crate::common::{core_with, init_tracing, CoreDriver, CORE_ELEMENTS};

use std::sync::Arc;

use flowdag::dag::NodeStatus;
use flowdag::data::{AccessEntry, Parameter};
use flowdag::engine::{CoreRuntime, JobSet, RuntimeEvent, RuntimeOptions};
use flowdag::errors::{FailureKind, FlowdagError};
use flowdag::exec::BackendSet;
use flowdag::forecast::PlatformSelector;
use flowdag::job::JobState;
use flowdag::types::{BackendKind, BlockId, CheckpointPolicy, DataId, Direction, TaskId, VersionId};
use flowdag_test_utils::builders::{backend, cpu_backend, TaskBuilder};
use flowdag_test_utils::fake_kernel::FakeKernel;

fn failure_kind(driver: &CoreDriver, task: TaskId) -> Option<FailureKind> {
    driver
        .report(task)
        .and_then(|r| r.failure())
        .map(|f| f.kind)
}

#[test]
fn reader_becomes_ready_only_after_writer_executed() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(None);

    let a = driver.submit(TaskBuilder::new("produce").writes("d1").build());
    let b = driver.submit(TaskBuilder::new("consume").reads("d1").writes("d2").build());

    assert_eq!(driver.executing(), vec![a]);
    assert_eq!(driver.core.job_state(b), Some(JobState::Analysed));
    assert_eq!(driver.core.job_set(b), Some(JobSet::Pending));

    driver.finish(a);
    assert_eq!(driver.executing(), vec![b]);

    let a_executed = driver.position(a, JobState::Executed).expect("a executed");
    let b_free = driver.position(b, JobState::DependencyFree).expect("b freed");
    assert!(
        b_free > a_executed,
        "reader freed at {b_free}, writer executed at {a_executed}"
    );
}

#[test]
fn unrelated_tasks_execute_concurrently() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(Some(2));

    let a = driver.submit(TaskBuilder::new("work").writes("x").build());
    let b = driver.submit(TaskBuilder::new("work").writes("y").build());

    assert_eq!(driver.executing(), vec![a, b]);
    assert_eq!(driver.core.job_state(a), Some(JobState::Executing));
    assert_eq!(driver.core.job_state(b), Some(JobState::Executing));
    assert!(driver.reports.is_empty());
}

#[test]
fn tokens_bound_execution_and_are_conserved() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(Some(2));

    let tasks: Vec<TaskId> = (0..5)
        .map(|i| driver.submit(TaskBuilder::new("work").writes(&format!("out{i}")).build()))
        .collect();

    let snap = driver.core.snapshot();
    assert_eq!(snap.executing, 2);
    assert_eq!(snap.tokens_in_use, 2);
    assert_eq!(snap.data_ready, 3);

    driver.finish_next();
    let snap = driver.core.snapshot();
    assert_eq!(snap.executing, 2);
    assert_eq!(snap.tokens_in_use, 2);

    driver.run_until_idle();
    let snap = driver.core.snapshot();
    assert_eq!(snap.tokens_in_use, 0);
    assert_eq!(snap.tokens_granted, 5);
    assert_eq!(snap.tokens_released, 5);
    assert_eq!(snap.completed, 5);
    assert_eq!(driver.reports.len(), tasks.len());
    assert!(driver.reports.iter().all(|r| r.is_success()));
}

#[test]
fn ready_queue_is_served_in_arrival_order() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(Some(1));

    let a = driver.submit(TaskBuilder::new("work").writes("x").build());
    let b = driver.submit(TaskBuilder::new("work").writes("y").build());
    let c = driver.submit(TaskBuilder::new("work").writes("z").build());

    driver.run_until_idle();
    assert_eq!(driver.dispatched, vec![a, b, c]);
}

#[test]
fn malformed_task_is_rejected_before_the_graph() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(None);
    driver.submit(TaskBuilder::new("work").writes("x").build());
    let before = driver.core.snapshot();

    let err = driver
        .core
        .submit(TaskBuilder::new("work").target("obj", Direction::In).build())
        .unwrap_err();
    assert!(matches!(err, FlowdagError::MalformedTask { param: 0, .. }), "{err}");

    let err = driver
        .core
        .submit(
            TaskBuilder::new("work")
                .target("a", Direction::InOut)
                .target("b", Direction::InOut)
                .build(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("more than one target"), "{err}");

    driver.tick();
    let after = driver.core.snapshot();
    assert_eq!(after.graph_nodes, before.graph_nodes);
    assert_eq!(after.unanalysed, 0);
}

#[test]
fn plain_value_declared_out_is_rejected() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(None);
    let before = driver.core.snapshot();

    let mut plain = Parameter::basic("42");
    plain.direction = Direction::Out;
    let err = driver
        .core
        .submit(TaskBuilder::new("work").writes("x").param(plain).build())
        .unwrap_err();
    assert!(matches!(err, FlowdagError::MalformedTask { param: 1, .. }), "{err}");
    assert!(err.to_string().contains("only IN is allowed"), "{err}");

    driver.tick();
    let after = driver.core.snapshot();
    assert_eq!(after.graph_nodes, before.graph_nodes);
    assert_eq!(after.unanalysed, 0);
    assert!(driver.reports.is_empty());
}

#[test]
fn updates_serialize_through_versions() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(None);

    let a = driver.submit(TaskBuilder::new("update").updates("d").build());
    let b = driver.submit(TaskBuilder::new("update").updates("d").build());
    assert_eq!(driver.executing(), vec![a]);

    driver.finish(a);
    assert_eq!(driver.executing(), vec![b]);

    let job = driver.core.job(b).expect("b materialized");
    assert_eq!(
        job.params[0].access,
        Some(AccessEntry::ReadWrite {
            version: VersionId::new(DataId(0), 1),
            new_version: VersionId::new(DataId(0), 2),
        })
    );
}

#[test]
fn every_state_is_visited_in_order() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(None);

    let a = driver.submit(TaskBuilder::new("consume").reads("input").writes("out").build());
    driver.finish(a);

    assert_eq!(
        driver.states_of(a),
        vec![
            JobState::Analysed,
            JobState::DependencyFree,
            JobState::ParamExistenceChecked,
            JobState::AllValuesObtained,
            JobState::AllValuesReady,
            JobState::Executing,
            JobState::Executed,
            JobState::Completed,
        ]
    );
    assert!(driver.report(a).is_some_and(|r| r.is_success()));
}

#[test]
fn failed_job_releases_token_and_blocks_successors() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(None);

    let a = driver.submit(TaskBuilder::new("produce").writes("d").build());
    let b = driver.submit(TaskBuilder::new("consume").reads("d").writes("e").build());
    let c = driver.submit(TaskBuilder::new("work").writes("f").build());
    assert_eq!(driver.executing(), vec![a, c]);

    driver.fail_execution(a, "kernel crashed");
    let failure = driver.report(a).and_then(|r| r.failure()).expect("a failed");
    assert_eq!(failure.kind, FailureKind::Execution);
    assert_eq!(failure.message, "kernel crashed");
    assert_eq!(driver.core.snapshot().tokens_in_use, 1);

    // Siblings are unaffected.
    driver.finish(c);
    assert!(driver.report(c).is_some_and(|r| r.is_success()));

    // The successor stays blocked on the unresolved edge.
    assert_eq!(driver.core.job_set(b), Some(JobSet::Pending));
    assert!(!driver.core.analyser().graph().is_dependency_free(b));
    assert!(driver.report(b).is_none());
    assert!(driver.core.is_quiescent());
    assert!(!driver.exit_requested);

    driver.send(RuntimeEvent::DrainRequested);
    let failure = driver.report(b).and_then(|r| r.failure()).expect("b cancelled");
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert!(failure.message.contains("failed predecessor"));
    assert!(driver.exit_requested);

    let snap = driver.core.snapshot();
    assert_eq!(snap.completed, 1);
    assert_eq!(snap.failed, 2);
    assert_eq!(snap.tokens_granted, snap.tokens_released);
}

#[test]
fn cancel_withdraws_waiting_jobs_but_not_executing_ones() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(Some(1));

    let a = driver.submit(TaskBuilder::new("produce").writes("d").build());
    let b = driver.submit(TaskBuilder::new("consume").reads("d").writes("e").build());

    driver.send(RuntimeEvent::CancelRequested(a));
    assert_eq!(driver.core.job_state(a), Some(JobState::Executing));
    assert!(driver.reports.is_empty());

    driver.send(RuntimeEvent::CancelRequested(b));
    assert_eq!(failure_kind(&driver, b), Some(FailureKind::Cancelled));
    assert_eq!(driver.core.job_state(b), None);
    assert_eq!(
        driver.core.analyser().graph().node(b).map(|n| n.status),
        Some(NodeStatus::Failed)
    );

    driver.finish(a);
    assert!(driver.report(a).is_some_and(|r| r.is_success()));
    assert!(driver.executing().is_empty());
    assert_eq!(driver.reports.len(), 2);

    // Unknown and finished tasks are ignored.
    driver.send(RuntimeEvent::CancelRequested(TaskId(999)));
    driver.send(RuntimeEvent::CancelRequested(a));
    assert_eq!(driver.reports.len(), 2);
}

#[test]
fn missing_input_fails_with_data_acquisition() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(None);
    driver.missing.insert("absent".to_string());

    let a = driver.submit(TaskBuilder::new("consume").reads("absent").writes("out").build());

    let failure = driver.report(a).and_then(|r| r.failure()).expect("a failed");
    assert_eq!(failure.kind, FailureKind::DataAcquisition);
    assert!(failure.message.contains("version does not exist"), "{}", failure.message);
    assert!(driver.dispatched.is_empty());
    assert_eq!(driver.core.snapshot().tokens_granted, 0);
}

#[test]
fn unknown_core_element_has_no_eligible_backend() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(None);

    let a = driver.submit(TaskBuilder::new("fft").writes("out").build());

    let failure = driver.report(a).and_then(|r| r.failure()).expect("a failed");
    assert_eq!(failure.kind, FailureKind::NoEligibleBackend);
    assert!(failure.message.contains("fft"));
    assert!(driver.dispatched.is_empty());
}

#[test]
fn pin_to_unregistered_backend_fails_the_task() {
    init_tracing();
    let mut selector = PlatformSelector::default();
    selector.pin("work", "gpu");
    let cpu = cpu_backend("cpu", Arc::new(FakeKernel::new()), CORE_ELEMENTS);
    let mut driver = CoreDriver::new(core_with(
        None,
        vec![cpu],
        selector,
        3,
        CheckpointPolicy::None,
    ));

    let a = driver.submit(TaskBuilder::new("work").writes("out").build());
    let failure = driver.report(a).and_then(|r| r.failure()).expect("a failed");
    assert_eq!(failure.kind, FailureKind::NoEligibleBackend);
    assert!(failure.message.contains("'gpu'"), "{}", failure.message);
}

#[test]
fn registration_update_refreshes_cached_candidates() {
    init_tracing();
    let cpu = cpu_backend("cpu", Arc::new(FakeKernel::new()), &["work"]);
    let mut driver = CoreDriver::new(core_with(
        None,
        vec![Arc::clone(&cpu)],
        PlatformSelector::default(),
        3,
        CheckpointPolicy::None,
    ));

    let first = driver.submit(TaskBuilder::new("late").writes("a").build());
    assert_eq!(failure_kind(&driver, first), Some(FailureKind::NoEligibleBackend));

    // Registered, but the core still uses its cached candidate list.
    cpu.register_implementations("late", vec!["late_v2".to_string()]);
    let second = driver.submit(TaskBuilder::new("late").writes("b").build());
    assert_eq!(failure_kind(&driver, second), Some(FailureKind::NoEligibleBackend));

    driver.send(RuntimeEvent::RegistrationUpdated {
        backend: "cpu".to_string(),
        core_element: "late".to_string(),
    });
    let third = driver.submit(TaskBuilder::new("late").writes("c").build());
    assert_eq!(driver.executing(), vec![third]);
    let job = driver.core.job(third).expect("job");
    assert_eq!(
        job.implementation.as_ref().map(|i| i.id.as_str()),
        Some("late_v2")
    );
}

#[test]
fn accelerator_jobs_are_staged_before_execution() {
    init_tracing();
    let gpu = backend(
        "gpu",
        BackendKind::Accelerator,
        1,
        Arc::new(FakeKernel::new()),
        &["work"],
    );
    let mut driver = CoreDriver::new(core_with(
        None,
        vec![gpu],
        PlatformSelector::default(),
        3,
        CheckpointPolicy::None,
    ));

    let a = driver.submit(TaskBuilder::new("work").reads("in").writes("out").build());
    assert_eq!(driver.prepared, vec![a]);
    assert_eq!(driver.executing(), vec![a]);

    let obtained = driver.position(a, JobState::AllValuesObtained).expect("obtained");
    let ready = driver.position(a, JobState::AllValuesReady).expect("ready");
    assert!(ready > obtained);
}

#[test]
fn completed_tasks_are_pruned_without_checkpointing() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(None);

    let a = driver.submit(TaskBuilder::new("produce").writes("d").build());
    let b = driver.submit(TaskBuilder::new("consume").reads("d").writes("e").build());
    driver.run_until_idle();

    assert_eq!(driver.stored, vec![(a, None), (b, None)]);
    let snap = driver.core.snapshot();
    assert_eq!(snap.graph_nodes, 0);
    assert_eq!(snap.graph_edges, 0);
}

#[test]
fn durable_tasks_leave_the_graph_once_their_outputs_are_saved() {
    init_tracing();
    let cpu = cpu_backend("cpu", Arc::new(FakeKernel::new()), CORE_ELEMENTS);
    let mut driver = CoreDriver::new(core_with(
        None,
        vec![cpu],
        PlatformSelector::default(),
        2,
        CheckpointPolicy::EveryBlock,
    ));

    let a = driver.submit(TaskBuilder::new("work").writes("x").build());
    let b = driver.submit(TaskBuilder::new("work").reads("x").writes("y").build());
    driver.finish(a);
    // Saved, but still the source of b's edge.
    assert!(driver.core.analyser().graph().contains(a));

    driver.finish(b);
    assert_eq!(driver.core.snapshot().graph_nodes, 0);

    // The trailing block never fills up; its task goes anyway.
    let c = driver.submit(TaskBuilder::new("work").writes("z").build());
    driver.finish(c);

    assert_eq!(
        driver.stored,
        vec![(a, Some(BlockId(0))), (b, Some(BlockId(0))), (c, Some(BlockId(1)))]
    );
    assert_eq!(driver.core.snapshot().graph_nodes, 0);
}

#[test]
fn exit_when_idle_requests_exit_once_everything_finished() {
    init_tracing();
    let mut set = BackendSet::new();
    set.push(cpu_backend("cpu", Arc::new(FakeKernel::new()), CORE_ELEMENTS))
        .expect("backend");
    let options = RuntimeOptions {
        exit_when_idle: true,
        ..RuntimeOptions::default()
    };
    let core = CoreRuntime::new(
        set,
        PlatformSelector::default(),
        options,
        3,
        CheckpointPolicy::None,
    );
    let mut driver = CoreDriver::new(core);

    // Nothing was ever submitted: stay alive.
    driver.tick();
    assert!(!driver.exit_requested);

    let a = driver.submit(TaskBuilder::new("work").writes("x").build());
    assert!(!driver.exit_requested);
    driver.finish(a);
    assert!(driver.exit_requested);
}

#[test]
fn late_events_for_finished_tasks_are_ignored() {
    init_tracing();
    let mut driver = CoreDriver::with_limit(None);

    let a = driver.submit(TaskBuilder::new("work").writes("x").build());
    driver.finish(a);
    let before = driver.core.snapshot();

    driver.send(RuntimeEvent::ExistenceChecked {
        task: a,
        index: 0,
        result: Ok(true),
    });
    driver.send(RuntimeEvent::JobExecuted {
        task: a,
        result: Err("late".to_string()),
    });

    assert_eq!(driver.core.snapshot(), before);
    assert_eq!(driver.reports.len(), 1);
}
