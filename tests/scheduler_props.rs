// tests/scheduler_props.rs

mod common;
use crate::common::CoreDriver;

use std::collections::HashSet;

use proptest::prelude::*;

use flowdag::data::TaskSpec;
use flowdag::engine::RuntimeEvent;
use flowdag::errors::FailureKind;
use flowdag::job::JobState;
use flowdag::types::TaskId;
use flowdag_test_utils::builders::TaskBuilder;

const DATA: [&str; 4] = ["a", "b", "c", "d"];

/// How a generated task touches one of the shared data items.
#[derive(Debug, Clone, Copy)]
enum Op {
    Write(usize),
    Read(usize),
    Update(usize),
}

impl Op {
    fn data(self) -> usize {
        match self {
            Op::Write(d) | Op::Read(d) | Op::Update(d) => d,
        }
    }

    fn reads(self) -> bool {
        matches!(self, Op::Read(_) | Op::Update(_))
    }

    fn writes(self) -> bool {
        matches!(self, Op::Write(_) | Op::Update(_))
    }

    fn spec(self, i: usize) -> TaskSpec {
        match self {
            Op::Write(d) => TaskBuilder::new("produce").writes(DATA[d]).build(),
            Op::Read(d) => TaskBuilder::new("consume")
                .reads(DATA[d])
                .writes(&format!("out{i}"))
                .build(),
            Op::Update(d) => TaskBuilder::new("update").updates(DATA[d]).build(),
        }
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    (0..3u8, 0..DATA.len()).prop_map(|(kind, d)| match kind {
        0 => Op::Write(d),
        1 => Op::Read(d),
        _ => Op::Update(d),
    })
}

/// Latest earlier task that wrote the data item `ops[i]` reads.
fn producer_of(ops: &[Op], i: usize) -> Option<usize> {
    if !ops[i].reads() {
        return None;
    }
    (0..i)
        .rev()
        .find(|&j| ops[j].writes() && ops[j].data() == ops[i].data())
}

proptest! {
    #[test]
    fn tokens_are_bounded_and_conserved(
        ops in proptest::collection::vec(op_strategy(), 1..12),
        limit in 1..4usize,
        picks in proptest::collection::vec(any::<usize>(), 0..32),
    ) {
        let mut driver = CoreDriver::with_limit(Some(limit));
        let tasks: Vec<TaskId> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| driver.submit(op.spec(i)))
            .collect();
        prop_assert!(driver.executing().len() <= limit);

        let mut picks = picks.into_iter();
        let mut steps = 0;
        while !driver.executing().is_empty() {
            steps += 1;
            prop_assert!(steps <= tasks.len(), "more completions than tasks");

            let running = driver.executing();
            let pick = picks.next().unwrap_or(0) % running.len();
            driver.finish(running[pick]);
            prop_assert!(driver.executing().len() <= limit);
        }

        prop_assert_eq!(driver.reports.len(), tasks.len());
        prop_assert!(driver.reports.iter().all(|r| r.is_success()));

        let snapshot = driver.core.snapshot();
        prop_assert_eq!(snapshot.tokens_in_use, 0);
        prop_assert_eq!(snapshot.tokens_granted, tasks.len() as u64);
        prop_assert_eq!(snapshot.tokens_released, tasks.len() as u64);
        prop_assert_eq!(snapshot.completed, tasks.len() as u64);
    }

    #[test]
    fn readers_wait_for_their_producer(
        ops in proptest::collection::vec(op_strategy(), 1..12),
        limit in 1..4usize,
    ) {
        let mut driver = CoreDriver::with_limit(Some(limit));
        let tasks: Vec<TaskId> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| driver.submit(op.spec(i)))
            .collect();
        driver.run_until_idle();

        for (i, task) in tasks.iter().enumerate() {
            let states = driver.states_of(*task);
            prop_assert_eq!(states.last(), Some(&JobState::Completed));
            prop_assert!(states.windows(2).all(|w| w[0] < w[1]), "{:?}", states);

            if let Some(j) = producer_of(&ops, i) {
                let produced = driver.position(tasks[j], JobState::Completed);
                let freed = driver.position(*task, JobState::DependencyFree);
                prop_assert!(
                    produced < freed,
                    "task {} freed before its producer {} completed",
                    task,
                    tasks[j]
                );
            }
        }
    }

    #[test]
    fn every_task_ends_with_one_report(
        ops in proptest::collection::vec(op_strategy(), 1..12),
        failing in proptest::collection::vec(0..12usize, 0..4),
    ) {
        let mut driver = CoreDriver::with_limit(Some(2));
        let tasks: Vec<TaskId> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| driver.submit(op.spec(i)))
            .collect();
        let failing: HashSet<TaskId> = failing
            .into_iter()
            .filter(|&i| i < tasks.len())
            .map(|i| tasks[i])
            .collect();

        while let Some(task) = driver.executing().first().copied() {
            if failing.contains(&task) {
                driver.fail_execution(task, "boom");
            } else {
                driver.finish(task);
            }
        }
        driver.send(RuntimeEvent::DrainRequested);
        prop_assert!(driver.exit_requested);

        for task in &tasks {
            let count = driver.reports.iter().filter(|r| r.task == *task).count();
            prop_assert_eq!(count, 1, "task {} reported {} times", task, count);

            let report = driver.report(*task).map(|r| r.failure().map(|f| f.kind));
            if failing.contains(task) {
                prop_assert_eq!(report, Some(Some(FailureKind::Execution)));
            } else if let Some(Some(kind)) = report {
                prop_assert_eq!(kind, FailureKind::Cancelled);
            }
        }

        let snapshot = driver.core.snapshot();
        prop_assert_eq!(snapshot.tokens_in_use, 0);
        prop_assert_eq!(snapshot.tokens_granted, snapshot.tokens_released);
    }
}
