// src/job/state.rs

//! Per-task lifecycle state machine.
//!
//! A [`JobExecution`] is created when a task is accepted and is driven only
//! through [`JobExecution::advance`]. The scheduler core decides which event
//! to feed; the state machine decides whether that event is legal and which
//! transition, if any, it causes.

use std::fmt;

use serde::Serialize;

use crate::errors::{FlowdagError, Result, TaskFailure};
use crate::types::TaskId;

/// Lifecycle states, in the only order a job may visit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    Analysed,
    DependencyFree,
    ParamExistenceChecked,
    AllValuesObtained,
    AllValuesReady,
    Executing,
    Executed,
    Completed,
    /// Terminal; reached from any non-terminal state.
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether a job in this state holds a concurrency token.
    pub fn holds_token(self) -> bool {
        matches!(self, JobState::Executing | JobState::Executed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Submitted => "SUBMITTED",
            JobState::Analysed => "ANALYSED",
            JobState::DependencyFree => "DEPENDENCY_FREE",
            JobState::ParamExistenceChecked => "PARAM_EXISTENCE_CHECKED",
            JobState::AllValuesObtained => "ALL_VALUES_OBTAINED",
            JobState::AllValuesReady => "ALL_VALUES_READY",
            JobState::Executing => "EXECUTING",
            JobState::Executed => "EXECUTED",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// The dependency graph inserted the task.
    Analysed,
    /// The last predecessor edge was resolved (or there were none).
    DependenciesResolved,
    /// Start the current data phase, expecting `n` provider answers.
    AwaitAnswers(usize),
    /// One existence check answered positively.
    ExistenceConfirmed,
    /// One fetch completed.
    ValueObtained,
    /// Backend preparation finished (or was not needed).
    Prepared,
    /// A concurrency token was granted and the backend was invoked.
    Started,
    /// The backend reported raw completion.
    Executed,
    /// Outputs were registered and advertised.
    Stored,
    Failed(TaskFailure),
}

impl JobEvent {
    fn name(&self) -> &'static str {
        match self {
            JobEvent::Analysed => "analysed",
            JobEvent::DependenciesResolved => "dependencies_resolved",
            JobEvent::AwaitAnswers(_) => "await_answers",
            JobEvent::ExistenceConfirmed => "existence_confirmed",
            JobEvent::ValueObtained => "value_obtained",
            JobEvent::Prepared => "prepared",
            JobEvent::Started => "started",
            JobEvent::Executed => "executed",
            JobEvent::Stored => "stored",
            JobEvent::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: JobState,
    pub to: JobState,
}

/// Lifecycle of one submitted task.
#[derive(Debug, Clone)]
pub struct JobExecution {
    task: TaskId,
    state: JobState,
    /// Answers still expected in the current data phase. `None` until the
    /// phase has been started with [`JobEvent::AwaitAnswers`].
    outstanding: Option<usize>,
    failure: Option<TaskFailure>,
}

impl JobExecution {
    pub fn new(task: TaskId) -> Self {
        Self {
            task,
            state: JobState::Submitted,
            outstanding: None,
            failure: None,
        }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    /// Answers still expected in the current data phase.
    pub fn outstanding(&self) -> usize {
        self.outstanding.unwrap_or(0)
    }

    /// Feed one event.
    ///
    /// Returns the transition it caused, `Ok(None)` when the event was legal
    /// but the phase is still waiting for more answers, and
    /// [`FlowdagError::InvalidTransition`] when the event is not allowed in
    /// the current state.
    pub fn advance(&mut self, event: JobEvent) -> Result<Option<Transition>> {
        use JobState as S;

        let next = match (self.state, &event) {
            (s, JobEvent::Failed(failure)) if !s.is_terminal() => {
                self.failure = Some(failure.clone());
                S::Failed
            }
            (S::Submitted, JobEvent::Analysed) => S::Analysed,
            (S::Analysed, JobEvent::DependenciesResolved) => S::DependencyFree,

            (S::DependencyFree | S::ParamExistenceChecked, JobEvent::AwaitAnswers(n))
                if self.outstanding.is_none() =>
            {
                if *n > 0 {
                    self.outstanding = Some(*n);
                    return Ok(None);
                }
                Self::after_data_phase(self.state)
            }
            (S::DependencyFree, JobEvent::ExistenceConfirmed)
            | (S::ParamExistenceChecked, JobEvent::ValueObtained) => match self.outstanding {
                Some(n) if n > 1 => {
                    self.outstanding = Some(n - 1);
                    return Ok(None);
                }
                Some(_) => Self::after_data_phase(self.state),
                None => return Err(self.invalid(&event)),
            },

            (S::AllValuesObtained, JobEvent::Prepared) => S::AllValuesReady,
            (S::AllValuesReady, JobEvent::Started) => S::Executing,
            (S::Executing, JobEvent::Executed) => S::Executed,
            (S::Executed, JobEvent::Stored) => S::Completed,
            _ => return Err(self.invalid(&event)),
        };

        let transition = Transition {
            from: self.state,
            to: next,
        };
        self.state = next;
        self.outstanding = None;
        Ok(Some(transition))
    }

    fn after_data_phase(state: JobState) -> JobState {
        match state {
            JobState::DependencyFree => JobState::ParamExistenceChecked,
            _ => JobState::AllValuesObtained,
        }
    }

    fn invalid(&self, event: &JobEvent) -> FlowdagError {
        FlowdagError::InvalidTransition {
            task: self.task,
            state: self.state,
            event: event.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;

    fn drive(job: &mut JobExecution, events: Vec<JobEvent>) -> Vec<JobState> {
        events
            .into_iter()
            .filter_map(|e| job.advance(e).unwrap().map(|t| t.to))
            .collect()
    }

    #[test]
    fn happy_path_visits_every_state_in_order() {
        let mut job = JobExecution::new(TaskId(1));
        let states = drive(
            &mut job,
            vec![
                JobEvent::Analysed,
                JobEvent::DependenciesResolved,
                JobEvent::AwaitAnswers(2),
                JobEvent::ExistenceConfirmed,
                JobEvent::ExistenceConfirmed,
                JobEvent::AwaitAnswers(1),
                JobEvent::ValueObtained,
                JobEvent::Prepared,
                JobEvent::Started,
                JobEvent::Executed,
                JobEvent::Stored,
            ],
        );
        assert_eq!(
            states,
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
    }

    #[test]
    fn zero_answers_completes_phase_immediately() {
        let mut job = JobExecution::new(TaskId(1));
        drive(&mut job, vec![JobEvent::Analysed, JobEvent::DependenciesResolved]);
        let t = job.advance(JobEvent::AwaitAnswers(0)).unwrap();
        assert_eq!(t.map(|t| t.to), Some(JobState::ParamExistenceChecked));
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut job = JobExecution::new(TaskId(7));
        job.advance(JobEvent::Analysed).unwrap();
        let err = job.advance(JobEvent::Started).unwrap_err();
        assert!(matches!(
            err,
            FlowdagError::InvalidTransition {
                state: JobState::Analysed,
                ..
            }
        ));
        assert_eq!(job.state(), JobState::Analysed);
    }

    #[test]
    fn answers_before_phase_start_are_rejected() {
        let mut job = JobExecution::new(TaskId(2));
        drive(&mut job, vec![JobEvent::Analysed, JobEvent::DependenciesResolved]);
        assert!(job.advance(JobEvent::ExistenceConfirmed).is_err());
    }

    #[test]
    fn failure_is_terminal() {
        let mut job = JobExecution::new(TaskId(3));
        job.advance(JobEvent::Analysed).unwrap();
        let failure = TaskFailure::new(TaskId(3), "k", FailureKind::Execution, "boom");
        let t = job.advance(JobEvent::Failed(failure.clone())).unwrap();
        assert_eq!(t.map(|t| t.to), Some(JobState::Failed));
        assert_eq!(job.failure(), Some(&failure));
        assert!(job.advance(JobEvent::Failed(failure)).is_err());
        assert!(job.advance(JobEvent::DependenciesResolved).is_err());
    }
}
