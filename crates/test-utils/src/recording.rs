use std::sync::Mutex;

use flowdag::engine::{TransitionEvent, TransitionSink};
use flowdag::job::JobState;
use flowdag::types::TaskId;

/// Sink that keeps every transition in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TransitionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// States `task` entered, in order.
    pub fn states_of(&self, task: TaskId) -> Vec<JobState> {
        self.events()
            .into_iter()
            .filter(|e| e.task == task)
            .map(|e| e.to)
            .collect()
    }
}

impl TransitionSink for RecordingSink {
    fn record(&self, event: &TransitionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
