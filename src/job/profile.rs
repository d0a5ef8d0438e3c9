// src/job/profile.rs

use std::time::Instant;

/// Timings and sizes collected while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub struct JobProfile {
    pub submitted_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub elapsed_ms: f64,
    /// Joules, from the backend's power draw over the elapsed time.
    pub energy_j: f64,
    pub cost: f64,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

impl JobProfile {
    pub fn new(submitted_at: Instant) -> Self {
        Self {
            submitted_at,
            started_at: None,
            finished_at: None,
            elapsed_ms: 0.0,
            energy_j: 0.0,
            cost: 0.0,
            input_bytes: 0,
            output_bytes: 0,
        }
    }

    pub fn start(&mut self, at: Instant) {
        self.started_at = Some(at);
    }

    /// Close the profile, pricing the run with the backend's coefficients.
    pub fn finish(&mut self, at: Instant, power_watts: f64, cost_per_second: f64) {
        let started = self.started_at.unwrap_or(at);
        self.finished_at = Some(at);
        self.elapsed_ms = at.saturating_duration_since(started).as_secs_f64() * 1000.0;

        let seconds = self.elapsed_ms / 1000.0;
        self.energy_j = seconds * power_watts;
        self.cost = seconds * cost_per_second;
    }

    /// Time from submission to the end of execution.
    pub fn turnaround_ms(&self) -> Option<f64> {
        self.finished_at
            .map(|f| f.saturating_duration_since(self.submitted_at).as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn finish_prices_elapsed_time() {
        let t0 = Instant::now();
        let mut p = JobProfile::new(t0);
        assert_eq!(p.turnaround_ms(), None);
        p.start(t0 + Duration::from_millis(100));
        p.finish(t0 + Duration::from_millis(600), 100.0, 2.0);
        assert!((p.turnaround_ms().unwrap() - 600.0).abs() < 1e-6);

        assert!((p.elapsed_ms - 500.0).abs() < 1e-6);
        assert!((p.energy_j - 50.0).abs() < 1e-6);
        assert!((p.cost - 1.0).abs() < 1e-6);
    }
}
