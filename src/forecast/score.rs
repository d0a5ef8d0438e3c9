// src/forecast/score.rs

use std::cmp::Ordering;

use serde::Serialize;

/// Running statistic over observed samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aggregate {
    pub count: u64,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl Default for Aggregate {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aggregate {
    /// No samples; every statistic reads as zero.
    pub fn empty() -> Self {
        Self {
            count: 0,
            min: 0.0,
            avg: 0.0,
            max: 0.0,
        }
    }

    pub fn single(value: f64) -> Self {
        Self {
            count: 1,
            min: value,
            avg: value,
            max: value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn record(&mut self, value: f64) {
        self.merge(&Aggregate::single(value));
    }

    /// Combine two aggregates, weighting averages by sample count.
    pub fn merge(&mut self, other: &Aggregate) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *other;
            return;
        }

        let total = self.count + other.count;
        self.avg = (self.avg * self.count as f64 + other.avg * other.count as f64) / total as f64;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count = total;
    }

    /// Same statistic offset by `delta`, e.g. an added transfer penalty.
    pub fn shifted(&self, delta: f64) -> Aggregate {
        Aggregate {
            count: self.count,
            min: self.min + delta,
            avg: self.avg + delta,
            max: self.max + delta,
        }
    }
}

/// Predicted time (ms), energy (J) and cost of running a job somewhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutionScore {
    pub time: Aggregate,
    pub energy: Aggregate,
    pub cost: Aggregate,
}

impl ExecutionScore {
    pub fn new(time: Aggregate, energy: Aggregate, cost: Aggregate) -> Self {
        Self { time, energy, cost }
    }

    /// Score made of single-sample aggregates.
    pub fn point(time_ms: f64, energy_j: f64, cost: f64) -> Self {
        Self::new(
            Aggregate::single(time_ms),
            Aggregate::single(energy_j),
            Aggregate::single(cost),
        )
    }

    pub fn merge(&mut self, other: &ExecutionScore) {
        self.time.merge(&other.time);
        self.energy.merge(&other.energy);
        self.cost.merge(&other.cost);
    }
}

/// Orders two scores; `Ordering::Less` means `a` is the better choice.
pub trait ScoreComparator: Send + Sync {
    fn compare(&self, a: &ExecutionScore, b: &ExecutionScore) -> Ordering;
}

/// Minimize average time, then energy, then cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeEnergyCost;

impl ScoreComparator for TimeEnergyCost {
    fn compare(&self, a: &ExecutionScore, b: &ExecutionScore) -> Ordering {
        a.time
            .avg
            .total_cmp(&b.time.avg)
            .then_with(|| a.energy.avg.total_cmp(&b.energy.avg))
            .then_with(|| a.cost.avg.total_cmp(&b.cost.avg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_weights_by_count() {
        let mut a = Aggregate::single(10.0);
        a.record(20.0);
        let mut b = Aggregate::single(40.0);
        b.merge(&a);

        assert_eq!(b.count, 3);
        assert!((b.avg - 70.0 / 3.0).abs() < 1e-9);
        assert_eq!(b.min, 10.0);
        assert_eq!(b.max, 40.0);
    }

    #[test]
    fn merging_empty_is_identity() {
        let mut a = Aggregate::single(5.0);
        a.merge(&Aggregate::empty());
        assert_eq!(a, Aggregate::single(5.0));

        let mut e = Aggregate::empty();
        e.merge(&a);
        assert_eq!(e, a);
    }

    #[test]
    fn comparator_breaks_ties_on_energy_then_cost() {
        let cmp = TimeEnergyCost;
        let a = ExecutionScore::point(10.0, 5.0, 1.0);
        let b = ExecutionScore::point(10.0, 3.0, 9.0);
        assert_eq!(cmp.compare(&b, &a), Ordering::Less);

        let c = ExecutionScore::point(10.0, 3.0, 2.0);
        assert_eq!(cmp.compare(&c, &b), Ordering::Less);
        assert_eq!(cmp.compare(&c, &c), Ordering::Equal);
    }
}
