//! Objective direction and tuning run bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kt_types::EvaluationRecord;

/// Unique tuning run identifier.
pub type RunId = Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    #[serde(alias = "max")]
    Maximize,
    #[serde(alias = "min")]
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

impl ObjectiveDirection {
    /// `true` when `a` is strictly better than `b`.
    ///
    /// Every direction-dependent comparison in the crate goes through here.
    pub fn is_better_than(self, a: f64, b: f64) -> bool {
        match self {
            Self::Maximize => a > b,
            Self::Minimize => a < b,
        }
    }

    /// A value every finite score beats.
    pub fn worst_value(self) -> f64 {
        match self {
            Self::Maximize => f64::NEG_INFINITY,
            Self::Minimize => f64::INFINITY,
        }
    }

    /// Position of the best value, first occurrence wins on ties.
    pub fn best_index(self, values: &[f64]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &v) in values.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            match best {
                Some((_, b)) if !self.is_better_than(v, b) => {}
                _ => best = Some((i, v)),
            }
        }
        best.map(|(i, _)| i)
    }
}

/// Lifecycle state for a tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Running,
    /// Ran out of candidates or reached the strategy's evaluation count.
    Completed,
    /// The external budget stopped the run early.
    Stopped,
}

/// Aggregate status of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub strategy: String,
    pub direction: ObjectiveDirection,
    pub state: RunState,
    pub evaluations: usize,
    pub invalid_evaluations: usize,
    pub best: Option<EvaluationRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn new(strategy: &str, direction: ObjectiveDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy: strategy.to_string(),
            direction,
            state: RunState::Pending,
            evaluations: 0,
            invalid_evaluations: 0,
            best: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_stopped(&mut self) {
        self.state = RunState::Stopped;
        self.finished_at = Some(Utc::now());
    }

    /// Count `record` and keep it if it improves on the current best.
    pub fn observe(&mut self, record: &EvaluationRecord) {
        self.evaluations += 1;
        let time = match (record.is_valid(), record.time) {
            (true, Some(t)) => t,
            _ => {
                self.invalid_evaluations += 1;
                return;
            }
        };
        let improves = match self.best.as_ref().and_then(|b| b.time) {
            None => true,
            Some(best) => self.direction.is_better_than(time, best),
        };
        if improves {
            self.best = Some(record.clone());
        }
    }

    /// Rebuild counts and best from a full results list.
    pub fn observe_all(&mut self, records: &[EvaluationRecord]) {
        for record in records {
            self.observe(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kt_types::{ParameterValue, RunOutcome, TuneParams};

    fn record(time: Option<f64>) -> EvaluationRecord {
        let params = TuneParams::new().add_ints("x", &[1]);
        let values = vec![ParameterValue::Int(1)];
        let outcome = match time {
            Some(t) => RunOutcome::Time(t),
            None => RunOutcome::RuntimeFailed("launch failure".into()),
        };
        EvaluationRecord::from_outcome(0, &params.view(&values), &outcome)
    }

    #[test]
    fn is_better_than_respects_direction() {
        let max = ObjectiveDirection::Maximize;
        assert!(max.is_better_than(2.0, 1.0));
        assert!(max.is_better_than(-0.1, -0.2));
        let min = ObjectiveDirection::Minimize;
        assert!(min.is_better_than(1.0, 2.0));
        assert!(min.is_better_than(-0.2, -0.1));
    }

    #[test]
    fn is_better_than_is_antisymmetric() {
        let pairs = [(1.0, 2.0), (-3.5, 0.0), (1e-9, 2e-9), (7.0, -7.0)];
        for direction in [ObjectiveDirection::Maximize, ObjectiveDirection::Minimize] {
            for (a, b) in pairs {
                assert_ne!(direction.is_better_than(a, b), direction.is_better_than(b, a));
            }
            assert!(!direction.is_better_than(1.0, 1.0));
        }
    }

    #[test]
    fn worst_value_loses_to_everything() {
        for direction in [ObjectiveDirection::Maximize, ObjectiveDirection::Minimize] {
            assert!(direction.is_better_than(0.0, direction.worst_value()));
        }
    }

    #[test]
    fn best_index_prefers_first_on_ties() {
        let values = [3.0, 1.0, 1.0, 5.0];
        assert_eq!(ObjectiveDirection::Minimize.best_index(&values), Some(1));
        assert_eq!(ObjectiveDirection::Maximize.best_index(&values), Some(3));
        assert_eq!(ObjectiveDirection::Minimize.best_index(&[]), None);
        assert_eq!(ObjectiveDirection::Minimize.best_index(&[f64::NAN, 2.0]), Some(1));
    }

    #[test]
    fn direction_parses_short_names() {
        let d: ObjectiveDirection = serde_json::from_str("\"max\"").unwrap();
        assert_eq!(d, ObjectiveDirection::Maximize);
        let d: ObjectiveDirection = serde_json::from_str("\"minimize\"").unwrap();
        assert_eq!(d, ObjectiveDirection::Minimize);
    }

    #[test]
    fn run_summary_lifecycle() {
        let mut summary = RunSummary::new("bayes_opt", ObjectiveDirection::Minimize);
        assert_eq!(summary.state, RunState::Pending);
        assert!(summary.started_at.is_none());

        summary.mark_running();
        assert_eq!(summary.state, RunState::Running);
        assert!(summary.started_at.is_some());

        summary.mark_stopped();
        assert_eq!(summary.state, RunState::Stopped);
        assert!(summary.finished_at.is_some());
    }

    #[test]
    fn best_tracking_minimize() {
        let mut summary = RunSummary::new("bayes_opt", ObjectiveDirection::Minimize);
        summary.observe(&record(Some(5.0)));
        summary.observe(&record(Some(2.0)));
        summary.observe(&record(None));
        summary.observe(&record(Some(8.0)));
        assert_eq!(summary.best.as_ref().and_then(|b| b.time), Some(2.0));
        assert_eq!(summary.evaluations, 4);
        assert_eq!(summary.invalid_evaluations, 1);
    }

    #[test]
    fn best_tracking_maximize() {
        let mut summary = RunSummary::new("random_sample", ObjectiveDirection::Maximize);
        summary.observe_all(&[record(Some(1.5)), record(Some(2.0)), record(Some(1.0))]);
        assert_eq!(summary.best.as_ref().and_then(|b| b.time), Some(2.0));
    }
}
