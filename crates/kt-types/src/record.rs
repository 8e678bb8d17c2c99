use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::device::RunOutcome;
use crate::params::{ConfigView, ParameterValue};

/// Outcome class of one evaluated configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationStatus {
    Ok,
    /// Rejected by restrictions or the device thread bound.
    InvalidConfig,
    CompileFailed,
    RuntimeFailed,
}

impl EvaluationStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// One entry in the results of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: Uuid,
    /// Position in evaluation order, starting at 0.
    pub sequence: usize,
    pub parameters: HashMap<String, ParameterValue>,
    /// Ordered copy of the configuration values.
    pub configuration: Vec<ParameterValue>,
    /// Measured time in milliseconds, `None` when the configuration failed.
    pub time: Option<f64>,
    pub status: EvaluationStatus,
    pub error: Option<String>,
    pub measured_at: DateTime<Utc>,
}

impl EvaluationRecord {
    pub fn from_outcome(sequence: usize, config: &ConfigView<'_>, outcome: &RunOutcome) -> Self {
        let (time, status, error) = match outcome {
            RunOutcome::Time(t) if t.is_finite() => (Some(*t), EvaluationStatus::Ok, None),
            RunOutcome::Time(t) => (
                None,
                EvaluationStatus::RuntimeFailed,
                Some(format!("non-finite time {t}")),
            ),
            RunOutcome::CompileFailed(msg) => {
                (None, EvaluationStatus::CompileFailed, Some(msg.clone()))
            }
            RunOutcome::RuntimeFailed(msg) => {
                (None, EvaluationStatus::RuntimeFailed, Some(msg.clone()))
            }
        };
        Self {
            id: Uuid::new_v4(),
            sequence,
            parameters: config.to_map(),
            configuration: config.values().to_vec(),
            time,
            status,
            error,
            measured_at: Utc::now(),
        }
    }

    pub fn invalid(sequence: usize, config: &ConfigView<'_>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            parameters: config.to_map(),
            configuration: config.values().to_vec(),
            time: None,
            status: EvaluationStatus::InvalidConfig,
            error: Some("configuration violates restrictions".to_string()),
            measured_at: Utc::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status.is_valid()
    }
}
