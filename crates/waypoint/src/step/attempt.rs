//! Step attempt records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classified result of one attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure { reason: String },
    FatalFailure { reason: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One execution attempt of a step
///
/// Recorded in the run history for observability; the journal only keeps
/// the final output of a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepAttempt {
    pub step_name: String,

    /// Attempt number (1-based)
    pub attempt_number: u32,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}
