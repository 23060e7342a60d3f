//! Run history events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RunError, RunStatus};
use crate::step::StepAttempt;

/// Events appended to a run's history
///
/// The history is an audit trail only. Resumption reads the journal on
/// [`RunState`](super::RunState), never these events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    // =========================================================================
    // Lifecycle
    // =========================================================================
    /// Run was admitted
    RunCreated {
        workflow: String,
        input: serde_json::Value,
    },

    /// Status moved along the state machine
    StatusChanged { from: RunStatus, to: RunStatus },

    /// Workflow body returned a value
    RunCompleted { result: serde_json::Value },

    /// Run failed terminally
    RunFailed { error: RunError },

    /// Cancellation was requested by a caller
    CancelRequested,

    // =========================================================================
    // Steps
    // =========================================================================
    /// One attempt of a step finished
    StepAttempted { attempt: StepAttempt },

    /// A failed step will be retried at `wake_at`
    RetryScheduled {
        step: String,
        next_attempt: u32,
        wake_at: DateTime<Utc>,
    },

    // =========================================================================
    // Timers
    // =========================================================================
    /// Run parked on a sleep until `wake_at`
    SleepScheduled { wake_at: DateTime<Utc> },
}

impl RunEvent {
    /// Get the event type name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunCreated { .. } => "run_created",
            Self::StatusChanged { .. } => "status_changed",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
            Self::CancelRequested => "cancel_requested",
            Self::StepAttempted { .. } => "step_attempted",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::SleepScheduled { .. } => "sleep_scheduled",
        }
    }
}

/// History event with its position and timestamp
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedEvent {
    /// Position in the run's history (0-based, gap-free)
    pub sequence: u64,

    pub recorded_at: DateTime<Utc>,

    pub event: RunEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::AttemptOutcome;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = RunEvent::StatusChanged {
            from: RunStatus::Running,
            to: RunStatus::Sleeping,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["to"], "sleeping");
    }

    #[test]
    fn test_step_attempt_event_round_trip() {
        let now = Utc::now();
        let event = RunEvent::StepAttempted {
            attempt: StepAttempt {
                step_name: "send_welcome_email".into(),
                attempt_number: 2,
                started_at: now,
                finished_at: now,
                outcome: AttemptOutcome::RetryableFailure {
                    reason: "smtp down".into(),
                },
            },
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: RunEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.event_type(), "step_attempted");
    }
}
