//! Durable run record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RunError, RunId, RunStatus};

/// Completed unit of progress, in the order the workflow body issued it
///
/// The journal is what makes resumption replay-based: a resumed run executes
/// its body from the top, and every action already in the journal is
/// answered from here instead of being executed again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEntry {
    /// A step that succeeded, with its serialized output
    Step {
        name: String,
        output: serde_json::Value,
        attempts: u32,
        completed_at: DateTime<Utc>,
    },

    /// A sleep; satisfied once the clock reaches `wake_at`
    Sleep { wake_at: DateTime<Utc> },
}

impl JournalEntry {
    /// Human-readable label used in divergence errors
    pub fn describe(&self) -> String {
        match self {
            Self::Step { name, .. } => format!("step '{name}'"),
            Self::Sleep { .. } => "sleep".to_string(),
        }
    }
}

/// Where a parked run continues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResumeCursor {
    /// Next action at journal `position` has not started
    Next { position: usize },

    /// Step at `position` is waiting out a retry backoff
    Retry {
        position: usize,
        step_name: String,
        /// Attempt number (1-based) to run when the backoff elapses
        attempt: u32,
        wake_at: DateTime<Utc>,
    },

    /// Sleep recorded at `position` ends at `wake_at`
    Sleep {
        position: usize,
        wake_at: DateTime<Utc>,
    },
}

impl ResumeCursor {
    pub fn position(&self) -> usize {
        match self {
            Self::Next { position } | Self::Retry { position, .. } | Self::Sleep { position, .. } => {
                *position
            }
        }
    }

    /// Timer deadline, if the cursor is parked on one
    pub fn wake_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Next { .. } => None,
            Self::Retry { wake_at, .. } | Self::Sleep { wake_at, .. } => Some(*wake_at),
        }
    }
}

impl Default for ResumeCursor {
    fn default() -> Self {
        Self::Next { position: 0 }
    }
}

/// The durable record of one run
///
/// Only the engine mutates a `RunState`; everything handed out to callers
/// is a cloned snapshot. `version` increases on every persisted change and
/// guards against lost updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: RunId,

    /// Registered name of the workflow this run executes
    pub workflow_name: String,

    pub input: serde_json::Value,

    pub status: RunStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set once the run reaches a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    pub cursor: ResumeCursor,

    pub journal: Vec<JournalEntry>,

    /// Workflow output, set when Completed
    pub result: Option<serde_json::Value>,

    /// Terminal error, set when Failed
    pub error: Option<RunError>,

    pub version: u64,
}

impl RunState {
    /// New run in `Pending`
    pub fn new(workflow_name: impl Into<String>, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            workflow_name: workflow_name.into(),
            input,
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
            finished_at: None,
            cursor: ResumeCursor::default(),
            journal: Vec::new(),
            result: None,
            error: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, enforcing the status state machine
    ///
    /// Returns the previous status on success.
    pub fn transition(&mut self, next: RunStatus) -> Result<RunStatus, InvalidTransition> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }

        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(from)
    }

    /// Number of steps recorded in the journal
    pub fn completed_steps(&self) -> usize {
        self.journal
            .iter()
            .filter(|e| matches!(e, JournalEntry::Step { .. }))
            .count()
    }
}

/// Rejected status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid run transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunStatus,
    pub to: RunStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_run_is_pending() {
        let state = RunState::new("user_signup", json!("a@b.com"));

        assert_eq!(state.status, RunStatus::Pending);
        assert_eq!(state.cursor, ResumeCursor::Next { position: 0 });
        assert!(state.journal.is_empty());
        assert_eq!(state.version, 0);
    }

    #[test]
    fn test_transition_sets_finished_at() {
        let mut state = RunState::new("w", json!(null));

        assert_eq!(state.transition(RunStatus::Running).unwrap(), RunStatus::Pending);
        assert!(state.finished_at.is_none());

        state.transition(RunStatus::Completed).unwrap();
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn test_terminal_run_rejects_transitions() {
        let mut state = RunState::new("w", json!(null));
        state.transition(RunStatus::Cancelled).unwrap();

        let err = state.transition(RunStatus::Running).unwrap_err();
        assert_eq!(err.from, RunStatus::Cancelled);
        assert_eq!(state.status, RunStatus::Cancelled);
    }

    #[test]
    fn test_cursor_wake_at() {
        let wake_at = Utc::now();
        assert!(ResumeCursor::Next { position: 2 }.wake_at().is_none());

        let cursor = ResumeCursor::Sleep {
            position: 3,
            wake_at,
        };
        assert_eq!(cursor.wake_at(), Some(wake_at));
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn test_completed_steps_ignores_sleeps() {
        let mut state = RunState::new("w", json!(null));
        state.journal.push(JournalEntry::Step {
            name: "a".into(),
            output: json!(1),
            attempts: 1,
            completed_at: Utc::now(),
        });
        state.journal.push(JournalEntry::Sleep { wake_at: Utc::now() });

        assert_eq!(state.completed_steps(), 1);
    }
}
