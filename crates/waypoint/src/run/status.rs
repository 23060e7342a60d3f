//! Run identifiers and the run status state machine

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque run identifier (UUID v7, sortable by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RunId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Run status
///
/// ```text
/// Pending ──► Running ──► Completed | Failed
///               │ ▲
///               ▼ │
///        Sleeping / Retrying
///
/// any non-terminal ──► Cancelled
/// ```
///
/// Parked runs (Sleeping, Retrying) always pass back through Running before
/// completing or failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run created but not yet picked up
    Pending,

    /// Run is executing a step or the workflow body
    Running,

    /// Run is parked on a sleep timer
    Sleeping,

    /// Run is parked on a retry backoff timer
    Retrying,

    /// Workflow body returned a value
    Completed,

    /// Fatal failure or retries exhausted
    Failed,

    /// Cancellation honored at a suspension point
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the run holds no execution resources while in this status
    pub fn is_parked(&self) -> bool {
        matches!(self, Self::Pending | Self::Sleeping | Self::Retrying)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;

        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Cancelled) => true,
            (Pending, Running) => true,
            (Running, Running | Sleeping | Retrying | Completed | Failed) => true,
            (Sleeping | Retrying, Running) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Sleeping => write!(f, "sleeping"),
            Self::Retrying => write!(f, "retrying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
