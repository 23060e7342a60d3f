//! RunStore trait definition

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::channel::OutputChannel;
use crate::run::{RecordedEvent, RunEvent, RunId, RunState, RunStatus};

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Run not found
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    /// Run already exists
    #[error("run already exists: {0}")]
    RunExists(RunId),

    /// Concurrency conflict (optimistic locking failed)
    #[error("concurrency conflict: expected version {expected}, got {actual}")]
    ConcurrencyConflict { expected: u64, actual: u64 },

    /// Update attempted on a run that already reached a terminal status
    #[error("run {0} is terminal and read-only")]
    RunTerminal(RunId),

    /// Removal attempted on a run that has not finished
    #[error("run {0} is still active")]
    RunActive(RunId),

    /// Backend error
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Filter for listing runs
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub workflow_name: Option<String>,

    /// Only runs that have not reached a terminal status
    pub active_only: bool,
}

impl RunFilter {
    /// Runs that still need driving
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_workflow(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = Some(name.into());
        self
    }

    pub fn matches(&self, state: &RunState) -> bool {
        if self.active_only && state.is_terminal() {
            return false;
        }
        if self.status.is_some_and(|s| s != state.status) {
            return false;
        }
        match &self.workflow_name {
            Some(name) => &state.workflow_name == name,
            None => true,
        }
    }
}

/// Store for run records, run history and output channels
///
/// Implementations must be thread-safe and support concurrent access.
/// Run records are versioned: [`RunStore::update_run`] only succeeds when
/// the caller holds the latest version, and a terminal run is never
/// updated again.
#[async_trait]
pub trait RunStore: Send + Sync + 'static {
    // =========================================================================
    // Run Operations
    // =========================================================================

    /// Persist a new run
    async fn create_run(&self, state: RunState) -> Result<(), StoreError>;

    /// Snapshot of a run
    async fn get_run(&self, run_id: RunId) -> Result<RunState, StoreError>;

    /// Replace a run record (with optimistic concurrency)
    ///
    /// `state.version` must equal the stored version. Returns the new version.
    async fn update_run(&self, state: &RunState) -> Result<u64, StoreError>;

    /// List runs matching a filter, oldest first
    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<RunState>, StoreError>;

    /// Delete a terminal run together with its history and channels
    async fn remove_run(&self, run_id: RunId) -> Result<(), StoreError>;

    /// Delete every terminal run that finished before `finished_before`
    ///
    /// Returns the removed run ids.
    async fn purge_terminal(
        &self,
        finished_before: DateTime<Utc>,
    ) -> Result<Vec<RunId>, StoreError>;

    // =========================================================================
    // History Operations
    // =========================================================================

    /// Append an event to the run's history, returning its sequence number
    async fn append_event(&self, run_id: RunId, event: RunEvent) -> Result<u64, StoreError>;

    /// Load the run's full history
    async fn load_events(&self, run_id: RunId) -> Result<Vec<RecordedEvent>, StoreError>;

    // =========================================================================
    // Channel Operations
    // =========================================================================

    /// Get or lazily create a named channel of a run
    ///
    /// A channel created for a run that is already terminal starts closed.
    async fn channel(&self, run_id: RunId, name: &str) -> Result<Arc<OutputChannel>, StoreError>;

    /// Names of the channels a run has created
    async fn channel_names(&self, run_id: RunId) -> Result<Vec<String>, StoreError>;

    /// Close every channel of a run
    async fn close_channels(&self, run_id: RunId) -> Result<(), StoreError>;
}
