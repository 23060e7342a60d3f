//! Read-only view of a run

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{EngineError, WorkflowEngine};
use crate::channel::ChunkReader;
use crate::run::{RecordedEvent, RunError, RunId, RunState, RunStatus};

/// Handle to one run, returned by [`WorkflowEngine::get_run`]
///
/// Every accessor reads the latest persisted state, so a handle never goes
/// stale. Once the run is terminal every accessor returns the same answer.
#[derive(Clone)]
pub struct RunHandle {
    run_id: RunId,
    engine: WorkflowEngine,
}

impl RunHandle {
    pub(crate) fn new(run_id: RunId, engine: WorkflowEngine) -> Self {
        Self { run_id, engine }
    }

    pub fn id(&self) -> RunId {
        self.run_id
    }

    /// Consistent snapshot of the run record
    pub async fn snapshot(&self) -> Result<RunState, EngineError> {
        self.engine.snapshot(self.run_id).await
    }

    pub async fn status(&self) -> Result<RunStatus, EngineError> {
        Ok(self.snapshot().await?.status)
    }

    /// Workflow output, once the run completed
    pub async fn result(&self) -> Result<Option<Value>, EngineError> {
        Ok(self.snapshot().await?.result)
    }

    /// Workflow output deserialized into `T`, once the run completed
    pub async fn output<T: DeserializeOwned>(&self) -> Result<Option<T>, EngineError> {
        match self.result().await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Terminal error, once the run failed
    pub async fn error(&self) -> Result<Option<RunError>, EngineError> {
        Ok(self.snapshot().await?.error)
    }

    /// Transitions and step attempts recorded for the run
    pub async fn history(&self) -> Result<Vec<RecordedEvent>, EngineError> {
        Ok(self.engine.store().load_events(self.run_id).await?)
    }

    /// Names of the channels the run has written to or been read from
    pub async fn channels(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.engine.store().channel_names(self.run_id).await?)
    }

    /// Open a reader on one of the run's output channels
    pub async fn readable(
        &self,
        channel: Option<&str>,
        start_index: Option<u64>,
    ) -> Result<ChunkReader, EngineError> {
        self.engine.readable(self.run_id, channel, start_index).await
    }

    /// Wait until the run reaches a terminal status
    pub async fn wait(&self) -> Result<RunState, EngineError> {
        self.engine.wait_terminal(self.run_id).await
    }

    /// Request cancellation of the run
    pub async fn cancel(&self) -> Result<(), EngineError> {
        self.engine.cancel(self.run_id).await
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .finish()
    }
}
