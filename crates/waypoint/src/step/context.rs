//! Step execution context

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::{ChannelError, DEFAULT_CHANNEL};
use crate::persistence::RunStore;
use crate::run::RunId;

/// Context handed to every step attempt
///
/// The context provides:
/// - Information about the current attempt
/// - Write access to the run's output channels
/// - Visibility into pending cancellation requests
///
/// Only the engine constructs step contexts, so channel writes can only
/// originate from code executing inside an active run.
///
/// # Example
///
/// ```ignore
/// async fn write_progress(ctx: StepContext, message: String) -> Result<(), StepError> {
///     ctx.write(message).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct StepContext {
    /// Unique execution attempt ID
    pub attempt_id: Uuid,

    /// Run that owns this step
    pub run_id: RunId,

    /// Step name within the workflow
    pub step_name: String,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed by the effective retry policy
    pub max_attempts: u32,

    store: Arc<dyn RunStore>,
    cancel: CancellationToken,
}

impl StepContext {
    pub(crate) fn new(
        run_id: RunId,
        step_name: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
        store: Arc<dyn RunStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            attempt_id: Uuid::now_v7(),
            run_id,
            step_name: step_name.into(),
            attempt,
            max_attempts,
            store,
            cancel,
        }
    }

    /// Append a chunk to the run's default channel, returning its index
    pub async fn write(&self, payload: impl Into<Bytes>) -> Result<u64, ChannelError> {
        self.write_to(DEFAULT_CHANNEL, payload).await
    }

    /// Append a chunk to a named channel, creating the channel on first write
    pub async fn write_to(
        &self,
        channel: &str,
        payload: impl Into<Bytes>,
    ) -> Result<u64, ChannelError> {
        let channel = self
            .store
            .channel(self.run_id, channel)
            .await
            .map_err(|e| ChannelError::Unavailable(e.to_string()))?;
        channel.append(payload)
    }

    /// Close the run's default channel
    pub async fn close(&self) -> Result<(), ChannelError> {
        self.close_channel(DEFAULT_CHANNEL).await
    }

    /// Close a named channel; closing twice is a no-op
    pub async fn close_channel(&self, channel: &str) -> Result<(), ChannelError> {
        let channel = self
            .store
            .channel(self.run_id, channel)
            .await
            .map_err(|e| ChannelError::Unavailable(e.to_string()))?;
        channel.close();
        Ok(())
    }

    /// Whether cancellation of the run has been requested
    ///
    /// Cancellation is applied by the engine after this attempt returns;
    /// long steps may use this to finish early.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Check if this is the last attempt the retry policy allows
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("attempt_id", &self.attempt_id)
            .field("run_id", &self.run_id)
            .field("step_name", &self.step_name)
            .field("attempt", &self.attempt)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
