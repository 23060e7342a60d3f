//! Document classification workflow
//!
//! Reports progress on the run's default channel so a client can follow it
//! live or replay it after reconnecting.

use tracing::info;
use waypoint::prelude::*;

/// Progress messages, in the order they are written
pub const PROGRESS: [&str; 3] = ["Starting task...", "Processing data...", "Task complete!"];

/// Writes one message to the default channel
pub struct WriteProgress;

#[async_trait]
impl Step for WriteProgress {
    const NAME: &'static str = "write_progress";
    type Input = String;
    type Output = u64;

    async fn execute(&self, ctx: StepContext, message: String) -> Result<u64, StepError> {
        Ok(ctx.write(message).await?)
    }
}

/// Closes the default channel so readers finish
pub struct CloseStreams;

#[async_trait]
impl Step for CloseStreams {
    const NAME: &'static str = "close_streams";
    type Input = ();
    type Output = ();

    async fn execute(&self, ctx: StepContext, _input: ()) -> Result<(), StepError> {
        Ok(ctx.close().await?)
    }
}

pub struct ClassifyDocs;

#[async_trait]
impl Workflow for ClassifyDocs {
    const NAME: &'static str = "classify_docs";
    type Input = ();
    type Output = ();

    async fn run(&self, ctx: &mut WorkflowContext, _input: ()) -> Result<(), WorkflowError> {
        if !ctx.is_replaying() {
            info!(run_id = %ctx.run_id(), "classifying docs");
        }

        for message in PROGRESS {
            ctx.run(&WriteProgress, message.to_string()).await?;
        }
        ctx.run(&CloseStreams, ()).await
    }
}
