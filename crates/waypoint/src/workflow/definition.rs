//! Workflow trait definition

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::WorkflowContext;
use crate::reliability::RetryPolicy;
use crate::run::RunError;

/// Ways a workflow body stops short of returning a value
///
/// `Suspended` and `Cancelled` are engine interrupts raised by the context at
/// suspension points; bodies pass them on with `?`. `Failed` fails the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    /// The run parked on a sleep or retry timer
    #[error("run suspended")]
    Suspended,

    /// Cancellation was honored at a suspension point
    #[error("run cancelled")]
    Cancelled,

    /// The run failed terminally
    #[error(transparent)]
    Failed(RunError),
}

impl WorkflowError {
    /// Fail the run from workflow code
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(RunError::workflow(message))
    }

    /// Whether this is an engine interrupt rather than a failure
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Suspended | Self::Cancelled)
    }
}

impl From<RunError> for WorkflowError {
    fn from(error: RunError) -> Self {
        Self::Failed(error)
    }
}

/// A workflow is an async function composed of step calls and sleeps
///
/// The body may use ordinary control flow (conditionals, loops) to decide
/// which steps run. It is re-executed from the top whenever a parked run
/// resumes; completed steps and sleeps are answered from the run's journal.
///
/// # Determinism
///
/// Given the same input and the same recorded step outputs, a body must
/// issue the same sequence of step calls and sleeps. Side effects belong in
/// steps, never in the body itself. Replay that diverges from the journal
/// fails the run.
///
/// # Example
///
/// ```ignore
/// use waypoint::prelude::*;
///
/// struct Greet;
///
/// #[async_trait]
/// impl Workflow for Greet {
///     const NAME: &'static str = "greet";
///     type Input = String;
///     type Output = String;
///
///     async fn run(&self, ctx: &mut WorkflowContext, name: String) -> Result<String, WorkflowError> {
///         let greeting = ctx
///             .call("compose", name, |_ctx, name: String| async move {
///                 Ok(format!("hello {name}"))
///             })
///             .await?;
///         ctx.sleep(Duration::from_secs(1)).await?;
///         Ok(greeting)
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Stable registration name
    ///
    /// In-flight runs are resumed by this name, so it must not change while
    /// runs of the workflow exist.
    const NAME: &'static str;

    /// Input type for starting the workflow
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Output type when workflow completes successfully
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Workflow body
    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        input: Self::Input,
    ) -> Result<Self::Output, WorkflowError>;

    /// Retry policy for steps of this workflow that set none themselves
    ///
    /// `None` uses the engine default.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }
}
