//! Step trait and step error definition

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{StepContext, StepOptions};
use crate::channel::ChannelError;

/// Error returned by a step attempt
///
/// Every error is retryable unless it is explicitly marked fatal. Fatal
/// errors abort the run immediately without further attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    ///
    /// A retry policy may list types it refuses to retry.
    pub error_type: Option<String>,

    /// Whether the step explicitly raised a fatal signal
    pub fatal: bool,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl StepError {
    /// Create a retryable error (the default classification)
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            fatal: false,
            details: None,
        }
    }

    /// Create a fatal error; the run fails without retrying this step
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            fatal: true,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StepError {}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(format!("{err:#}"))
    }
}

impl From<ChannelError> for StepError {
    fn from(err: ChannelError) -> Self {
        match err {
            // Appending to a closed channel fails the same way on every attempt
            ChannelError::Closed { .. } => {
                Self::fatal(err.to_string()).with_type("CHANNEL_CLOSED")
            }
            ChannelError::Unavailable(_) => {
                Self::retryable(err.to_string()).with_type("CHANNEL_ERROR")
            }
        }
    }
}

/// A named, reusable unit of work
///
/// Plain async functions can be passed straight to
/// [`WorkflowContext::call`](crate::workflow::WorkflowContext::call); this
/// trait is for steps that carry their own configuration or collaborators.
///
/// # Example
///
/// ```ignore
/// struct SendWelcomeEmail { mailer: Arc<dyn Mailer> }
///
/// #[async_trait]
/// impl Step for SendWelcomeEmail {
///     const NAME: &'static str = "send_welcome_email";
///     type Input = User;
///     type Output = ();
///
///     async fn execute(&self, ctx: StepContext, user: User) -> Result<(), StepError> {
///         self.mailer.send(&user.email, "welcome").await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable step name, recorded in the run journal
    const NAME: &'static str;

    /// Input type, cloned for every attempt
    type Input: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Output type, journaled so replays never re-execute the step
    type Output: Serialize + DeserializeOwned + Send;

    /// Execute one attempt of the step
    async fn execute(&self, ctx: StepContext, input: Self::Input)
        -> Result<Self::Output, StepError>;

    /// Per-step execution options (retry override, timeout)
    fn options(&self) -> StepOptions {
        StepOptions::default()
    }
}
