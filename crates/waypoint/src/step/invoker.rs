//! Single-attempt step execution
//!
//! The invoker runs a step future exactly once and classifies how it ended.
//! It knows nothing about retries; the engine feeds the outcome to the
//! retry policy.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tracing::warn;

use super::{AttemptOutcome, StepError};

/// Classified outcome of one step attempt
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    /// The step returned a value
    Success(T),

    /// Transient failure, subject to the retry policy
    RetryableFailure(StepError),

    /// Permanent failure, never retried
    FatalFailure(StepError),
}

impl<T> StepOutcome<T> {
    /// Classify a step result: errors are retryable unless marked fatal
    pub fn classify(result: Result<T, StepError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) if error.fatal => Self::FatalFailure(error),
            Err(error) => Self::RetryableFailure(error),
        }
    }

    /// Outcome as recorded in run history
    pub fn to_attempt_outcome(&self) -> AttemptOutcome {
        match self {
            Self::Success(_) => AttemptOutcome::Success,
            Self::RetryableFailure(e) => AttemptOutcome::RetryableFailure {
                reason: e.message.clone(),
            },
            Self::FatalFailure(e) => AttemptOutcome::FatalFailure {
                reason: e.message.clone(),
            },
        }
    }

    pub fn error(&self) -> Option<&StepError> {
        match self {
            Self::Success(_) => None,
            Self::RetryableFailure(e) | Self::FatalFailure(e) => Some(e),
        }
    }
}

/// Executes step attempts
#[derive(Debug, Clone, Default)]
pub struct StepInvoker {
    timeout: Option<Duration>,
}

impl StepInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each attempt by a timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one attempt to completion and classify the result
    ///
    /// Panics inside the step are caught and reported as retryable failures,
    /// so a misbehaving step never takes the engine down.
    pub async fn invoke<T, Fut>(&self, step_name: &str, attempt: Fut) -> StepOutcome<T>
    where
        Fut: Future<Output = Result<T, StepError>>,
    {
        let guarded = AssertUnwindSafe(attempt).catch_unwind();

        let caught = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(caught) => caught,
                Err(_) => {
                    warn!(step = step_name, ?limit, "step attempt timed out");
                    return StepOutcome::RetryableFailure(
                        StepError::retryable(format!("step timed out after {limit:?}"))
                            .with_type("TIMEOUT"),
                    );
                }
            },
            None => guarded.await,
        };

        match caught {
            Ok(result) => StepOutcome::classify(result),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(step = step_name, %message, "step panicked");
                StepOutcome::RetryableFailure(
                    StepError::retryable(format!("step panicked: {message}")).with_type("PANIC"),
                )
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
