//! Per-step execution options

use std::time::Duration;

use crate::reliability::RetryPolicy;

/// Options for a single step call
///
/// Anything left unset falls back to the workflow's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOptions {
    /// Retry policy override for this step
    pub retry_policy: Option<RetryPolicy>,

    /// Maximum duration of one attempt
    ///
    /// An attempt that exceeds it is treated as a retryable failure.
    pub timeout: Option<Duration>,
}

impl StepOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the retry policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Bound each attempt by a timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
