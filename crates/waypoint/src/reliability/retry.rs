//! Retry policy

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::step::StepOutcome;

/// What the policy decided after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,

    /// Wait before the next attempt; zero when giving up
    pub delay: Duration,
}

impl RetryDecision {
    pub const GIVE_UP: Self = Self {
        retry: false,
        delay: Duration::ZERO,
    };

    pub fn retry_after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

/// Capped exponential backoff for retryable step failures
///
/// Retry `n` (1-based) waits `initial_interval × backoff_coefficient^(n-1)`,
/// capped at `max_interval` and scaled by a random factor in
/// `[1 - jitter, 1 + jitter]`. Fatal failures are never retried.
///
/// ```
/// use std::time::Duration;
/// use waypoint::RetryPolicy;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_retries(5)
///     .with_backoff(Duration::from_millis(200), Duration::from_secs(10))
///     .with_jitter(0.0);
///
/// assert_eq!(policy.max_attempts(), 6);
/// assert_eq!(policy.backoff(3), Duration::from_millis(800));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a step runs at most `max_retries + 1` times
    pub max_retries: u32,

    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_coefficient: f64,

    /// Relative spread applied to each delay, clamped to `[0, 1]`
    pub jitter: f64,

    /// Error types treated as fatal even when raised as retryable
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// 3 retries starting at 1s, doubling up to 60s, with 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            non_retryable_errors: Vec::new(),
        }
    }

    /// Same delay before every retry
    pub fn fixed(interval: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: Vec::new(),
        }
    }

    /// Single attempt; any failure ends the run
    pub fn no_retry() -> Self {
        Self::fixed(Duration::ZERO, 0)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the first delay and the cap
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_interval = initial;
        self.max_interval = max.max(initial);
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether an error of this type may be retried at all
    pub fn is_retryable_type(&self, error_type: Option<&str>) -> bool {
        error_type.map_or(true, |ty| !self.non_retryable_errors.iter().any(|t| t == ty))
    }

    /// Decide what follows attempt `attempt` (1-based) of `step`
    pub fn decide<T>(&self, step: &str, attempt: u32, outcome: &StepOutcome<T>) -> RetryDecision {
        let StepOutcome::RetryableFailure(error) = outcome else {
            return RetryDecision::GIVE_UP;
        };

        if attempt > self.max_retries || !self.is_retryable_type(error.error_type.as_deref()) {
            tracing::debug!(step, attempt, "retry policy gives up");
            return RetryDecision::GIVE_UP;
        }

        RetryDecision::retry_after(self.jittered(self.backoff(attempt)))
    }

    /// Un-jittered delay before retry `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);

        Duration::try_from_secs_f64(secs)
            .map(|delay| delay.min(self.max_interval))
            .unwrap_or(self.max_interval)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let spread = self.jitter.clamp(0.0, 1.0);
        if spread == 0.0 || delay.is_zero() {
            return delay;
        }

        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        delay.mul_f64(factor)
    }
}
