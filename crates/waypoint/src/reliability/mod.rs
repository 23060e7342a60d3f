//! Reliability patterns for durable execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Configurable retry with capped exponential backoff
//! - [`RetryDecision`] - What the policy decided after a failed attempt

mod retry;

pub use retry::{RetryDecision, RetryPolicy};
