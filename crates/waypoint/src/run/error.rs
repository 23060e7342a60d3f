//! Terminal run errors

use serde::{Deserialize, Serialize};

use crate::step::StepError;

/// Why a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// A step raised a fatal failure
    Fatal,

    /// A retryable failure consumed the retry policy's attempt cap
    RetriesExhausted,

    /// The workflow body itself returned an error
    Workflow,

    /// Replay diverged from the recorded journal
    NonDeterministic,

    /// The run references a workflow that is not registered
    UnknownWorkflow,

    /// The workflow body panicked
    Panicked,

    /// Engine-side failure (store errors, journal limit, bad payloads)
    Internal,
}

impl std::fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fatal => "fatal",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Workflow => "workflow",
            Self::NonDeterministic => "non_deterministic",
            Self::UnknownWorkflow => "unknown_workflow",
            Self::Panicked => "panicked",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Error recorded on a failed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RunError {
    pub kind: RunErrorKind,

    pub message: String,

    /// Step that caused the failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    /// Attempts made of that step
    #[serde(default)]
    pub attempts: u32,

    /// Last step error, kept verbatim for callers that inspect details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<StepError>,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            step: None,
            attempts: 0,
            cause: None,
        }
    }

    /// Fatal step failure
    pub fn fatal(step: &str, attempts: u32, error: StepError) -> Self {
        Self {
            kind: RunErrorKind::Fatal,
            message: error.message.clone(),
            step: Some(step.to_string()),
            attempts,
            cause: Some(error),
        }
    }

    /// Retryable failure past the retry cap
    pub fn retries_exhausted(step: &str, attempts: u32, error: StepError) -> Self {
        Self {
            kind: RunErrorKind::RetriesExhausted,
            message: format!(
                "step '{step}' failed after {attempts} attempts: {}",
                error.message
            ),
            step: Some(step.to_string()),
            attempts,
            cause: Some(error),
        }
    }

    pub fn workflow(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::Workflow, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::Internal, message)
    }

    pub fn non_deterministic(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::NonDeterministic, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_exhausted_keeps_last_reason() {
        let err = RunError::retries_exhausted(
            "send_welcome_email",
            4,
            StepError::retryable("smtp unavailable"),
        );

        assert_eq!(err.kind, RunErrorKind::RetriesExhausted);
        assert_eq!(err.step.as_deref(), Some("send_welcome_email"));
        assert_eq!(err.attempts, 4);
        assert!(err.message.contains("smtp unavailable"));
        assert!(err.to_string().starts_with("retries_exhausted:"));
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let err = RunError::workflow("bad input");
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["kind"], "workflow");
        assert!(json.get("step").is_none());

        let parsed: RunError = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, err);
    }
}
