//! User signup workflow
//!
//! create_user → send_welcome_email → sleep(5s) → send_onboarding_email
//!
//! The welcome email fails at random (a stand-in for a flaky mail provider)
//! and relies on retries; an email address without `@` fails onboarding
//! fatally, since retrying cannot fix it.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;
use waypoint::prelude::*;

use crate::records::{EmailKind, RecordError, RecordStore, User};

/// Pause between the welcome and the onboarding email
pub const ONBOARDING_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignupResult {
    pub user_id: String,
    pub status: String,
}

pub struct UserSignup {
    records: Arc<dyn RecordStore>,
    welcome_failure_rate: f64,
    retry_policy: Option<RetryPolicy>,
}

impl UserSignup {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            welcome_failure_rate: 0.3,
            retry_policy: None,
        }
    }

    /// Probability in `[0, 1]` that a welcome email attempt fails
    pub fn with_welcome_failure_rate(mut self, rate: f64) -> Self {
        self.welcome_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

#[async_trait]
impl Workflow for UserSignup {
    const NAME: &'static str = "user_signup";
    type Input = String;
    type Output = SignupResult;

    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        email: String,
    ) -> Result<SignupResult, WorkflowError> {
        if !ctx.is_replaying() {
            info!(run_id = %ctx.run_id(), "starting user signup");
        }

        let records = &self.records;
        let failure_rate = self.welcome_failure_rate;

        let user: User = ctx
            .call("create_user", email, |_, email: String| async move {
                records.create_user(&email).await.map_err(record_error)
            })
            .await?;

        ctx.call(
            "send_welcome_email",
            user.clone(),
            |_, user: User| async move {
                let flaky = rand::thread_rng().gen_bool(failure_rate);
                if flaky {
                    return Err(StepError::retryable("mail provider unavailable"));
                }
                records
                    .record_email(&user.id, EmailKind::Welcome)
                    .await
                    .map_err(record_error)
            },
        )
        .await?;

        ctx.sleep(ONBOARDING_DELAY).await?;

        ctx.call(
            "send_onboarding_email",
            user.clone(),
            |_, user: User| async move {
                if !user.email.contains('@') {
                    return Err(StepError::fatal("Invalid Email").with_type("INVALID_EMAIL"));
                }
                records
                    .record_email(&user.id, EmailKind::Onboarding)
                    .await
                    .map_err(record_error)
            },
        )
        .await?;

        info!(run_id = %ctx.run_id(), user_id = %user.id, "user onboarded");
        Ok(SignupResult {
            user_id: user.id,
            status: "onboarded".to_string(),
        })
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry_policy.clone()
    }
}

/// Missing records are permanent; anything else may succeed on retry
pub(crate) fn record_error(err: RecordError) -> StepError {
    match err {
        RecordError::NotFound(_) => StepError::fatal(err.to_string()).with_type("NOT_FOUND"),
        RecordError::Unavailable(_) => StepError::retryable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::InMemoryRecordStore;

    fn engine(records: Arc<InMemoryRecordStore>, failure_rate: f64) -> WorkflowEngine {
        let workflow = UserSignup::new(records)
            .with_welcome_failure_rate(failure_rate)
            .with_retry_policy(RetryPolicy::fixed(Duration::from_millis(100), 50));
        WorkflowEngine::builder()
            .register(workflow)
            .unwrap()
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_signup_onboards_user_despite_flaky_welcome_email() {
        let records = Arc::new(InMemoryRecordStore::new());
        let engine = engine(records.clone(), 0.5);

        let started = tokio::time::Instant::now();
        let run_id = engine
            .start::<UserSignup>("a@b.com".to_string())
            .await
            .unwrap();
        let handle = engine.get_run(run_id).await.unwrap();
        let state = handle.wait().await.unwrap();

        assert_eq!(state.status, RunStatus::Completed);
        assert!(started.elapsed() >= ONBOARDING_DELAY);

        let result: SignupResult = handle.output().await.unwrap().unwrap();
        assert_eq!(result.status, "onboarded");

        // Replays never created a second user or resent an email
        assert_eq!(records.user_count(), 1);
        let kinds: Vec<EmailKind> = records
            .sent_emails(&result.user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, [EmailKind::Welcome, EmailKind::Onboarding]);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_email_fails_onboarding_fatally() {
        let records = Arc::new(InMemoryRecordStore::new());
        let engine = engine(records.clone(), 0.0);

        let run_id = engine
            .start::<UserSignup>("not-an-email".to_string())
            .await
            .unwrap();
        let state = engine.get_run(run_id).await.unwrap().wait().await.unwrap();

        assert_eq!(state.status, RunStatus::Failed);
        let error = state.error.unwrap();
        assert_eq!(error.kind, RunErrorKind::Fatal);
        assert_eq!(error.step.as_deref(), Some("send_onboarding_email"));
        assert_eq!(error.attempts, 1);
        assert!(error.message.contains("Invalid Email"));

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_welcome_email_gives_up_after_cap() {
        let records = Arc::new(InMemoryRecordStore::new());
        let workflow = UserSignup::new(records.clone())
            .with_welcome_failure_rate(1.0)
            .with_retry_policy(RetryPolicy::fixed(Duration::from_secs(1), 3));
        let engine = WorkflowEngine::builder()
            .register(workflow)
            .unwrap()
            .build();

        let run_id = engine
            .start::<UserSignup>("a@b.com".to_string())
            .await
            .unwrap();
        let state = engine.get_run(run_id).await.unwrap().wait().await.unwrap();

        assert_eq!(state.status, RunStatus::Failed);
        let error = state.error.unwrap();
        assert_eq!(error.kind, RunErrorKind::RetriesExhausted);
        assert_eq!(error.step.as_deref(), Some("send_welcome_email"));
        assert_eq!(error.attempts, 4);

        engine.shutdown().await;
    }

    #[test]
    fn test_failure_rate_is_clamped() {
        let records: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let workflow = UserSignup::new(records).with_welcome_failure_rate(7.0);
        assert_eq!(workflow.welcome_failure_rate, 1.0);
    }
}
