//! Workflow execution context
//!
//! The context is the only way a workflow body talks to the engine. Every
//! step call and sleep goes through it, and it decides whether the action is
//! answered from the journal (replay) or actually performed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::WorkflowError;
use crate::persistence::RunStore;
use crate::reliability::RetryPolicy;
use crate::run::{JournalEntry, ResumeCursor, RunError, RunEvent, RunId, RunState};
use crate::scheduler::Clock;
use crate::step::{
    AttemptOutcome, Step, StepAttempt, StepContext, StepError, StepInvoker, StepOptions,
    StepOutcome,
};

/// Why the body stopped, as recorded by the context
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Interrupt {
    /// Parked on a sleep timer
    Sleep { wake_at: DateTime<Utc> },

    /// Parked on a retry backoff timer
    Retry {
        step: String,
        next_attempt: u32,
        wake_at: DateTime<Utc>,
    },

    /// Cancellation observed at a suspension point
    Cancelled,

    /// Terminal failure
    Failed(RunError),
}

/// Handle a workflow body uses to call steps and sleep
///
/// Steps execute strictly one at a time, in the order the body issues them.
/// After the context raises an interrupt every further call returns the same
/// interrupt without doing anything, so a body that swallows one cannot make
/// progress past it.
pub struct WorkflowContext {
    state: RunState,
    store: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    retry_policy: RetryPolicy,
    max_journal_entries: usize,
    position: usize,
    interrupt: Option<Interrupt>,
}

impl WorkflowContext {
    pub(crate) fn new(
        state: RunState,
        store: Arc<dyn RunStore>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
        retry_policy: RetryPolicy,
        max_journal_entries: usize,
    ) -> Self {
        Self {
            state,
            store,
            clock,
            cancel,
            retry_policy,
            max_journal_entries,
            position: 0,
            interrupt: None,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.state.id
    }

    pub fn workflow_name(&self) -> &str {
        &self.state.workflow_name
    }

    /// Whether the next action will be answered from the journal
    pub fn is_replaying(&self) -> bool {
        self.position < self.state.journal.len()
    }

    /// Whether cancellation of the run has been requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Call a step function with the workflow's retry policy
    ///
    /// `f` runs one attempt with a fresh [`StepContext`]. A retry parks the
    /// run and the next attempt happens when the resumed body calls the step
    /// again. The output must be serializable: it is journaled so a resumed
    /// run gets the recorded value instead of running the step again.
    pub async fn call<I, O, F, Fut>(
        &mut self,
        name: &str,
        input: I,
        f: F,
    ) -> Result<O, WorkflowError>
    where
        I: Send,
        O: Serialize + DeserializeOwned + Send,
        F: Fn(StepContext, I) -> Fut + Send + Sync,
        Fut: Future<Output = Result<O, StepError>> + Send,
    {
        self.call_with(name, input, StepOptions::default(), f).await
    }

    /// Call a step function with per-step options
    pub async fn call_with<I, O, F, Fut>(
        &mut self,
        name: &str,
        input: I,
        options: StepOptions,
        f: F,
    ) -> Result<O, WorkflowError>
    where
        I: Send,
        O: Serialize + DeserializeOwned + Send,
        F: Fn(StepContext, I) -> Fut + Send + Sync,
        Fut: Future<Output = Result<O, StepError>> + Send,
    {
        self.check_interrupted()?;

        if let Some(recorded) = self.replay_step(name)? {
            return Ok(recorded);
        }

        let position = self.position;
        self.begin_new_action()?;

        let policy = options
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.retry_policy.clone());

        let pending_retry = match &self.state.cursor {
            ResumeCursor::Retry {
                position: p,
                step_name,
                attempt,
                wake_at,
            } if *p == position => Some((step_name.clone(), *attempt, *wake_at)),
            _ => None,
        };

        let attempt = match pending_retry {
            Some((step_name, _, _)) if step_name != name => {
                return Err(self.fail(RunError::non_deterministic(format!(
                    "step '{step_name}' was awaiting retry at position {position}, \
                     workflow called step '{name}'"
                ))));
            }
            Some((_, attempt, wake_at)) if !self.clock.is_due(wake_at) => {
                return Err(self.suspend(Interrupt::Retry {
                    step: name.to_string(),
                    next_attempt: attempt,
                    wake_at,
                }));
            }
            Some((_, attempt, _)) => attempt,
            None => 1,
        };

        let step_ctx = StepContext::new(
            self.state.id,
            name,
            attempt,
            policy.max_attempts(),
            Arc::clone(&self.store),
            self.cancel.clone(),
        );

        debug!(run_id = %self.state.id, step = name, attempt, "executing step");

        let started_at = Utc::now();
        let outcome = StepInvoker::new()
            .with_timeout(options.timeout)
            .invoke(name, f(step_ctx, input))
            .await;

        self.record_attempt(name, attempt, started_at, outcome.to_attempt_outcome())
            .await;

        match outcome {
            StepOutcome::Success(output) => {
                let value = match serde_json::to_value(&output) {
                    Ok(value) => value,
                    Err(e) => {
                        return Err(self.fail(RunError::internal(format!(
                            "failed to serialize output of step '{name}': {e}"
                        ))))
                    }
                };

                self.state.journal.push(JournalEntry::Step {
                    name: name.to_string(),
                    output: value,
                    attempts: attempt,
                    completed_at: Utc::now(),
                });
                self.position += 1;
                self.state.cursor = ResumeCursor::Next {
                    position: self.position,
                };
                self.persist().await?;

                debug!(run_id = %self.state.id, step = name, attempt, "step completed");
                Ok(output)
            }
            StepOutcome::FatalFailure(error) => {
                Err(self.fail(RunError::fatal(name, attempt, error)))
            }
            StepOutcome::RetryableFailure(ref error) => {
                let decision = policy.decide(name, attempt, &outcome);
                if decision.retry {
                    let wake_at = self.deadline(decision.delay)?;
                    warn!(
                        run_id = %self.state.id,
                        step = name,
                        attempt,
                        delay = ?decision.delay,
                        error = %error,
                        "step failed, scheduling retry"
                    );
                    self.state.cursor = ResumeCursor::Retry {
                        position,
                        step_name: name.to_string(),
                        attempt: attempt + 1,
                        wake_at,
                    };
                    return Err(self.suspend(Interrupt::Retry {
                        step: name.to_string(),
                        next_attempt: attempt + 1,
                        wake_at,
                    }));
                }

                let error = error.clone();
                if policy.is_retryable_type(error.error_type.as_deref()) {
                    Err(self.fail(RunError::retries_exhausted(name, attempt, error)))
                } else {
                    Err(self.fail(RunError::fatal(name, attempt, error)))
                }
            }
        }
    }

    /// Run a [`Step`] implementation
    pub async fn run<S: Step>(
        &mut self,
        step: &S,
        input: S::Input,
    ) -> Result<S::Output, WorkflowError> {
        let options = step.options();
        self.call_with(S::NAME, input, options, |ctx, input| step.execute(ctx, input))
            .await
    }

    /// Suspend the run for `duration`
    ///
    /// The run parks in `Sleeping` and holds no task while the timer runs.
    /// On resume the sleep is answered from the journal once its deadline
    /// has passed.
    pub async fn sleep(&mut self, duration: Duration) -> Result<(), WorkflowError> {
        self.check_interrupted()?;

        let position = self.position;
        if let Some(entry) = self.state.journal.get(position) {
            let wake_at = match entry {
                JournalEntry::Sleep { wake_at } => *wake_at,
                other => {
                    let recorded = other.describe();
                    return Err(self.fail(RunError::non_deterministic(format!(
                        "journal has {recorded} at position {position}, workflow called sleep"
                    ))));
                }
            };

            if self.clock.is_due(wake_at) {
                self.position += 1;
                return Ok(());
            }

            // Woken before the deadline; park again on the same deadline
            if self.cancel.is_cancelled() {
                return Err(self.suspend(Interrupt::Cancelled));
            }
            self.state.cursor = ResumeCursor::Sleep { position, wake_at };
            return Err(self.suspend(Interrupt::Sleep { wake_at }));
        }

        self.begin_new_action()?;

        let wake_at = self.deadline(duration)?;
        self.state.journal.push(JournalEntry::Sleep { wake_at });
        self.state.cursor = ResumeCursor::Sleep { position, wake_at };

        info!(run_id = %self.state.id, ?duration, %wake_at, "run going to sleep");
        Err(self.suspend(Interrupt::Sleep { wake_at }))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Answer a step call from the journal, if it was already recorded
    fn replay_step<O: DeserializeOwned>(
        &mut self,
        name: &str,
    ) -> Result<Option<O>, WorkflowError> {
        let position = self.position;
        let Some(entry) = self.state.journal.get(position) else {
            return Ok(None);
        };

        let output = match entry {
            JournalEntry::Step {
                name: recorded,
                output,
                ..
            } if recorded == name => serde_json::from_value::<O>(output.clone()),
            other => {
                let recorded = other.describe();
                return Err(self.fail(RunError::non_deterministic(format!(
                    "journal has {recorded} at position {position}, workflow called step '{name}'"
                ))));
            }
        };

        match output {
            Ok(value) => {
                self.position += 1;
                debug!(run_id = %self.state.id, step = name, position, "replayed step");
                Ok(Some(value))
            }
            Err(e) => Err(self.fail(RunError::non_deterministic(format!(
                "recorded output of step '{name}' no longer matches its type: {e}"
            )))),
        }
    }

    /// Gate for actions not in the journal: cancellation and journal size
    fn begin_new_action(&mut self) -> Result<(), WorkflowError> {
        if self.cancel.is_cancelled() {
            info!(run_id = %self.state.id, "cancellation observed at suspension point");
            return Err(self.suspend(Interrupt::Cancelled));
        }
        if self.state.journal.len() >= self.max_journal_entries {
            return Err(self.fail(RunError::internal(format!(
                "journal limit of {} entries reached",
                self.max_journal_entries
            ))));
        }
        Ok(())
    }

    fn deadline(&mut self, delay: Duration) -> Result<DateTime<Utc>, WorkflowError> {
        let deadline = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| self.clock.now().checked_add_signed(d));
        match deadline {
            Some(at) => Ok(at),
            None => Err(self.fail(RunError::internal(format!(
                "delay {delay:?} is out of range"
            )))),
        }
    }

    fn check_interrupted(&self) -> Result<(), WorkflowError> {
        match &self.interrupt {
            None => Ok(()),
            Some(Interrupt::Sleep { .. } | Interrupt::Retry { .. }) => Err(WorkflowError::Suspended),
            Some(Interrupt::Cancelled) => Err(WorkflowError::Cancelled),
            Some(Interrupt::Failed(error)) => Err(WorkflowError::Failed(error.clone())),
        }
    }

    fn suspend(&mut self, interrupt: Interrupt) -> WorkflowError {
        let error = match &interrupt {
            Interrupt::Cancelled => WorkflowError::Cancelled,
            Interrupt::Failed(error) => WorkflowError::Failed(error.clone()),
            Interrupt::Sleep { .. } | Interrupt::Retry { .. } => WorkflowError::Suspended,
        };
        self.interrupt = Some(interrupt);
        error
    }

    fn fail(&mut self, error: RunError) -> WorkflowError {
        self.suspend(Interrupt::Failed(error))
    }

    /// Persist journal progress
    async fn persist(&mut self) -> Result<(), WorkflowError> {
        self.state.updated_at = Utc::now();
        match self.store.update_run(&self.state).await {
            Ok(version) => {
                self.state.version = version;
                Ok(())
            }
            Err(e) => Err(self.fail(RunError::internal(format!(
                "failed to persist run progress: {e}"
            )))),
        }
    }

    async fn record_attempt(
        &self,
        step: &str,
        attempt: u32,
        started_at: DateTime<Utc>,
        outcome: AttemptOutcome,
    ) {
        let event = RunEvent::StepAttempted {
            attempt: StepAttempt {
                step_name: step.to_string(),
                attempt_number: attempt,
                started_at,
                finished_at: Utc::now(),
                outcome,
            },
        };

        if let Err(e) = self.store.append_event(self.state.id, event).await {
            warn!(run_id = %self.state.id, step, error = %e, "failed to record step attempt");
        }
    }

    /// Hand the run record and interrupt back to the driver
    pub(crate) fn into_parts(self) -> (RunState, Option<Interrupt>) {
        (self.state, self.interrupt)
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("run_id", &self.state.id)
            .field("workflow", &self.state.workflow_name)
            .field("position", &self.position)
            .field("interrupt", &self.interrupt)
            .finish()
    }
}
