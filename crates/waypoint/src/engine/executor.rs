//! Workflow engine
//!
//! The `WorkflowEngine` is responsible for:
//! - Admitting new runs and handing out run handles
//! - Driving runs: replaying the workflow body against the run's journal
//! - Parking runs on sleep and retry timers without holding a task
//! - Applying cancellation and recording terminal outcomes

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::config::MIN_SWEEP_INTERVAL;
use super::{EngineConfig, RunHandle};
use crate::channel::{ChunkReader, DEFAULT_CHANNEL};
use crate::persistence::{InMemoryRunStore, RunFilter, RunStore, StoreError};
use crate::run::{RunError, RunErrorKind, RunEvent, RunId, RunState, RunStatus};
use crate::scheduler::{Clock, Scheduler, SchedulerError, SystemClock};
use crate::step::panic_message;
use crate::workflow::{
    Interrupt, RegistryError, Workflow, WorkflowContext, WorkflowError, WorkflowRegistry,
};

/// Errors from engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No run with this id exists
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    /// Run already reached a terminal status
    #[error("run {0} already completed")]
    RunCompleted(RunId),

    /// Run has not reached a terminal status yet
    #[error("run {0} is still active")]
    RunActive(RunId),

    /// Store error
    #[error("store error: {0}")]
    Store(StoreError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Scheduler error
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Illegal status change
    #[error(transparent)]
    InvalidTransition(#[from] crate::run::InvalidTransition),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine was shut down
    #[error("engine is shut down")]
    ShutDown,
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunNotFound(id) => Self::RunNotFound(id),
            StoreError::RunTerminal(id) => Self::RunCompleted(id),
            StoreError::RunActive(id) => Self::RunActive(id),
            other => Self::Store(other),
        }
    }
}

/// How a driver pass ended for a run that is not parked
enum Terminal {
    Completed(Value),
    Failed(RunError),
    Cancelled,
}

/// Builder for [`WorkflowEngine`]
pub struct WorkflowEngineBuilder {
    registry: WorkflowRegistry,
    store: Option<Arc<dyn RunStore>>,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
}

impl WorkflowEngineBuilder {
    fn new() -> Self {
        Self {
            registry: WorkflowRegistry::new(),
            store: None,
            clock: None,
            config: EngineConfig::default(),
        }
    }

    /// Register a workflow
    pub fn register<W: Workflow>(mut self, workflow: W) -> Result<Self, RegistryError> {
        self.registry.register(workflow)?;
        info!(workflow = W::NAME, "registered workflow");
        Ok(self)
    }

    /// Use a specific run store (defaults to [`InMemoryRunStore`])
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific clock (defaults to [`SystemClock`])
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine and start its background loops
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> WorkflowEngine {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryRunStore::new()) as Arc<dyn RunStore>);
        let (scheduler, ready) = Scheduler::new(clock);

        let inner = Arc::new(EngineInner {
            registry: self.registry,
            store,
            scheduler,
            permits: Arc::new(Semaphore::new(self.config.max_concurrent_runs.max(1))),
            config: self.config,
            active: DashMap::new(),
            statuses: DashMap::new(),
            cancels: DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let dispatcher = tokio::spawn(Arc::clone(&inner).dispatch(ready));
        let sweeper = tokio::spawn(Arc::clone(&inner).sweep());
        inner.tasks.lock().extend([dispatcher, sweeper]);

        info!(
            workflows = inner.registry.len(),
            max_concurrent_runs = inner.config.max_concurrent_runs,
            "workflow engine started"
        );

        WorkflowEngine { inner }
    }
}

/// Durable step-based workflow engine
///
/// Cheap to clone; all clones share the same engine. Call
/// [`WorkflowEngine::shutdown`] to stop the background loops.
///
/// # Example
///
/// ```ignore
/// let engine = WorkflowEngine::builder()
///     .register(UserSignup::new(records))?
///     .build();
///
/// let run_id = engine.start::<UserSignup>("a@b.com".to_string()).await?;
/// let finished = engine.get_run(run_id).await?.wait().await?;
/// ```
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: WorkflowRegistry,
    store: Arc<dyn RunStore>,
    scheduler: Scheduler,
    config: EngineConfig,

    /// Bounds the number of runs being driven at once
    permits: Arc<Semaphore>,

    /// Runs with a driver; the flag records wake-ups that arrived meanwhile
    active: DashMap<RunId, bool>,

    /// Latest status per run, for waiters
    statuses: DashMap<RunId, watch::Sender<RunStatus>>,

    cancels: DashMap<RunId, CancellationToken>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new()
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Start a run of a registered workflow
    ///
    /// Returns as soon as the run is admitted in `Pending`; step failures
    /// surface later through the run's status.
    pub async fn start<W: Workflow>(&self, input: W::Input) -> Result<RunId, EngineError> {
        let input = serde_json::to_value(input)?;
        self.start_by_name(W::NAME, input).await
    }

    /// Start a run by registered workflow name with JSON input
    #[instrument(skip(self, input))]
    pub async fn start_by_name(&self, workflow: &str, input: Value) -> Result<RunId, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::ShutDown);
        }

        let definition = self.inner.registry.get(workflow)?;
        definition
            .validate_input(&input)
            .map_err(|source| RegistryError::InvalidInput {
                workflow: workflow.to_string(),
                source,
            })?;

        let state = RunState::new(workflow, input.clone());
        let run_id = state.id;

        self.inner.store.create_run(state).await?;
        self.inner
            .record(
                run_id,
                RunEvent::RunCreated {
                    workflow: workflow.to_string(),
                    input,
                },
            )
            .await;
        self.inner.publish(run_id, RunStatus::Pending);
        self.inner.scheduler.wake_now(run_id)?;

        info!(%run_id, workflow, "run started");
        Ok(run_id)
    }

    /// Look up a run
    pub async fn get_run(&self, run_id: RunId) -> Result<RunHandle, EngineError> {
        self.inner.store.get_run(run_id).await?;
        Ok(RunHandle::new(run_id, self.clone()))
    }

    /// Snapshot of a run record
    pub async fn snapshot(&self, run_id: RunId) -> Result<RunState, EngineError> {
        Ok(self.inner.store.get_run(run_id).await?)
    }

    /// Open a reader on a run's output channel
    ///
    /// `channel` defaults to `"default"` and `start_index` to 0. A reader
    /// positioned past the last chunk waits until more chunks arrive or the
    /// channel closes.
    pub async fn readable(
        &self,
        run_id: RunId,
        channel: Option<&str>,
        start_index: Option<u64>,
    ) -> Result<ChunkReader, EngineError> {
        let channel = self
            .inner
            .store
            .channel(run_id, channel.unwrap_or(DEFAULT_CHANNEL))
            .await?;
        Ok(channel.reader(start_index.unwrap_or(0)))
    }

    /// Request cancellation of a run
    ///
    /// A parked run is cancelled as soon as its driver picks it up; a run
    /// executing a step is cancelled at its next suspension point. The step
    /// in flight always finishes first.
    #[instrument(skip(self))]
    pub async fn cancel(&self, run_id: RunId) -> Result<(), EngineError> {
        // The token goes in before the status read: a run that finishes
        // afterwards removes it itself, one that finished before is seen here
        let token = self.inner.cancel_token(run_id);
        let already_requested = token.is_cancelled();
        token.cancel();

        let state = match self.inner.store.get_run(run_id).await {
            Ok(state) if !state.is_terminal() => state,
            Ok(_) => {
                self.inner.cancels.remove(&run_id);
                return Err(EngineError::RunCompleted(run_id));
            }
            Err(e) => {
                self.inner.cancels.remove(&run_id);
                return Err(e.into());
            }
        };

        if already_requested {
            debug!(%run_id, "cancellation already requested");
            return Ok(());
        }

        self.inner.record(run_id, RunEvent::CancelRequested).await;
        warn!(%run_id, status = %state.status, "cancellation requested");

        // A running driver defers this wake-up until its pass ends
        self.inner.scheduler.wake_now(run_id)?;
        Ok(())
    }

    /// Re-admit every non-terminal run found in the store
    ///
    /// Pending and Running runs are driven right away; parked runs get their
    /// timer re-armed at the persisted deadline. Returns the number of runs
    /// re-admitted.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let runs = self.inner.store.list_runs(RunFilter::active()).await?;

        for state in &runs {
            self.inner.publish(state.id, state.status);
            match state.cursor.wake_at() {
                Some(wake_at) if state.status.is_parked() => {
                    self.inner.scheduler.wake_at(state.id, wake_at)?
                }
                _ => self.inner.scheduler.wake_now(state.id)?,
            }
            debug!(run_id = %state.id, status = %state.status, "recovered run");
        }

        info!(count = runs.len(), "recovered runs");
        Ok(runs.len())
    }

    /// Delete a terminal run and its channels
    pub async fn remove_run(&self, run_id: RunId) -> Result<(), EngineError> {
        self.inner.store.remove_run(run_id).await?;
        self.inner.forget(run_id);
        debug!(%run_id, "removed run");
        Ok(())
    }

    /// Stop background loops and pending timers
    ///
    /// Drivers already executing finish their current pass. Parked runs stay
    /// parked in the store and can be picked up again with
    /// [`WorkflowEngine::recover`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.permits.close();
        self.inner.scheduler.shutdown();

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("workflow engine stopped");
    }

    pub(crate) async fn wait_terminal(&self, run_id: RunId) -> Result<RunState, EngineError> {
        let mut rx = self.inner.subscribe(run_id).await?;

        loop {
            let state = self.inner.store.get_run(run_id).await?;
            if state.is_terminal() {
                return Ok(state);
            }
            if self.inner.shutdown.is_cancelled() {
                return Err(EngineError::ShutDown);
            }

            let changed = tokio::select! {
                changed = rx.changed() => changed.is_ok(),
                _ = self.inner.shutdown.cancelled() => return Err(EngineError::ShutDown),
            };
            if !changed {
                // Sender dropped when the run was removed; re-subscribing reports it
                rx = self.inner.subscribe(run_id).await?;
            }
        }
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("registry", &self.inner.registry)
            .field("scheduler", &self.inner.scheduler)
            .field("active", &self.inner.active.len())
            .finish()
    }
}

/// Marks a run as driven; releasing it re-queues wake-ups that arrived
/// while the driver was busy
struct DriveGuard<'a> {
    inner: &'a EngineInner,
    run_id: RunId,
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        if let Some((_, true)) = self.inner.active.remove(&self.run_id) {
            debug!(run_id = %self.run_id, "re-queueing deferred wake-up");
            let _ = self.inner.scheduler.wake_now(self.run_id);
        }
    }
}

impl EngineInner {
    // =========================================================================
    // Background loops
    // =========================================================================

    async fn dispatch(self: Arc<Self>, mut ready: mpsc::UnboundedReceiver<RunId>) {
        loop {
            let run_id = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = ready.recv() => match next {
                    Some(run_id) => run_id,
                    None => break,
                },
            };

            let inner = Arc::clone(&self);
            tokio::spawn(async move { inner.drive(run_id).await });
        }
        debug!("dispatcher stopped");
    }

    async fn sweep(self: Arc<Self>) {
        let period = self.config.sweep_interval.max(MIN_SWEEP_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let Ok(retention) = chrono::Duration::from_std(self.config.retention) else {
                continue;
            };
            let cutoff = self.scheduler.clock().now() - retention;

            match self.store.purge_terminal(cutoff).await {
                Ok(purged) if !purged.is_empty() => {
                    purged.iter().for_each(|id| self.forget(*id));
                    debug!(count = purged.len(), "purged expired runs");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to purge expired runs"),
            }
        }
        debug!("sweeper stopped");
    }

    // =========================================================================
    // Driver
    // =========================================================================

    #[instrument(skip(self))]
    async fn drive(self: Arc<Self>, run_id: RunId) {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        let Some(_guard) = self.claim(run_id) else {
            debug!(%run_id, "run already being driven, deferring wake-up");
            return;
        };

        if let Err(e) = self.drive_once(run_id).await {
            error!(%run_id, error = %e, "driver pass failed");
            self.fail_after_error(run_id, e).await;
        }
    }

    fn claim(&self, run_id: RunId) -> Option<DriveGuard<'_>> {
        match self.active.entry(run_id) {
            Entry::Occupied(mut occupied) => {
                *occupied.get_mut() = true;
                None
            }
            Entry::Vacant(vacant) => {
                vacant.insert(false);
                Some(DriveGuard {
                    inner: self,
                    run_id,
                })
            }
        }
    }

    /// One pass: replay the body until it completes, fails or parks
    async fn drive_once(&self, run_id: RunId) -> Result<(), EngineError> {
        let mut state = match self.store.get_run(run_id).await {
            Ok(state) => state,
            Err(StoreError::RunNotFound(_)) => {
                debug!(%run_id, "run vanished before it was driven");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if state.is_terminal() {
            debug!(%run_id, status = %state.status, "run already terminal");
            return Ok(());
        }

        let cancel = self.cancel_token(run_id);
        if cancel.is_cancelled() && state.status.is_parked() {
            self.scheduler.cancel(run_id);
            return self.finish(state, Terminal::Cancelled).await;
        }

        if state.status != RunStatus::Running {
            self.transition(&mut state, RunStatus::Running).await?;
        }

        let workflow = match self.registry.get(&state.workflow_name) {
            Ok(workflow) => workflow,
            Err(e) => {
                let error = RunError::new(RunErrorKind::UnknownWorkflow, e.to_string());
                return self.finish(state, Terminal::Failed(error)).await;
            }
        };

        debug!(
            %run_id,
            workflow = %state.workflow_name,
            journal = state.journal.len(),
            "driving run"
        );

        let policy = workflow
            .retry_policy()
            .unwrap_or_else(|| self.config.retry_policy.clone());
        let input = state.input.clone();
        let mut ctx = WorkflowContext::new(
            state,
            Arc::clone(&self.store),
            Arc::clone(self.scheduler.clock()),
            cancel,
            policy,
            self.config.max_journal_entries,
        );

        let result = AssertUnwindSafe(workflow.run_json(&mut ctx, input))
            .catch_unwind()
            .await;
        let (mut state, interrupt) = ctx.into_parts();

        let terminal = match (interrupt, result) {
            (Some(Interrupt::Sleep { wake_at }), _) => {
                self.transition(&mut state, RunStatus::Sleeping).await?;
                self.record(run_id, RunEvent::SleepScheduled { wake_at }).await;
                self.scheduler.wake_at(run_id, wake_at)?;
                return Ok(());
            }
            (
                Some(Interrupt::Retry {
                    step,
                    next_attempt,
                    wake_at,
                }),
                _,
            ) => {
                self.transition(&mut state, RunStatus::Retrying).await?;
                self.record(
                    run_id,
                    RunEvent::RetryScheduled {
                        step,
                        next_attempt,
                        wake_at,
                    },
                )
                .await;
                self.scheduler.wake_at(run_id, wake_at)?;
                return Ok(());
            }
            (Some(Interrupt::Cancelled), _) => Terminal::Cancelled,
            (Some(Interrupt::Failed(error)), _) => Terminal::Failed(error),
            (None, Err(panic)) => {
                let message = panic_message(panic.as_ref());
                Terminal::Failed(RunError::new(
                    RunErrorKind::Panicked,
                    format!("workflow body panicked: {message}"),
                ))
            }
            (None, Ok(Ok(output))) => Terminal::Completed(output),
            (None, Ok(Err(WorkflowError::Failed(error)))) => Terminal::Failed(error),
            (None, Ok(Err(interrupt))) => Terminal::Failed(RunError::internal(format!(
                "workflow body returned '{interrupt}' without a matching suspension point"
            ))),
        };

        self.finish(state, terminal).await
    }

    /// Record a terminal outcome, close the run's channels and notify waiters
    async fn finish(&self, mut state: RunState, terminal: Terminal) -> Result<(), EngineError> {
        let run_id = state.id;

        let (status, event) = match terminal {
            Terminal::Completed(result) => {
                state.result = Some(result.clone());
                (RunStatus::Completed, Some(RunEvent::RunCompleted { result }))
            }
            Terminal::Failed(error) => {
                state.error = Some(error.clone());
                (RunStatus::Failed, Some(RunEvent::RunFailed { error }))
            }
            Terminal::Cancelled => (RunStatus::Cancelled, None),
        };

        self.transition(&mut state, status).await?;
        if let Some(event) = event {
            self.record(run_id, event).await;
        }

        self.store.close_channels(run_id).await?;
        self.cancels.remove(&run_id);

        match status {
            RunStatus::Completed => info!(
                %run_id,
                workflow = %state.workflow_name,
                steps = state.completed_steps(),
                "run completed"
            ),
            RunStatus::Failed => error!(
                %run_id,
                workflow = %state.workflow_name,
                error = ?state.error.as_ref().map(|e| e.to_string()),
                "run failed"
            ),
            _ => warn!(%run_id, workflow = %state.workflow_name, "run cancelled"),
        }
        Ok(())
    }

    /// Best effort: fail a run whose driver pass hit an engine error
    async fn fail_after_error(&self, run_id: RunId, cause: EngineError) {
        let mut state = match self.store.get_run(run_id).await {
            Ok(state) if !state.is_terminal() => state,
            _ => return,
        };

        if state.status.is_parked() {
            // Only Running may move to Failed
            if let Err(e) = self.transition(&mut state, RunStatus::Running).await {
                error!(%run_id, error = %e, "could not fail run");
                return;
            }
        }

        let error = RunError::internal(cause.to_string());
        if let Err(e) = self.finish(state, Terminal::Failed(error)).await {
            error!(%run_id, error = %e, "could not fail run");
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Apply a status change, persist it and notify waiters
    async fn transition(&self, state: &mut RunState, next: RunStatus) -> Result<(), EngineError> {
        let from = state.transition(next)?;
        state.version = self.store.update_run(state).await?;

        debug!(run_id = %state.id, %from, to = %next, "run transition");
        self.record(state.id, RunEvent::StatusChanged { from, to: next })
            .await;
        self.publish(state.id, next);
        Ok(())
    }

    async fn record(&self, run_id: RunId, event: RunEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.store.append_event(run_id, event).await {
            warn!(%run_id, event_type, error = %e, "failed to record run event");
        }
    }

    fn publish(&self, run_id: RunId, status: RunStatus) {
        match self.statuses.entry(run_id) {
            Entry::Occupied(occupied) => {
                occupied.get().send_replace(status);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(watch::channel(status).0);
            }
        }
    }

    async fn subscribe(&self, run_id: RunId) -> Result<watch::Receiver<RunStatus>, EngineError> {
        if let Some(sender) = self.statuses.get(&run_id) {
            return Ok(sender.subscribe());
        }

        let state = self.store.get_run(run_id).await?;
        let rx = self
            .statuses
            .entry(run_id)
            .or_insert_with(|| watch::channel(state.status).0)
            .subscribe();
        Ok(rx)
    }

    fn cancel_token(&self, run_id: RunId) -> CancellationToken {
        self.cancels.entry(run_id).or_default().clone()
    }

    fn forget(&self, run_id: RunId) {
        self.statuses.remove(&run_id);
        self.cancels.remove(&run_id);
    }
}
