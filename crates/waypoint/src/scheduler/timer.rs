//! Wake-up timers for parked runs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use super::Clock;
use crate::run::RunId;

/// Errors from scheduling operations
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The ready queue receiver is gone (engine shut down)
    #[error("scheduler is closed")]
    Closed,
}

struct Timer {
    id: u64,
    wake_at: DateTime<Utc>,
    handle: AbortHandle,
}

/// Turns deadlines into ready-queue entries
///
/// Each parked run gets one lightweight timer task that sleeps until the
/// deadline and then pushes the run id into the ready queue. A parked run
/// holds nothing else: no permit, no driver task, no lock.
#[derive(Clone)]
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    timers: Arc<DashMap<RunId, Timer>>,
    next_timer_id: Arc<AtomicU64>,
    ready: mpsc::UnboundedSender<RunId>,
}

impl Scheduler {
    /// Create a scheduler and the receiving end of its ready queue
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<RunId>) {
        let (ready, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            clock,
            timers: Arc::new(DashMap::new()),
            next_timer_id: Arc::new(AtomicU64::new(0)),
            ready,
        };
        (scheduler, rx)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Make a run ready right away, dropping any pending timer for it
    pub fn wake_now(&self, run_id: RunId) -> Result<(), SchedulerError> {
        self.cancel(run_id);
        self.ready.send(run_id).map_err(|_| SchedulerError::Closed)
    }

    /// Make a run ready once the clock reaches `wake_at`
    ///
    /// Replaces any timer already pending for the run.
    pub fn wake_at(&self, run_id: RunId, wake_at: DateTime<Utc>) -> Result<(), SchedulerError> {
        if self.ready.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let wait = self.clock.until(wake_at);
        if wait.is_zero() {
            return self.wake_now(run_id);
        }

        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed);
        debug!(%run_id, %wake_at, ?wait, "arming timer");

        // Spawn while holding the entry so the task cannot look the timer up
        // before it is registered
        let previous = match self.timers.entry(run_id) {
            Entry::Occupied(mut occupied) => Some(occupied.insert(Timer {
                id,
                wake_at,
                handle: self.spawn_timer(run_id, id, wait),
            })),
            Entry::Vacant(vacant) => {
                vacant.insert(Timer {
                    id,
                    wake_at,
                    handle: self.spawn_timer(run_id, id, wait),
                });
                None
            }
        };
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        Ok(())
    }

    fn spawn_timer(&self, run_id: RunId, id: u64, wait: Duration) -> AbortHandle {
        let timers = Arc::clone(&self.timers);
        let ready = self.ready.clone();

        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            // A newer timer may have replaced this one
            if timers.remove_if(&run_id, |_, t| t.id == id).is_some() {
                let _ = ready.send(run_id);
            }
        })
        .abort_handle()
    }

    /// Drop the pending timer of a run; returns whether one existed
    pub fn cancel(&self, run_id: RunId) -> bool {
        match self.timers.remove(&run_id) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Deadline of the run's pending timer
    pub fn next_wake(&self, run_id: RunId) -> Option<DateTime<Utc>> {
        self.timers.get(&run_id).map(|t| t.wake_at)
    }

    /// Number of armed timers
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Abort every pending timer
    pub fn shutdown(&self) {
        self.timers.iter().for_each(|t| t.handle.abort());
        self.timers.clear();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.timers.len())
            .finish()
    }
}
