//! Time source for deadlines

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of "now" for sleep and retry deadlines
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// Time left until `at`, zero if already passed
    fn until(&self, at: DateTime<Utc>) -> Duration {
        at.signed_duration_since(self.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn is_due(&self, at: DateTime<Utc>) -> bool {
        self.now() >= at
    }
}

/// Wall clock anchored at construction and advanced by tokio's clock
///
/// Deadlines are persisted as wall time while timers run on tokio's
/// monotonic clock; anchoring one to the other keeps them in agreement,
/// including under paused time in tests.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin_wall: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin_wall: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.origin.elapsed();
        chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|d| self.origin_wall.checked_add_signed(d))
            .unwrap_or_else(Utc::now)
    }
}
