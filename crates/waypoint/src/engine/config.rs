//! Engine configuration

use std::time::Duration;

use crate::reliability::RetryPolicy;

/// Shortest period the sweeper runs at
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the workflow engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Runs driven at the same time; parked runs do not count
    pub max_concurrent_runs: usize,

    /// Maximum journal entries (steps + sleeps) per run (for safety)
    pub max_journal_entries: usize,

    /// How long terminal runs and their channels are kept
    pub retention: Duration,

    /// How often the sweeper purges expired terminal runs (at least 1s)
    pub sweep_interval: Duration,

    /// Retry policy for steps whose workflow and call site set none
    pub retry_policy: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 64,
            max_journal_entries: 10_000,
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables
    ///
    /// - `WAYPOINT_MAX_CONCURRENT_RUNS` (default 64)
    /// - `WAYPOINT_MAX_JOURNAL_ENTRIES` (default 10000)
    /// - `WAYPOINT_RETENTION_SECS` (default 3600)
    /// - `WAYPOINT_SWEEP_INTERVAL_SECS` (default 60, minimum 1)
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_concurrent_runs: env_parse("WAYPOINT_MAX_CONCURRENT_RUNS")
                .unwrap_or(defaults.max_concurrent_runs),
            max_journal_entries: env_parse("WAYPOINT_MAX_JOURNAL_ENTRIES")
                .unwrap_or(defaults.max_journal_entries),
            retention: env_parse("WAYPOINT_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
            sweep_interval: env_parse("WAYPOINT_SWEEP_INTERVAL_SECS")
                .map(|secs| Duration::from_secs(secs).max(MIN_SWEEP_INTERVAL))
                .unwrap_or(defaults.sweep_interval),
            retry_policy: defaults.retry_policy,
        }
    }

    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max.max(1);
        self
    }

    pub fn with_max_journal_entries(mut self, max: usize) -> Self {
        self.max_journal_entries = max;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
