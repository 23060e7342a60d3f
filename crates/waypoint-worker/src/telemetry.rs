// Logging setup for the worker process

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "waypoint=debug,waypoint_worker=debug";

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log filter (e.g., "info", "waypoint=debug")
    pub log_filter: Option<String>,

    /// Whether to include targets in log lines
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: None,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// `RUST_LOG` wins over `LOG_LEVEL`
    pub fn from_env() -> Self {
        Self {
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            with_target: true,
        }
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global tracing subscriber
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_filter(config.filter());

    tracing_subscriber::registry().with(console_layer).try_init()?;
    Ok(())
}
