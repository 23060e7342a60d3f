//! Worker configuration

use waypoint::EngineConfig;

/// Configuration for the worker process
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub engine: EngineConfig,

    /// Chance that a welcome email attempt fails, in `[0, 1]`
    pub welcome_failure_rate: f64,

    /// Email to run a demo signup for on startup
    pub signup_email: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            welcome_failure_rate: 0.3,
            signup_email: None,
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// Engine settings come from [`EngineConfig::from_env`], plus:
    /// - `WAYPOINT_WELCOME_FAILURE_RATE` (default 0.3)
    /// - `WAYPOINT_SIGNUP_EMAIL` (optional)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            engine: EngineConfig::from_env(),
            welcome_failure_rate: std::env::var("WAYPOINT_WELCOME_FAILURE_RATE")
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|rate| (0.0..=1.0).contains(rate))
                .unwrap_or(defaults.welcome_failure_rate),
            signup_email: std::env::var("WAYPOINT_SIGNUP_EMAIL")
                .ok()
                .filter(|email| !email.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        std::env::set_var("WAYPOINT_WELCOME_FAILURE_RATE", "0.75");
        std::env::set_var("WAYPOINT_SIGNUP_EMAIL", "ada@example.com");

        let config = WorkerConfig::from_env();
        assert_eq!(config.welcome_failure_rate, 0.75);
        assert_eq!(config.signup_email.as_deref(), Some("ada@example.com"));

        std::env::set_var("WAYPOINT_WELCOME_FAILURE_RATE", "2.5");
        std::env::set_var("WAYPOINT_SIGNUP_EMAIL", "  ");

        let config = WorkerConfig::from_env();
        assert_eq!(config.welcome_failure_rate, 0.3);
        assert!(config.signup_email.is_none());

        std::env::remove_var("WAYPOINT_WELCOME_FAILURE_RATE");
        std::env::remove_var("WAYPOINT_SIGNUP_EMAIL");
    }
}
