//! Workflow engine
//!
//! This module contains:
//! - [`WorkflowEngine`] admitting, driving and cancelling runs
//! - [`RunHandle`] for observing one run
//! - [`EngineConfig`] for concurrency, retention and retry defaults

mod config;
mod executor;
mod handle;

pub use config::EngineConfig;
pub use executor::{EngineError, WorkflowEngine, WorkflowEngineBuilder};
pub use handle::RunHandle;
