//! Persistence layer for durable execution
//!
//! This module provides:
//! - [`RunStore`] trait for run records, run history and output channels
//! - [`InMemoryRunStore`] for tests and single-process use

mod memory;
mod store;

pub use memory::InMemoryRunStore;
pub use store::{RunFilter, RunStore, StoreError};
