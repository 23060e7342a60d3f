//! Workflow abstractions
//!
//! This module contains:
//! - [`Workflow`] trait for defining workflow bodies
//! - [`WorkflowContext`] through which bodies call steps and sleep
//! - [`WorkflowRegistry`] for type-erased lookup by name

mod context;
mod definition;
mod registry;

pub use context::WorkflowContext;
pub use definition::{Workflow, WorkflowError};
pub use registry::{AnyWorkflow, RegistryError, WorkflowRegistry};

pub(crate) use context::Interrupt;
