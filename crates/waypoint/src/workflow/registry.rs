//! Workflow registry for type-erased workflow execution
//!
//! The registry maps stable workflow names to registered workflows so runs
//! can be started and resumed from JSON input without knowing the concrete
//! type at runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Workflow, WorkflowContext, WorkflowError};
use crate::reliability::RetryPolicy;
use crate::run::RunError;

/// Type-erased workflow interface
///
/// All inputs and outputs cross this boundary as JSON.
#[async_trait]
pub trait AnyWorkflow: Send + Sync {
    /// Get the workflow name
    fn name(&self) -> &'static str;

    /// Workflow-level retry policy override
    fn retry_policy(&self) -> Option<RetryPolicy>;

    /// Check that `input` deserializes into the workflow's input type
    fn validate_input(&self, input: &Value) -> Result<(), serde_json::Error>;

    /// Run the body with JSON input, returning JSON output
    async fn run_json(&self, ctx: &mut WorkflowContext, input: Value)
        -> Result<Value, WorkflowError>;
}

/// Wrapper to implement AnyWorkflow for any Workflow
struct WorkflowWrapper<W: Workflow> {
    inner: W,
}

#[async_trait]
impl<W: Workflow> AnyWorkflow for WorkflowWrapper<W> {
    fn name(&self) -> &'static str {
        W::NAME
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.inner.retry_policy()
    }

    fn validate_input(&self, input: &Value) -> Result<(), serde_json::Error> {
        W::Input::deserialize(input).map(|_| ())
    }

    async fn run_json(
        &self,
        ctx: &mut WorkflowContext,
        input: Value,
    ) -> Result<Value, WorkflowError> {
        let typed: W::Input = serde_json::from_value(input).map_err(|e| {
            RunError::internal(format!("invalid input for workflow '{}': {e}", W::NAME))
        })?;

        let output = self.inner.run(ctx, typed).await?;

        serde_json::to_value(output).map_err(|e| {
            WorkflowError::Failed(RunError::internal(format!(
                "failed to serialize output of workflow '{}': {e}",
                W::NAME
            )))
        })
    }
}

/// Registry of workflows by name
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<dyn AnyWorkflow>>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
        }
    }

    /// Register a workflow under `W::NAME`
    ///
    /// Registering the same name twice is an error; a silently replaced
    /// workflow would resume in-flight runs against the wrong body.
    pub fn register<W: Workflow>(&mut self, workflow: W) -> Result<(), RegistryError> {
        if self.workflows.contains_key(W::NAME) {
            return Err(RegistryError::DuplicateWorkflow(W::NAME.to_string()));
        }
        self.workflows
            .insert(W::NAME.to_string(), Arc::new(WorkflowWrapper { inner: workflow }));
        Ok(())
    }

    /// Check if a workflow is registered
    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    /// Look up a workflow by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn AnyWorkflow>, RegistryError> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownWorkflow(name.to_string()))
    }

    /// Get the number of registered workflows
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Get all registered workflow names
    pub fn workflow_names(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.workflows.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Workflow not registered
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// Name already taken
    #[error("workflow already registered: {0}")]
    DuplicateWorkflow(String),

    /// Input does not match the workflow's input type
    #[error("invalid input for workflow '{workflow}': {source}")]
    InvalidInput {
        workflow: String,
        source: serde_json::Error,
    },
}
