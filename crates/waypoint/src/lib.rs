//! # Waypoint
//!
//! A durable step-based workflow engine for multi-step asynchronous jobs.
//!
//! ## Features
//!
//! - **Steps as checkpoints**: each completed step is journaled, so a run
//!   resumes after its last completed step instead of starting over
//! - **Automatic retries**: capped exponential backoff with jitter; fatal
//!   step errors abort the run immediately
//! - **Parked runs**: `sleep` and retry backoff hold no task while waiting
//! - **Output channels**: steps stream chunks that readers replay from any
//!   offset and then follow live
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                          │
//! │  (admits runs, drives bodies by replaying the step journal)  │
//! └─────────────────────────────────────────────────────────────┘
//!              │                                  ▲
//!              ▼                                  │ ready queue
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │        RunStore          │      │        Scheduler         │
//! │ (runs, history, chunks)  │      │ (sleep + retry timers)   │
//! └──────────────────────────┘      └──────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use waypoint::prelude::*;
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Workflow for Greet {
//!     const NAME: &'static str = "greet";
//!     type Input = String;
//!     type Output = String;
//!
//!     async fn run(
//!         &self,
//!         ctx: &mut WorkflowContext,
//!         name: String,
//!     ) -> Result<String, WorkflowError> {
//!         let greeting = ctx
//!             .call("compose", name, |_step, name: String| async move {
//!                 Ok(format!("hello, {name}"))
//!             })
//!             .await?;
//!         ctx.sleep(Duration::from_secs(1)).await?;
//!         Ok(greeting)
//!     }
//! }
//!
//! let engine = WorkflowEngine::builder().register(Greet)?.build();
//! let run_id = engine.start::<Greet>("ada".into()).await?;
//! let state = engine.get_run(run_id).await?.wait().await?;
//! ```

pub mod channel;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod run;
pub mod scheduler;
pub mod step;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use std::time::Duration;

    pub use async_trait::async_trait;

    pub use crate::channel::{Chunk, ChunkReader};
    pub use crate::engine::{EngineConfig, EngineError, RunHandle, WorkflowEngine};
    pub use crate::persistence::{InMemoryRunStore, RunStore};
    pub use crate::reliability::RetryPolicy;
    pub use crate::run::{RunError, RunErrorKind, RunId, RunStatus};
    pub use crate::step::{Step, StepContext, StepError, StepOptions};
    pub use crate::workflow::{Workflow, WorkflowContext, WorkflowError};
}

// Re-export key types at crate root
pub use channel::{ChannelError, Chunk, ChunkReader, OutputChannel, DEFAULT_CHANNEL};
pub use engine::{EngineConfig, EngineError, RunHandle, WorkflowEngine, WorkflowEngineBuilder};
pub use persistence::{InMemoryRunStore, RunFilter, RunStore, StoreError};
pub use reliability::{RetryDecision, RetryPolicy};
pub use run::{
    JournalEntry, RecordedEvent, RunError, RunErrorKind, RunEvent, RunId, RunState, RunStatus,
};
pub use scheduler::{Clock, Scheduler, SystemClock};
pub use step::{Step, StepContext, StepError, StepOptions};
pub use workflow::{Workflow, WorkflowContext, WorkflowError, WorkflowRegistry};
