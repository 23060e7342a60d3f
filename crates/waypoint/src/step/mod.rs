//! Step abstractions
//!
//! Steps are the units of work a workflow calls. They:
//! - Run to completion (or error) atomically from the engine's point of view
//! - Are retried according to the retry policy unless they fail fatally
//! - May write to the run's output channels

mod attempt;
mod context;
mod definition;
mod invoker;
mod options;

pub use attempt::{AttemptOutcome, StepAttempt};
pub use context::StepContext;
pub use definition::{Step, StepError};
pub use invoker::{StepInvoker, StepOutcome};
pub use options::StepOptions;

pub(crate) use invoker::panic_message;
