//! Clock and timer scheduling
//!
//! `sleep` and retry backoff never block a task: the run is parked in the
//! store and a timer puts it back on the ready queue when the deadline
//! passes.

mod clock;
mod timer;

pub use clock::{Clock, SystemClock};
pub use timer::{Scheduler, SchedulerError};
