//! Run records: identity, status machine, resumption cursor and history

mod error;
mod event;
mod state;
mod status;

pub use error::{RunError, RunErrorKind};
pub use event::{RecordedEvent, RunEvent};
pub use state::{InvalidTransition, JournalEntry, ResumeCursor, RunState};
pub use status::{RunId, RunStatus};
