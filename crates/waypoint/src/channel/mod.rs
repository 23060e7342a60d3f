//! Per-run output channels
//!
//! Steps append chunks to named channels of their run; callers open
//! readers at any offset to replay and then follow the output. This is what
//! lets a disconnected client resume exactly where it left off.

mod output;
mod reader;

pub use output::{ChannelError, Chunk, OutputChannel};
pub use reader::ChunkReader;

/// Channel used when no name is given
pub const DEFAULT_CHANNEL: &str = "default";
