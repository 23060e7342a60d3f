//! Append-only output channel

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;

use super::ChunkReader;
use crate::run::RunId;

/// Errors from channel operations
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    /// Append attempted after the channel was closed
    #[error("channel '{channel}' of run {run_id} is closed")]
    Closed { run_id: RunId, channel: String },

    /// The backing store could not provide the channel
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// One entry of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the channel, starting at 0 with no gaps
    pub index: u64,

    pub payload: Bytes,

    pub written_at: DateTime<Utc>,
}

impl Chunk {
    /// Payload as UTF-8 text, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Visible progress of a channel, broadcast to readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ChannelProgress {
    pub len: u64,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct ChannelLog {
    chunks: Vec<Chunk>,
    closed: bool,
}

/// Named, append-only chunk log of a run
///
/// The run's own execution is the only writer. Any number of readers can
/// replay the log from any recorded offset and then follow new appends;
/// reading never removes chunks.
#[derive(Debug)]
pub struct OutputChannel {
    run_id: RunId,
    name: String,
    log: RwLock<ChannelLog>,
    progress: watch::Sender<ChannelProgress>,
}

impl OutputChannel {
    pub fn new(run_id: RunId, name: impl Into<String>) -> Self {
        let (progress, _) = watch::channel(ChannelProgress::default());
        Self {
            run_id,
            name: name.into(),
            log: RwLock::new(ChannelLog::default()),
            progress,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a chunk and return the index assigned to it
    ///
    /// Index assignment and insertion happen under one write lock.
    pub fn append(&self, payload: impl Into<Bytes>) -> Result<u64, ChannelError> {
        let progress = {
            let mut log = self.log.write();
            if log.closed {
                return Err(ChannelError::Closed {
                    run_id: self.run_id,
                    channel: self.name.clone(),
                });
            }

            let index = log.chunks.len() as u64;
            log.chunks.push(Chunk {
                index,
                payload: payload.into(),
                written_at: Utc::now(),
            });

            ChannelProgress {
                len: index + 1,
                closed: false,
            }
        };

        self.progress.send_modify(|p| *p = progress);
        Ok(progress.len - 1)
    }

    /// Mark the channel complete; idempotent
    pub fn close(&self) {
        let progress = {
            let mut log = self.log.write();
            if log.closed {
                return;
            }
            log.closed = true;
            ChannelProgress {
                len: log.chunks.len() as u64,
                closed: true,
            }
        };

        self.progress.send_modify(|p| *p = progress);
    }

    pub fn is_closed(&self) -> bool {
        self.log.read().closed
    }

    /// Number of chunks written so far
    pub fn len(&self) -> u64 {
        self.log.read().chunks.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chunk at `index`, if it has been written
    pub fn get(&self, index: u64) -> Option<Chunk> {
        let log = self.log.read();
        usize::try_from(index)
            .ok()
            .and_then(|i| log.chunks.get(i))
            .cloned()
    }

    /// All buffered chunks starting at `from_index`
    pub fn snapshot(&self, from_index: u64) -> Vec<Chunk> {
        let log = self.log.read();
        let start = usize::try_from(from_index).unwrap_or(usize::MAX);
        log.chunks.iter().skip(start).cloned().collect()
    }

    /// Open an independent reader starting at `from_index`
    pub fn reader(self: &Arc<Self>, from_index: u64) -> ChunkReader {
        ChunkReader::new(Arc::clone(self), from_index)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ChannelProgress> {
        self.progress.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> OutputChannel {
        OutputChannel::new(RunId::new(), "default")
    }

    #[test]
    fn test_indices_are_sequential() {
        let channel = channel();

        assert_eq!(channel.append("a").unwrap(), 0);
        assert_eq!(channel.append("b").unwrap(), 1);
        assert_eq!(channel.append("c").unwrap(), 2);
        assert_eq!(channel.len(), 3);

        let indices: Vec<u64> = channel.snapshot(0).iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_append_after_close_fails() {
        let channel = channel();
        channel.append("a").unwrap();
        channel.close();

        let result = channel.append("b");
        assert!(matches!(result, Err(ChannelError::Closed { .. })));
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let channel = channel();
        channel.close();
        channel.close();
        assert!(channel.is_closed());
    }

    #[test]
    fn test_snapshot_from_offset() {
        let channel = channel();
        for p in ["a", "b", "c"] {
            channel.append(p).unwrap();
        }

        let tail = channel.snapshot(2);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].as_str(), Some("c"));
        assert!(channel.snapshot(10).is_empty());
    }

    #[test]
    fn test_get_missing_index() {
        let channel = channel();
        channel.append("a").unwrap();

        assert!(channel.get(0).is_some());
        assert!(channel.get(1).is_none());
        assert!(channel.get(u64::MAX).is_none());
    }
}
