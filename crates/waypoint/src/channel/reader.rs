//! Replaying channel reader

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::watch;

use super::output::{ChannelProgress, Chunk, OutputChannel};

/// Lazy reader over an [`OutputChannel`]
///
/// Yields every buffered chunk with `index >= from_index` in order, then
/// waits for new appends, and ends once the channel is closed and fully
/// delivered. Readers are independent: each keeps its own position and
/// neither blocks the writer nor other readers.
///
/// A disconnected client resumes by opening a new reader at
/// `last_seen_index + 1`.
#[derive(Debug)]
pub struct ChunkReader {
    channel: Arc<OutputChannel>,
    next_index: u64,
    progress: watch::Receiver<ChannelProgress>,
}

impl ChunkReader {
    pub(crate) fn new(channel: Arc<OutputChannel>, from_index: u64) -> Self {
        let progress = channel.subscribe();
        Self {
            channel,
            next_index: from_index,
            progress,
        }
    }

    /// Index of the next chunk this reader will yield
    pub fn position(&self) -> u64 {
        self.next_index
    }

    /// Next chunk, or `None` once the channel is closed and drained
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        loop {
            // Mark the current progress as seen before inspecting the log so
            // an append racing with this check still wakes `changed()`.
            self.progress.borrow_and_update();

            if let Some(chunk) = self.channel.get(self.next_index) {
                self.next_index += 1;
                return Some(chunk);
            }

            if self.channel.is_closed() {
                return None;
            }

            if self.progress.changed().await.is_err() {
                // Sender lives inside the channel; only reachable on teardown
                return None;
            }
        }
    }

    /// Convert into a `Stream` of chunks
    pub fn into_stream(self) -> impl Stream<Item = Chunk> + Send + 'static {
        futures::stream::unfold(self, |mut reader| async move {
            reader.next_chunk().await.map(|chunk| (chunk, reader))
        })
    }

    /// Convert into a byte stream suitable for a streaming HTTP body
    pub fn into_body(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        use futures::StreamExt;
        self.into_stream().map(|chunk| Ok(chunk.payload))
    }
}
