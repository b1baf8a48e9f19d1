//! In-order flush cursor.
//!
//! The cursor owns the output sink and walks the transfer's block
//! indices in sorted order. After any block completes, the completing
//! fetch task drains the cursor: consecutive complete entries starting
//! at the cursor position are removed from the buffer and written out,
//! then the cursor stops at the first missing or partial entry. Because
//! the walk follows the sorted index list rather than arithmetic
//! successors, sparse index sets flush without stalling.

use tracing::trace;

use crate::abort::AbortToken;
use crate::buffer::ReassemblyBuffer;
use crate::error::{DownloadError, DownloadResult};
use crate::sink::BlockSink;

/// Tracks the next block index due for delivery and performs the
/// ordered writes into the sink.
pub struct FlushCursor {
    indices: Vec<u64>,
    position: usize,
    sink: Box<dyn BlockSink>,
    bytes_flushed: u64,
}

impl FlushCursor {
    /// Creates a cursor over `indices`, which must be sorted ascending.
    pub fn new(indices: Vec<u64>, sink: Box<dyn BlockSink>) -> Self {
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        Self {
            indices,
            position: 0,
            sink,
            bytes_flushed: 0,
        }
    }

    /// Position in the index list of the next block due for delivery.
    /// Every block before this position has been flushed.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether every block has been flushed.
    pub fn is_complete(&self) -> bool {
        self.position == self.indices.len()
    }

    /// Total bytes written to the sink so far.
    pub fn bytes_flushed(&self) -> u64 {
        self.bytes_flushed
    }

    /// Flushes consecutive complete entries starting at the cursor
    /// position.
    ///
    /// Checks `abort` before taking each entry and fails with
    /// `Cancelled` once it is signalled, so a drain of a deep backlog
    /// cannot keep writing past a cancel or pause. The check sits at
    /// entry granularity: a block's writes are never split, which keeps
    /// the cursor on a whole-block boundary for resume.
    ///
    /// Sink failures leave the cursor where the failed block was; the
    /// entry's chunks are lost, but by then the transfer is aborting
    /// anyway.
    pub async fn drain(
        &mut self,
        buffer: &ReassemblyBuffer,
        abort: &AbortToken,
    ) -> DownloadResult<()> {
        while self.position < self.indices.len() {
            if abort.is_aborted() {
                return Err(DownloadError::Cancelled);
            }
            let index = self.indices[self.position];
            let Some(entry) = buffer.take_if_done(index) else {
                break;
            };
            trace!(index, bytes = entry.byte_len(), "flushing block");
            self.bytes_flushed += entry.byte_len();
            for chunk in entry.chunks {
                self.sink.write(chunk).await?;
            }
            self.position += 1;
        }
        Ok(())
    }

    /// Finalizes the sink after a fully flushed transfer.
    pub async fn close_sink(&mut self) -> DownloadResult<()> {
        self.sink.close().await
    }

    /// Discards the sink's output after a cancelled or failed transfer.
    pub async fn abort_sink(&mut self) -> DownloadResult<()> {
        self.sink.abort().await
    }
}

impl std::fmt::Debug for FlushCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushCursor")
            .field("position", &self.position)
            .field("indices", &self.indices.len())
            .field("bytes_flushed", &self.bytes_flushed)
            .finish()
    }
}
