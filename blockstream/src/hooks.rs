//! Host-supplied hooks applied to each block's byte stream.
//!
//! Progress is observed on raw wire bytes, before any transform runs,
//! so reported byte counts match what the transport delivered. The
//! transform hook sees the stream after progress observation and is
//! the place for per-block decryption or decompression; its output is
//! what lands in the reassembly buffer.

use std::sync::Arc;

use futures_util::StreamExt;

use crate::transport::ByteStream;

/// Callback invoked with byte deltas as a transfer progresses.
///
/// Deltas are usually positive (bytes received); a pause reverts
/// partially received blocks and reports the reversal as one negative
/// delta, so the running sum never counts bytes that will be fetched
/// again.
pub type ProgressCallback = Arc<dyn Fn(i64) + Send + Sync>;

/// Per-block stream transform, keyed by block index.
///
/// Takes the block's raw byte stream and returns the transformed
/// stream; failures surface as erroring items in the returned stream.
pub type StreamTransformer = Arc<dyn Fn(u64, ByteStream) -> ByteStream + Send + Sync>;

/// Wraps `stream` so every successful chunk reports its length to
/// `callback` before being passed through unchanged.
pub(crate) fn observe_progress(stream: ByteStream, callback: ProgressCallback) -> ByteStream {
    Box::pin(stream.inspect(move |item| {
        if let Ok(chunk) = item {
            callback(chunk.len() as i64);
        }
    }))
}
