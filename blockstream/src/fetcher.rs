//! Per-block fetch task.
//!
//! Each task admits itself against the buffer-slot semaphore, streams
//! its block through the progress and transform hooks into the
//! reassembly buffer, marks the entry done, and then drains the flush
//! cursor. A task that fails with anything other than cancellation
//! signals the shared abort token so sibling fetches stop streaming
//! instead of running to completion.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::abort::AbortToken;
use crate::block::BlockDescriptor;
use crate::buffer::ReassemblyBuffer;
use crate::cursor::FlushCursor;
use crate::error::{DownloadError, DownloadResult};
use crate::hooks::{observe_progress, ProgressCallback, StreamTransformer};
use crate::transport::BlockTransport;

/// Shared state handed to every fetch task of one scheduler run.
pub(crate) struct FetchContext {
    pub transport: Arc<dyn BlockTransport>,
    pub buffer: Arc<ReassemblyBuffer>,
    pub cursor: Arc<Mutex<FlushCursor>>,
    pub slots: Arc<Semaphore>,
    pub abort: Arc<AbortToken>,
    pub timeout: Duration,
    pub transform: Option<StreamTransformer>,
    pub progress: Option<ProgressCallback>,
}

/// Runs the fetch for one block, signalling the abort token on real
/// failures so the rest of the run winds down.
pub(crate) async fn run(ctx: Arc<FetchContext>, block: BlockDescriptor) -> DownloadResult<()> {
    match fetch_one(&ctx, &block).await {
        Ok(()) => Ok(()),
        Err(error) => {
            if !error.is_cancelled() {
                warn!(index = block.index, %error, "block fetch failed, aborting run");
                ctx.abort.abort();
            }
            Err(error)
        }
    }
}

async fn fetch_one(ctx: &FetchContext, block: &BlockDescriptor) -> DownloadResult<()> {
    // A block left complete in the buffer by an earlier run (paused
    // after it finished but before it could flush) is not re-fetched;
    // draining the cursor is all that remains.
    if ctx.buffer.is_done(block.index) {
        debug!(index = block.index, "block already buffered, skipping fetch");
        let mut cursor = ctx.cursor.lock().await;
        return cursor.drain(&ctx.buffer, &ctx.abort).await;
    }

    // Admission: one buffer slot per in-flight or buffered block. The
    // permit travels into the entry on completion and is released when
    // the entry leaves the buffer.
    let permit = tokio::select! {
        biased;

        _ = ctx.abort.aborted() => return Err(DownloadError::Cancelled),

        permit = ctx.slots.clone().acquire_owned() => {
            permit.map_err(|_| DownloadError::Cancelled)?
        }
    };

    let stream = ctx
        .transport
        .fetch_block(&block.locator, ctx.timeout, &ctx.abort)
        .await?;

    let stream = match &ctx.progress {
        Some(callback) => observe_progress(stream, callback.clone()),
        None => stream,
    };
    let mut stream = match &ctx.transform {
        Some(transform) => transform(block.index, stream),
        None => stream,
    };

    loop {
        let item = tokio::select! {
            biased;

            _ = ctx.abort.aborted() => return Err(DownloadError::Cancelled),

            item = stream.next() => item,
        };
        match item {
            Some(Ok(chunk)) => {
                ctx.buffer
                    .put(block.index, chunk)
                    .map_err(|_| DownloadError::Cancelled)?;
            }
            Some(Err(error)) => return Err(error),
            None => break,
        }
    }

    ctx.buffer.mark_done(block.index, permit);
    debug!(index = block.index, "block complete");

    let mut cursor = ctx.cursor.lock().await;
    cursor.drain(&ctx.buffer, &ctx.abort).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use bytes::Bytes;

    use crate::sink::tests::MemorySink;
    use crate::transport::tests::MockTransport;
    use crate::transport::ByteStream;

    fn context(
        transport: Arc<MockTransport>,
        indices: Vec<u64>,
        slots: usize,
    ) -> (Arc<FetchContext>, crate::sink::tests::MemorySinkHandle) {
        let (sink, handle) = MemorySink::new();
        let ctx = Arc::new(FetchContext {
            transport,
            buffer: Arc::new(ReassemblyBuffer::new()),
            cursor: Arc::new(Mutex::new(FlushCursor::new(indices, Box::new(sink)))),
            slots: Arc::new(Semaphore::new(slots)),
            abort: Arc::new(AbortToken::new(0)),
            timeout: Duration::from_secs(5),
            transform: None,
            progress: None,
        });
        (ctx, handle)
    }

    #[tokio::test]
    async fn test_fetch_streams_block_and_flushes() {
        let transport = Arc::new(MockTransport::new());
        transport.add("b1", b"payload");
        let (ctx, handle) = context(transport, vec![1], 2);

        run(ctx.clone(), BlockDescriptor::new(1, "b1")).await.unwrap();

        assert_eq!(handle.contents(), b"payload");
        assert!(ctx.buffer.is_empty());
        assert!(ctx.cursor.lock().await.is_complete());
    }

    #[tokio::test]
    async fn test_already_buffered_block_is_not_refetched() {
        let transport = Arc::new(MockTransport::new());
        let (ctx, handle) = context(transport.clone(), vec![1], 2);

        ctx.buffer.put(1, Bytes::from_static(b"kept")).unwrap();
        let permit = ctx.slots.clone().try_acquire_owned().unwrap();
        ctx.buffer.mark_done(1, permit);

        run(ctx, BlockDescriptor::new(1, "b1")).await.unwrap();

        assert_eq!(transport.fetch_count(), 0);
        assert_eq!(handle.contents(), b"kept");
    }

    #[tokio::test]
    async fn test_aborted_fetch_returns_cancelled() {
        let transport = Arc::new(MockTransport::new());
        transport.add_delayed("b1", b"never", Duration::from_secs(10));
        let (ctx, _handle) = context(transport, vec![1], 1);

        ctx.abort.abort();

        let result = run(ctx.clone(), BlockDescriptor::new(1, "b1")).await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(ctx.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_network_failure_signals_abort_token() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_with(
            "b1",
            DownloadError::Network {
                locator: "b1".to_string(),
                reason: "HTTP 503".to_string(),
            },
        );
        let (ctx, _handle) = context(transport, vec![1], 1);

        let result = run(ctx.clone(), BlockDescriptor::new(1, "b1")).await;
        assert!(matches!(result, Err(DownloadError::Network { .. })));
        assert!(ctx.abort.is_aborted());
    }

    #[tokio::test]
    async fn test_progress_observed_before_transform() {
        let transport = Arc::new(MockTransport::new());
        transport.add("b1", b"raw-bytes");
        let (ctx, handle) = context(transport, vec![1], 1);

        let reported = Arc::new(AtomicI64::new(0));
        let mut ctx = Arc::try_unwrap(ctx).ok().expect("sole owner");
        ctx.progress = {
            let reported = reported.clone();
            Some(Arc::new(move |delta| {
                reported.fetch_add(delta, Ordering::SeqCst);
            }))
        };
        // Transform shrinks every chunk to one byte; progress must
        // still count the wire bytes.
        ctx.transform = Some(Arc::new(|_, stream: ByteStream| -> ByteStream {
            Box::pin(stream.map(|item| item.map(|chunk| chunk.slice(0..1))))
        }));

        run(Arc::new(ctx), BlockDescriptor::new(1, "b1")).await.unwrap();

        assert_eq!(reported.load(Ordering::SeqCst), 9);
        assert_eq!(handle.contents(), b"r");
    }
}
