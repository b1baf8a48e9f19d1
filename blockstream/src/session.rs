//! Transfer session: construction, execution and control.
//!
//! A [`DownloadSession`] is built once, handed out a [`TransferHandle`]
//! for control, and then consumed by [`run`](DownloadSession::run).
//! The run loop drives scheduler runs until the transfer reaches a
//! terminal state:
//!
//! ```text
//!   build ─▶ run ─▶ scheduler run ──ok──▶ close sink ─▶ Done
//!                      │  ▲
//!              pause   │  │ resume (fresh abort token,
//!                      ▼  │         queue rebuilt at cursor)
//!                    Paused ──cancel──▶ Cancelled
//! ```
//!
//! The sink is finished exactly once on every path: closed after a
//! complete flush, aborted on cancellation or failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{info, info_span, warn, Instrument};

use crate::block::{BlockDescriptor, BlockSource};
use crate::buffer::ReassemblyBuffer;
use crate::config::DownloadConfig;
use crate::cursor::FlushCursor;
use crate::error::{DownloadError, DownloadResult};
use crate::fetcher::{self, FetchContext};
use crate::hooks::{ProgressCallback, StreamTransformer};
use crate::scheduler::run_queue;
use crate::sink::BlockSink;
use crate::state::{ControlState, TransferState};
use crate::transport::BlockTransport;

static NEXT_TRANSFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for one transfer session. Appears in the
/// session's tracing span so concurrent transfers can be told apart in
/// logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(u64);

impl TransferId {
    fn next() -> Self {
        Self(NEXT_TRANSFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transfer-{}", self.0)
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    /// The session's identifier.
    pub transfer_id: TransferId,
    /// Total bytes written to the sink.
    pub bytes_flushed: u64,
    /// Number of blocks delivered.
    pub blocks_flushed: usize,
}

/// Errors detected while building a session, before anything runs.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No block source was provided.
    #[error("a block source is required")]
    MissingSource,

    /// No output sink was provided.
    #[error("an output sink is required")]
    MissingSink,

    /// A block source needs a transport to fetch from.
    #[error("a transport is required to fetch blocks")]
    MissingTransport,

    /// Block indices start at 1.
    #[error("block index 0 is not allowed, indices start at 1")]
    ZeroIndex,

    /// Two blocks share the same index.
    #[error("duplicate block index {0}")]
    DuplicateIndex(u64),
}

enum Plan {
    Blocks {
        blocks: Vec<BlockDescriptor>,
        transport: Arc<dyn BlockTransport>,
    },
    Preloaded(Vec<Bytes>),
}

/// Builder for [`DownloadSession`].
#[derive(Default)]
pub struct DownloadSessionBuilder {
    source: Option<BlockSource>,
    transport: Option<Arc<dyn BlockTransport>>,
    sink: Option<Box<dyn BlockSink>>,
    config: DownloadConfig,
    transform: Option<StreamTransformer>,
    progress: Option<ProgressCallback>,
}

impl DownloadSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The content to transfer.
    pub fn source(mut self, source: BlockSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Transport used to fetch blocks. Required for a
    /// [`BlockSource::Blocks`] source, ignored for preloaded buffers.
    pub fn transport(mut self, transport: Arc<dyn BlockTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Destination for the reassembled content.
    pub fn sink(mut self, sink: impl BlockSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Tuning knobs; defaults apply when not set.
    pub fn config(mut self, config: DownloadConfig) -> Self {
        self.config = config;
        self
    }

    /// Per-block stream transform (decryption, decompression).
    pub fn transform(mut self, transform: StreamTransformer) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Progress callback receiving byte deltas.
    pub fn progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Validates the inputs and produces a runnable session.
    pub fn build(self) -> Result<DownloadSession, BuildError> {
        let source = self.source.ok_or(BuildError::MissingSource)?;
        let sink = self.sink.ok_or(BuildError::MissingSink)?;

        let plan = match source {
            BlockSource::Preloaded(buffers) => Plan::Preloaded(buffers),
            BlockSource::Blocks(mut blocks) => {
                let transport = self.transport.ok_or(BuildError::MissingTransport)?;
                blocks.sort_by_key(|block| block.index);
                for pair in blocks.windows(2) {
                    if pair[0].index == pair[1].index {
                        return Err(BuildError::DuplicateIndex(pair[0].index));
                    }
                }
                if blocks.first().is_some_and(|block| block.index == 0) {
                    return Err(BuildError::ZeroIndex);
                }
                Plan::Blocks { blocks, transport }
            }
        };

        let (control, _state_rx) = ControlState::new();
        Ok(DownloadSession {
            id: TransferId::next(),
            plan,
            sink,
            config: self.config,
            transform: self.transform,
            progress: self.progress,
            control,
        })
    }
}

/// One block transfer from source to sink.
pub struct DownloadSession {
    id: TransferId,
    plan: Plan,
    sink: Box<dyn BlockSink>,
    config: DownloadConfig,
    transform: Option<StreamTransformer>,
    progress: Option<ProgressCallback>,
    control: Arc<ControlState>,
}

impl DownloadSession {
    pub fn builder() -> DownloadSessionBuilder {
        DownloadSessionBuilder::new()
    }

    /// The session's identifier.
    pub fn id(&self) -> TransferId {
        self.id
    }

    /// A cloneable control handle, valid before and during `run`.
    pub fn handle(&self) -> TransferHandle {
        TransferHandle {
            control: self.control.clone(),
        }
    }

    /// Runs the transfer to a terminal state.
    ///
    /// Returns the summary on completion, `Err(Cancelled)` after a
    /// cancellation, and the first failure otherwise. A paused session
    /// stays inside this call until it is resumed or cancelled.
    pub async fn run(self) -> DownloadResult<DownloadSummary> {
        let span = info_span!("transfer", id = %self.id);
        let Self {
            id,
            plan,
            sink,
            config,
            transform,
            progress,
            control,
        } = self;

        async move {
            match plan {
                Plan::Blocks { blocks, transport } => {
                    run_blocks(
                        id, blocks, transport, sink, config, transform, progress, control,
                    )
                    .await
                }
                Plan::Preloaded(buffers) => run_preloaded(id, buffers, sink, control).await,
            }
        }
        .instrument(span)
        .await
    }
}

/// Control surface for a running (or not yet started) session.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    control: Arc<ControlState>,
}

impl TransferHandle {
    /// Suspends the transfer and waits for the pause to take effect.
    ///
    /// Returns once the session reports `Paused` (all fetches stopped
    /// and partial blocks reverted) or a terminal state that won the
    /// race. Pausing a session that has not started yet returns
    /// immediately; the pause applies as soon as `run` begins.
    pub async fn pause(&self) {
        self.control.request_pause();
        let mut rx = self.control.subscribe();
        let _ = rx.wait_for(|state| *state != TransferState::Running).await;
    }

    /// Resumes a paused transfer from the flush cursor position.
    pub fn resume(&self) {
        self.control.request_resume();
    }

    /// Cancels the transfer and discards the sink's output. Wins over a
    /// concurrent pause.
    pub fn cancel(&self) {
        self.control.request_cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransferState {
        self.control.state()
    }

    /// Watch channel following state changes.
    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.control.subscribe()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_blocks(
    id: TransferId,
    blocks: Vec<BlockDescriptor>,
    transport: Arc<dyn BlockTransport>,
    sink: Box<dyn BlockSink>,
    config: DownloadConfig,
    transform: Option<StreamTransformer>,
    progress: Option<ProgressCallback>,
    control: Arc<ControlState>,
) -> DownloadResult<DownloadSummary> {
    let indices: Vec<u64> = blocks.iter().map(|block| block.index).collect();
    let total_blocks = blocks.len();
    let buffer = Arc::new(ReassemblyBuffer::new());
    let cursor = Arc::new(Mutex::new(FlushCursor::new(indices, sink)));
    let slots = Arc::new(Semaphore::new(config.buffer_cap()));

    control.set_state(TransferState::Running);
    info!(blocks = total_blocks, "transfer started");

    loop {
        let position = cursor.lock().await.position();
        let ctx = Arc::new(FetchContext {
            transport: transport.clone(),
            buffer: buffer.clone(),
            cursor: cursor.clone(),
            slots: slots.clone(),
            abort: control.current_abort(),
            timeout: config.block_timeout(),
            transform: transform.clone(),
            progress: progress.clone(),
        });
        let tasks: Vec<_> = blocks[position..]
            .iter()
            .cloned()
            .map(|block| fetcher::run(ctx.clone(), block))
            .collect();

        match run_queue(tasks, config.concurrency()).await {
            Ok(()) => {
                // A cancel can land after the last task drained its
                // backlog but before we get here; Done must not win.
                if control.is_cancelled() {
                    return finish_cancelled(&buffer, &cursor, &control).await;
                }
                let mut cursor = cursor.lock().await;
                if let Err(error) = cursor.close_sink().await {
                    control.set_state(TransferState::Errored);
                    return Err(error);
                }
                let summary = DownloadSummary {
                    transfer_id: id,
                    bytes_flushed: cursor.bytes_flushed(),
                    blocks_flushed: total_blocks,
                };
                control.set_state(TransferState::Done);
                info!(
                    bytes = summary.bytes_flushed,
                    blocks = summary.blocks_flushed,
                    "transfer complete"
                );
                return Ok(summary);
            }

            // Cancel wins over pause when both were requested.
            Err(error) if error.is_cancelled() && control.is_cancelled() => {
                return finish_cancelled(&buffer, &cursor, &control).await;
            }

            Err(error) if error.is_cancelled() && control.is_paused() => {
                // All tasks have settled, so the buffer is quiescent:
                // whatever is incomplete now stays incomplete until
                // the resumed run re-fetches it.
                let reverted = buffer.revert_incomplete();
                if reverted > 0 {
                    if let Some(callback) = &progress {
                        callback(-(reverted as i64));
                    }
                }
                info!(reverted_bytes = reverted, "transfer paused");
                control.set_state(TransferState::Paused);

                control.wait_for_resume().await;
                if control.is_cancelled() {
                    return finish_cancelled(&buffer, &cursor, &control).await;
                }
                control.next_abort();
                control.set_state(TransferState::Running);
                info!("transfer resumed");
            }

            Err(error) => {
                buffer.close();
                let mut cursor = cursor.lock().await;
                if let Err(sink_error) = cursor.abort_sink().await {
                    warn!(%sink_error, "failed to discard sink output");
                }
                control.set_state(TransferState::Errored);
                return Err(error);
            }
        }
    }
}

async fn finish_cancelled(
    buffer: &ReassemblyBuffer,
    cursor: &Mutex<FlushCursor>,
    control: &ControlState,
) -> DownloadResult<DownloadSummary> {
    buffer.close();
    let mut cursor = cursor.lock().await;
    if let Err(sink_error) = cursor.abort_sink().await {
        warn!(%sink_error, "failed to discard sink output");
    }
    control.set_state(TransferState::Cancelled);
    info!("transfer cancelled");
    Err(DownloadError::Cancelled)
}

/// Preloaded buffers skip the scheduler, transport and hooks entirely;
/// they are written straight through in the given order.
async fn run_preloaded(
    id: TransferId,
    buffers: Vec<Bytes>,
    mut sink: Box<dyn BlockSink>,
    control: Arc<ControlState>,
) -> DownloadResult<DownloadSummary> {
    control.set_state(TransferState::Running);

    let blocks_flushed = buffers.len();
    let mut bytes_flushed = 0u64;
    for chunk in buffers {
        if control.is_cancelled() {
            if let Err(sink_error) = sink.abort().await {
                warn!(%sink_error, "failed to discard sink output");
            }
            control.set_state(TransferState::Cancelled);
            return Err(DownloadError::Cancelled);
        }
        bytes_flushed += chunk.len() as u64;
        if let Err(error) = sink.write(chunk).await {
            if let Err(sink_error) = sink.abort().await {
                warn!(%sink_error, "failed to discard sink output");
            }
            control.set_state(TransferState::Errored);
            return Err(error);
        }
    }

    if let Err(error) = sink.close().await {
        control.set_state(TransferState::Errored);
        return Err(error);
    }
    control.set_state(TransferState::Done);
    Ok(DownloadSummary {
        transfer_id: id,
        bytes_flushed,
        blocks_flushed,
    })
}
