//! BlockStream - chunked parallel downloads with ordered delivery
//!
//! This library fetches a file's blocks concurrently, reassembles them
//! in index order under a bounded memory cap, and streams the result
//! into a caller-provided sink. Transfers can be paused, resumed and
//! cancelled at any point.
//!
//! # Architecture
//!
//! ```text
//!   BlockSource ──▶ ConcurrencyScheduler ──▶ fetch tasks (N at a time)
//!                                               │ transport + hooks
//!                                               ▼
//!                                        ReassemblyBuffer (capped)
//!                                               │ index order
//!                                               ▼
//!                                          FlushCursor ──▶ BlockSink
//! ```
//!
//! The [`session::DownloadSession`] ties these together and owns the
//! lifecycle state machine; a [`session::TransferHandle`] controls it
//! from outside.

pub mod abort;
pub mod block;
pub mod buffer;
pub mod config;
pub mod cursor;
pub mod error;
pub mod hooks;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod state;
pub mod transport;

mod fetcher;

pub use block::{BlockDescriptor, BlockSource};
pub use config::DownloadConfig;
pub use error::{DownloadError, DownloadResult};
pub use hooks::{ProgressCallback, StreamTransformer};
pub use session::{
    BuildError, DownloadSession, DownloadSessionBuilder, DownloadSummary, TransferHandle,
    TransferId,
};
pub use sink::{BlockSink, FileSink};
pub use state::TransferState;
pub use transport::{BlockTransport, ByteStream, HttpTransport};
