//! Output sinks for reassembled content.
//!
//! The engine hands a sink ordered chunks and finishes it exactly once:
//! `close` after the last block has been written, or `abort` when the
//! transfer is cancelled or fails. Sinks never see both, and never see
//! a write after either.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{DownloadError, DownloadResult};

/// Destination for the in-order reassembled byte stream.
#[async_trait]
pub trait BlockSink: Send {
    /// Appends one chunk of ordered content.
    async fn write(&mut self, chunk: Bytes) -> DownloadResult<()>;

    /// Finalizes the output after all content has been written.
    async fn close(&mut self) -> DownloadResult<()>;

    /// Discards the output after a cancelled or failed transfer.
    async fn abort(&mut self) -> DownloadResult<()>;
}

/// Sink that writes to a file, deleting it on abort.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    /// Creates (or truncates) the file at `path`.
    pub async fn create(path: impl AsRef<Path>) -> DownloadResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await.map_err(|e| DownloadError::Sink {
            reason: format!("failed to create {}: {e}", path.display()),
        })?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    fn io_error(&self, action: &str, error: std::io::Error) -> DownloadError {
        DownloadError::Sink {
            reason: format!("failed to {action} {}: {error}", self.path.display()),
        }
    }
}

#[async_trait]
impl BlockSink for FileSink {
    async fn write(&mut self, chunk: Bytes) -> DownloadResult<()> {
        match self.file.as_mut() {
            Some(file) => file
                .write_all(&chunk)
                .await
                .map_err(|e| self.io_error("write", e)),
            None => Err(DownloadError::Sink {
                reason: "write after sink was finished".to_string(),
            }),
        }
    }

    async fn close(&mut self) -> DownloadResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| self.io_error("flush", e))?;
            file.sync_all()
                .await
                .map_err(|e| self.io_error("sync", e))?;
            debug!(path = %self.path.display(), "file sink closed");
        }
        Ok(())
    }

    async fn abort(&mut self) -> DownloadResult<()> {
        if self.file.take().is_some() {
            tokio::fs::remove_file(&self.path)
                .await
                .map_err(|e| self.io_error("remove", e))?;
            debug!(path = %self.path.display(), "file sink aborted, partial file removed");
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use parking_lot::Mutex;

    /// In-memory sink recording writes and finish calls.
    #[derive(Debug, Default)]
    pub struct MemorySink {
        data: Arc<Mutex<Vec<u8>>>,
        closed: Arc<AtomicBool>,
        aborted: Arc<AtomicBool>,
    }

    /// Shared view into a [`MemorySink`], usable after the sink has been
    /// handed to the engine.
    #[derive(Debug, Clone)]
    pub struct MemorySinkHandle {
        data: Arc<Mutex<Vec<u8>>>,
        closed: Arc<AtomicBool>,
        aborted: Arc<AtomicBool>,
    }

    impl MemorySink {
        pub fn new() -> (Self, MemorySinkHandle) {
            let sink = Self::default();
            let handle = MemorySinkHandle {
                data: sink.data.clone(),
                closed: sink.closed.clone(),
                aborted: sink.aborted.clone(),
            };
            (sink, handle)
        }
    }

    impl MemorySinkHandle {
        pub fn contents(&self) -> Vec<u8> {
            self.data.lock().clone()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn is_aborted(&self) -> bool {
            self.aborted.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BlockSink for MemorySink {
        async fn write(&mut self, chunk: Bytes) -> DownloadResult<()> {
            assert!(!self.closed.load(Ordering::SeqCst), "write after close");
            assert!(!self.aborted.load(Ordering::SeqCst), "write after abort");
            self.data.lock().extend_from_slice(&chunk);
            Ok(())
        }

        async fn close(&mut self) -> DownloadResult<()> {
            assert!(!self.aborted.load(Ordering::SeqCst), "close after abort");
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn abort(&mut self) -> DownloadResult<()> {
            assert!(!self.closed.load(Ordering::SeqCst), "abort after close");
            self.aborted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_file_sink_writes_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut sink = FileSink::create(&path).await.unwrap();
        sink.write(Bytes::from_static(b"hello ")).await.unwrap();
        sink.write(Bytes::from_static(b"world")).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_file_sink_abort_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.bin");

        let mut sink = FileSink::create(&path).await.unwrap();
        sink.write(Bytes::from_static(b"half")).await.unwrap();
        sink.abort().await.unwrap();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_sink_rejects_write_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.bin");

        let mut sink = FileSink::create(&path).await.unwrap();
        sink.close().await.unwrap();

        assert!(sink.write(Bytes::from_static(b"late")).await.is_err());
    }
}
