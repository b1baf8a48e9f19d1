//! Transport abstraction for fetching remote blocks.
//!
//! The engine never talks HTTP directly; it goes through the
//! [`BlockTransport`] trait so tests can inject a mock and hosts can
//! supply their own transport (signed URLs, custom auth, local files).
//! [`HttpTransport`] is the reqwest-backed implementation used by real
//! downloads.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::TryStreamExt;

use crate::abort::AbortToken;
use crate::error::{DownloadError, DownloadResult};

/// Stream of block content chunks as they arrive off the wire.
pub type ByteStream = BoxStream<'static, DownloadResult<Bytes>>;

/// Fetches one block's content as a byte stream.
#[async_trait]
pub trait BlockTransport: Send + Sync {
    /// Issues the remote fetch for `locator`.
    ///
    /// Fails with [`DownloadError::Network`] on a non-success response
    /// or transport failure, [`DownloadError::Timeout`] when the
    /// request exceeds `timeout`, and [`DownloadError::Cancelled`] when
    /// `abort` is signalled before the response arrives. Dropping the
    /// returned stream terminates the underlying connection.
    async fn fetch_block(
        &self,
        locator: &str,
        timeout: Duration,
        abort: &AbortToken,
    ) -> DownloadResult<ByteStream>;
}

/// HTTP transport backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    pub fn new() -> DownloadResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DownloadError::Network {
                locator: "http-client".to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Creates a transport from an existing client, so hosts can reuse
    /// connection pools or preconfigured middleware.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn classify(locator: &str, timeout: Duration, error: &reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::Timeout {
            locator: locator.to_string(),
            timeout,
        }
    } else {
        DownloadError::Network {
            locator: locator.to_string(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl BlockTransport for HttpTransport {
    async fn fetch_block(
        &self,
        locator: &str,
        timeout: Duration,
        abort: &AbortToken,
    ) -> DownloadResult<ByteStream> {
        let request = self.client.get(locator).timeout(timeout);

        let response = tokio::select! {
            biased;

            _ = abort.aborted() => return Err(DownloadError::Cancelled),

            result = request.send() => result.map_err(|e| classify(locator, timeout, &e))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Network {
                locator: locator.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let locator = locator.to_string();
        Ok(Box::pin(
            response
                .bytes_stream()
                .map_err(move |e| classify(&locator, timeout, &e)),
        ))
    }
}
