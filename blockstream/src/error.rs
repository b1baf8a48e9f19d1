//! Error types for block transfers.

use std::time::Duration;
use thiserror::Error;

/// Result type for transfer operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can occur during a block transfer.
///
/// `Cancelled` covers both explicit cancellation and the internal
/// pause signal; the control plane inspects the session's pause flag to
/// tell the two apart, so a pause never surfaces as an error to callers.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// The transfer was cancelled via the abort token.
    #[error("transfer cancelled")]
    Cancelled,

    /// The transport failed to fetch a block.
    #[error("failed to fetch block {locator}: {reason}")]
    Network { locator: String, reason: String },

    /// A block fetch exceeded its timeout.
    #[error("block {locator} timed out after {timeout:?}")]
    Timeout { locator: String, timeout: Duration },

    /// The stream transform hook failed for a block.
    #[error("transform failed for block {index}: {reason}")]
    Transform { index: u64, reason: String },

    /// The output sink rejected a write or failed to close.
    #[error("sink error: {reason}")]
    Sink { reason: String },
}

impl DownloadError {
    /// Whether this error came from the abort token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error is a transport failure.
    ///
    /// Timeouts count as network failures; they are a distinct variant
    /// only so callers can apply different retry policy to them.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_classification() {
        assert!(DownloadError::Cancelled.is_cancelled());
        assert!(!DownloadError::Cancelled.is_network());
    }

    #[test]
    fn test_timeout_is_network() {
        let err = DownloadError::Timeout {
            locator: "block-1".to_string(),
            timeout: Duration::from_secs(60),
        };
        assert!(err.is_network());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_error_display() {
        let err = DownloadError::Network {
            locator: "https://example.com/block/7".to_string(),
            reason: "HTTP 503".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to fetch block https://example.com/block/7: HTTP 503"
        );
    }
}
