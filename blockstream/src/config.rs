//! Transfer engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of block entries the reassembly buffer may hold.
pub const DEFAULT_MAX_BUFFERED_BLOCKS: usize = 10;

/// Default number of blocks fetched concurrently.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 3;

/// Default timeout for a single block fetch, in seconds.
pub const DEFAULT_BLOCK_TIMEOUT_SECS: u64 = 60;

/// Configuration for a block transfer session.
///
/// Host applications can embed this in their own configuration files;
/// all fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum number of block entries held in the reassembly buffer
    /// at once (backpressure cap). Minimum 1.
    pub max_buffered_blocks: usize,

    /// Maximum number of concurrent block fetches. Minimum 1.
    pub max_concurrent_fetches: usize,

    /// Timeout for a single block fetch, in seconds.
    pub block_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_buffered_blocks: DEFAULT_MAX_BUFFERED_BLOCKS,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            block_timeout_secs: DEFAULT_BLOCK_TIMEOUT_SECS,
        }
    }
}

impl DownloadConfig {
    /// The per-block fetch timeout as a `Duration`.
    pub fn block_timeout(&self) -> Duration {
        Duration::from_secs(self.block_timeout_secs)
    }

    /// The buffer cap, clamped to at least one entry.
    pub fn buffer_cap(&self) -> usize {
        self.max_buffered_blocks.max(1)
    }

    /// The concurrency ceiling, clamped to at least one fetch.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_fetches.max(1)
    }
}
