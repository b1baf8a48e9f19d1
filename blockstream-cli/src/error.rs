//! CLI error type.

use thiserror::Error;

/// Errors surfaced to the user by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad arguments or unreadable inputs.
    #[error("{0}")]
    Config(String),

    /// Session construction failed.
    #[error(transparent)]
    Build(#[from] blockstream::BuildError),

    /// The transfer failed or was cancelled.
    #[error(transparent)]
    Download(#[from] blockstream::DownloadError),
}
