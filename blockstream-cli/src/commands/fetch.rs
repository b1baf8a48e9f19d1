//! Fetch command: download a list of block URLs into one file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use blockstream::config::{
    DEFAULT_BLOCK_TIMEOUT_SECS, DEFAULT_MAX_BUFFERED_BLOCKS, DEFAULT_MAX_CONCURRENT_FETCHES,
};
use blockstream::{
    BlockDescriptor, BlockSource, DownloadConfig, DownloadError, DownloadSession, FileSink,
    HttpTransport, ProgressCallback,
};

use crate::error::CliError;

/// Arguments for the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Block URLs, in output order
    #[arg(required_unless_present = "manifest")]
    pub urls: Vec<String>,

    /// File with one block URL per line; lines starting with # are ignored
    #[arg(long, conflicts_with = "urls")]
    pub manifest: Option<PathBuf>,

    /// Output file path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Maximum concurrent block fetches
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_FETCHES)]
    pub concurrency: usize,

    /// Maximum blocks buffered in memory
    #[arg(long, default_value_t = DEFAULT_MAX_BUFFERED_BLOCKS)]
    pub buffer: usize,

    /// Per-block timeout in seconds
    #[arg(long, default_value_t = DEFAULT_BLOCK_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Suppress the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

/// Run the fetch command.
pub async fn run(args: FetchArgs) -> Result<(), CliError> {
    let urls = load_urls(&args)?;
    if urls.is_empty() {
        return Err(CliError::Config("no URLs to fetch".to_string()));
    }
    let block_count = urls.len();
    debug!(blocks = block_count, output = %args.output.display(), "starting fetch");

    let blocks: Vec<BlockDescriptor> = urls
        .into_iter()
        .enumerate()
        .map(|(i, url)| BlockDescriptor::new(i as u64 + 1, url))
        .collect();

    let config = DownloadConfig {
        max_buffered_blocks: args.buffer,
        max_concurrent_fetches: args.concurrency,
        block_timeout_secs: args.timeout,
    };
    let transport = HttpTransport::new()?;
    let sink = FileSink::create(&args.output).await?;

    let bar = (!args.quiet).then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Arc::new(bar)
    });

    let mut builder = DownloadSession::builder()
        .source(BlockSource::Blocks(blocks))
        .transport(Arc::new(transport))
        .sink(sink)
        .config(config);
    if let Some(bar) = bar.clone() {
        let callback: ProgressCallback = Arc::new(move |delta| {
            if delta >= 0 {
                bar.inc(delta as u64);
            } else {
                bar.set_position(bar.position().saturating_sub(delta.unsigned_abs()));
            }
        });
        builder = builder.progress(callback);
    }
    let session = builder.build()?;

    let handle = session.handle();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, cancelling transfer...");
        handle.cancel();
    })
    .map_err(|e| CliError::Config(format!("failed to set signal handler: {e}")))?;

    let result = session.run().await;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    match result {
        Ok(summary) => {
            println!(
                "Downloaded {} blocks ({} bytes) to {}",
                summary.blocks_flushed,
                summary.bytes_flushed,
                args.output.display()
            );
            Ok(())
        }
        Err(DownloadError::Cancelled) => {
            println!("Transfer cancelled, partial output removed.");
            Err(DownloadError::Cancelled.into())
        }
        Err(error) => Err(error.into()),
    }
}

fn load_urls(args: &FetchArgs) -> Result<Vec<String>, CliError> {
    match &args.manifest {
        None => Ok(args.urls.clone()),
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                CliError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from)
                .collect())
        }
    }
}
