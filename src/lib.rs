//! # corpus-dl
//!
//! Idempotent three-stage pipeline that prepares a labeled text corpus:
//! fetch a compressed artifact over HTTP, decompress it (gzip or bzip2), and
//! transform its newline-delimited JSON records into a filtered `text,label`
//! CSV table.
//!
//! ## Design Philosophy
//!
//! - **Re-runnable** - every stage checks its output first; completed work is never redone
//! - **Streaming** - artifacts are processed in bounded chunks, never loaded whole
//! - **Honest completion** - outputs are written under temporary names and only
//!   marked complete after the last byte is on disk
//! - **Event-driven** - consumers subscribe to progress events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use corpus_dl::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(Config::default())?;
//!
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = pipeline.run().await?;
//!     println!("{} records kept", report.stats.written);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Gzip and bzip2 decompression
pub mod decompress;
/// Error types
pub mod error;
/// HTTP artifact acquisition
pub mod fetch;
/// Stage completion markers
pub mod marker;
/// Sequential pipeline driver
pub mod pipeline;
/// NDJSON to CSV record transformation
pub mod transform;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{CompletionPolicy, Config};
pub use decompress::{Decompressor, decompress};
pub use error::{DecompressError, Error, FetchError, Result, ToExitCode, TransformError};
pub use fetch::{Fetcher, ensure};
pub use pipeline::{ArtifactPaths, Pipeline, run};
pub use transform::{Transformer, transform};
pub use types::{
    Codec, DecompressOutcome, Event, FetchOutcome, PipelineReport, PipelineState, Stage,
    TransformStats,
};

/// Run the pipeline once, cancelling it when a termination signal arrives.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A download in progress stops at the next chunk; a blocking stage finishes
/// its current file and the run stops before the next stage.
pub async fn run_with_shutdown(pipeline: &Pipeline) -> Result<PipelineReport> {
    let cancel = pipeline.cancellation_token();
    let watcher = tokio::spawn(async move {
        wait_for_signal().await;
        cancel.cancel();
    });

    let result = pipeline.run().await;
    watcher.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
