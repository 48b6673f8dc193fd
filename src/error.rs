//! Error types for corpus-dl
//!
//! This module provides the error handling for the pipeline, including:
//! - One error type per stage (fetch, decompress, transform)
//! - A top-level [`Error`] that records which stage failed
//! - Process exit code mapping for the binary entry point

use crate::types::Stage;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for corpus-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for corpus-dl
///
/// Every fatal condition aborts the current stage and the whole pipeline. The
/// variant identifies the stage; [`Error::stage`] exposes it directly.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "source.url")
        key: Option<String>,
    },

    /// Artifact acquisition failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Decompression failed
    #[error("decompression failed: {0}")]
    Decompress(#[from] DecompressError),

    /// Record transformation failed
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    /// Pipeline was cancelled between stages
    #[error("pipeline cancelled before {0} stage")]
    Cancelled(Stage),

    /// I/O error outside of any stage (config loading, directory setup)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The pipeline stage this error was raised in, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Fetch(_) => Some(Stage::Fetch),
            Error::Decompress(_) => Some(Stage::Decompress),
            Error::Transform(_) => Some(Stage::Transform),
            Error::Cancelled(stage) => Some(*stage),
            Error::Config { .. } | Error::Io(_) => None,
        }
    }

    /// Shorthand for a configuration error tied to a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Errors raised while acquiring the remote artifact
#[derive(Debug, Error)]
pub enum FetchError {
    /// The configured URL could not be parsed
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The URL as configured
        url: String,
        /// Why parsing failed
        reason: String,
    },

    /// Connection or transfer failure reported by the HTTP client
    #[error("transport error fetching {url}: {source}")]
    Transport {
        /// The URL being fetched
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// The URL being fetched
        url: String,
        /// The HTTP status code returned
        status: u16,
    },

    /// The body ended before the advertised length was received
    ///
    /// The HTTP client normally reports a short body as [`FetchError::Transport`];
    /// this is raised when a stream ends cleanly below its `Content-Length`.
    #[error("incomplete body from {url}: received {received} of {expected} bytes")]
    Incomplete {
        /// The URL being fetched
        url: String,
        /// Bytes the server advertised
        expected: u64,
        /// Bytes actually on disk
        received: u64,
    },

    /// No bytes arrived within the configured timeout
    #[error("timed out after {timeout:?} fetching {url}")]
    Timeout {
        /// The URL being fetched
        url: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// The download was cancelled before it finished
    #[error("fetch of {url} cancelled")]
    Cancelled {
        /// The URL being fetched
        url: String,
    },

    /// Local write, rename or marker failure
    #[error("I/O error writing {path}: {source}")]
    Io {
        /// The local path being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while decompressing the artifact
#[derive(Debug, Error)]
pub enum DecompressError {
    /// The input suffix is not one of the supported codecs
    #[error("unsupported compression format for {path} (expected .gz or .bz2)")]
    UnsupportedFormat {
        /// The input path that was rejected
        path: PathBuf,
    },

    /// The codec failed mid-stream (corrupt or truncated input)
    #[error("corrupt {codec} stream in {path}: {source}")]
    CorruptStream {
        /// The compressed input
        path: PathBuf,
        /// Name of the codec that failed
        codec: &'static str,
        /// Underlying decode error
        #[source]
        source: std::io::Error,
    },

    /// Opening the input or writing the output failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being read or written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while transforming the corpus into the output table
#[derive(Debug, Error)]
pub enum TransformError {
    /// The corpus could not be read or the table could not be written
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being read or written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The CSV writer rejected a record or failed to flush
    #[error("CSV error writing {path}: {source}")]
    Csv {
        /// The table being written
        path: PathBuf,
        /// Underlying CSV error
        #[source]
        source: csv::Error,
    },
}

/// Map errors to process exit codes for the binary entry point
///
/// Codes follow the BSD `sysexits.h` conventions where one applies.
pub trait ToExitCode {
    /// Get the process exit code for this error
    fn exit_code(&self) -> i32;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToExitCode for Error {
    fn exit_code(&self) -> i32 {
        match self {
            // EX_CONFIG
            Error::Config { .. } => 78,
            Error::Fetch(FetchError::InvalidUrl { .. }) => 78,

            // EX_UNAVAILABLE - remote side failed
            Error::Fetch(FetchError::Transport { .. }) => 69,
            Error::Fetch(FetchError::Status { .. }) => 69,
            Error::Fetch(FetchError::Incomplete { .. }) => 69,

            // EX_TEMPFAIL - worth running again later
            Error::Fetch(FetchError::Timeout { .. }) => 75,

            // EX_DATAERR - input data is unusable
            Error::Decompress(DecompressError::UnsupportedFormat { .. }) => 65,
            Error::Decompress(DecompressError::CorruptStream { .. }) => 65,

            // EX_IOERR
            Error::Fetch(FetchError::Io { .. }) => 74,
            Error::Decompress(DecompressError::Io { .. }) => 74,
            Error::Transform(_) => 74,
            Error::Io(_) => 74,

            // 128 + SIGINT
            Error::Cancelled(_) => 130,
            Error::Fetch(FetchError::Cancelled { .. }) => 130,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Fetch(e) => match e {
                FetchError::InvalidUrl { .. } => "invalid_url",
                FetchError::Transport { .. } => "transport_error",
                FetchError::Status { .. } => "http_status",
                FetchError::Incomplete { .. } => "incomplete_body",
                FetchError::Timeout { .. } => "fetch_timeout",
                FetchError::Cancelled { .. } => "cancelled",
                FetchError::Io { .. } => "fetch_io_error",
            },
            Error::Decompress(e) => match e {
                DecompressError::UnsupportedFormat { .. } => "unsupported_format",
                DecompressError::CorruptStream { .. } => "corrupt_stream",
                DecompressError::Io { .. } => "decompress_io_error",
            },
            Error::Transform(e) => match e {
                TransformError::Io { .. } => "transform_io_error",
                TransformError::Csv { .. } => "csv_error",
            },
            Error::Cancelled(_) => "cancelled",
            Error::Io(_) => "io_error",
        }
    }
}
