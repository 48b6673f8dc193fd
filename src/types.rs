//! Core types and events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Remote artifact acquisition
    Fetch,
    /// Streaming decompression
    Decompress,
    /// Parse, filter and serialize to CSV
    Transform,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Decompress => "decompress",
            Stage::Transform => "transform",
        };
        f.write_str(name)
    }
}

/// Compression codec detected by file suffix
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// gzip (.gz)
    Gzip,
    /// bzip2 (.bz2)
    Bzip2,
}

impl Codec {
    /// File suffix (without the dot) for this codec
    pub fn extension(self) -> &'static str {
        match self {
            Codec::Gzip => "gz",
            Codec::Bzip2 => "bz2",
        }
    }

    /// Human-readable codec name
    pub fn name(self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Bzip2 => "bzip2",
        }
    }
}

/// Position of the driver in the linear pipeline state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Nothing has run yet
    Start,
    /// The compressed artifact is complete on disk
    Fetched,
    /// The corpus is complete on disk
    Decompressed,
    /// The table has been written
    Transformed,
    /// Completion has been reported
    Done,
}

/// Result of the fetch stage
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// A complete artifact was already on disk; nothing was transferred
    AlreadyPresent {
        /// Size of the existing artifact
        bytes: u64,
    },
    /// The artifact was downloaded (possibly resuming a partial file)
    Downloaded {
        /// Final size of the artifact
        bytes: u64,
        /// Bytes reused from a previous partial download
        resumed_from: u64,
    },
}

impl FetchOutcome {
    /// Size of the artifact on disk after the stage
    pub fn bytes(&self) -> u64 {
        match self {
            FetchOutcome::AlreadyPresent { bytes } | FetchOutcome::Downloaded { bytes, .. } => {
                *bytes
            }
        }
    }
}

/// Result of the decompress stage
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecompressOutcome {
    /// A complete corpus was already on disk
    AlreadyPresent {
        /// Size of the existing corpus
        bytes: u64,
    },
    /// The corpus was decoded from the artifact
    Decompressed {
        /// Codec used
        codec: Codec,
        /// Decoded size
        bytes: u64,
    },
}

/// Counters collected while transforming the corpus
///
/// Every line ends up in exactly one of `written`, `malformed` or `rejected`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformStats {
    /// Lines read from the corpus
    pub lines: u64,
    /// Clean records written to the table
    pub written: u64,
    /// Lines that did not decode as a record (bad JSON, wrong shape, bad UTF-8)
    pub malformed: u64,
    /// Records that decoded but failed the length or label check
    pub rejected: u64,
}

/// Summary of a full pipeline run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Fetch stage result
    pub fetch: FetchOutcome,
    /// Decompress stage result
    pub decompress: DecompressOutcome,
    /// Transform counters
    pub stats: TransformStats,
    /// The table that was written
    pub table_path: PathBuf,
}

/// Event emitted during a pipeline run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A stage began doing work
    StageStarted {
        /// The stage
        stage: Stage,
    },

    /// A stage found its output already complete and did nothing
    StageSkipped {
        /// The stage
        stage: Stage,
        /// The existing output
        path: PathBuf,
    },

    /// Bytes received from the remote artifact
    FetchProgress {
        /// Bytes on disk so far (including resumed bytes)
        bytes: u64,
        /// Total size if the server advertised one
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },

    /// Bytes decoded so far
    DecompressProgress {
        /// Decoded bytes written
        bytes: u64,
    },

    /// Lines transformed so far
    TransformProgress {
        /// Lines read
        lines: u64,
        /// Records written
        written: u64,
    },

    /// A stage finished successfully
    StageCompleted {
        /// The stage
        stage: Stage,
    },

    /// The whole pipeline finished
    PipelineCompleted {
        /// Records written to the table
        written: u64,
    },

    /// The pipeline halted on a fatal error
    PipelineFailed {
        /// The stage that failed, if the error belongs to one
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
        /// Error message
        error: String,
    },
}
