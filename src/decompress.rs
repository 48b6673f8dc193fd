//! Streaming decompression with codec dispatch by file suffix
//!
//! The decoded stream is copied in fixed-size chunks into a temporary file next
//! to the output, which is persisted under the output name only once the codec
//! has reached the end of its input. A corrupt or truncated input therefore
//! never leaves a partial corpus behind.

use crate::config::{CompletionConfig, Config};
use crate::error::DecompressError;
use crate::marker::{self, CompletionMarker, DigestWriter, Presence};
use crate::types::{Codec, DecompressOutcome, Event};
use crate::utils::parent_dir;
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Emit a progress event at most once per this many decoded bytes
const PROGRESS_INTERVAL: u64 = 8 * 1024 * 1024;

/// Detect the codec by file extension
///
/// Returns the codec based on the last extension, case-insensitively.
/// Supports gzip (.gz) and bzip2 (.bz2).
pub fn detect_codec(path: &Path) -> Option<Codec> {
    let ext = path.extension()?.to_str()?.to_lowercase();

    match ext.as_str() {
        "gz" => Some(Codec::Gzip),
        "bz2" => Some(Codec::Bzip2),
        _ => None,
    }
}

/// Decompresses artifacts into corpus files
pub struct Decompressor {
    completion: CompletionConfig,
    event_tx: broadcast::Sender<Event>,
}

impl Decompressor {
    /// Create a decompressor with the given completion settings
    pub fn new(completion: &CompletionConfig) -> Self {
        let (event_tx, _rx) = broadcast::channel(1000);
        Self {
            completion: completion.clone(),
            event_tx,
        }
    }

    /// Send progress events to an existing channel instead of a private one
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = event_tx;
        self
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Decode `input` into `output`
    ///
    /// The codec is chosen from `input`'s suffix before any file is touched.
    /// Does nothing if `output` is already complete. The decode runs on a
    /// blocking thread.
    pub async fn decompress(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<DecompressOutcome, DecompressError> {
        let codec = detect_codec(input).ok_or_else(|| DecompressError::UnsupportedFormat {
            path: input.to_path_buf(),
        })?;

        let input_owned = input.to_path_buf();
        let output_owned = output.to_path_buf();
        let completion = self.completion.clone();
        let event_tx = self.event_tx.clone();

        tokio::task::spawn_blocking(move || {
            decompress_blocking(codec, &input_owned, &output_owned, &completion, &event_tx)
        })
        .await
        .map_err(|e| DecompressError::Io {
            path: output.to_path_buf(),
            source: io::Error::other(format!("decompression task panicked: {}", e)),
        })?
    }
}

/// Decode `input` into `output` using default completion settings
pub async fn decompress(input: &Path, output: &Path) -> Result<DecompressOutcome, DecompressError> {
    Decompressor::new(&Config::default().completion)
        .decompress(input, output)
        .await
}

fn decompress_blocking(
    codec: Codec,
    input: &Path,
    output: &Path,
    completion: &CompletionConfig,
    event_tx: &broadcast::Sender<Event>,
) -> Result<DecompressOutcome, DecompressError> {
    if let Some(bytes) =
        marker::check_complete(output, completion, Presence::Exists).map_err(|e| io_error(output, e))?
    {
        info!(path = ?output, bytes, "corpus already present, skipping decompression");
        return Ok(DecompressOutcome::AlreadyPresent { bytes });
    }

    marker::clear(output).map_err(|e| io_error(output, e))?;

    let source = File::open(input).map_err(|e| io_error(input, e))?;
    let mut decoder: Box<dyn Read> = match codec {
        Codec::Gzip => Box::new(MultiGzDecoder::new(BufReader::new(source))),
        Codec::Bzip2 => Box::new(MultiBzDecoder::new(BufReader::new(source))),
    };

    let dir = parent_dir(output);
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    let temp = NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;

    info!(?input, ?output, codec = codec.name(), "decompressing");

    let mut writer = DigestWriter::new(BufWriter::new(temp));
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut last_report = 0u64;

    loop {
        let n = match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(?input, error = %e, "decode failed, discarding partial output");
                return Err(read_error(codec, input, e));
            }
        };

        writer
            .write_all(&buf[..n])
            .map_err(|e| io_error(output, e))?;

        if writer.bytes() - last_report >= PROGRESS_INTERVAL {
            last_report = writer.bytes();
            event_tx
                .send(Event::DecompressProgress {
                    bytes: last_report,
                })
                .ok();
        }
    }

    let (buffered, bytes, digest) = writer.finish();
    let temp = buffered
        .into_inner()
        .map_err(|e| io_error(output, e.into_error()))?;
    temp.as_file().sync_all().map_err(|e| io_error(output, e))?;
    temp.persist(output).map_err(|e| io_error(output, e.error))?;

    CompletionMarker::new(bytes, digest, input.display().to_string())
        .write(output)
        .map_err(|e| io_error(output, e))?;

    event_tx.send(Event::DecompressProgress { bytes }).ok();
    debug!(?output, bytes, "corpus committed");
    info!(?output, bytes, codec = codec.name(), "decompression complete");

    Ok(DecompressOutcome::Decompressed { codec, bytes })
}

/// Classify a read-side failure as codec corruption or plain I/O
fn read_error(codec: Codec, input: &Path, e: io::Error) -> DecompressError {
    match e.kind() {
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            DecompressError::CorruptStream {
                path: input.to_path_buf(),
                codec: codec.name(),
                source: e,
            }
        }
        _ => io_error(input, e),
    }
}

fn io_error(path: &Path, source: io::Error) -> DecompressError {
    DecompressError::Io {
        path: PathBuf::from(path),
        source,
    }
}
