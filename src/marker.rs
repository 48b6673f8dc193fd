//! Stage completion markers
//!
//! A stage writes its artifact to a temporary file, renames it into place,
//! and only then writes `<artifact>.complete` recording the byte count and
//! SHA-256 of what it wrote. A later run trusts the artifact only if the
//! marker exists and still describes the file on disk.

use crate::config::{CompletionConfig, CompletionPolicy};
use crate::utils::{parent_dir, with_suffix};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Suffix appended to an artifact's file name to form its marker path
pub const MARKER_SUFFIX: &str = ".complete";

const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

/// Proof that an artifact was written completely
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    /// Size of the artifact in bytes
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the artifact
    pub sha256: String,
    /// When the artifact was committed
    pub completed_at: DateTime<Utc>,
    /// Where the bytes came from (URL or input path)
    pub source: String,
}

/// What the presence policy accepts as "already done"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    /// The file exists and has at least one byte
    NonEmpty,
    /// The file exists, whatever its size
    Exists,
}

/// Marker path for an artifact
pub fn marker_path(artifact: &Path) -> PathBuf {
    with_suffix(artifact, MARKER_SUFFIX)
}

impl CompletionMarker {
    /// Build a marker stamped with the current time
    pub fn new(bytes: u64, sha256: String, source: impl Into<String>) -> Self {
        Self {
            bytes,
            sha256,
            completed_at: Utc::now(),
            source: source.into(),
        }
    }

    /// Read the marker for `artifact`, if one exists and parses
    pub fn read(artifact: &Path) -> io::Result<Option<Self>> {
        let path = marker_path(artifact);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        match serde_json::from_str(&content) {
            Ok(marker) => Ok(Some(marker)),
            Err(e) => {
                warn!(?path, error = %e, "ignoring unreadable completion marker");
                Ok(None)
            }
        }
    }

    /// Atomically write this marker next to `artifact`
    pub fn write(&self, artifact: &Path) -> io::Result<()> {
        let path = marker_path(artifact);
        let mut temp = NamedTempFile::new_in(parent_dir(&path))?;
        serde_json::to_writer_pretty(temp.as_file_mut(), self)?;
        temp.as_file_mut().write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| e.error)?;
        debug!(?path, bytes = self.bytes, "wrote completion marker");
        Ok(())
    }
}

/// Remove the marker for `artifact` if present
pub fn clear(artifact: &Path) -> io::Result<()> {
    match std::fs::remove_file(marker_path(artifact)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Decide whether `artifact` is already complete
///
/// Returns the artifact size when the configured policy accepts it, `None`
/// when the stage has to run.
pub fn check_complete(
    artifact: &Path,
    completion: &CompletionConfig,
    presence: Presence,
) -> io::Result<Option<u64>> {
    let actual = match std::fs::metadata(artifact) {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        Ok(_) => None,
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    match completion.policy {
        CompletionPolicy::Presence => Ok(match (actual, presence) {
            (Some(len), Presence::NonEmpty) if len > 0 => Some(len),
            (Some(len), Presence::Exists) => Some(len),
            _ => None,
        }),
        CompletionPolicy::Marker => {
            let Some(marker) = CompletionMarker::read(artifact)? else {
                if actual.is_some() {
                    warn!(?artifact, "artifact has no completion marker, rebuilding it");
                }
                return Ok(None);
            };

            let Some(len) = actual else {
                warn!(?artifact, "completion marker without artifact, rebuilding it");
                return Ok(None);
            };

            if len != marker.bytes {
                warn!(
                    ?artifact,
                    expected = marker.bytes,
                    actual = len,
                    "artifact size does not match its completion marker, rebuilding it"
                );
                return Ok(None);
            }

            if completion.verify_digest {
                let (_, digest) = digest_file(artifact)?;
                if digest != marker.sha256 {
                    warn!(?artifact, "artifact digest does not match its completion marker, rebuilding it");
                    return Ok(None);
                }
            }

            Ok(Some(len))
        }
    }
}

/// Size and lowercase hex SHA-256 of a file
pub fn digest_file(path: &Path) -> io::Result<(u64, String)> {
    let (total, hasher) = hash_file(path)?;
    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Feed a whole file into a fresh hasher, returning it unfinalized
///
/// Used to continue hashing after an interrupted download is resumed.
pub fn hash_file(path: &Path) -> io::Result<(u64, Sha256)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, hasher))
}

/// Writer adapter that counts and hashes everything passing through it
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> DigestWriter<W> {
    /// Wrap `inner` with a fresh hash state
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Bytes written so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Return the inner writer, the byte count and the hex digest
    pub fn finish(self) -> (W, u64, String) {
        (self.inner, self.bytes, format!("{:x}", self.hasher.finalize()))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
