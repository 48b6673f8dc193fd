//! Artifact acquisition over HTTP
//!
//! The body is streamed chunk by chunk into `<artifact>.part`. Only after the
//! last byte has been written and synced is the part file renamed to the
//! artifact name and its completion marker written, so an interrupted or
//! failed transfer never looks complete. A part file left behind by an
//! interrupted run is continued with a `Range` request when the server
//! supports it.

use crate::config::{CompletionConfig, Config, SourceConfig};
use crate::error::FetchError;
use crate::marker::{self, CompletionMarker, Presence};
use crate::types::{Event, FetchOutcome};
use crate::utils::{parent_dir, with_suffix};
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Suffix of the in-progress download file
pub const PART_SUFFIX: &str = ".part";

/// Emit a progress event at most once per this many bytes
const PROGRESS_INTERVAL: u64 = 1024 * 1024;

/// Path of the in-progress download file for an artifact
pub fn part_path(artifact: &Path) -> PathBuf {
    with_suffix(artifact, PART_SUFFIX)
}

/// A response ready to be streamed, or proof that the part file is already whole
enum Opened {
    Stream {
        response: reqwest::Response,
        offset: u64,
    },
    Complete,
}

/// Downloads remote artifacts to local files
pub struct Fetcher {
    client: reqwest::Client,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
    resume: bool,
    completion: CompletionConfig,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Fetcher {
    /// Create a fetcher from source and completion settings
    ///
    /// # Errors
    /// Returns [`FetchError::Transport`] if the HTTP client cannot be built
    pub fn new(source: &SourceConfig, completion: &CompletionConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(source.connect_timeout)
            .user_agent(source.user_agent.as_str())
            .build()
            .map_err(|e| FetchError::Transport {
                url: source.url.clone(),
                source: e,
            })?;

        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            client,
            connect_timeout: source.connect_timeout,
            idle_timeout: source.idle_timeout,
            resume: source.resume,
            completion: completion.clone(),
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Send progress events to an existing channel instead of a private one
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = event_tx;
        self
    }

    /// Abort the transfer when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Ensure `local_path` holds the complete content of `url`
    ///
    /// Does nothing if the artifact is already complete under the configured
    /// completion policy. Otherwise streams the body to disk, resuming a
    /// previous part file when possible.
    pub async fn ensure(&self, url: &str, local_path: &Path) -> Result<FetchOutcome, FetchError> {
        url::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(bytes) = self.already_complete(local_path).await? {
            info!(path = ?local_path, bytes, "artifact already present, skipping download");
            return Ok(FetchOutcome::AlreadyPresent { bytes });
        }

        let dir = parent_dir(local_path);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_error(dir, e))?;
        match tokio::fs::remove_file(marker::marker_path(local_path)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(io_error(local_path, e));
            }
            _ => {}
        }

        let part = part_path(local_path);
        let offset = self.resumable_offset(&part).await?;

        info!(%url, path = ?local_path, resume_from = offset, "downloading artifact");

        let (bytes, digest, resumed_from) = match self.open(url, offset).await? {
            Opened::Complete => {
                let part_owned = part.clone();
                let (bytes, digest) =
                    tokio::task::spawn_blocking(move || marker::digest_file(&part_owned))
                        .await
                        .map_err(|e| io_error(&part, std::io::Error::other(e.to_string())))?
                        .map_err(|e| io_error(&part, e))?;
                (bytes, digest, bytes)
            }
            Opened::Stream { response, offset } => {
                let (bytes, digest) = self.stream_to_part(url, response, &part, offset).await?;
                (bytes, digest, offset)
            }
        };

        tokio::fs::rename(&part, local_path)
            .await
            .map_err(|e| io_error(local_path, e))?;
        let marker = CompletionMarker::new(bytes, digest, url);
        let artifact = local_path.to_path_buf();
        tokio::task::spawn_blocking(move || marker.write(&artifact))
            .await
            .map_err(|e| io_error(local_path, std::io::Error::other(e.to_string())))?
            .map_err(|e| io_error(local_path, e))?;

        info!(path = ?local_path, bytes, "download complete");

        Ok(FetchOutcome::Downloaded {
            bytes,
            resumed_from,
        })
    }

    async fn already_complete(&self, local_path: &Path) -> Result<Option<u64>, FetchError> {
        let path = local_path.to_path_buf();
        let completion = self.completion.clone();
        tokio::task::spawn_blocking(move || {
            marker::check_complete(&path, &completion, Presence::NonEmpty)
        })
        .await
        .map_err(|e| io_error(local_path, std::io::Error::other(e.to_string())))?
        .map_err(|e| io_error(local_path, e))
    }

    /// Length of a usable part file, discarding it when resume is disabled
    async fn resumable_offset(&self, part: &Path) -> Result<u64, FetchError> {
        let len = match tokio::fs::metadata(part).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(part, e)),
        };

        if !self.resume && len > 0 {
            debug!(?part, "resume disabled, discarding partial download");
            tokio::fs::remove_file(part)
                .await
                .map_err(|e| io_error(part, e))?;
            return Ok(0);
        }

        Ok(len)
    }

    /// Send the request and decide where streaming should start
    async fn open(&self, url: &str, offset: u64) -> Result<Opened, FetchError> {
        let response = self.send(url, offset).await?;
        let status = response.status();

        if offset > 0 {
            let range = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .map(parse_content_range);

            match status {
                StatusCode::PARTIAL_CONTENT => match range {
                    Some((Some(start), _)) if start == offset => {
                        debug!(%url, offset, "server accepted resume range");
                        return Ok(Opened::Stream { response, offset });
                    }
                    other => {
                        warn!(%url, expected = offset, content_range = ?other, "server resumed at an unexpected offset, restarting");
                    }
                },
                StatusCode::RANGE_NOT_SATISFIABLE => {
                    if matches!(range, Some((_, Some(total))) if total == offset) {
                        info!(%url, bytes = offset, "partial download already holds the whole artifact");
                        return Ok(Opened::Complete);
                    }
                    warn!(%url, offset, "server rejected resume range, restarting");
                }
                s if s.is_success() => {
                    debug!(%url, "server ignored range request, restarting from zero");
                    return Ok(Opened::Stream {
                        response,
                        offset: 0,
                    });
                }
                _ => {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
            }

            drop(response);
            let response = self.send(url, 0).await?;
            return fresh(url, response);
        }

        fresh(url, response)
    }

    async fn send(&self, url: &str, offset: u64) -> Result<reqwest::Response, FetchError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        self.within(url, request.send())
            .await?
            .map_err(|e| self.transport_error(url, e))
    }

    /// Stream the body into the part file, returning its final size and digest
    async fn stream_to_part(
        &self,
        url: &str,
        response: reqwest::Response,
        part: &Path,
        offset: u64,
    ) -> Result<(u64, String), FetchError> {
        let expected = response.content_length().map(|len| len + offset);

        let (mut received, mut hasher) = if offset > 0 {
            let part_owned = part.to_path_buf();
            tokio::task::spawn_blocking(move || marker::hash_file(&part_owned))
                .await
                .map_err(|e| io_error(part, std::io::Error::other(e.to_string())))?
                .map_err(|e| io_error(part, e))?
        } else {
            (0, Sha256::new())
        };

        let opened = if offset > 0 {
            tokio::fs::OpenOptions::new().append(true).open(part).await
        } else {
            tokio::fs::File::create(part).await
        };
        let mut file = opened.map_err(|e| io_error(part, e))?;

        let mut stream = Box::pin(response.bytes_stream());
        let mut last_report = received;

        loop {
            let next = match self.within(url, stream.next()).await {
                Ok(next) => next,
                Err(e) => {
                    file.flush().await.ok();
                    warn!(%url, received, error = %e, "download interrupted, keeping partial file");
                    return Err(e);
                }
            };

            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    file.flush().await.ok();
                    warn!(%url, received, error = %e, "download interrupted, keeping partial file");
                    return Err(self.transport_error(url, e));
                }
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| io_error(part, e))?;
            hasher.update(&chunk);
            received += chunk.len() as u64;

            if received - last_report >= PROGRESS_INTERVAL {
                self.emit(Event::FetchProgress {
                    bytes: received,
                    total: expected,
                });
                last_report = received;
            }
        }

        file.flush().await.map_err(|e| io_error(part, e))?;
        file.sync_all().await.map_err(|e| io_error(part, e))?;
        drop(file);

        self.emit(Event::FetchProgress {
            bytes: received,
            total: expected,
        });

        // hyper already fails a body cut short of Content-Length; this covers
        // clients or proxies that end the stream cleanly instead
        if let Some(expected) = expected
            && received < expected
        {
            return Err(FetchError::Incomplete {
                url: url.to_string(),
                expected,
                received,
            });
        }

        Ok((received, format!("{:x}", hasher.finalize())))
    }

    /// Run `fut` under the idle timeout, aborting early on cancellation
    async fn within<T>(&self, url: &str, fut: impl Future<Output = T>) -> Result<T, FetchError> {
        let timed = async {
            match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| FetchError::Timeout {
                        url: url.to_string(),
                        timeout: limit,
                    }),
                None => Ok(fut.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_string() }),
            result = timed => result,
        }
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout: self.connect_timeout,
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                source: e,
            }
        }
    }

    fn emit(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

/// Ensure `local_path` holds the complete content of `url` using default settings
pub async fn ensure(url: &str, local_path: &Path) -> Result<FetchOutcome, FetchError> {
    let config = Config::default();
    Fetcher::new(&config.source, &config.completion)?
        .ensure(url, local_path)
        .await
}

fn fresh(url: &str, response: reqwest::Response) -> Result<Opened, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(Opened::Stream {
        response,
        offset: 0,
    })
}

fn io_error(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parse a `Content-Range` value into `(start, total)`
///
/// Accepts `bytes 100-199/200`, `bytes 100-199/*` and `bytes */200`.
fn parse_content_range(value: &str) -> (Option<u64>, Option<u64>) {
    let Some(spec) = value.trim().strip_prefix("bytes") else {
        return (None, None);
    };
    let Some((range, total)) = spec.trim().split_once('/') else {
        return (None, None);
    };

    let start = range
        .split_once('-')
        .and_then(|(start, _)| start.trim().parse().ok());
    let total = total.trim().parse().ok();
    (start, total)
}
