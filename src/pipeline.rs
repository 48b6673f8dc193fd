//! Pipeline driver
//!
//! Runs fetch, decompress and transform strictly in sequence. Each stage
//! starts only after the previous one reported its output complete, and the
//! first failure halts the run with an error naming the stage.

use crate::config::Config;
use crate::decompress::Decompressor;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::transform::Transformer;
use crate::types::{
    DecompressOutcome, Event, FetchOutcome, PipelineReport, PipelineState, Stage, TransformStats,
};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Local files the pipeline reads and writes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Compressed artifact as downloaded
    pub compressed: PathBuf,
    /// Decompressed newline-delimited JSON corpus
    pub corpus: PathBuf,
    /// Filtered `text,label` table
    pub table: PathBuf,
}

impl ArtifactPaths {
    /// Resolve the three artifact paths from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            compressed: config.compressed_path(),
            corpus: config.corpus_path(),
            table: config.table_path(),
        }
    }

    fn check_distinct(&self) -> Result<()> {
        if self.compressed == self.corpus
            || self.corpus == self.table
            || self.compressed == self.table
        {
            return Err(Error::config(
                "paths",
                format!(
                    "artifact paths must be distinct (compressed={}, corpus={}, table={})",
                    self.compressed.display(),
                    self.corpus.display(),
                    self.table.display()
                ),
            ));
        }
        Ok(())
    }
}

/// Sequential three-stage corpus pipeline
pub struct Pipeline {
    url: String,
    paths: ArtifactPaths,
    fetcher: Fetcher,
    decompressor: Decompressor,
    transformer: Transformer,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline from validated configuration
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the configuration is invalid
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let paths = ArtifactPaths::from_config(&config);
        Self::with_paths(config, paths)
    }

    /// Build a pipeline that uses explicit artifact paths instead of `config.paths`
    pub fn with_paths(config: Config, paths: ArtifactPaths) -> Result<Self> {
        paths.check_distinct()?;

        // Event channel shared by all stages
        let (event_tx, _rx) = broadcast::channel(1000);
        let cancel = CancellationToken::new();

        let fetcher = Fetcher::new(&config.source, &config.completion)?
            .with_events(event_tx.clone())
            .with_cancellation(cancel.clone());
        let decompressor = Decompressor::new(&config.completion).with_events(event_tx.clone());
        let transformer = Transformer::new(config.filter.min_length).with_events(event_tx.clone());

        Ok(Self {
            url: config.source.url,
            paths,
            fetcher,
            decompressor,
            transformer,
            event_tx,
            cancel,
        })
    }

    /// Subscribe to pipeline events
    ///
    /// Multiple subscribers are supported; each receives every event sent
    /// after it subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that aborts the run when cancelled
    ///
    /// An in-flight download stops at the next chunk boundary. Decompression
    /// and transformation are not interrupted; cancellation takes effect
    /// before the next stage starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The artifact paths this pipeline uses
    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Run every stage once
    ///
    /// Stages whose output is already complete are skipped; the transform
    /// stage always runs and replaces the table.
    pub async fn run(&self) -> Result<PipelineReport> {
        let result = self.run_stages().await;

        if let Err(e) = &result {
            let stage = e.stage();
            error!(stage = ?stage, error = %e, "pipeline failed");
            self.emit(Event::PipelineFailed {
                stage,
                error: e.to_string(),
            });
        }

        result
    }

    async fn run_stages(&self) -> Result<PipelineReport> {
        let mut state = PipelineState::Start;
        let ArtifactPaths {
            compressed,
            corpus,
            table,
        } = &self.paths;

        self.begin(Stage::Fetch)?;
        let fetch = self.fetcher.ensure(&self.url, compressed).await?;
        self.end(
            Stage::Fetch,
            matches!(fetch, FetchOutcome::AlreadyPresent { .. }),
            compressed,
        );
        advance(&mut state, PipelineState::Fetched);

        self.begin(Stage::Decompress)?;
        let decompress = self.decompressor.decompress(compressed, corpus).await?;
        self.end(
            Stage::Decompress,
            matches!(decompress, DecompressOutcome::AlreadyPresent { .. }),
            corpus,
        );
        advance(&mut state, PipelineState::Decompressed);

        self.begin(Stage::Transform)?;
        let stats = self.transformer.transform(corpus, table).await?;
        self.end(Stage::Transform, false, table);
        advance(&mut state, PipelineState::Transformed);

        info!(written = stats.written, table = ?table, "pipeline complete");
        self.emit(Event::PipelineCompleted {
            written: stats.written,
        });
        advance(&mut state, PipelineState::Done);

        Ok(PipelineReport {
            fetch,
            decompress,
            stats,
            table_path: table.clone(),
        })
    }

    /// Refuse to start a stage once cancellation was requested
    fn begin(&self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!(%stage, "cancellation requested, not starting stage");
            return Err(Error::Cancelled(stage));
        }
        self.emit(Event::StageStarted { stage });
        Ok(())
    }

    fn end(&self, stage: Stage, skipped: bool, output: &Path) {
        if skipped {
            self.emit(Event::StageSkipped {
                stage,
                path: output.to_path_buf(),
            });
        } else {
            self.emit(Event::StageCompleted { stage });
        }
    }

    fn emit(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

fn advance(state: &mut PipelineState, next: PipelineState) {
    info!(from = ?*state, to = ?next, "pipeline state");
    *state = next;
}

/// Fetch `url` to `compressed`, decode it to `corpus`, and write the filtered
/// table to `table`, keeping comments of at least `min_length` characters
///
/// Uses default network and completion settings. See [`Pipeline`] for
/// events, cancellation and configuration.
pub async fn run(
    url: &str,
    compressed: &Path,
    corpus: &Path,
    table: &Path,
    min_length: usize,
) -> Result<TransformStats> {
    let mut config = Config::default();
    config.source.url = url.to_string();
    config.filter.min_length = min_length;

    let paths = ArtifactPaths {
        compressed: compressed.to_path_buf(),
        corpus: corpus.to_path_buf(),
        table: table.to_path_buf(),
    };

    let report = Pipeline::with_paths(config, paths)?.run().await?;
    Ok(report.stats)
}
