//! Corpus to table transformation
//!
//! Reads the corpus one line at a time, decodes each line into a typed
//! record, keeps records whose normalized comment is long enough and whose
//! label is 0 or 1, and writes them as `text,label` CSV rows. Lines that fail
//! to decode are counted and skipped; they never abort the stream.

use crate::error::TransformError;
use crate::types::{Event, TransformStats};
use crate::utils::parent_dir;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Header row of the output table
pub const TABLE_HEADER: [&str; 2] = ["text", "label"];

const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Emit a progress event every this many lines
const PROGRESS_INTERVAL: u64 = 100_000;

/// One corpus line as it appears on disk
///
/// Decoded through a map so a repeated key keeps its last value.
#[derive(Debug, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
struct RawRecord {
    comment: String,
    label: Option<Value>,
}

impl TryFrom<Map<String, Value>> for RawRecord {
    type Error = String;

    fn try_from(mut fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let comment = match fields.remove("comment") {
            None => String::new(),
            Some(Value::String(comment)) => comment,
            Some(other) => return Err(format!("comment is not a string: {}", other)),
        };

        Ok(Self {
            comment,
            label: fields.remove("label"),
        })
    }
}

/// A validated row of the output table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanRecord {
    /// Normalized comment text
    pub text: String,
    /// Binary label, 0 or 1
    pub label: u8,
}

/// Why a decoded record was left out of the table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Normalized comment shorter than the minimum length
    TooShort,
    /// Label missing or not the integer 0 or 1
    BadLabel,
}

/// What happened to a single corpus line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// The line becomes a table row
    Accepted(CleanRecord),
    /// The line is not a JSON object of the expected shape
    Malformed,
    /// The line decoded but failed the filter
    Rejected(RejectReason),
}

/// Trim surrounding whitespace and replace each inner `\n` with one space
///
/// A carriage return inside the text is kept as is, so the character count
/// is the same before and after the replacement.
///
/// # Examples
///
/// ```
/// use corpus_dl::transform::normalize_comment;
///
/// assert_eq!(normalize_comment("  line one\nline two \n"), "line one line two");
/// assert_eq!(normalize_comment("a\r\nb"), "a\r b");
/// ```
pub fn normalize_comment(comment: &str) -> String {
    comment.trim().replace('\n', " ")
}

/// Decode and filter one corpus line
pub fn clean_line(line: &[u8], min_length: usize) -> LineOutcome {
    let Ok(raw) = serde_json::from_slice::<RawRecord>(line) else {
        return LineOutcome::Malformed;
    };

    let text = normalize_comment(&raw.comment);
    if text.chars().count() < min_length {
        return LineOutcome::Rejected(RejectReason::TooShort);
    }

    // Only the integers 0 and 1; 1.0, "1" and true are rejected
    let label = match raw.label.as_ref().and_then(Value::as_u64) {
        Some(0) => 0,
        Some(1) => 1,
        _ => return LineOutcome::Rejected(RejectReason::BadLabel),
    };

    LineOutcome::Accepted(CleanRecord { text, label })
}

/// Streams a corpus into a filtered table
pub struct Transformer {
    min_length: usize,
    event_tx: broadcast::Sender<Event>,
}

impl Transformer {
    /// Create a transformer keeping comments of at least `min_length` characters
    pub fn new(min_length: usize) -> Self {
        let (event_tx, _rx) = broadcast::channel(1000);
        Self {
            min_length,
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

    /// Transform `corpus` into `table`, replacing any previous table atomically
    pub async fn transform(
        &self,
        corpus: &Path,
        table: &Path,
    ) -> Result<TransformStats, TransformError> {
        let corpus_owned = corpus.to_path_buf();
        let table_owned = table.to_path_buf();
        let min_length = self.min_length;
        let event_tx = self.event_tx.clone();

        tokio::task::spawn_blocking(move || {
            transform_blocking(&corpus_owned, &table_owned, min_length, &event_tx)
        })
        .await
        .map_err(|e| TransformError::Io {
            path: table.to_path_buf(),
            source: io::Error::other(format!("transform task panicked: {}", e)),
        })?
    }
}

/// Transform `corpus` into `table` keeping comments of at least `min_length` characters
pub async fn transform(
    corpus: &Path,
    table: &Path,
    min_length: usize,
) -> Result<TransformStats, TransformError> {
    Transformer::new(min_length).transform(corpus, table).await
}

fn transform_blocking(
    corpus: &Path,
    table: &Path,
    min_length: usize,
    event_tx: &broadcast::Sender<Event>,
) -> Result<TransformStats, TransformError> {
    let source = File::open(corpus).map_err(|e| io_error(corpus, e))?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, source);

    let dir = parent_dir(table);
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    let temp = NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;

    let mut writer = csv::Writer::from_writer(BufWriter::new(temp));
    writer
        .write_record(TABLE_HEADER)
        .map_err(|e| csv_error(table, e))?;

    info!(?corpus, ?table, min_length, "transforming corpus");

    let mut stats = TransformStats::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| io_error(corpus, e))?;
        if n == 0 {
            break;
        }
        stats.lines += 1;

        match clean_line(&line, min_length) {
            LineOutcome::Accepted(record) => {
                let label = if record.label == 0 { "0" } else { "1" };
                writer
                    .write_record([record.text.as_str(), label])
                    .map_err(|e| csv_error(table, e))?;
                stats.written += 1;
            }
            LineOutcome::Malformed => stats.malformed += 1,
            LineOutcome::Rejected(_) => stats.rejected += 1,
        }

        if stats.lines % PROGRESS_INTERVAL == 0 {
            event_tx
                .send(Event::TransformProgress {
                    lines: stats.lines,
                    written: stats.written,
                })
                .ok();
        }
    }

    writer.flush().map_err(|e| io_error(table, e))?;
    let buffered = writer
        .into_inner()
        .map_err(|e| io_error(table, io::Error::other(e.to_string())))?;
    let temp = buffered
        .into_inner()
        .map_err(|e| io_error(table, e.into_error()))?;
    temp.as_file().sync_all().map_err(|e| io_error(table, e))?;
    temp.persist(table).map_err(|e| io_error(table, e.error))?;

    event_tx
        .send(Event::TransformProgress {
            lines: stats.lines,
            written: stats.written,
        })
        .ok();
    debug!(?stats, "transform counters");
    info!(
        ?table,
        written = stats.written,
        malformed = stats.malformed,
        rejected = stats.rejected,
        "table written"
    );

    Ok(stats)
}

fn io_error(path: &Path, source: io::Error) -> TransformError {
    TransformError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_error(path: &Path, source: csv::Error) -> TransformError {
    TransformError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MIN: usize = 10;

    fn accepted(text: &str, label: u8) -> LineOutcome {
        LineOutcome::Accepted(CleanRecord {
            text: text.to_string(),
            label,
        })
    }

    #[test]
    fn filtering_examples() {
        assert_eq!(
            clean_line(br#"{"comment": "short", "label": 1}"#, MIN),
            LineOutcome::Rejected(RejectReason::TooShort)
        );
        assert_eq!(
            clean_line(br#"{"comment": "this is long enough", "label": 2}"#, MIN),
            LineOutcome::Rejected(RejectReason::BadLabel)
        );
        assert_eq!(
            clean_line(br#"{"comment": "this is long enough", "label": 0}"#, MIN),
            accepted("this is long enough", 0)
        );
        assert_eq!(clean_line(b"{not json", MIN), LineOutcome::Malformed);
    }

    #[test]
    fn label_must_be_integer_zero_or_one() {
        for label in [r#""1""#, "1.0", "true", "null", "-1", "[1]"] {
            let line = format!(r#"{{"comment": "this is long enough", "label": {label}}}"#);
            assert_eq!(
                clean_line(line.as_bytes(), MIN),
                LineOutcome::Rejected(RejectReason::BadLabel),
                "label {label} must be rejected"
            );
        }

        assert_eq!(
            clean_line(br#"{"comment": "this is long enough"}"#, MIN),
            LineOutcome::Rejected(RejectReason::BadLabel),
            "missing label must be rejected"
        );
        assert_eq!(
            clean_line(br#"{"comment": "this is long enough", "label": 1}"#, MIN),
            accepted("this is long enough", 1)
        );
    }

    #[test]
    fn missing_comment_defaults_to_empty() {
        assert_eq!(
            clean_line(br#"{"label": 1}"#, MIN),
            LineOutcome::Rejected(RejectReason::TooShort)
        );
        assert_eq!(clean_line(br#"{"label": 1}"#, 0), accepted("", 1));
    }

    #[test]
    fn wrong_shapes_are_malformed() {
        for line in [
            &b"[1, 2, 3]"[..],
            b"\"just a string\"",
            b"",
            b"   \n",
            br#"{"comment": 42, "label": 1}"#,
            br#"{"comment": null, "label": 1}"#,
            b"{\"comment\": \"bad \xff utf8 here\", \"label\": 1}",
        ] {
            assert_eq!(
                clean_line(line, MIN),
                LineOutcome::Malformed,
                "{:?} must be malformed",
                String::from_utf8_lossy(line)
            );
        }
    }

    #[test]
    fn extra_fields_are_ignored() {
        assert_eq!(
            clean_line(
                br#"{"comment": "this is long enough", "label": 0, "author": "x", "score": 3}"#,
                MIN
            ),
            accepted("this is long enough", 0)
        );
    }

    #[test]
    fn newlines_become_spaces_after_trimming() {
        assert_eq!(
            clean_line(br#"{"comment": "line one\nline two", "label": 1}"#, MIN),
            accepted("line one line two", 1)
        );
        assert_eq!(normalize_comment("\n\n  padded  \n"), "padded");
        assert_eq!(normalize_comment("a\r\nb\rc\nd"), "a\r b\rc d");
    }

    #[test]
    fn carriage_returns_are_kept_and_counted() {
        // "abcd\r\nefgh" is 10 characters once the newline becomes a space
        assert_eq!(
            clean_line(br#"{"comment": "abcd\r\nefgh", "label": 1}"#, 10),
            accepted("abcd\r efgh", 1)
        );
        assert_eq!(
            clean_line(br#"{"comment": "abcdefghi\rj", "label": 0}"#, 10),
            accepted("abcdefghi\rj", 0)
        );
    }

    #[test]
    fn repeated_keys_keep_the_last_value() {
        assert_eq!(
            clean_line(
                br#"{"comment": "this is long enough", "label": 5, "label": 1}"#,
                MIN
            ),
            accepted("this is long enough", 1)
        );
        assert_eq!(
            clean_line(
                br#"{"comment": "tiny", "label": 0, "comment": "replaced by a longer one"}"#,
                MIN
            ),
            accepted("replaced by a longer one", 0)
        );
        assert_eq!(
            clean_line(
                br#"{"comment": "this is long enough", "label": 1, "label": 2}"#,
                MIN
            ),
            LineOutcome::Rejected(RejectReason::BadLabel)
        );
    }

    #[test]
    fn length_is_counted_in_characters_after_trimming() {
        // 10 characters, 20 bytes
        let line = r#"{"comment": "  ééééééééé!  ", "label": 1}"#;
        assert_eq!(clean_line(line.as_bytes(), 10), accepted("ééééééééé!", 1));
        assert_eq!(
            clean_line(line.as_bytes(), 11),
            LineOutcome::Rejected(RejectReason::TooShort)
        );
    }

    #[tokio::test]
    async fn header_is_written_even_when_nothing_is_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = temp_dir.path().join("corpus.json");
        std::fs::write(&corpus, b"garbage\n{\"comment\": \"tiny\", \"label\": 1}\n").unwrap();
        let table = temp_dir.path().join("clean.csv");

        let stats = transform(&corpus, &table, MIN).await.unwrap();

        assert_eq!(std::fs::read_to_string(&table).unwrap(), "text,label\r\n");
        assert_eq!(
            stats,
            TransformStats {
                lines: 2,
                written: 0,
                malformed: 1,
                rejected: 1
            }
        );
    }

    #[tokio::test]
    async fn empty_corpus_yields_header_only() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = temp_dir.path().join("corpus.json");
        std::fs::write(&corpus, b"").unwrap();
        let table = temp_dir.path().join("clean.csv");

        let stats = transform(&corpus, &table, MIN).await.unwrap();

        assert_eq!(stats, TransformStats::default());
        assert_eq!(std::fs::read_to_string(&table).unwrap(), "text,label\r\n");
    }

    #[tokio::test]
    async fn accepted_rows_are_csv_quoted() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = temp_dir.path().join("corpus.json");
        let lines = [
            r#"{"comment": "plain comment text", "label": 0}"#,
            r#"{"comment": "oh, sure, great idea", "label": 1}"#,
            r#"{"comment": "he said \"nice\" again", "label": 1}"#,
            r#"{"comment": "line one\nline two", "label": 0}"#,
        ];
        std::fs::write(&corpus, lines.join("\n")).unwrap();
        let table = temp_dir.path().join("clean.csv");

        let stats = transform(&corpus, &table, MIN).await.unwrap();

        assert_eq!(stats.written, 4);
        assert_eq!(
            std::fs::read_to_string(&table).unwrap(),
            "text,label\r\n\
             plain comment text,0\r\n\
             \"oh, sure, great idea\",1\r\n\
             \"he said \"\"nice\"\" again\",1\r\n\
             line one line two,0\r\n"
        );

        let mut reader = csv::Reader::from_path(&table).unwrap();
        assert_eq!(reader.headers().unwrap().iter().collect::<Vec<_>>(), vec!["text", "label"]);
        let texts: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[0].to_string())
            .collect();
        assert_eq!(texts[2], "he said \"nice\" again");
    }

    #[tokio::test]
    async fn crlf_corpus_lines_decode() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = temp_dir.path().join("corpus.json");
        std::fs::write(
            &corpus,
            b"{\"comment\": \"windows line ending\", \"label\": 1}\r\n",
        )
        .unwrap();
        let table = temp_dir.path().join("clean.csv");

        let stats = transform(&corpus, &table, MIN).await.unwrap();

        assert_eq!(stats.written, 1);
    }

    #[tokio::test]
    async fn missing_corpus_is_fatal_and_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let table = temp_dir.path().join("clean.csv");

        let err = transform(&temp_dir.path().join("absent.json"), &table, MIN)
            .await
            .unwrap_err();

        assert!(matches!(err, TransformError::Io { .. }), "got {err:?}");
        assert!(!table.exists());
    }

    #[tokio::test]
    async fn rerun_replaces_previous_table() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = temp_dir.path().join("corpus.json");
        std::fs::write(
            &corpus,
            br#"{"comment": "a fairly long comment", "label": 1}"#,
        )
        .unwrap();
        let table = temp_dir.path().join("clean.csv");
        std::fs::write(&table, "stale,content\nfrom,before\n").unwrap();

        transform(&corpus, &table, MIN).await.unwrap();
        let first = std::fs::read(&table).unwrap();
        transform(&corpus, &table, MIN).await.unwrap();

        assert_eq!(std::fs::read(&table).unwrap(), first);
        assert_eq!(
            String::from_utf8(first).unwrap(),
            "text,label\r\na fairly long comment,1\r\n"
        );
    }

    #[tokio::test]
    async fn counters_partition_every_line() {
        let temp_dir = TempDir::new().unwrap();
        let corpus = temp_dir.path().join("corpus.json");
        let mut content = String::new();
        for i in 0..1000 {
            match i % 4 {
                0 => content.push_str(&format!("{{\"comment\": \"comment number {i}\", \"label\": {}}}\n", i % 2)),
                1 => content.push_str("{broken\n"),
                2 => content.push_str("{\"comment\": \"no\", \"label\": 0}\n"),
                _ => content.push_str("{\"comment\": \"comment with label 7\", \"label\": 7}\n"),
            }
        }
        std::fs::write(&corpus, content).unwrap();
        let table = temp_dir.path().join("clean.csv");

        let stats = transform(&corpus, &table, MIN).await.unwrap();

        assert_eq!(stats.lines, 1000);
        assert_eq!(stats.written, 250);
        assert_eq!(stats.malformed, 250);
        assert_eq!(stats.rejected, 500);
        assert_eq!(stats.written + stats.malformed + stats.rejected, stats.lines);
    }
}
