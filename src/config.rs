//! Configuration types for corpus-dl

use crate::error::{Error, Result};
use crate::decompress::detect_codec;
use crate::utils::artifact_name_from_url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "CORPUS_DL_CONFIG";

/// Configuration file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "corpus-dl.toml";

/// Remote artifact settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// URL of the compressed corpus
    #[serde(default = "default_url")]
    pub url: String,

    /// Maximum time to establish a connection (default: 30s)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Maximum time to wait for the next chunk of the body (default: 60s, None = wait forever)
    #[serde(
        default = "default_idle_timeout",
        with = "optional_duration_serde"
    )]
    pub idle_timeout: Option<Duration>,

    /// User-Agent header sent with the request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Continue an interrupted download with a Range request (default: true)
    #[serde(default = "default_true")]
    pub resume: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            user_agent: default_user_agent(),
            resume: true,
        }
    }
}

/// Local file layout
///
/// All three artifacts live in `data_dir`. With the defaults they are
/// `sarc.json.bz2`, `sarc.json` and `sarc_clean.csv`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding every artifact (default: ".")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Compressed artifact file name
    ///
    /// When unset, the corpus name plus the codec suffix of the URL's last
    /// segment, or that segment itself if it has no codec suffix.
    #[serde(default)]
    pub compressed_name: Option<String>,

    /// Decompressed corpus file name (default: "sarc.json")
    #[serde(default = "default_corpus_name")]
    pub corpus_name: String,

    /// Output table file name (default: "sarc_clean.csv")
    #[serde(default = "default_table_name")]
    pub table_name: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            compressed_name: None,
            corpus_name: default_corpus_name(),
            table_name: default_table_name(),
        }
    }
}

/// Record filter settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Minimum comment length in characters after normalization (default: 10)
    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
        }
    }
}

/// How a stage decides its output is already complete
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionPolicy {
    /// Trust a `.complete` marker whose recorded size matches the file
    #[default]
    Marker,
    /// Trust any existing non-empty file (no integrity check)
    Presence,
}

/// Stage completion settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Completion check used by the fetch and decompress stages
    #[serde(default)]
    pub policy: CompletionPolicy,

    /// Recompute the SHA-256 of an existing artifact before trusting its marker
    #[serde(default)]
    pub verify_digest: bool,
}

/// Main configuration for the pipeline
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote artifact settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Local file layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Record filter settings
    #[serde(default)]
    pub filter: FilterConfig,

    /// Stage completion settings
    #[serde(default)]
    pub completion: CompletionConfig,
}

impl Config {
    /// Load configuration from the environment
    ///
    /// Uses the file named by `CORPUS_DL_CONFIG` if set, otherwise
    /// `corpus-dl.toml` in the working directory if it exists, otherwise the
    /// defaults. The result is validated before it is returned.
    pub fn load() -> Result<Self> {
        let config = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("no configuration file found, using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        info!(?path, "loading configuration");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a TOML configuration document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config {
            message: format!("invalid configuration: {}", e),
            key: None,
        })
    }

    /// Check the settings that serde cannot check on its own
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.source.url)
            .map_err(|e| Error::config("source.url", format!("'{}': {}", self.source.url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::config(
                "source.url",
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }

        if self.paths.table_name.trim().is_empty() {
            return Err(Error::config("paths.table_name", "must not be empty"));
        }

        let compressed = self.compressed_path();
        let corpus = self.corpus_path();
        let table = self.table_path();
        if compressed == corpus || corpus == table || compressed == table {
            return Err(Error::config(
                "paths",
                format!(
                    "artifact names must be distinct (compressed={}, corpus={}, table={})",
                    compressed.display(),
                    corpus.display(),
                    table.display()
                ),
            ));
        }

        Ok(())
    }

    /// Path of the compressed artifact
    pub fn compressed_path(&self) -> PathBuf {
        let name = match &self.paths.compressed_name {
            Some(name) => name.clone(),
            None => {
                let remote = artifact_name_from_url(&self.source.url);
                match detect_codec(Path::new(&remote)) {
                    Some(codec) => format!("{}.{}", self.paths.corpus_name, codec.extension()),
                    None => remote,
                }
            }
        };
        self.paths.data_dir.join(name)
    }

    /// Path of the decompressed corpus
    pub fn corpus_path(&self) -> PathBuf {
        self.paths.data_dir.join(&self.paths.corpus_name)
    }

    /// Path of the output table
    pub fn table_path(&self) -> PathBuf {
        self.paths.data_dir.join(&self.paths.table_name)
    }
}

fn default_url() -> String {
    "https://nlp.cs.princeton.edu/old/SARC/2.0/main/comments.json.bz2".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_idle_timeout() -> Option<Duration> {
    Some(Duration::from_secs(60))
}

fn default_user_agent() -> String {
    concat!("corpus-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_corpus_name() -> String {
    "sarc.json".to_string()
}

fn default_table_name() -> String {
    "sarc_clean.csv".to_string()
}

fn default_min_length() -> usize {
    10
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper; 0 means "no timeout"
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.map_or(0, |d| d.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }
}
