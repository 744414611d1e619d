//! Configuration management.
//!
//! Settings come from, in increasing precedence: built-in defaults, a TOML
//! file (`<config_dir>/mnemos/config.toml` or `--config`), and `MNEMOS_*`
//! environment variables (a `.env` file is loaded by the binary first).
//!
//! ```toml
//! data_dir = "/var/lib/mnemos"
//!
//! [pipeline]
//! batch_size = 100
//! embed_workers = 4
//! reverse_detection = "auto"
//!
//! [embedding]
//! provider = "http"
//! model = "text-embedding-3-small"
//! dimensions = 1536
//! api_key = "${OPENAI_API_KEY}"
//!
//! [logging]
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! port = 9090
//! ```

use crate::io::ReverseDetection;
use crate::observability::LogFormat;
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Tuning for the import pipeline, fixed when an `ImportService` is built.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Maximum messages per batch.
    pub batch_size: usize,
    /// Threads used to embed one batch.
    pub embed_workers: usize,
    /// Characters of content used to narrow duplicate lookups.
    pub dedup_prefix_len: usize,
    /// Hashes remembered by the in-run duplicate set.
    pub dedup_cache_capacity: usize,
    /// Minimum stored/committed ratio accepted by the final verification.
    pub verify_min_ratio: f64,
    /// Newest-first handling for transcripts.
    pub reverse_detection: ReverseDetection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            embed_workers: 4,
            dedup_prefix_len: 64,
            dedup_cache_capacity: 10_000,
            verify_min_ratio: 0.9,
            reverse_detection: ReverseDetection::Auto,
        }
    }
}

impl PipelineConfig {
    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the embedding worker count.
    #[must_use]
    pub const fn with_embed_workers(mut self, workers: usize) -> Self {
        self.embed_workers = workers;
        self
    }

    /// Checks that every size is positive and the ratio is within `0..=1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("embed_workers", self.embed_workers),
            ("dedup_prefix_len", self.dedup_prefix_len),
            ("dedup_cache_capacity", self.dedup_cache_capacity),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidInput(format!("{name} must be positive")));
        }
        if !(0.0..=1.0).contains(&self.verify_min_ratio) {
            return Err(Error::InvalidInput(format!(
                "verify_min_ratio must be between 0 and 1, got {}",
                self.verify_min_ratio
            )));
        }
        Ok(())
    }
}

/// Embedding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingProvider {
    /// Deterministic local pseudo-embeddings.
    #[default]
    Hash,
    /// OpenAI-compatible HTTP endpoint.
    Http,
    /// No client-side embedding; the store embeds or stores none.
    None,
}

impl EmbeddingProvider {
    /// Returns the provider name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Http => "http",
            Self::None => "none",
        }
    }
}

impl FromStr for EmbeddingProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hash" | "local" => Ok(Self::Hash),
            "http" | "openai" => Ok(Self::Http),
            "none" | "store" => Ok(Self::None),
            other => Err(Error::InvalidInput(format!(
                "Unknown embedding provider: {other}"
            ))),
        }
    }
}

/// Embedding backend configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Backend.
    pub provider: EmbeddingProvider,
    /// Model name (HTTP only).
    pub model: String,
    /// Vector length.
    pub dimensions: usize,
    /// Endpoint URL (HTTP only).
    pub endpoint: String,
    /// Bearer token (HTTP only).
    pub api_key: Option<SecretString>,
    /// Request timeout in seconds (HTTP only).
    pub timeout_secs: u64,
    /// Texts per HTTP request.
    pub max_request_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            model: "text-embedding-3-small".to_string(),
            dimensions: crate::embedding::HashEmbedder::DEFAULT_DIMENSIONS,
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            api_key: None,
            timeout_secs: 30,
            max_request_size: 100,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive used when no environment filter is set.
    pub filter: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSettings {
    /// Whether to install the exporter.
    pub enabled: bool,
    /// HTTP listener port.
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

/// Main configuration for mnemos.
#[derive(Debug, Clone)]
pub struct MnemosConfig {
    /// Directory holding the database and checkpoints.
    pub data_dir: PathBuf,
    /// Pipeline tuning.
    pub pipeline: PipelineConfig,
    /// Embedding backend.
    pub embedding: EmbeddingConfig,
    /// Logging.
    pub logging: LoggingSettings,
    /// Metrics.
    pub metrics: MetricsSettings,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Pipeline section.
    pub pipeline: Option<ConfigFilePipeline>,
    /// Embedding section.
    pub embedding: Option<ConfigFileEmbedding>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
    /// Metrics section.
    pub metrics: Option<ConfigFileMetrics>,
}

/// Pipeline section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFilePipeline {
    /// Batch size.
    pub batch_size: Option<usize>,
    /// Embedding workers.
    pub embed_workers: Option<usize>,
    /// Dedup prefix length.
    pub dedup_prefix_len: Option<usize>,
    /// Dedup cache capacity.
    pub dedup_cache_capacity: Option<usize>,
    /// Final verification ratio.
    pub verify_min_ratio: Option<f64>,
    /// `auto`, `never` or `always`.
    pub reverse_detection: Option<String>,
}

/// Embedding section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileEmbedding {
    /// Provider name.
    pub provider: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// Dimensions.
    pub dimensions: Option<usize>,
    /// Endpoint URL.
    pub endpoint: Option<String>,
    /// API key, or a `${VAR}` reference.
    pub api_key: Option<String>,
    /// Timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Texts per request.
    pub max_request_size: Option<usize>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

/// Metrics section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileMetrics {
    /// Enable the exporter.
    pub enabled: Option<bool>,
    /// Listener port.
    pub port: Option<u16>,
}

impl Default for MnemosConfig {
    fn default() -> Self {
        Self {
            data_dir: crate::storage::get_user_data_dir().unwrap_or_else(|_| PathBuf::from(".mnemos")),
            pipeline: PipelineConfig::default(),
            embedding: EmbeddingConfig::default(),
            logging: LoggingSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl MnemosConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Returns the default configuration if no config file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but is invalid.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Returns `<config_dir>/mnemos/config.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|b| b.config_dir().join("mnemos").join("config.toml"))
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(pipeline) = file.pipeline {
            let target = &mut config.pipeline;
            if let Some(v) = pipeline.batch_size {
                target.batch_size = v;
            }
            if let Some(v) = pipeline.embed_workers {
                target.embed_workers = v;
            }
            if let Some(v) = pipeline.dedup_prefix_len {
                target.dedup_prefix_len = v;
            }
            if let Some(v) = pipeline.dedup_cache_capacity {
                target.dedup_cache_capacity = v;
            }
            if let Some(v) = pipeline.verify_min_ratio {
                target.verify_min_ratio = v;
            }
            if let Some(v) = pipeline.reverse_detection {
                target.reverse_detection = v.parse()?;
            }
        }
        if let Some(embedding) = file.embedding {
            let target = &mut config.embedding;
            if let Some(v) = embedding.provider {
                target.provider = v.parse()?;
            }
            if let Some(v) = embedding.model {
                target.model = v;
            }
            if let Some(v) = embedding.dimensions {
                target.dimensions = v;
            }
            if let Some(v) = embedding.endpoint {
                target.endpoint = v;
            }
            if let Some(v) = embedding.api_key {
                target.api_key = expand_env_reference(&v).map(SecretString::from);
            }
            if let Some(v) = embedding.timeout_secs {
                target.timeout_secs = v;
            }
            if let Some(v) = embedding.max_request_size {
                target.max_request_size = v;
            }
        }
        if let Some(logging) = file.logging {
            if let Some(v) = logging.format {
                config.logging.format = v.parse()?;
            }
            config.logging.filter = logging.filter;
            config.logging.file = logging.file.map(PathBuf::from);
        }
        if let Some(metrics) = file.metrics {
            if let Some(v) = metrics.enabled {
                config.metrics.enabled = v;
            }
            if let Some(v) = metrics.port {
                config.metrics.port = v;
            }
        }

        Ok(config)
    }

    /// Applies `MNEMOS_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup` (keyed by environment variable name).
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("MNEMOS_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MNEMOS_BATCH_SIZE") {
            self.pipeline.batch_size = parse_number("MNEMOS_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("MNEMOS_EMBED_WORKERS") {
            self.pipeline.embed_workers = parse_number("MNEMOS_EMBED_WORKERS", &v)?;
        }
        if let Some(v) = get("MNEMOS_REVERSE_DETECTION") {
            self.pipeline.reverse_detection = v.parse()?;
        }
        if let Some(v) = get("MNEMOS_EMBEDDING_PROVIDER") {
            self.embedding.provider = v.parse()?;
        }
        if let Some(v) = get("MNEMOS_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = get("MNEMOS_EMBEDDING_DIMENSIONS") {
            self.embedding.dimensions = parse_number("MNEMOS_EMBEDDING_DIMENSIONS", &v)?;
        }
        if let Some(v) = get("MNEMOS_EMBEDDING_ENDPOINT") {
            self.embedding.endpoint = v;
        }
        if let Some(v) = get("MNEMOS_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(SecretString::from(v));
        } else if self.embedding.api_key.is_none() && self.embedding.provider == EmbeddingProvider::Http {
            self.embedding.api_key = get("OPENAI_API_KEY").map(SecretString::from);
        }
        if let Some(v) = get("MNEMOS_LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        if let Some(v) = get("MNEMOS_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Path of the `SQLite` memory store.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("mnemos.db")
    }

    /// Directory of checkpoint files.
    #[must_use]
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{key} must be a non-negative integer, got {value}")))
}

/// Resolves a `${VAR}` reference against the environment; other values pass through.
fn expand_env_reference(value: &str) -> Option<String> {
    let trimmed = value.trim();
    match trimmed.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(var) => std::env::var(var).ok().filter(|v| !v.is_empty()),
        None => Some(trimmed.to_string()).filter(|v| !v.is_empty()),
    }
}
