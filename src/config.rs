//! Configuration management for transcriptq using the prefer crate.
//!
//! Resolution order: explicit `--config` path, then prefer's discovery of a
//! `transcriptq.{toml,yaml,json}` file, then built-in defaults. Environment
//! variables are applied last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default SQLite database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:transcriptq.db";

/// Default Redis URL.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config: {message}")]
    Parse { format: &'static str, message: String },
}

/// Queue storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendType {
    /// In-process queue (single process, not persisted)
    Memory,
    /// Redis (distributed, requires redis-backend feature)
    #[default]
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

/// Job queue, dedupe guard and promoter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackendType,
    pub redis_url: String,
    /// Prefix for every key the pipeline writes.
    pub key_prefix: String,
    /// Lifetime of a dedupe reservation.
    pub dedupe_ttl_secs: u64,
    /// Bounded wait of a single blocking pop.
    pub pop_timeout_secs: u64,
    /// Promoter tick.
    pub promote_interval_ms: u64,
    /// Maximum delayed entries moved per promoter batch.
    pub promote_batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackendType::default(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: "transcriptq".to_string(),
            dedupe_ttl_secs: 1800,
            pop_timeout_secs: 5,
            promote_interval_ms: 2000,
            promote_batch_size: 100,
        }
    }
}

impl QueueConfig {
    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.dedupe_ttl_secs.max(1))
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_secs(self.pop_timeout_secs.max(1))
    }

    pub fn promote_interval(&self) -> Duration {
        Duration::from_millis(self.promote_interval_ms.max(100))
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Delay ladder indexed by failed attempt (clamped to the last entry).
    pub delays_secs: Vec<u64>,
    /// Whether SOURCE_UNAVAILABLE is worth retrying in this deployment.
    pub source_unavailable_transient: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays_secs: vec![15, 60, 180],
            source_unavailable_transient: false,
        }
    }
}

/// Primary captions endpoint (lightweight HTTP timed-text API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimedTextConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for TimedTextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://www.youtube.com".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Secondary third-party transcript service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptApiConfig {
    pub enabled: bool,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TranscriptApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.supadata.ai/v1/youtube".to_string(),
            api_key: None,
            timeout_secs: 20,
        }
    }
}

/// External tool (yt-dlp) extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YtDlpConfig {
    pub enabled: bool,
    /// Explicit executable path (skips PATH lookup and download).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    /// Where to fetch a standalone binary when none is installed.
    pub download_url: String,
    /// Cache directory for the downloaded binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Hard per-attempt timeout.
    pub timeout_secs: u64,
    /// Proxies tried after a blocked attempt (one attempt each).
    pub max_proxy_rotations: usize,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary_path: None,
            download_url: "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
                .to_string(),
            cache_dir: None,
            timeout_secs: 90,
            max_proxy_rotations: 3,
        }
    }
}

impl YtDlpConfig {
    /// Directory used to cache a self-downloaded binary.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
                .join("transcriptq")
                .join("bin")
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// User agent for HTTP providers: unset for the default, "impersonate"
    /// for a real browser string, anything else is used verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub timedtext: TimedTextConfig,
    pub transcript_api: TranscriptApiConfig,
    pub ytdlp: YtDlpConfig,
}

/// Proxy pool source for the external-tool provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// File with one proxy URL per line (`#` starts a comment).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Sentence normalizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub enabled: bool,
    /// Base language codes the normalizer may touch.
    pub languages: Vec<String>,
    pub hard_pause_ms: u64,
    pub soft_pause_ms: u64,
    /// Running word count required before a soft pause may end a sentence.
    pub min_sentence_words: usize,
    /// Running word count after which any non-continuation start ends a sentence.
    pub max_sentence_words: usize,
    /// Words that continue the current sentence when they start a segment.
    pub continuation_words: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: vec!["en".to_string()],
            hard_pause_ms: 2200,
            soft_pause_ms: 900,
            min_sentence_words: 6,
            max_sentence_words: 40,
            continuation_words: default_continuation_words(),
        }
    }
}

fn default_continuation_words() -> Vec<String> {
    [
        "and", "but", "or", "nor", "so", "because", "cause", "that", "which", "who", "whom",
        "whose", "where", "when", "while", "if", "than", "then", "to", "of", "for", "with",
        "without", "in", "on", "at", "by", "from", "as", "like", "about", "into", "until",
        "unless", "although", "though", "whether", "yet", "plus",
    ]
    .iter()
    .map(|w| w.to_string())
    .collect()
}

/// Full application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub providers: ProvidersConfig,
    pub proxies: ProxyConfig,
    pub normalize: NormalizeConfig,
    /// Path of the file this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to defaults (with env overrides) when no file is found.
    pub async fn load() -> Self {
        match prefer::load("transcriptq").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring unreadable config: {}", e);
                            Self::default_with_env()
                        }
                    }
                } else {
                    Self::default_with_env()
                }
            }
            Err(_) => Self::default_with_env(),
        }
    }

    /// Load config from an explicit path if given, otherwise discover it.
    pub async fn load_with_override(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load_from_path(p).await,
            None => Ok(Self::load().await),
        }
    }

    /// Defaults with environment overrides applied.
    pub fn default_with_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a specific file path.
    /// Format is chosen by extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    /// Parse config text in the given format (`toml`, `yaml`/`yml`, anything else is JSON).
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = env_var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(url) = env_var("REDIS_URL") {
            self.queue.redis_url = url;
        }
        if let Some(key) = env_var("TRANSCRIPT_API_KEY") {
            self.providers.transcript_api.api_key = Some(key);
        }
        if let Some(path) = env_var("YTDLP_PATH") {
            self.providers.ytdlp.binary_path = Some(PathBuf::from(path));
        }
        if let Some(list) = env_var("TRANSCRIPT_PROXIES") {
            self.proxies.urls.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            );
        }
        self
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
