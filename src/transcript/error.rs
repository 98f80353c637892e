//! Fetch error taxonomy and the failure-text classifier.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Provider-agnostic failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoCaptions,
    BlockedOrRateLimited,
    SourceUnavailable,
    ConfigError,
    ParserError,
    TransientFetchError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCaptions => "NO_CAPTIONS",
            Self::BlockedOrRateLimited => "BLOCKED_OR_RATE_LIMITED",
            Self::SourceUnavailable => "SOURCE_UNAVAILABLE",
            Self::ConfigError => "CONFIG_ERROR",
            Self::ParserError => "PARSER_ERROR",
            Self::TransientFetchError => "TRANSIENT_FETCH_ERROR",
        }
    }

    /// Default transience. `SourceUnavailable` is deployment-defined and
    /// resolved by the fetcher from configuration.
    pub fn default_transient(&self) -> bool {
        matches!(self, Self::BlockedOrRateLimited | Self::TransientFetchError)
    }

    /// How strongly this failure argues for another attempt. Used to pick the
    /// error reported when several providers fail differently.
    pub(crate) fn retry_priority(&self) -> u8 {
        match self {
            Self::BlockedOrRateLimited => 6,
            Self::TransientFetchError => 5,
            Self::SourceUnavailable => 4,
            Self::NoCaptions => 3,
            Self::ParserError => 2,
            Self::ConfigError => 1,
        }
    }

    /// Message stored on the resource row when a job fails permanently.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoCaptions => "No captions are available for this video.",
            Self::BlockedOrRateLimited => {
                "The video host is rate limiting transcript requests. Try again later."
            }
            Self::SourceUnavailable => "The video is unavailable, private or removed.",
            Self::ConfigError => "Transcript fetching is not configured on this server.",
            Self::ParserError => "The captions for this video could not be read.",
            Self::TransientFetchError => "Fetching the transcript failed. Try again later.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed failure raised by a provider or by the fetcher as a whole.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code} from {provider}: {message}")]
pub struct FetchError {
    pub code: ErrorCode,
    pub transient: bool,
    pub message: String,
    pub provider: String,
}

impl FetchError {
    /// Error with the code's default transience.
    pub fn new(code: ErrorCode, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            transient: code.default_transient(),
            message: message.into(),
            provider: provider.into(),
        }
    }

    pub fn with_transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    /// Map a transport error from reqwest onto the taxonomy.
    pub fn from_reqwest(provider: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(provider, status.as_u16(), &err.to_string());
        }
        if err.is_decode() {
            return Self::new(ErrorCode::ParserError, provider, err.to_string());
        }
        Self::new(ErrorCode::TransientFetchError, provider, err.to_string())
    }

    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        let code = match status {
            401 | 407 => ErrorCode::ConfigError,
            403 | 429 => ErrorCode::BlockedOrRateLimited,
            404 | 410 | 451 => ErrorCode::SourceUnavailable,
            _ => ErrorCode::TransientFetchError,
        };
        Self::new(code, provider, format!("HTTP {}: {}", status, snippet(body)))
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

static BLOCKED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b429\b|too many requests|rate.?limit|sign in to confirm|not a bot|captcha|unusual traffic|\b403\b|forbidden|blocked|http error 403",
    )
    .unwrap()
});

static UNAVAILABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)video unavailable|this video is (?:private|unavailable)|private video|has been removed|been terminated|does not exist|members-only|\b404\b|\b410\b",
    )
    .unwrap()
});

static NO_CAPTIONS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)no (?:subtitles|captions|automatic captions|transcripts?)|(?:subtitles|captions|transcripts?) (?:are |is )?(?:disabled|not available|unavailable)|there are no subtitles",
    )
    .unwrap()
});

static CONFIG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)command not found|no such file or directory|permission denied|enoent|not installed|api key|unauthorized|\b401\b|executable",
    )
    .unwrap()
});

static PARSER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)parse error|failed to parse|invalid json|malformed|unexpected token|unable to parse").unwrap()
});

/// Classify free-form diagnostic text (stderr, error bodies) into an error code.
///
/// Checks run from most to least specific. Anything unrecognized is treated
/// as a transient fetch error so it is retried.
pub fn classify_failure(text: &str) -> ErrorCode {
    if BLOCKED_PATTERN.is_match(text) {
        ErrorCode::BlockedOrRateLimited
    } else if UNAVAILABLE_PATTERN.is_match(text) {
        ErrorCode::SourceUnavailable
    } else if NO_CAPTIONS_PATTERN.is_match(text) {
        ErrorCode::NoCaptions
    } else if CONFIG_PATTERN.is_match(text) {
        ErrorCode::ConfigError
    } else if PARSER_PATTERN.is_match(text) {
        ErrorCode::ParserError
    } else {
        ErrorCode::TransientFetchError
    }
}
