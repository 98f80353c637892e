//! Persisted transcript state of a video resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Segment;

/// Source tag recorded when no provider produced a transcript.
pub const NO_SOURCE: &str = "none";

/// Transcript lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptStatus {
    Processing,
    Ready,
    Failed,
}

impl TranscriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TranscriptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transcript columns of a video row.
///
/// Invariants maintained by the repositories:
/// - `Ready` implies `transcript.is_some()`
/// - `Failed` implies `transcript.is_none()` and `last_error.is_some()`
/// - `attempts` never decreases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptState {
    pub resource_id: String,
    pub language: String,
    /// `None` until the first job touches the row.
    pub status: Option<TranscriptStatus>,
    pub transcript: Option<Vec<Segment>>,
    pub source: String,
    pub last_error: Option<String>,
    pub attempts: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TranscriptState {
    /// A fresh row that has never been processed.
    pub fn new(resource_id: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            language: language.into(),
            status: None,
            transcript: None,
            source: NO_SOURCE.to_string(),
            last_error: None,
            attempts: 0,
            updated_at: None,
        }
    }

    /// Whether downstream consumers may read the transcript.
    pub fn is_ready(&self) -> bool {
        self.status == Some(TranscriptStatus::Ready) && self.transcript.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TranscriptStatus::Processing,
            TranscriptStatus::Ready,
            TranscriptStatus::Failed,
        ] {
            assert_eq!(TranscriptStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TranscriptStatus::from_str("queued"), None);
    }

    #[test]
    fn test_new_state_not_ready() {
        let state = TranscriptState::new("v1", "en");
        assert!(!state.is_ready());
        assert_eq!(state.source, NO_SOURCE);
        assert_eq!(state.attempts, 0);
    }
}
