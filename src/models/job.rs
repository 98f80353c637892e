//! Transcript acquisition job.

use serde::{Deserialize, Serialize};

/// Language used when a resource arrives without one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// One unit of queued work: fetch the transcript for a single
/// (resource, language) pair.
///
/// Jobs are immutable per attempt. A retry produces a new job via
/// [`Job::next_attempt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Local video resource id (primary key of the resource row).
    pub resource_id: String,
    /// Id of the video at the upstream host.
    pub provider_resource_id: String,
    /// Requested caption language (BCP-47-ish, lowercase).
    pub language: String,
    /// 1-based attempt number.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl Job {
    /// Create a first-attempt job. The language is trimmed and lowercased;
    /// an empty language falls back to [`DEFAULT_LANGUAGE`].
    pub fn new(
        resource_id: impl Into<String>,
        provider_resource_id: impl Into<String>,
        language: &str,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            provider_resource_id: provider_resource_id.into(),
            language: normalize_language(language),
            attempt: 1,
        }
    }

    /// The job to schedule when this attempt fails transiently.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self.clone()
        }
    }

    /// Serialize to the queue wire format (JSON).
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a queue payload. Rejects payloads with empty ids or a zero attempt.
    pub fn from_payload(payload: &str) -> Result<Self, String> {
        let mut job: Job = serde_json::from_str(payload).map_err(|e| e.to_string())?;
        if job.resource_id.trim().is_empty() {
            return Err("missing resourceId".to_string());
        }
        if job.provider_resource_id.trim().is_empty() {
            return Err("missing providerResourceId".to_string());
        }
        if job.attempt == 0 {
            return Err("attempt must be >= 1".to_string());
        }
        job.language = normalize_language(&job.language);
        Ok(job)
    }
}

fn normalize_language(language: &str) -> String {
    let trimmed = language.trim();
    if trimmed.is_empty() {
        DEFAULT_LANGUAGE.to_string()
    } else {
        trimmed.replace('_', "-").to_lowercase()
    }
}
