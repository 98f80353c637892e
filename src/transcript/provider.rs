//! Caption provider abstraction.

use async_trait::async_trait;

use super::FetchError;
use crate::models::Segment;

/// One upstream source of caption data.
#[async_trait]
pub trait TranscriptProvider: Send + Sync {
    /// Source tag stored with the transcript (e.g. "timedtext").
    fn name(&self) -> &str;

    /// Whether the provider has what it needs to run (credentials, enable flag).
    /// Unavailable providers are skipped without counting as a failure.
    fn is_available(&self) -> bool {
        true
    }

    /// Human-readable reason when unavailable.
    fn availability_hint(&self) -> String {
        format!("{} is disabled", self.name())
    }

    /// Fetch segments for a video in (preferably) the requested language.
    async fn fetch(
        &self,
        provider_resource_id: &str,
        language: &str,
    ) -> Result<Vec<Segment>, FetchError>;
}

/// Base language of a tag: `en-GB` -> `en`.
pub fn base_language(language: &str) -> &str {
    language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
}
