//! Multi-provider fetch strategy.
//!
//! HTTP providers run first, in order. The external tool runs last unless
//! every attempted provider agreed the video has no captions. The first
//! success wins; otherwise the most retry-worthy failure is reported.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::binary::BinaryResolver;
use super::provider::TranscriptProvider;
use super::proxy::ProxyPool;
use super::timedtext::TimedTextProvider;
use super::transcript_api::TranscriptApiProvider;
use super::ytdlp::YtDlpProvider;
use super::{ErrorCode, FetchError};
use crate::config::Config;
use crate::models::Segment;

/// Segments plus the tag of the provider that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedTranscript {
    pub segments: Vec<Segment>,
    pub source: String,
}

/// Errors building a fetcher from configuration.
#[derive(Debug, thiserror::Error)]
pub enum FetcherBuildError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to read proxy list: {0}")]
    ProxyList(#[from] std::io::Error),
}

pub struct TranscriptFetcher {
    providers: Vec<Arc<dyn TranscriptProvider>>,
    tool: Option<Arc<dyn TranscriptProvider>>,
    source_unavailable_transient: bool,
}

impl TranscriptFetcher {
    /// `providers` are tried in order; `tool` is the heavy last resort.
    pub fn new(
        providers: Vec<Arc<dyn TranscriptProvider>>,
        tool: Option<Arc<dyn TranscriptProvider>>,
    ) -> Self {
        Self {
            providers,
            tool,
            source_unavailable_transient: false,
        }
    }

    /// Whether SOURCE_UNAVAILABLE failures should be retried.
    pub fn with_source_unavailable_transient(mut self, transient: bool) -> Self {
        self.source_unavailable_transient = transient;
        self
    }

    /// Build the standard chain: timed-text API, transcript API, yt-dlp.
    pub fn from_config(config: &Config) -> Result<Self, FetcherBuildError> {
        let providers = &config.providers;
        let user_agent = providers.user_agent.as_deref();

        let timedtext = TimedTextProvider::new(&providers.timedtext, user_agent)?;
        let transcript_api = TranscriptApiProvider::new(&providers.transcript_api, user_agent)?;
        let resolver = Arc::new(BinaryResolver::from_config(&providers.ytdlp));
        let proxies = Arc::new(ProxyPool::from_config(&config.proxies)?);
        let ytdlp = YtDlpProvider::new(&providers.ytdlp, resolver, proxies);

        Ok(Self::new(
            vec![Arc::new(timedtext), Arc::new(transcript_api)],
            Some(Arc::new(ytdlp)),
        )
        .with_source_unavailable_transient(config.retry.source_unavailable_transient))
    }

    /// Names of the providers that would currently be attempted, in order.
    pub fn available_providers(&self) -> Vec<String> {
        self.providers
            .iter()
            .chain(self.tool.iter())
            .filter(|p| p.is_available())
            .map(|p| p.name().to_string())
            .collect()
    }

    fn adjust(&self, mut err: FetchError) -> FetchError {
        if err.code == ErrorCode::SourceUnavailable {
            err.transient = self.source_unavailable_transient;
        }
        err
    }

    async fn try_provider(
        &self,
        provider: &dyn TranscriptProvider,
        video_id: &str,
        language: &str,
        errors: &mut Vec<FetchError>,
    ) -> Option<FetchedTranscript> {
        if !provider.is_available() {
            debug!(provider = provider.name(), "Skipping provider: {}", provider.availability_hint());
            return None;
        }

        match provider.fetch(video_id, language).await {
            Ok(segments) => {
                info!(
                    provider = provider.name(),
                    video_id,
                    segments = segments.len(),
                    "Transcript fetched"
                );
                Some(FetchedTranscript {
                    segments,
                    source: provider.name().to_string(),
                })
            }
            Err(err) => {
                let err = self.adjust(err);
                warn!(
                    provider = provider.name(),
                    video_id,
                    code = %err.code,
                    transient = err.transient,
                    "Provider failed: {}", err.message
                );
                errors.push(err);
                None
            }
        }
    }

    /// Fetch a transcript for `video_id`, preferring `language`.
    pub async fn fetch(&self, video_id: &str, language: &str) -> Result<FetchedTranscript, FetchError> {
        let mut errors = Vec::new();

        for provider in &self.providers {
            if let Some(found) = self
                .try_provider(provider.as_ref(), video_id, language, &mut errors)
                .await
            {
                return Ok(found);
            }
        }

        let all_no_captions =
            !errors.is_empty() && errors.iter().all(|e| e.code == ErrorCode::NoCaptions);

        if all_no_captions {
            debug!(video_id, "All providers report no captions, skipping external tool");
        } else if let Some(tool) = &self.tool {
            if let Some(found) = self
                .try_provider(tool.as_ref(), video_id, language, &mut errors)
                .await
            {
                return Ok(found);
            }
        }

        Err(aggregate(errors))
    }
}

/// Collapse per-provider failures into the one that best describes the
/// outcome for retry purposes.
fn aggregate(errors: Vec<FetchError>) -> FetchError {
    let summary = errors
        .iter()
        .map(|e| format!("{}: {}", e.provider, e.message))
        .collect::<Vec<_>>()
        .join("; ");

    let best = errors
        .into_iter()
        .enumerate()
        .max_by_key(|(idx, e)| (e.code.retry_priority(), std::cmp::Reverse(*idx)))
        .map(|(_, e)| e);

    match best {
        Some(best) => FetchError {
            message: summary,
            ..best
        },
        None => FetchError::new(
            ErrorCode::ConfigError,
            "fetcher",
            "no transcript provider is available",
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct Scripted {
        name: &'static str,
        available: bool,
        result: Result<Vec<Segment>, ErrorCode>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: true,
                result: Ok(vec![Segment::new(format!("from {}", name), 0, 1000).unwrap()]),
                calls: AtomicUsize::new(0),
            })
        }

        fn err(name: &'static str, code: ErrorCode) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: true,
                result: Err(code),
                calls: AtomicUsize::new(0),
            })
        }

        fn unavailable(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: false,
                result: Err(ErrorCode::ConfigError),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranscriptProvider for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn fetch(&self, _: &str, _: &str) -> Result<Vec<Segment>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(segments) => Ok(segments.clone()),
                Err(code) => Err(FetchError::new(*code, self.name, "scripted")),
            }
        }
    }

    fn fetcher(
        providers: Vec<Arc<Scripted>>,
        tool: Option<Arc<Scripted>>,
    ) -> TranscriptFetcher {
        TranscriptFetcher::new(
            providers
                .into_iter()
                .map(|p| p as Arc<dyn TranscriptProvider>)
                .collect(),
            tool.map(|t| t as Arc<dyn TranscriptProvider>),
        )
    }

    #[tokio::test]
    async fn test_primary_success_short_circuits() {
        let primary = Scripted::ok("timedtext");
        let secondary = Scripted::ok("transcript_api");
        let f = fetcher(vec![primary.clone(), secondary.clone()], None);
        let result = f.fetch("v", "en").await.unwrap();
        assert_eq!(result.source, "timedtext");
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_blocked_primary_falls_back_to_secondary() {
        let primary = Scripted::err("timedtext", ErrorCode::BlockedOrRateLimited);
        let secondary = Scripted::ok("transcript_api");
        let tool = Scripted::ok("ytdlp");
        let f = fetcher(vec![primary, secondary], Some(tool.clone()));
        let result = f.fetch("v", "en").await.unwrap();
        assert_eq!(result.source, "transcript_api");
        assert_eq!(tool.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_reach_tool() {
        let tool = Scripted::ok("ytdlp");
        let f = fetcher(
            vec![
                Scripted::err("timedtext", ErrorCode::TransientFetchError),
                Scripted::err("transcript_api", ErrorCode::BlockedOrRateLimited),
            ],
            Some(tool.clone()),
        );
        assert_eq!(f.fetch("v", "en").await.unwrap().source, "ytdlp");
        assert_eq!(tool.calls(), 1);
    }

    #[tokio::test]
    async fn test_unanimous_no_captions_skips_tool() {
        let tool = Scripted::ok("ytdlp");
        let f = fetcher(
            vec![
                Scripted::err("timedtext", ErrorCode::NoCaptions),
                Scripted::err("transcript_api", ErrorCode::NoCaptions),
            ],
            Some(tool.clone()),
        );
        let err = f.fetch("v", "en").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NoCaptions);
        assert!(!err.transient);
        assert_eq!(tool.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_no_captions_does_not_mask_later_success() {
        let f = fetcher(
            vec![
                Scripted::err("timedtext", ErrorCode::NoCaptions),
                Scripted::err("transcript_api", ErrorCode::TransientFetchError),
            ],
            Some(Scripted::ok("ytdlp")),
        );
        assert_eq!(f.fetch("v", "en").await.unwrap().source, "ytdlp");
    }

    #[tokio::test]
    async fn test_most_retry_worthy_error_wins() {
        let f = fetcher(
            vec![
                Scripted::err("timedtext", ErrorCode::ParserError),
                Scripted::err("transcript_api", ErrorCode::BlockedOrRateLimited),
            ],
            Some(Scripted::err("ytdlp", ErrorCode::NoCaptions)),
        );
        let err = f.fetch("v", "en").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::BlockedOrRateLimited);
        assert_eq!(err.provider, "transcript_api");
        assert!(err.transient);
        assert!(err.message.contains("timedtext: scripted"));
    }

    #[tokio::test]
    async fn test_unavailable_providers_are_skipped() {
        let skipped = Scripted::unavailable("transcript_api");
        let f = fetcher(
            vec![Scripted::err("timedtext", ErrorCode::NoCaptions), skipped.clone()],
            Some(Scripted::ok("ytdlp")),
        );
        // Only timedtext was attempted and it found nothing.
        let err = f.fetch("v", "en").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NoCaptions);
        assert_eq!(skipped.calls(), 0);
    }

    #[tokio::test]
    async fn test_nothing_available_is_config_error() {
        let f = fetcher(vec![Scripted::unavailable("timedtext")], None);
        let err = f.fetch("v", "en").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError);
        assert!(!err.transient);
        assert!(f.available_providers().is_empty());
    }

    #[tokio::test]
    async fn test_source_unavailable_transience_is_configurable() {
        let build = |transient| {
            fetcher(vec![Scripted::err("timedtext", ErrorCode::SourceUnavailable)], None)
                .with_source_unavailable_transient(transient)
        };
        assert!(!build(false).fetch("v", "en").await.unwrap_err().transient);
        assert!(build(true).fetch("v", "en").await.unwrap_err().transient);
    }
}
