//! Secondary provider: third-party transcript API.
//!
//! Authenticated with an `x-api-key` header. Without a key the provider
//! reports itself unavailable and the fetcher skips it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::provider::{base_language, TranscriptProvider};
use super::{classify_failure, ErrorCode, FetchError};
use crate::config::TranscriptApiConfig;
use crate::http_client::build_client;
use crate::models::Segment;
use crate::utils::clean_caption_text;

pub const PROVIDER_NAME: &str = "transcript_api";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptResponse {
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    available_langs: Vec<String>,
    #[serde(default)]
    content: Vec<TranscriptChunk>,
}

#[derive(Debug, Deserialize)]
struct TranscriptChunk {
    #[serde(default)]
    text: String,
    #[serde(default)]
    offset: f64,
    #[serde(default)]
    duration: f64,
}

pub struct TranscriptApiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    enabled: bool,
}

impl TranscriptApiProvider {
    pub fn new(config: &TranscriptApiConfig, user_agent: Option<&str>) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs), user_agent)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config
                .api_key
                .as_ref()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            enabled: config.enabled,
        })
    }

    async fn request(&self, video_id: &str, language: &str) -> Result<TranscriptResponse, FetchError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(FetchError::new(
                ErrorCode::ConfigError,
                PROVIDER_NAME,
                "no API key configured",
            ));
        };

        let url = Url::parse_with_params(
            &format!("{}/transcript", self.base_url),
            &[("videoId", video_id), ("lang", language)],
        )
        .map_err(|e| {
            FetchError::new(ErrorCode::ConfigError, PROVIDER_NAME, format!("bad base URL: {}", e))
        })?;

        let response = self
            .client
            .get(url)
            .header("x-api-key", api_key)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(PROVIDER_NAME, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(PROVIDER_NAME, &e))?;

        if !status.is_success() {
            let mut err = FetchError::from_status(PROVIDER_NAME, status.as_u16(), &body);
            // A 404 here usually means "no transcript", not "no video".
            if matches!(status.as_u16(), 400 | 404) && classify_failure(&body) == ErrorCode::NoCaptions {
                err = FetchError::new(ErrorCode::NoCaptions, PROVIDER_NAME, err.message);
            }
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| FetchError::new(ErrorCode::ParserError, PROVIDER_NAME, e.to_string()))
    }
}

fn to_segments(response: &TranscriptResponse) -> Vec<Segment> {
    response
        .content
        .iter()
        .filter_map(|chunk| {
            Segment::new(
                clean_caption_text(&chunk.text),
                chunk.offset.round() as i64,
                chunk.duration.round() as i64,
            )
        })
        .collect()
}

/// Language to re-request when the first response came back empty.
fn fallback_language(response: &TranscriptResponse, requested: &str) -> Option<String> {
    let requested_base = base_language(requested).to_lowercase();
    let langs = &response.available_langs;
    langs
        .iter()
        .find(|l| base_language(l).to_lowercase() == requested_base && !l.eq_ignore_ascii_case(requested))
        .or_else(|| langs.iter().find(|l| !l.eq_ignore_ascii_case(requested)))
        .cloned()
}

#[async_trait]
impl TranscriptProvider for TranscriptApiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_available(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.enabled {
            "transcript_api has no API key (set TRANSCRIPT_API_KEY)".to_string()
        } else {
            "transcript_api is disabled".to_string()
        }
    }

    async fn fetch(&self, video_id: &str, language: &str) -> Result<Vec<Segment>, FetchError> {
        let response = self.request(video_id, language).await?;
        let segments = to_segments(&response);
        if !segments.is_empty() {
            return Ok(segments);
        }

        if let Some(alternate) = fallback_language(&response, language) {
            debug!(
                video_id,
                requested = language,
                alternate = %alternate,
                "Transcript API has no track in requested language, retrying with available one"
            );
            let retry = self.request(video_id, &alternate).await?;
            let segments = to_segments(&retry);
            if !segments.is_empty() {
                return Ok(segments);
            }
        }

        Err(FetchError::new(
            ErrorCode::NoCaptions,
            PROVIDER_NAME,
            format!(
                "empty transcript (lang={})",
                response.lang.as_deref().unwrap_or(language)
            ),
        ))
    }
}
