//! Primary provider: the host's lightweight timed-text endpoint.
//!
//! Lists the caption tracks for a video, picks the best match for the
//! requested language and downloads it as a json3 event list.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::parse::{parse_attrs, parse_json3, parse_timedtext_xml};
use super::provider::{base_language, TranscriptProvider};
use super::{ErrorCode, FetchError};
use crate::config::TimedTextConfig;
use crate::http_client::build_client;
use crate::models::Segment;

pub const PROVIDER_NAME: &str = "timedtext";

static TRACK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<track\b([^>]*?)/?>").unwrap());

/// Markers of an anti-abuse interstitial served instead of data.
const BLOCK_MARKERS: &[&str] = &[
    "unusual traffic",
    "captcha",
    "sign in to confirm",
    "not a robot",
    "our systems have detected",
];

/// One caption track advertised by the list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTrack {
    pub lang_code: String,
    pub name: String,
    /// `Some("asr")` for automatic captions.
    pub kind: Option<String>,
}

impl CaptionTrack {
    pub fn is_auto(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }
}

/// Parse the `type=list` response.
pub fn parse_track_list(body: &str) -> Vec<CaptionTrack> {
    TRACK_PATTERN
        .captures_iter(body)
        .filter_map(|c| {
            let attrs = parse_attrs(&c[1]);
            let lang_code = attrs.get("lang_code")?.trim().to_string();
            if lang_code.is_empty() {
                return None;
            }
            Some(CaptionTrack {
                lang_code,
                name: attrs.get("name").cloned().unwrap_or_default(),
                kind: attrs.get("kind").filter(|k| !k.is_empty()).cloned(),
            })
        })
        .collect()
}

/// Pick a track: exact language, then base language, then any manual track,
/// then the first track. Manual tracks win over automatic ones at each step.
pub fn select_track<'a>(tracks: &'a [CaptionTrack], language: &str) -> Option<&'a CaptionTrack> {
    let wanted = language.to_lowercase();
    let wanted_base = base_language(&wanted).to_string();

    let pick = |pred: &dyn Fn(&CaptionTrack) -> bool| {
        tracks
            .iter()
            .filter(|t| pred(t))
            .min_by_key(|t| t.is_auto())
    };

    pick(&|t: &CaptionTrack| t.lang_code.to_lowercase() == wanted)
        .or_else(|| pick(&|t: &CaptionTrack| base_language(&t.lang_code.to_lowercase()) == wanted_base))
        .or_else(|| tracks.iter().find(|t| !t.is_auto()))
        .or_else(|| tracks.first())
}

/// Only HTML documents are inspected; caption text may legitimately contain
/// any of the marker phrases.
fn looks_blocked(body: &str) -> bool {
    let lower = body.to_lowercase();
    (lower.contains("<html") || lower.contains("<!doctype html"))
        && BLOCK_MARKERS.iter().any(|m| lower.contains(m))
}

pub struct TimedTextProvider {
    client: Client,
    base_url: String,
    enabled: bool,
}

impl TimedTextProvider {
    pub fn new(config: &TimedTextConfig, user_agent: Option<&str>) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs), user_agent)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            enabled: config.enabled,
        })
    }

    fn endpoint(&self, params: &[(&str, &str)]) -> Result<Url, FetchError> {
        Url::parse_with_params(&format!("{}/api/timedtext", self.base_url), params).map_err(|e| {
            FetchError::new(ErrorCode::ConfigError, PROVIDER_NAME, format!("bad base URL: {}", e))
        })
    }

    async fn get(&self, url: Url) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(PROVIDER_NAME, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(PROVIDER_NAME, &e))?;

        if !status.is_success() {
            return Err(FetchError::from_status(PROVIDER_NAME, status.as_u16(), &body));
        }
        if looks_blocked(&body) {
            return Err(FetchError::new(
                ErrorCode::BlockedOrRateLimited,
                PROVIDER_NAME,
                "anti-abuse page returned instead of captions",
            ));
        }
        Ok(body)
    }

    async fn list_tracks(&self, video_id: &str) -> Result<Vec<CaptionTrack>, FetchError> {
        let body = self
            .get(self.endpoint(&[("type", "list"), ("v", video_id)])?)
            .await?;
        Ok(parse_track_list(&body))
    }

    async fn download(&self, video_id: &str, track: &CaptionTrack) -> Result<Vec<Segment>, FetchError> {
        let mut params = vec![("v", video_id), ("lang", track.lang_code.as_str()), ("fmt", "json3")];
        if !track.name.is_empty() {
            params.push(("name", track.name.as_str()));
        }
        if let Some(kind) = track.kind.as_deref() {
            params.push(("kind", kind));
        }

        let body = self.get(self.endpoint(&params)?).await?;
        if body.trim().is_empty() {
            // The endpoint answers 200 with no body when it throttles silently.
            return Err(FetchError::new(
                ErrorCode::TransientFetchError,
                PROVIDER_NAME,
                "empty caption payload",
            ));
        }

        // Some deployments ignore fmt and answer with XML.
        let parsed = if body.trim_start().starts_with('<') {
            parse_timedtext_xml(&body)
        } else {
            parse_json3(&body)
        };
        parsed.map_err(|e| FetchError::new(ErrorCode::ParserError, PROVIDER_NAME, e.to_string()))
    }
}

#[async_trait]
impl TranscriptProvider for TimedTextProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    async fn fetch(&self, video_id: &str, language: &str) -> Result<Vec<Segment>, FetchError> {
        let tracks = self.list_tracks(video_id).await?;
        let Some(track) = select_track(&tracks, language) else {
            return Err(FetchError::new(
                ErrorCode::NoCaptions,
                PROVIDER_NAME,
                "no caption tracks listed",
            ));
        };

        if track.lang_code.to_lowercase() != language.to_lowercase() {
            debug!(
                video_id,
                requested = language,
                selected = %track.lang_code,
                "Requested caption language unavailable, using closest track"
            );
        }

        let segments = self.download(video_id, track).await?;
        if segments.is_empty() {
            return Err(FetchError::new(
                ErrorCode::NoCaptions,
                PROVIDER_NAME,
                format!("track {} has no caption text", track.lang_code),
            ));
        }
        Ok(segments)
    }
}
