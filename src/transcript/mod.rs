//! Transcript acquisition: providers, payload parsers and the fetch strategy.
//!
//! Providers:
//! - `timedtext`: lightweight timed-text HTTP endpoint (primary)
//! - `transcript_api`: third-party transcript service (secondary, needs a key)
//! - `ytdlp`: external extractor with proxy rotation (last resort)
//!
//! Every failure is reported as a [`FetchError`] carrying an [`ErrorCode`]
//! and a transient flag; retry decisions only look at those.

mod binary;
mod error;
mod fetcher;
mod parse;
mod provider;
mod proxy;
mod timedtext;
mod transcript_api;
mod ytdlp;

#[cfg(test)]
mod test_server;

pub use binary::BinaryResolver;
pub use error::{classify_failure, ErrorCode, FetchError};
pub use fetcher::{FetchedTranscript, FetcherBuildError, TranscriptFetcher};
pub use parse::{parse_json3, parse_timedtext_xml, parse_vtt, ParseError};
pub use provider::{base_language, TranscriptProvider};
pub use proxy::ProxyPool;
pub use timedtext::{select_track, CaptionTrack, TimedTextProvider};
pub use transcript_api::TranscriptApiProvider;
pub use ytdlp::YtDlpProvider;
