//! Rule-based sentence reconstruction for caption segments.
//!
//! Automatic captions arrive as unpunctuated fragments. The normalizer groups
//! segments into sentences using pauses, running length and continuation
//! words, capitalizes sentence starts and terminates sentence ends. Segment
//! boundaries and timings are never changed, only text.
//!
//! Word tokens must survive unchanged (case aside). The result is checked
//! after the fact and discarded if any token was added, lost or reordered.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::NormalizeConfig;
use crate::models::Segment;
use crate::transcript::base_language;

static WORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}\p{N}']+").unwrap());

const TERMINAL_PUNCTUATION: &[char] = &['.', '?', '!'];
const TRAILING_SOFT_PUNCTUATION: &[char] = &[',', ';', ':', '-'];
const CLOSING_MARKS: &[char] = &['"', '\'', '”', '’', ')', ']', '»'];

/// Lowercased word tokens of `text`.
pub fn word_tokens(text: &str) -> Vec<String> {
    WORD_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn segment_tokens(segments: &[Segment]) -> Vec<String> {
    segments.iter().flat_map(|s| word_tokens(&s.text)).collect()
}

/// Why the normalizer returned what it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeReason {
    Disabled,
    UnsupportedLanguage,
    NoChanges,
    WordIntegrityCheckFailed,
    Ok,
}

impl NormalizeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::UnsupportedLanguage => "unsupported_language",
            Self::NoChanges => "no_changes",
            Self::WordIntegrityCheckFailed => "word_integrity_check_failed",
            Self::Ok => "ok",
        }
    }
}

impl fmt::Display for NormalizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOutcome {
    pub segments: Vec<Segment>,
    pub reason: NormalizeReason,
}

impl NormalizeOutcome {
    pub fn changed(&self) -> bool {
        self.reason == NormalizeReason::Ok
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptNormalizer {
    enabled: bool,
    languages: HashSet<String>,
    hard_pause_ms: u64,
    soft_pause_ms: u64,
    min_sentence_words: usize,
    max_sentence_words: usize,
    continuation_words: HashSet<String>,
}

impl Default for TranscriptNormalizer {
    fn default() -> Self {
        Self::from_config(&NormalizeConfig::default())
    }
}

impl TranscriptNormalizer {
    pub fn from_config(config: &NormalizeConfig) -> Self {
        Self {
            enabled: config.enabled,
            languages: config
                .languages
                .iter()
                .map(|l| base_language(&l.trim().to_lowercase()).to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            hard_pause_ms: config.hard_pause_ms,
            soft_pause_ms: config.soft_pause_ms,
            min_sentence_words: config.min_sentence_words,
            max_sentence_words: config.max_sentence_words.max(1),
            continuation_words: config
                .continuation_words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn supports(&self, language: &str) -> bool {
        self.languages
            .contains(base_language(&language.trim().to_lowercase()))
    }

    /// Normalize `segments` for `language`. The input is returned unchanged
    /// unless the reason is [`NormalizeReason::Ok`].
    pub fn normalize(&self, segments: &[Segment], language: &str) -> NormalizeOutcome {
        let unchanged = |reason| NormalizeOutcome {
            segments: segments.to_vec(),
            reason,
        };

        if !self.enabled {
            return unchanged(NormalizeReason::Disabled);
        }
        if !self.supports(language) {
            return unchanged(NormalizeReason::UnsupportedLanguage);
        }

        let output = self.group_sentences(segments);

        if segment_tokens(segments) != segment_tokens(&output) {
            warn!(language, "Normalization altered word tokens, keeping raw transcript");
            return unchanged(NormalizeReason::WordIntegrityCheckFailed);
        }
        if output == segments {
            return unchanged(NormalizeReason::NoChanges);
        }

        debug!(language, segments = output.len(), "Transcript normalized");
        NormalizeOutcome {
            segments: output,
            reason: NormalizeReason::Ok,
        }
    }

    fn is_continuation(&self, text: &str) -> bool {
        WORD_PATTERN
            .find(text)
            .map(|m| self.continuation_words.contains(&m.as_str().to_lowercase()))
            .unwrap_or(false)
    }

    fn group_sentences(&self, segments: &[Segment]) -> Vec<Segment> {
        let mut output = Vec::with_capacity(segments.len());
        let mut running_words = 0usize;
        let mut at_sentence_start = true;

        for (idx, segment) in segments.iter().enumerate() {
            let mut text = segment.text.clone();
            if at_sentence_start {
                text = capitalize_first(&text);
            }
            running_words += word_tokens(&text).len();

            let boundary = match segments.get(idx + 1) {
                None => true,
                Some(next) => {
                    let pause = next.offset_ms.saturating_sub(segment.end_ms());
                    let continues = self.is_continuation(&next.text);
                    ends_with_terminal(&text)
                        || pause >= self.hard_pause_ms
                        || (pause >= self.soft_pause_ms
                            && running_words >= self.min_sentence_words
                            && !continues)
                        || (running_words >= self.max_sentence_words && !continues)
                }
            };

            if boundary {
                text = terminate(&text);
                running_words = 0;
            }
            at_sentence_start = boundary;

            output.push(Segment {
                text,
                offset_ms: segment.offset_ms,
                duration_ms: segment.duration_ms,
            });
        }

        output
    }
}

fn ends_with_terminal(text: &str) -> bool {
    text.trim_end()
        .trim_end_matches(CLOSING_MARKS)
        .ends_with(TERMINAL_PUNCTUATION)
}

/// End a sentence with a period unless it already has terminal punctuation.
fn terminate(text: &str) -> String {
    if ends_with_terminal(text) {
        return text.to_string();
    }
    let trimmed = text.trim_end().trim_end_matches(TRAILING_SOFT_PUNCTUATION).trim_end();
    format!("{}.", trimmed)
}

/// Uppercase the first letter when it is only preceded by punctuation
/// (opening quotes, brackets).
fn capitalize_first(text: &str) -> String {
    for (idx, ch) in text.char_indices() {
        if ch.is_alphabetic() {
            let mut upper = ch.to_uppercase();
            return match (upper.next(), upper.next()) {
                (Some(u), None) if u != ch => {
                    let mut out = String::with_capacity(text.len());
                    out.push_str(&text[..idx]);
                    out.push(u);
                    out.push_str(&text[idx + ch.len_utf8()..]);
                    out
                }
                _ => text.to_string(),
            };
        }
        if ch.is_alphanumeric() || ch.is_whitespace() {
            break;
        }
    }
    text.to_string()
}
