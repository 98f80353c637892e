//! Caption payload parsers.
//!
//! Each upstream shape is reduced to the canonical segment list: text cleaned
//! (tags stripped, entities decoded, whitespace collapsed), blank segments
//! dropped, provider order preserved.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::models::Segment;
use crate::utils::clean_caption_text;

/// Why a payload could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to parse {kind} captions: {message}")]
pub struct ParseError {
    pub kind: &'static str,
    pub message: String,
}

impl ParseError {
    fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// json3 (structured event list)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Json3Payload {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    #[serde(default)]
    t_start_ms: i64,
    #[serde(default)]
    d_duration_ms: i64,
    #[serde(default)]
    segs: Vec<Json3Seg>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Parse a `fmt=json3` timed-text payload.
pub fn parse_json3(body: &str) -> Result<Vec<Segment>, ParseError> {
    let payload: Json3Payload =
        serde_json::from_str(body).map_err(|e| ParseError::new("json3", e.to_string()))?;

    Ok(payload
        .events
        .into_iter()
        .filter(|event| !event.segs.is_empty())
        .filter_map(|event| {
            let raw: String = event.segs.iter().map(|s| s.utf8.as_str()).collect();
            Segment::new(clean_caption_text(&raw), event.t_start_ms, event.d_duration_ms)
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Timed-text XML (srv1 `<text start dur>` and srv3 `<p t d>`)
// ---------------------------------------------------------------------------

static SRV1_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<text\b([^>]*)>(.*?)</text>").unwrap());

static SRV3_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<p\b([^>]*)>(.*?)</p>").unwrap());

static ATTR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:]*)\s*=\s*"([^"]*)""#).unwrap());

/// Parse the attributes of a start tag into a map.
pub(crate) fn parse_attrs(s: &str) -> HashMap<String, String> {
    ATTR_PATTERN
        .captures_iter(s)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

fn seconds_to_ms(value: Option<&String>) -> i64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0).round() as i64)
        .unwrap_or(0)
}

fn millis(value: Option<&String>) -> i64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|ms| ms.round() as i64)
        .unwrap_or(0)
}

/// Parse timed-text XML in either the legacy (seconds) or srv3 (ms) layout.
pub fn parse_timedtext_xml(body: &str) -> Result<Vec<Segment>, ParseError> {
    let trimmed = body.trim_start();
    if !trimmed.starts_with('<') {
        return Err(ParseError::new("xml", "payload is not markup"));
    }

    if SRV1_PATTERN.is_match(body) {
        return Ok(SRV1_PATTERN
            .captures_iter(body)
            .filter_map(|c| {
                let attrs = parse_attrs(&c[1]);
                Segment::new(
                    clean_caption_text(&c[2]),
                    seconds_to_ms(attrs.get("start")),
                    seconds_to_ms(attrs.get("dur")),
                )
            })
            .collect());
    }

    if SRV3_PATTERN.is_match(body) {
        return Ok(SRV3_PATTERN
            .captures_iter(body)
            .filter_map(|c| {
                let attrs = parse_attrs(&c[1]);
                Segment::new(
                    clean_caption_text(&c[2]),
                    millis(attrs.get("t")),
                    millis(attrs.get("d")),
                )
            })
            .collect());
    }

    if body.contains("<transcript") || body.contains("<timedtext") {
        return Ok(Vec::new());
    }
    Err(ParseError::new("xml", "no caption elements found"))
}

// ---------------------------------------------------------------------------
// WebVTT (cue blocks)
// ---------------------------------------------------------------------------

static VTT_TIMING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*((?:\d+:)?\d{1,2}:\d{2}[.,]\d{1,3})\s*-->\s*((?:\d+:)?\d{1,2}:\d{2}[.,]\d{1,3})")
        .unwrap()
});

/// Parse `[hh:]mm:ss.mmm` into milliseconds.
fn parse_vtt_timestamp(s: &str) -> Option<i64> {
    let s = s.replace(',', ".");
    let (clock, frac) = s.split_once('.')?;
    let mut ms: i64 = format!("{:0<3}", frac).get(..3)?.parse().ok()?;

    let parts: Vec<&str> = clock.split(':').collect();
    let (h, m, sec) = match parts.as_slice() {
        [h, m, s] => (h.parse::<i64>().ok()?, m.parse::<i64>().ok()?, s.parse::<i64>().ok()?),
        [m, s] => (0, m.parse::<i64>().ok()?, s.parse::<i64>().ok()?),
        _ => return None,
    };
    ms += ((h * 60 + m) * 60 + sec) * 1000;
    Some(ms)
}

/// Cues this short only bridge two roll-up cues in auto-generated tracks.
const BRIDGE_CUE_MAX_MS: i64 = 10;

/// Number of leading `cue` lines that repeat the tail of `previous`.
///
/// At least one line of a cue is always kept.
fn rolled_prefix_len(previous: &[String], cue: &[String]) -> usize {
    (1..cue.len())
        .rev()
        .find(|&k| k <= previous.len() && previous[previous.len() - k..] == cue[..k])
        .unwrap_or(0)
}

/// Parse a WebVTT document.
///
/// Auto-generated tracks emit "rolling" cues: a multi-line cue repeats the
/// previous cue's last line before adding a new one, and near-zero-length
/// cues restate text that is already on screen. Those repeats are dropped;
/// a cue standing on its own is always kept, even when its text repeats.
pub fn parse_vtt(body: &str) -> Result<Vec<Segment>, ParseError> {
    let body = body.trim_start_matches('\u{feff}');
    if !body.trim_start().starts_with("WEBVTT") {
        return Err(ParseError::new("vtt", "missing WEBVTT header"));
    }

    let mut segments = Vec::new();
    let mut previous_lines: Vec<String> = Vec::new();
    let normalized = body.replace("\r\n", "\n");

    for block in normalized.split("\n\n") {
        let mut lines = block.lines();
        let Some((start, end)) = lines.by_ref().find_map(|line| {
            VTT_TIMING.captures(line).and_then(|c| {
                Some((parse_vtt_timestamp(&c[1])?, parse_vtt_timestamp(&c[2])?))
            })
        }) else {
            continue;
        };

        let cue_lines: Vec<String> = lines
            .map(clean_caption_text)
            .filter(|line| !line.is_empty())
            .collect();
        if cue_lines.is_empty() {
            continue;
        }

        let is_bridge = end - start <= BRIDGE_CUE_MAX_MS;
        let restated = is_bridge && cue_lines.iter().all(|line| previous_lines.contains(line));
        let skip = rolled_prefix_len(&previous_lines, &cue_lines);
        let fresh = cue_lines[skip..].join(" ");
        previous_lines = cue_lines;

        if restated {
            continue;
        }
        if let Some(segment) = Segment::new(fresh, start, end - start) {
            segments.push(segment);
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json3() {
        let body = r#"{"events":[
            {"tStartMs":0,"dDurationMs":5000,"id":1},
            {"tStartMs":100,"dDurationMs":1500,"segs":[{"utf8":"hello"},{"utf8":" there"}]},
            {"tStartMs":1700,"dDurationMs":900,"segs":[{"utf8":"\n"}]},
            {"tStartMs":2000,"dDurationMs":1000,"segs":[{"utf8":"rock &amp; roll"}]}
        ]}"#;
        let segments = parse_json3(body).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "hello there");
        assert_eq!(segments[0].offset_ms, 100);
        assert_eq!(segments[1].text, "rock & roll");
    }

    #[test]
    fn test_parse_json3_rejects_garbage() {
        let err = parse_json3("<html>").unwrap_err();
        assert_eq!(err.kind, "json3");
    }

    #[test]
    fn test_parse_srv1() {
        let body = r#"<?xml version="1.0" encoding="utf-8" ?><transcript>
            <text start="0.5" dur="1.25">it&amp;#39;s <i>fine</i></text>
            <text start="2" dur="1">  </text>
            <text start="3.1" dur="0.9">next</text>
        </transcript>"#;
        let segments = parse_timedtext_xml(body).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "it's fine");
        assert_eq!(segments[0].offset_ms, 500);
        assert_eq!(segments[0].duration_ms, 1250);
        assert_eq!(segments[1].offset_ms, 3100);
    }

    #[test]
    fn test_parse_srv3() {
        let body = r#"<timedtext format="3"><body>
            <p t="1000" d="2000">hello <s t="500">world</s></p>
        </body></timedtext>"#;
        let segments = parse_timedtext_xml(body).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello world");
        assert_eq!(segments[0].offset_ms, 1000);
        assert_eq!(segments[0].duration_ms, 2000);
    }

    #[test]
    fn test_parse_empty_transcript_xml() {
        assert!(parse_timedtext_xml("<transcript></transcript>").unwrap().is_empty());
        assert!(parse_timedtext_xml("not xml").is_err());
    }

    #[test]
    fn test_vtt_timestamp() {
        assert_eq!(parse_vtt_timestamp("00:00:01.500"), Some(1500));
        assert_eq!(parse_vtt_timestamp("01:02:03.004"), Some(3_723_004));
        assert_eq!(parse_vtt_timestamp("02:03.4"), Some(123_400));
        assert_eq!(parse_vtt_timestamp("bogus"), None);
    }

    #[test]
    fn test_parse_vtt_rolling_cues() {
        let body = "WEBVTT\nKind: captions\nLanguage: en\n\n\
00:00:00.000 --> 00:00:02.000 align:start position:0%\n\
hello<00:00:00.500><c> there</c>\n\n\
00:00:02.000 --> 00:00:02.010 align:start position:0%\n\
hello there\n\n\
00:00:02.010 --> 00:00:04.000 align:start position:0%\n\
hello there\n\
my<00:00:02.500><c> friend</c>\n";
        let segments = parse_vtt(body).unwrap();
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["hello there", "my friend"]);
        assert_eq!(segments[1].offset_ms, 2010);
        assert_eq!(segments[1].duration_ms, 1990);
    }

    #[test]
    fn test_parse_vtt_keeps_repeated_speech() {
        let body = "WEBVTT\n\n\
00:00:01.000 --> 00:00:02.000\n\
No.\n\n\
00:00:02.000 --> 00:00:03.000\n\
No.\n\n\
00:00:03.000 --> 00:00:04.000\n\
Stop it.\n";
        let segments = parse_vtt(body).unwrap();
        let cues: Vec<(&str, u64)> = segments.iter().map(|s| (s.text.as_str(), s.offset_ms)).collect();
        assert_eq!(cues, vec![("No.", 1000), ("No.", 2000), ("Stop it.", 3000)]);
    }

    #[test]
    fn test_rolled_prefix_len() {
        let lines = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(rolled_prefix_len(&lines(&["a", "b"]), &lines(&["b", "c"])), 1);
        assert_eq!(rolled_prefix_len(&lines(&["a", "b"]), &lines(&["a", "b", "c"])), 2);
        assert_eq!(rolled_prefix_len(&lines(&["a"]), &lines(&["a"])), 0);
        assert_eq!(rolled_prefix_len(&lines(&["a"]), &lines(&["x", "a"])), 0);
        assert_eq!(rolled_prefix_len(&[], &lines(&["a", "b"])), 0);
    }

    #[test]
    fn test_parse_vtt_with_cue_ids() {
        let body = "WEBVTT\r\n\r\n1\r\n00:01.000 --> 00:02.000\r\n<i>One</i>\r\n\r\n2\r\n00:02.000 --> 00:03.000\r\nTwo &amp; three\r\n";
        let segments = parse_vtt(body).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "One");
        assert_eq!(segments[1].text, "Two & three");
    }

    #[test]
    fn test_parse_vtt_requires_header() {
        assert!(parse_vtt("00:00.000 --> 00:01.000\nhi").is_err());
    }
}
