//! Caption text cleanup: inline tag stripping, entity decoding, whitespace collapse.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

/// Markup-like tags, including WebVTT timing tags such as `<00:00:01.250>`.
static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]*>").unwrap());

/// Named, decimal or hex character references.
static ENTITY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);").unwrap());

/// Remove inline tags (`<i>`, `<c.colorE5E5E5>`, `<00:00:01.000>`, ...).
pub fn strip_tags(s: &str) -> String {
    TAG_PATTERN.replace_all(s, " ").into_owned()
}

/// Decode HTML character references.
///
/// Caption payloads are frequently double-encoded (`&amp;#39;`), so decoding
/// is repeated once more while references remain.
pub fn decode_entities(s: &str) -> String {
    let mut text = s.to_string();
    for _ in 0..2 {
        if !ENTITY_PATTERN.is_match(&text) {
            break;
        }
        // Escape literal angle brackets so the fragment parser keeps them as text.
        let escaped = text.replace('<', "&lt;").replace('>', "&gt;");
        let fragment = Html::parse_fragment(&escaped);
        text = fragment.root_element().text().collect::<String>();
    }
    text
}

/// Collapse runs of whitespace (including non-breaking spaces) to a single space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Full cleanup applied to every provider's caption text.
pub fn clean_caption_text(raw: &str) -> String {
    collapse_whitespace(&decode_entities(&strip_tags(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tags() {
        assert_eq!(
            collapse_whitespace(&strip_tags("<i>hello</i> <c.colorE5E5E5>world</c>")),
            "hello world"
        );
        assert_eq!(
            collapse_whitespace(&strip_tags("we<00:00:01.250><c> are</c>")),
            "we are"
        );
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("rock &amp; roll"), "rock & roll");
        assert_eq!(decode_entities("it&#39;s"), "it's");
        assert_eq!(decode_entities("it&amp;#39;s"), "it's");
        assert_eq!(decode_entities("&lt;music&gt;"), "<music>");
        assert_eq!(decode_entities("no entities"), "no entities");
    }

    #[test]
    fn test_clean_caption_text() {
        assert_eq!(
            clean_caption_text("  <b>Don&#39;t</b>\n  stop\u{a0}now "),
            "Don't stop now"
        );
        assert_eq!(clean_caption_text("<i> </i>"), "");
    }
}
