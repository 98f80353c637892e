//! Timed caption segment.

use serde::{Deserialize, Serialize};

/// One timed caption unit.
///
/// Text is always non-empty and trimmed; construct through [`Segment::new`]
/// to enforce that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub text: String,
    pub offset_ms: u64,
    pub duration_ms: u64,
}

impl Segment {
    /// Build a segment, returning `None` when the text is blank.
    /// Negative offsets/durations are clamped to zero.
    pub fn new(text: impl AsRef<str>, offset_ms: i64, duration_ms: i64) -> Option<Self> {
        let text = text.as_ref().trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            offset_ms: offset_ms.max(0) as u64,
            duration_ms: duration_ms.max(0) as u64,
        })
    }

    /// End of the segment in milliseconds.
    pub fn end_ms(&self) -> u64 {
        self.offset_ms.saturating_add(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_and_rejects_blank() {
        let seg = Segment::new("  hello  ", 100, 200).unwrap();
        assert_eq!(seg.text, "hello");
        assert_eq!(seg.end_ms(), 300);
        assert!(Segment::new("   ", 0, 10).is_none());
    }

    #[test]
    fn test_new_clamps_negative() {
        let seg = Segment::new("x", -5, -1).unwrap();
        assert_eq!(seg.offset_ms, 0);
        assert_eq!(seg.duration_ms, 0);
    }
}
