//! Shared utility functions.
//!
//! - `html`: caption text cleanup (tags, entities, whitespace)

mod html;

pub use html::{clean_caption_text, collapse_whitespace, decode_entities, strip_tags};
