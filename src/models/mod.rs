//! Data models for transcriptq.

mod job;
mod segment;
mod transcript_state;

pub use job::{Job, DEFAULT_LANGUAGE};
pub use segment::Segment;
pub use transcript_state::{TranscriptState, TranscriptStatus, NO_SOURCE};
