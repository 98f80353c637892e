//! Diesel row types.

use diesel::prelude::*;

use super::util::parse_datetime_opt;
use super::RepositoryError;
use crate::models::{TranscriptState, TranscriptStatus};
use crate::schema::videos;

/// Transcript columns of a `videos` row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = videos)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct VideoRecord {
    pub id: String,
    pub language: String,
    pub transcript: Option<String>,
    pub transcript_status: Option<String>,
    pub transcript_source: String,
    pub transcript_last_error: Option<String>,
    pub transcript_attempts: i32,
    pub transcript_updated_at: Option<String>,
}

impl TryFrom<VideoRecord> for TranscriptState {
    type Error = RepositoryError;

    fn try_from(record: VideoRecord) -> Result<Self, Self::Error> {
        let transcript = record
            .transcript
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(TranscriptState {
            resource_id: record.id,
            language: record.language,
            status: record
                .transcript_status
                .as_deref()
                .and_then(TranscriptStatus::from_str),
            transcript,
            source: record.transcript_source,
            last_error: record.transcript_last_error,
            attempts: record.transcript_attempts.max(0) as u32,
            updated_at: parse_datetime_opt(record.transcript_updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(transcript: Option<&str>) -> VideoRecord {
        VideoRecord {
            id: "v1".to_string(),
            language: "en".to_string(),
            transcript: transcript.map(str::to_string),
            transcript_status: Some("ready".to_string()),
            transcript_source: "timedtext".to_string(),
            transcript_last_error: None,
            transcript_attempts: 2,
            transcript_updated_at: Some("2024-05-01T12:00:00+00:00".to_string()),
        }
    }

    #[test]
    fn test_record_to_state() {
        let state = TranscriptState::try_from(record(Some(
            r#"[{"text":"hi","offsetMs":0,"durationMs":500}]"#,
        )))
        .unwrap();
        assert!(state.is_ready());
        assert_eq!(state.attempts, 2);
        assert_eq!(state.transcript.unwrap()[0].text, "hi");
        assert!(state.updated_at.is_some());
    }

    #[test]
    fn test_corrupt_transcript_is_error() {
        assert!(matches!(
            TranscriptState::try_from(record(Some("{not json"))),
            Err(RepositoryError::Serialization(_))
        ));
    }
}
