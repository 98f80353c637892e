//! Diesel-based transcript repository for SQLite.
//!
//! Reads go through the typed query builder. Transitions use raw conditional
//! `UPDATE`s because `attempts = MAX(attempts, ?)` and the status guard must
//! happen in one statement.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};
use diesel_async::RunQueryDsl;
use tracing::debug;

use super::models::VideoRecord;
use super::pool::AsyncSqlitePool;
use super::{RepositoryError, RepositoryResult, TranscriptRepository};
use crate::models::{Segment, TranscriptState, NO_SOURCE};
use crate::schema::videos;

const CREATE_VIDEOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS videos (
    id TEXT PRIMARY KEY NOT NULL,
    language TEXT NOT NULL DEFAULT 'en',
    transcript TEXT,
    transcript_status TEXT,
    transcript_source TEXT NOT NULL DEFAULT 'none',
    transcript_last_error TEXT,
    transcript_attempts INTEGER NOT NULL DEFAULT 0,
    transcript_updated_at TEXT
)"#;

const CREATE_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_videos_transcript_status ON videos (transcript_status)";

const MARK_PROCESSING: &str = "UPDATE videos SET \
    transcript_status = 'processing', \
    transcript_attempts = MAX(transcript_attempts, ?), \
    transcript_updated_at = ? \
    WHERE id = ?";

const MARK_RETRYING: &str = "UPDATE videos SET \
    transcript_last_error = ?, \
    transcript_attempts = MAX(transcript_attempts, ?), \
    transcript_updated_at = ? \
    WHERE id = ? AND transcript_status = 'processing'";

const MARK_READY: &str = "UPDATE videos SET \
    transcript = ?, \
    transcript_status = 'ready', \
    transcript_source = ?, \
    transcript_last_error = NULL, \
    transcript_attempts = MAX(transcript_attempts, ?), \
    transcript_updated_at = ? \
    WHERE id = ? AND transcript_status = 'processing'";

const MARK_FAILED: &str = "UPDATE videos SET \
    transcript = NULL, \
    transcript_status = 'failed', \
    transcript_source = ?, \
    transcript_last_error = ?, \
    transcript_attempts = MAX(transcript_attempts, ?), \
    transcript_updated_at = ? \
    WHERE id = ? AND transcript_status = 'processing'";

#[derive(diesel::QueryableByName)]
struct StatusCount {
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    count: i64,
}

fn attempts_column(attempt: u32) -> i32 {
    i32::try_from(attempt).unwrap_or(i32::MAX)
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Clone)]
pub struct DieselTranscriptRepository {
    pool: AsyncSqlitePool,
}

impl DieselTranscriptRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    pub fn from_url(database_url: &str) -> Self {
        Self::new(AsyncSqlitePool::new(database_url))
    }

    /// Create the `videos` table when running without the owning application.
    pub async fn ensure_schema(&self) -> RepositoryResult<()> {
        let mut conn = self.pool.get().await?;
        diesel::sql_query(CREATE_VIDEOS_TABLE)
            .execute(&mut conn)
            .await?;
        diesel::sql_query(CREATE_STATUS_INDEX)
            .execute(&mut conn)
            .await?;
        debug!(database = self.pool.database_url(), "Schema ensured");
        Ok(())
    }

    /// Insert a bare video row if it does not exist yet. Returns whether a
    /// row was created.
    pub async fn insert_video(&self, resource_id: &str, language: &str) -> RepositoryResult<bool> {
        let mut conn = self.pool.get().await?;
        let rows = diesel::insert_or_ignore_into(videos::table)
            .values((videos::id.eq(resource_id), videos::language.eq(language)))
            .execute(&mut conn)
            .await?;
        Ok(rows > 0)
    }

    /// Number of rows per transcript status; untouched rows count as `new`.
    pub async fn status_counts(&self) -> RepositoryResult<Vec<(String, i64)>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<StatusCount> = diesel::sql_query(
            "SELECT COALESCE(transcript_status, 'new') AS status, COUNT(*) AS count \
             FROM videos GROUP BY 1 ORDER BY 1",
        )
        .load(&mut conn)
        .await?;
        Ok(rows.into_iter().map(|r| (r.status, r.count)).collect())
    }
}

#[async_trait]
impl TranscriptRepository for DieselTranscriptRepository {
    async fn get(&self, resource_id: &str) -> RepositoryResult<Option<TranscriptState>> {
        let mut conn = self.pool.get().await?;
        let record = videos::table
            .find(resource_id)
            .select(VideoRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        record.map(TranscriptState::try_from).transpose()
    }

    async fn mark_processing(&self, resource_id: &str, attempt: u32) -> RepositoryResult<()> {
        let mut conn = self.pool.get().await?;
        let rows = diesel::sql_query(MARK_PROCESSING)
            .bind::<Integer, _>(attempts_column(attempt))
            .bind::<Text, _>(now())
            .bind::<Text, _>(resource_id)
            .execute(&mut conn)
            .await?;
        if rows == 0 {
            return Err(RepositoryError::NotFound(resource_id.to_string()));
        }
        Ok(())
    }

    async fn mark_retrying(
        &self,
        resource_id: &str,
        attempt: u32,
        note: &str,
    ) -> RepositoryResult<bool> {
        let mut conn = self.pool.get().await?;
        let rows = diesel::sql_query(MARK_RETRYING)
            .bind::<Text, _>(note)
            .bind::<Integer, _>(attempts_column(attempt))
            .bind::<Text, _>(now())
            .bind::<Text, _>(resource_id)
            .execute(&mut conn)
            .await?;
        Ok(rows > 0)
    }

    async fn mark_ready(
        &self,
        resource_id: &str,
        segments: &[Segment],
        source: &str,
        attempt: u32,
    ) -> RepositoryResult<bool> {
        let transcript = serde_json::to_string(segments)?;
        let mut conn = self.pool.get().await?;
        let rows = diesel::sql_query(MARK_READY)
            .bind::<Text, _>(transcript)
            .bind::<Text, _>(source)
            .bind::<Integer, _>(attempts_column(attempt))
            .bind::<Text, _>(now())
            .bind::<Text, _>(resource_id)
            .execute(&mut conn)
            .await?;
        Ok(rows > 0)
    }

    async fn mark_failed(
        &self,
        resource_id: &str,
        message: &str,
        attempt: u32,
    ) -> RepositoryResult<bool> {
        let mut conn = self.pool.get().await?;
        let rows = diesel::sql_query(MARK_FAILED)
            .bind::<Text, _>(NO_SOURCE)
            .bind::<Text, _>(message)
            .bind::<Integer, _>(attempts_column(attempt))
            .bind::<Text, _>(now())
            .bind::<Text, _>(resource_id)
            .execute(&mut conn)
            .await?;
        Ok(rows > 0)
    }
}
