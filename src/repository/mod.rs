//! Persistence of per-video transcript state.
//!
//! The pipeline only updates existing rows. Every transition is a single
//! conditional write so a stale or duplicate worker cannot overwrite a
//! terminal state.

mod memory;
mod models;
mod pool;
mod sqlite;
mod util;

use async_trait::async_trait;

use crate::models::{Segment, TranscriptState};

pub use memory::InMemoryTranscriptRepository;
pub use models::VideoRecord;
pub use pool::{AsyncSqliteConnection, AsyncSqlitePool, DieselError};
pub use sqlite::DieselTranscriptRepository;

/// Repository errors.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] DieselError),
    #[error("Video not found: {0}")]
    NotFound(String),
    #[error("Transcript serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Transcript-state transitions on a video row.
///
/// `attempts` is always written as `max(current, attempt)`. The `retrying`,
/// `ready` and `failed` transitions only apply while the row is
/// `processing` and return whether a row was updated.
#[async_trait]
pub trait TranscriptRepository: Send + Sync {
    async fn get(&self, resource_id: &str) -> RepositoryResult<Option<TranscriptState>>;

    /// Fails with [`RepositoryError::NotFound`] when the row does not exist.
    async fn mark_processing(&self, resource_id: &str, attempt: u32) -> RepositoryResult<()>;

    async fn mark_retrying(&self, resource_id: &str, attempt: u32, note: &str)
        -> RepositoryResult<bool>;

    async fn mark_ready(
        &self,
        resource_id: &str,
        segments: &[Segment],
        source: &str,
        attempt: u32,
    ) -> RepositoryResult<bool>;

    async fn mark_failed(&self, resource_id: &str, message: &str, attempt: u32)
        -> RepositoryResult<bool>;
}
