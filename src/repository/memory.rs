//! In-memory transcript repository with the same transition rules as the
//! SQLite one. Used by tests and the memory-backed demo mode.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{RepositoryError, RepositoryResult, TranscriptRepository};
use crate::models::{Segment, TranscriptState, TranscriptStatus, NO_SOURCE};

#[derive(Clone, Default)]
pub struct InMemoryTranscriptRepository {
    rows: Arc<Mutex<HashMap<String, TranscriptState>>>,
}

impl InMemoryTranscriptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a bare video row if it does not exist yet.
    pub async fn insert_video(&self, resource_id: &str, language: &str) -> bool {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(resource_id) {
            return false;
        }
        rows.insert(
            resource_id.to_string(),
            TranscriptState::new(resource_id, language),
        );
        true
    }

    /// Update a row only while it is processing.
    async fn transition<F>(&self, resource_id: &str, attempt: u32, apply: F) -> bool
    where
        F: FnOnce(&mut TranscriptState) + Send,
    {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(resource_id) {
            Some(state) if state.status == Some(TranscriptStatus::Processing) => {
                apply(state);
                state.attempts = state.attempts.max(attempt);
                state.updated_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl TranscriptRepository for InMemoryTranscriptRepository {
    async fn get(&self, resource_id: &str) -> RepositoryResult<Option<TranscriptState>> {
        Ok(self.rows.lock().await.get(resource_id).cloned())
    }

    async fn mark_processing(&self, resource_id: &str, attempt: u32) -> RepositoryResult<()> {
        let mut rows = self.rows.lock().await;
        let state = rows
            .get_mut(resource_id)
            .ok_or_else(|| RepositoryError::NotFound(resource_id.to_string()))?;
        state.status = Some(TranscriptStatus::Processing);
        state.attempts = state.attempts.max(attempt);
        state.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_retrying(
        &self,
        resource_id: &str,
        attempt: u32,
        note: &str,
    ) -> RepositoryResult<bool> {
        let note = note.to_string();
        Ok(self
            .transition(resource_id, attempt, move |state| {
                state.last_error = Some(note);
            })
            .await)
    }

    async fn mark_ready(
        &self,
        resource_id: &str,
        segments: &[Segment],
        source: &str,
        attempt: u32,
    ) -> RepositoryResult<bool> {
        let segments = segments.to_vec();
        let source = source.to_string();
        Ok(self
            .transition(resource_id, attempt, move |state| {
                state.status = Some(TranscriptStatus::Ready);
                state.transcript = Some(segments);
                state.source = source;
                state.last_error = None;
            })
            .await)
    }

    async fn mark_failed(
        &self,
        resource_id: &str,
        message: &str,
        attempt: u32,
    ) -> RepositoryResult<bool> {
        let message = message.to_string();
        Ok(self
            .transition(resource_id, attempt, move |state| {
                state.status = Some(TranscriptStatus::Failed);
                state.transcript = None;
                state.source = NO_SOURCE.to_string();
                state.last_error = Some(message);
            })
            .await)
    }
}
