//! Dedupe guard: at most one queued or in-flight job per (resource, language).

use std::time::Duration;

use tracing::warn;

use super::{BoxedQueueStore, QueueResult};

/// Outcome of [`DedupeGuard::try_reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The guard key was created (or force-rewritten).
    Reserved,
    /// An unexpired guard already exists.
    Duplicate,
    /// The backing store could not be reached; nothing was reserved.
    Unavailable,
}

/// TTL-bound existence markers keyed by (resource, language).
#[derive(Clone)]
pub struct DedupeGuard {
    store: BoxedQueueStore,
    ttl: Duration,
}

impl DedupeGuard {
    pub fn new(store: BoxedQueueStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(resource_id: &str, language: &str) -> String {
        format!("dedupe:{}:{}", resource_id, language)
    }

    /// Reserve the guard for a (resource, language) pair.
    ///
    /// Without `force` this is create-if-absent; with `force` the key is
    /// rewritten unconditionally. Store failures refuse the reservation.
    pub async fn try_reserve(&self, resource_id: &str, language: &str, force: bool) -> Reservation {
        let key = Self::key(resource_id, language);
        let result = if force {
            self.store.overwrite(&key, self.ttl).await.map(|_| true)
        } else {
            self.store.reserve(&key, self.ttl).await
        };

        match result {
            Ok(true) => Reservation::Reserved,
            Ok(false) => Reservation::Duplicate,
            Err(e) => {
                warn!(resource_id, language, "Dedupe guard unavailable: {}", e);
                Reservation::Unavailable
            }
        }
    }

    /// Extend the guard so it covers a scheduled retry window.
    pub async fn refresh(&self, resource_id: &str, language: &str, extra: Duration) -> QueueResult<()> {
        self.store
            .overwrite(&Self::key(resource_id, language), self.ttl + extra)
            .await
    }

    /// Remove the guard once the job reaches a terminal state.
    pub async fn clear(&self, resource_id: &str, language: &str) -> QueueResult<()> {
        self.store.release(&Self::key(resource_id, language)).await
    }

    pub async fn is_held(&self, resource_id: &str, language: &str) -> QueueResult<bool> {
        self.store.exists(&Self::key(resource_id, language)).await
    }
}
