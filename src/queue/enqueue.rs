//! Enqueue API and retry scheduling over a queue store.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{now_ms, BoxedQueueStore, DedupeGuard, QueueResult, Reservation};
use crate::models::Job;

/// Options for [`TranscriptQueue::enqueue`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Bypass the dedupe guard and re-enqueue unconditionally.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueReason {
    Queued,
    Duplicate,
    StoreUnavailable,
}

impl EnqueueReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Duplicate => "duplicate",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl std::fmt::Display for EnqueueReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnqueueResult {
    pub accepted: bool,
    pub reason: EnqueueReason,
}

impl EnqueueResult {
    fn accepted() -> Self {
        Self {
            accepted: true,
            reason: EnqueueReason::Queued,
        }
    }

    fn rejected(reason: EnqueueReason) -> Self {
        Self {
            accepted: false,
            reason,
        }
    }
}

/// The transcript job queue: ready list, delayed set and dedupe guard over
/// one shared store.
#[derive(Clone)]
pub struct TranscriptQueue {
    store: BoxedQueueStore,
    guard: DedupeGuard,
}

impl TranscriptQueue {
    pub fn new(store: BoxedQueueStore, dedupe_ttl: Duration) -> Self {
        let guard = DedupeGuard::new(store.clone(), dedupe_ttl);
        Self { store, guard }
    }

    pub fn store(&self) -> &BoxedQueueStore {
        &self.store
    }

    pub fn guard(&self) -> &DedupeGuard {
        &self.guard
    }

    /// Accept a new transcript job for a resource.
    pub async fn enqueue(
        &self,
        resource_id: &str,
        provider_resource_id: &str,
        language: &str,
        options: EnqueueOptions,
    ) -> EnqueueResult {
        let job = Job::new(resource_id, provider_resource_id, language);

        match self
            .guard
            .try_reserve(&job.resource_id, &job.language, options.force)
            .await
        {
            Reservation::Reserved => {}
            Reservation::Duplicate => {
                debug!(
                    resource_id = %job.resource_id,
                    language = %job.language,
                    "Transcript job already queued or in flight"
                );
                return EnqueueResult::rejected(EnqueueReason::Duplicate);
            }
            Reservation::Unavailable => {
                return EnqueueResult::rejected(EnqueueReason::StoreUnavailable);
            }
        }

        let pushed = match job.to_payload() {
            Ok(payload) => self.store.push(&payload).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(e) = pushed {
            warn!(
                resource_id = %job.resource_id,
                language = %job.language,
                "Failed to push transcript job: {}", e
            );
            // Do not leave a guard behind for a job that never made it into the queue.
            if let Err(e) = self.guard.clear(&job.resource_id, &job.language).await {
                warn!(resource_id = %job.resource_id, "Failed to release dedupe guard: {}", e);
            }
            return EnqueueResult::rejected(EnqueueReason::StoreUnavailable);
        }

        info!(
            resource_id = %job.resource_id,
            language = %job.language,
            force = options.force,
            "Transcript job queued"
        );
        EnqueueResult::accepted()
    }

    /// Place the next attempt of `job` in the delayed set, due after `delay`.
    ///
    /// The dedupe guard is refreshed so it outlives the delay window.
    pub async fn schedule_retry(&self, job: &Job, delay: Duration) -> QueueResult<Job> {
        let next = job.next_attempt();
        let payload = next.to_payload()?;
        let due = now_ms().saturating_add(delay.as_millis() as i64);
        self.store.schedule(&payload, due).await?;

        if let Err(e) = self
            .guard
            .refresh(&next.resource_id, &next.language, delay)
            .await
        {
            warn!(resource_id = %next.resource_id, "Failed to refresh dedupe guard: {}", e);
        }
        Ok(next)
    }

    /// Bounded blocking pop of one raw payload.
    pub async fn pop(&self, wait: Duration) -> QueueResult<Option<String>> {
        self.store.pop(wait).await
    }
}
