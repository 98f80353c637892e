//! Durable job queue infrastructure.
//!
//! Provides the storage primitives the pipeline needs, with pluggable backends:
//! - In-memory (single process, ephemeral)
//! - Redis (distributed, multi-process)
//!
//! Every mutation is a single-key atomic operation: create-if-absent for the
//! dedupe guard, list push/pop for the ready queue, sorted-set add/remove for
//! the delayed set.

mod dedupe;
mod enqueue;
mod memory;
mod promoter;

#[cfg(feature = "redis-backend")]
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use dedupe::{DedupeGuard, Reservation};
pub use enqueue::{EnqueueOptions, EnqueueReason, EnqueueResult, TranscriptQueue};
pub use memory::InMemoryQueueStore;
pub use promoter::DelayedJobPromoter;

#[cfg(feature = "redis-backend")]
pub use self::redis::RedisQueueStore;

use crate::config::{QueueBackendType, QueueConfig};

/// Result type for queue store operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors from queue store backends.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue store unavailable: {0}")]
    Unavailable(String),
    #[error("Queue command failed: {0}")]
    Command(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared, thread-safe queue store handle.
pub type BoxedQueueStore = Arc<dyn QueueStore>;

/// Storage primitives backing the dedupe guard, ready queue and delayed set.
///
/// Implementations must be safe for concurrent use by several workers, in
/// this process or others.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Create `key` with a TTL only if it does not exist.
    /// Returns `false` when the key was already present.
    async fn reserve(&self, key: &str, ttl: Duration) -> QueueResult<bool>;

    /// Unconditionally (re)write `key` with a fresh TTL.
    async fn overwrite(&self, key: &str, ttl: Duration) -> QueueResult<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn release(&self, key: &str) -> QueueResult<()>;

    /// Whether `key` currently exists.
    async fn exists(&self, key: &str) -> QueueResult<bool>;

    /// Append a payload to the tail of the ready queue.
    async fn push(&self, payload: &str) -> QueueResult<()>;

    /// Pop the head of the ready queue, waiting at most `wait`.
    async fn pop(&self, wait: Duration) -> QueueResult<Option<String>>;

    /// Add a payload to the delayed set, due at `due_ms` (Unix ms).
    async fn schedule(&self, payload: &str, due_ms: i64) -> QueueResult<()>;

    /// Delayed payloads due at or before `now_ms`, oldest first, at most `limit`.
    async fn due(&self, now_ms: i64, limit: usize) -> QueueResult<Vec<String>>;

    /// Atomically remove `payload` from the delayed set and push it to the
    /// ready queue. Returns `false` if another promoter already moved it.
    async fn promote(&self, payload: &str) -> QueueResult<bool>;

    /// Number of payloads in the ready queue.
    async fn ready_len(&self) -> QueueResult<usize>;

    /// Number of payloads in the delayed set.
    async fn delayed_len(&self) -> QueueResult<usize>;

    /// Check that the store is reachable.
    async fn ping(&self) -> QueueResult<()>;
}

/// Build the configured queue store.
pub async fn connect(config: &QueueConfig) -> QueueResult<BoxedQueueStore> {
    match config.backend {
        QueueBackendType::Memory => Ok(Arc::new(InMemoryQueueStore::new())),
        #[cfg(feature = "redis-backend")]
        QueueBackendType::Redis => Ok(Arc::new(
            RedisQueueStore::new(&config.redis_url, &config.key_prefix).await?,
        )),
        #[cfg(not(feature = "redis-backend"))]
        QueueBackendType::Redis => Err(QueueError::Unavailable(
            "redis backend requires the redis-backend feature".to_string(),
        )),
    }
}

/// Current time as Unix milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
