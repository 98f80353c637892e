//! In-memory queue store for single-process operation.
//!
//! Lock-based store with the same semantics as the Redis backend, including
//! TTL expiry of reservations. State is not persisted across restarts.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{QueueResult, QueueStore};

#[derive(Debug, Default)]
struct Inner {
    keys: HashMap<String, Instant>,
    ready: VecDeque<String>,
    /// (due_ms, payload), ordered by due time then payload.
    delayed: BTreeSet<(i64, String)>,
}

impl Inner {
    fn key_alive(&mut self, key: &str) -> bool {
        match self.keys.get(key) {
            Some(expires) if *expires > Instant::now() => true,
            Some(_) => {
                self.keys.remove(key);
                false
            }
            None => false,
        }
    }

    fn remove_delayed(&mut self, payload: &str) -> bool {
        let found = self
            .delayed
            .iter()
            .find(|(_, p)| p == payload)
            .cloned();
        match found {
            Some(entry) => self.delayed.remove(&entry),
            None => false,
        }
    }
}

/// In-memory queue store.
#[derive(Clone, Default)]
pub struct InMemoryQueueStore {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the ready queue (head first).
    pub async fn ready_snapshot(&self) -> Vec<String> {
        self.inner.lock().await.ready.iter().cloned().collect()
    }

    /// Snapshot of the delayed set as (due_ms, payload).
    pub async fn delayed_snapshot(&self) -> Vec<(i64, String)> {
        self.inner.lock().await.delayed.iter().cloned().collect()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> QueueResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.key_alive(key) {
            return Ok(false);
        }
        inner.keys.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn overwrite(&self, key: &str, ttl: Duration) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.keys.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn release(&self, key: &str) -> QueueResult<()> {
        self.inner.lock().await.keys.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> QueueResult<bool> {
        Ok(self.inner.lock().await.key_alive(key))
    }

    async fn push(&self, payload: &str) -> QueueResult<()> {
        self.inner.lock().await.ready.push_back(payload.to_string());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, wait: Duration) -> QueueResult<Option<String>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Register interest before checking so a concurrent push is not missed.
            let notified = self.notify.notified();
            if let Some(payload) = self.inner.lock().await.ready.pop_front() {
                return Ok(Some(payload));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.inner.lock().await.ready.pop_front());
            }
        }
    }

    async fn schedule(&self, payload: &str, due_ms: i64) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        // Sorted-set semantics: re-adding a member updates its score.
        inner.remove_delayed(payload);
        inner.delayed.insert((due_ms, payload.to_string()));
        Ok(())
    }

    async fn due(&self, now_ms: i64, limit: usize) -> QueueResult<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .delayed
            .iter()
            .take_while(|(due, _)| *due <= now_ms)
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn promote(&self, payload: &str) -> QueueResult<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.remove_delayed(payload) {
            return Ok(false);
        }
        inner.ready.push_back(payload.to_string());
        drop(inner);
        self.notify.notify_one();
        Ok(true)
    }

    async fn ready_len(&self) -> QueueResult<usize> {
        Ok(self.inner.lock().await.ready.len())
    }

    async fn delayed_len(&self) -> QueueResult<usize> {
        Ok(self.inner.lock().await.delayed.len())
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}
