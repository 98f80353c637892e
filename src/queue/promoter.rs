//! Delayed-job promoter: moves due retries back to the ready queue.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{now_ms, BoxedQueueStore, QueueResult};
use crate::config::QueueConfig;

/// Periodic sweep of the delayed set.
///
/// Safe to run from several processes at once: promotion of a single payload
/// is an atomic remove-then-push, and only the remover pushes.
#[derive(Clone)]
pub struct DelayedJobPromoter {
    store: BoxedQueueStore,
    batch_size: usize,
    interval: Duration,
}

impl DelayedJobPromoter {
    pub fn new(store: BoxedQueueStore, batch_size: usize, interval: Duration) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            interval,
        }
    }

    pub fn from_config(store: BoxedQueueStore, config: &QueueConfig) -> Self {
        Self::new(store, config.promote_batch_size, config.promote_interval())
    }

    /// Promote every entry due now, in bounded batches. Returns how many
    /// payloads this call moved.
    pub async fn tick(&self) -> QueueResult<usize> {
        let now = now_ms();
        let mut promoted = 0;

        loop {
            let due = self.store.due(now, self.batch_size).await?;
            let fetched = due.len();
            let mut moved_in_batch = 0;

            for payload in due {
                if self.store.promote(&payload).await? {
                    moved_in_batch += 1;
                }
            }
            promoted += moved_in_batch;

            // A short batch means the due range is drained. A batch where
            // nothing moved means another promoter is racing us for it.
            if fetched < self.batch_size || moved_in_batch == 0 {
                break;
            }
        }

        if promoted > 0 {
            debug!(promoted, "Promoted delayed transcript jobs");
        }
        Ok(promoted)
    }

    /// Run the sweep every interval until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Delayed-job promoter started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("Delayed-job promotion failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    // Sender gone: treat as shutdown.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Delayed-job promoter stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::queue::{InMemoryQueueStore, QueueStore};

    #[tokio::test]
    async fn test_tick_promotes_only_due_entries() {
        let store = InMemoryQueueStore::new();
        let now = now_ms();
        store.schedule("past", now - 1_000).await.unwrap();
        store.schedule("future", now + 60_000).await.unwrap();

        let promoter = DelayedJobPromoter::new(Arc::new(store.clone()), 100, Duration::from_secs(2));
        assert_eq!(promoter.tick().await.unwrap(), 1);
        assert_eq!(store.ready_snapshot().await, vec!["past".to_string()]);
        assert_eq!(store.delayed_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tick_drains_in_batches() {
        let store = InMemoryQueueStore::new();
        let now = now_ms();
        for i in 0..7 {
            store.schedule(&format!("job-{}", i), now - 10 + i).await.unwrap();
        }

        let promoter = DelayedJobPromoter::new(Arc::new(store.clone()), 3, Duration::from_secs(2));
        assert_eq!(promoter.tick().await.unwrap(), 7);
        assert_eq!(store.delayed_len().await.unwrap(), 0);
        // Oldest due first.
        assert_eq!(store.ready_snapshot().await[0], "job-0");
    }

    #[tokio::test]
    async fn test_concurrent_promoters_move_each_entry_once() {
        let store = InMemoryQueueStore::new();
        let now = now_ms();
        for i in 0..20 {
            store.schedule(&format!("job-{}", i), now - 100).await.unwrap();
        }

        let a = DelayedJobPromoter::new(Arc::new(store.clone()), 5, Duration::from_secs(2));
        let b = a.clone();
        let (ra, rb) = tokio::join!(a.tick(), b.tick());
        assert_eq!(ra.unwrap() + rb.unwrap(), 20);
        assert_eq!(store.ready_len().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_running_promoter_feeds_blocked_pop() {
        let store = InMemoryQueueStore::new();
        let promoter = DelayedJobPromoter::new(Arc::new(store.clone()), 10, Duration::from_millis(20));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { promoter.run(rx).await });

        store.schedule("retry", now_ms() + 50).await.unwrap();
        // Much shorter than the pop's own wait: the promoter, not the pop, wakes it.
        let popped = tokio::time::timeout(Duration::from_secs(1), store.pop(Duration::from_secs(30)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.as_deref(), Some("retry"));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let store = InMemoryQueueStore::new();
        let promoter = DelayedJobPromoter::new(Arc::new(store), 10, Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), promoter.run(rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = InMemoryQueueStore::new();
        let promoter = DelayedJobPromoter::new(Arc::new(store), 10, Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { promoter.run(rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
