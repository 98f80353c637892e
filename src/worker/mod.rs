//! Transcript worker loop.
//!
//! Each iteration promotes due retries, pops one job with a bounded wait and
//! processes it to completion. Several workers, in one process or many, may
//! share the same queue store; the store's atomic pop hands every payload to
//! exactly one of them.

mod stats;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::Job;
use crate::normalize::TranscriptNormalizer;
use crate::queue::{DelayedJobPromoter, QueueResult, TranscriptQueue};
use crate::repository::{RepositoryError, TranscriptRepository};
use crate::retry::RetryPolicy;
use crate::transcript::{ErrorCode, FetchError, FetchedTranscript, TranscriptFetcher};

pub use stats::{StatsSnapshot, WorkerStats};

/// Pause after a queue store error before polling again.
const STORE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

const UNEXPECTED_FAILURE: &str = "Transcript processing failed unexpectedly.";

/// Why a job attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Anything outside the fetch taxonomy. Always retried up to the cap.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl JobError {
    fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::Other(_) => None,
        }
    }

    fn code(&self) -> Option<ErrorCode> {
        self.fetch_error().map(|e| e.code)
    }
}

/// What happened to one popped payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Ready { source: String },
    RetryScheduled { next_attempt: u32, delay: Duration },
    Failed { code: Option<ErrorCode> },
    /// Malformed payload or a resource that no longer exists.
    Dropped,
}

pub struct TranscriptWorker {
    id: usize,
    queue: TranscriptQueue,
    fetcher: Arc<TranscriptFetcher>,
    repo: Arc<dyn TranscriptRepository>,
    normalizer: Option<Arc<TranscriptNormalizer>>,
    policy: RetryPolicy,
    promoter: Option<DelayedJobPromoter>,
    pop_timeout: Duration,
    stats: Arc<WorkerStats>,
}

impl TranscriptWorker {
    pub fn new(
        queue: TranscriptQueue,
        fetcher: Arc<TranscriptFetcher>,
        repo: Arc<dyn TranscriptRepository>,
    ) -> Self {
        Self {
            id: 0,
            queue,
            fetcher,
            repo,
            normalizer: None,
            policy: RetryPolicy::default(),
            promoter: None,
            pop_timeout: Duration::from_secs(5),
            stats: Arc::new(WorkerStats::new()),
        }
    }

    /// A worker wired from configuration, promoting inline each iteration.
    pub fn from_config(
        config: &Config,
        queue: TranscriptQueue,
        fetcher: Arc<TranscriptFetcher>,
        repo: Arc<dyn TranscriptRepository>,
    ) -> Self {
        let promoter = DelayedJobPromoter::from_config(queue.store().clone(), &config.queue);
        Self::new(queue, fetcher, repo)
            .with_policy(RetryPolicy::from(&config.retry))
            .with_normalizer(Arc::new(TranscriptNormalizer::from_config(&config.normalize)))
            .with_promoter(promoter)
            .with_pop_timeout(config.queue.pop_timeout())
    }

    pub fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<TranscriptNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_promoter(mut self, promoter: DelayedJobPromoter) -> Self {
        self.promoter = Some(promoter);
        self
    }

    pub fn with_pop_timeout(mut self, pop_timeout: Duration) -> Self {
        self.pop_timeout = pop_timeout;
        self
    }

    pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Loop until `shutdown` becomes true. A job that is already running is
    /// finished before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = self.id, "Transcript worker started");

        while !*shutdown.borrow() {
            if let Err(e) = self.run_once().await {
                warn!(worker = self.id, "Queue store error: {}", e);
                tokio::select! {
                    _ = tokio::time::sleep(STORE_ERROR_BACKOFF) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            worker = self.id,
            processed = stats.processed,
            succeeded = stats.succeeded,
            retried = stats.retried,
            failed = stats.failed,
            "Transcript worker stopped"
        );
    }

    /// One iteration: promote due retries, pop one job, process it.
    /// Returns `None` when the pop timed out with nothing to do.
    pub async fn run_once(&self) -> QueueResult<Option<JobOutcome>> {
        if let Some(promoter) = &self.promoter {
            if let Err(e) = promoter.tick().await {
                warn!(worker = self.id, "Delayed-job promotion failed: {}", e);
            }
        }

        let Some(payload) = self.queue.pop(self.pop_timeout).await? else {
            return Ok(None);
        };

        let job = match Job::from_payload(&payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(worker = self.id, payload = %payload, "Dropping malformed job payload: {}", e);
                self.stats.record_dropped();
                return Ok(Some(JobOutcome::Dropped));
            }
        };

        Ok(Some(self.process_job(job).await))
    }

    /// Run one attempt of `job` and record its outcome.
    pub async fn process_job(&self, job: Job) -> JobOutcome {
        self.stats.record_processed();
        debug!(
            worker = self.id,
            resource_id = %job.resource_id,
            language = %job.language,
            attempt = job.attempt,
            "Processing transcript job"
        );

        match self.repo.mark_processing(&job.resource_id, job.attempt).await {
            Ok(()) => {}
            Err(RepositoryError::NotFound(_)) => {
                warn!(resource_id = %job.resource_id, "Video no longer exists, dropping job");
                self.release_guard(&job).await;
                self.stats.record_dropped();
                return JobOutcome::Dropped;
            }
            Err(e) => return self.handle_failure(&job, JobError::Other(e.into())).await,
        }

        let attempt = AssertUnwindSafe(self.attempt(&job)).catch_unwind().await;
        let result = match attempt {
            Ok(result) => result,
            Err(panic) => Err(JobError::Other(anyhow::anyhow!(
                "job panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match result {
            Ok(fetched) => {
                info!(
                    resource_id = %job.resource_id,
                    language = %job.language,
                    attempt = job.attempt,
                    provider = %fetched.source,
                    segments = fetched.segments.len(),
                    "Transcript ready"
                );
                self.release_guard(&job).await;
                self.stats.record_succeeded();
                JobOutcome::Ready {
                    source: fetched.source,
                }
            }
            Err(err) => self.handle_failure(&job, err).await,
        }
    }

    /// Fetch, normalize and persist. Returns the stored transcript.
    async fn attempt(&self, job: &Job) -> Result<FetchedTranscript, JobError> {
        let mut fetched = self
            .fetcher
            .fetch(&job.provider_resource_id, &job.language)
            .await?;

        if let Some(normalizer) = &self.normalizer {
            let outcome = normalizer.normalize(&fetched.segments, &job.language);
            debug!(resource_id = %job.resource_id, reason = %outcome.reason, "Normalization finished");
            fetched.segments = outcome.segments;
        }

        let written = self
            .repo
            .mark_ready(&job.resource_id, &fetched.segments, &fetched.source, job.attempt)
            .await
            .map_err(anyhow::Error::from)?;
        if !written {
            warn!(
                resource_id = %job.resource_id,
                "Video left the processing state before the transcript was stored"
            );
        }
        Ok(fetched)
    }

    async fn handle_failure(&self, job: &Job, err: JobError) -> JobOutcome {
        if self.policy.should_retry(err.fetch_error(), job.attempt) {
            let delay = self.policy.delay_for(job.attempt);
            let note = match err.code() {
                Some(code) => format!("Attempt {} failed ({}). Retrying.", job.attempt, code),
                None => format!("Attempt {} failed unexpectedly. Retrying.", job.attempt),
            };

            if let Err(e) = self
                .repo
                .mark_retrying(&job.resource_id, job.attempt, &note)
                .await
            {
                warn!(resource_id = %job.resource_id, "Failed to record retry: {}", e);
            }

            match self.queue.schedule_retry(job, delay).await {
                Ok(next) => {
                    info!(
                        resource_id = %job.resource_id,
                        language = %job.language,
                        attempt = job.attempt,
                        code = ?err.code(),
                        delay_secs = delay.as_secs(),
                        "Transcript fetch failed, retry scheduled: {}", err
                    );
                    self.stats.record_retried();
                    return JobOutcome::RetryScheduled {
                        next_attempt: next.attempt,
                        delay,
                    };
                }
                Err(e) => {
                    warn!(
                        resource_id = %job.resource_id,
                        "Could not schedule retry, failing job: {}", e
                    );
                }
            }
        }

        let message = err
            .code()
            .map(|code| code.user_message())
            .unwrap_or(UNEXPECTED_FAILURE);

        warn!(
            resource_id = %job.resource_id,
            language = %job.language,
            attempt = job.attempt,
            code = ?err.code(),
            "Transcript job failed permanently: {}", err
        );

        match self
            .repo
            .mark_failed(&job.resource_id, message, job.attempt)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(resource_id = %job.resource_id, "Video was not processing, failure not recorded"),
            Err(e) => warn!(resource_id = %job.resource_id, "Failed to record failure: {}", e),
        }
        self.release_guard(job).await;
        self.stats.record_failed();
        JobOutcome::Failed { code: err.code() }
    }

    async fn release_guard(&self, job: &Job) {
        if let Err(e) = self
            .queue
            .guard()
            .clear(&job.resource_id, &job.language)
            .await
        {
            // The guard expires on its own; a later enqueue may need `force`.
            warn!(resource_id = %job.resource_id, "Failed to clear dedupe guard: {}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::models::Segment;
    use crate::queue::{EnqueueOptions, InMemoryQueueStore, QueueStore};
    use crate::repository::InMemoryTranscriptRepository;
    use crate::transcript::TranscriptProvider;

    enum Behavior {
        Succeed,
        Fail(ErrorCode),
        Panic,
    }

    struct Fake(Behavior);

    #[async_trait]
    impl TranscriptProvider for Fake {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch(&self, _: &str, _: &str) -> Result<Vec<Segment>, FetchError> {
            match &self.0 {
                Behavior::Succeed => Ok(vec![Segment::new("hello there", 0, 1000).unwrap()]),
                Behavior::Fail(code) => Err(FetchError::new(*code, "fake", "scripted")),
                Behavior::Panic => panic!("provider exploded"),
            }
        }
    }

    struct Harness {
        store: InMemoryQueueStore,
        queue: TranscriptQueue,
        repo: InMemoryTranscriptRepository,
        worker: TranscriptWorker,
    }

    fn harness(behavior: Behavior) -> Harness {
        let store = InMemoryQueueStore::new();
        let queue = TranscriptQueue::new(Arc::new(store.clone()), Duration::from_secs(60));
        let repo = InMemoryTranscriptRepository::new();
        let fetcher = Arc::new(TranscriptFetcher::new(vec![Arc::new(Fake(behavior))], None));
        let worker = TranscriptWorker::new(queue.clone(), fetcher, Arc::new(repo.clone()))
            .with_policy(RetryPolicy::new(3, vec![Duration::ZERO]))
            .with_pop_timeout(Duration::from_millis(20));
        Harness {
            store,
            queue,
            repo,
            worker,
        }
    }

    #[tokio::test]
    async fn test_empty_queue_times_out() {
        let h = harness(Behavior::Succeed);
        assert_eq!(h.worker.run_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let h = harness(Behavior::Succeed);
        h.store.push("{not a job").await.unwrap();
        assert_eq!(h.worker.run_once().await.unwrap(), Some(JobOutcome::Dropped));
        assert_eq!(h.worker.stats().snapshot().dropped, 1);
    }

    #[tokio::test]
    async fn test_missing_video_drops_job_and_clears_guard() {
        let h = harness(Behavior::Succeed);
        h.queue.enqueue("gone", "abc", "en", EnqueueOptions::default()).await;
        assert_eq!(h.worker.run_once().await.unwrap(), Some(JobOutcome::Dropped));
        assert!(!h.queue.guard().is_held("gone", "en").await.unwrap());
    }

    #[tokio::test]
    async fn test_success_marks_ready() {
        let h = harness(Behavior::Succeed);
        h.repo.insert_video("v1", "en").await;
        h.queue.enqueue("v1", "abc", "en", EnqueueOptions::default()).await;

        let outcome = h.worker.run_once().await.unwrap();
        assert_eq!(
            outcome,
            Some(JobOutcome::Ready {
                source: "fake".to_string()
            })
        );
        let state = h.repo.get("v1").await.unwrap().unwrap();
        assert!(state.is_ready());
        assert!(!h.queue.guard().is_held("v1", "en").await.unwrap());
    }

    #[tokio::test]
    async fn test_normalizer_applies_to_stored_transcript() {
        let h = harness(Behavior::Succeed);
        let worker = h
            .worker
            .with_normalizer(Arc::new(TranscriptNormalizer::default()));
        h.repo.insert_video("v1", "en").await;
        h.queue.enqueue("v1", "abc", "en", EnqueueOptions::default()).await;

        worker.run_once().await.unwrap();
        let state = h.repo.get("v1").await.unwrap().unwrap();
        assert_eq!(state.transcript.unwrap()[0].text, "Hello there.");
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_retry() {
        let h = harness(Behavior::Fail(ErrorCode::TransientFetchError));
        h.repo.insert_video("v1", "en").await;
        h.queue.enqueue("v1", "abc", "en", EnqueueOptions::default()).await;

        let outcome = h.worker.run_once().await.unwrap();
        assert_eq!(
            outcome,
            Some(JobOutcome::RetryScheduled {
                next_attempt: 2,
                delay: Duration::ZERO
            })
        );
        let state = h.repo.get("v1").await.unwrap().unwrap();
        assert!(state.last_error.unwrap().ends_with("Retrying."));
        assert_eq!(h.store.delayed_snapshot().await.len(), 1);
        assert!(h.queue.guard().is_held("v1", "en").await.unwrap());
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_retried() {
        let h = harness(Behavior::Panic);
        h.repo.insert_video("v1", "en").await;
        let outcome = h.worker.process_job(Job::new("v1", "abc", "en")).await;
        assert!(matches!(outcome, JobOutcome::RetryScheduled { next_attempt: 2, .. }));

        // At the cap the unclassified failure becomes a generic failure.
        let outcome = h.worker.process_job(Job::new("v1", "abc", "en").next_attempt().next_attempt()).await;
        assert_eq!(outcome, JobOutcome::Failed { code: None });
        let state = h.repo.get("v1").await.unwrap().unwrap();
        assert_eq!(state.last_error.as_deref(), Some(UNEXPECTED_FAILURE));
    }

    /// Store whose every command fails, as when Redis is down.
    struct DownStore;

    #[async_trait]
    impl QueueStore for DownStore {
        async fn reserve(&self, _: &str, _: Duration) -> QueueResult<bool> {
            Err(down())
        }
        async fn overwrite(&self, _: &str, _: Duration) -> QueueResult<()> {
            Err(down())
        }
        async fn release(&self, _: &str) -> QueueResult<()> {
            Err(down())
        }
        async fn exists(&self, _: &str) -> QueueResult<bool> {
            Err(down())
        }
        async fn push(&self, _: &str) -> QueueResult<()> {
            Err(down())
        }
        async fn pop(&self, _: Duration) -> QueueResult<Option<String>> {
            Err(down())
        }
        async fn schedule(&self, _: &str, _: i64) -> QueueResult<()> {
            Err(down())
        }
        async fn due(&self, _: i64, _: usize) -> QueueResult<Vec<String>> {
            Err(down())
        }
        async fn promote(&self, _: &str) -> QueueResult<bool> {
            Err(down())
        }
        async fn ready_len(&self) -> QueueResult<usize> {
            Err(down())
        }
        async fn delayed_len(&self) -> QueueResult<usize> {
            Err(down())
        }
        async fn ping(&self) -> QueueResult<()> {
            Err(down())
        }
    }

    fn down() -> crate::queue::QueueError {
        crate::queue::QueueError::Unavailable("connection refused".to_string())
    }

    #[tokio::test]
    async fn test_run_exits_when_shutdown_sender_dropped_during_outage() {
        let queue = TranscriptQueue::new(Arc::new(DownStore), Duration::from_secs(60));
        let fetcher = Arc::new(TranscriptFetcher::new(vec![Arc::new(Fake(Behavior::Succeed))], None));
        let worker = TranscriptWorker::new(queue, fetcher, Arc::new(InMemoryTranscriptRepository::new()));

        let (tx, rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), worker.run(rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(Behavior::Succeed);
        let (tx, rx) = watch::channel(false);
        let worker = Arc::new(h.worker);
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(rx).await }
        });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
