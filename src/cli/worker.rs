//! Worker command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use console::style;
use tokio::sync::watch;
use tracing::info;

use transcriptq::config::{Config, QueueBackendType};
use transcriptq::models::TranscriptStatus;
use transcriptq::queue::{self, DelayedJobPromoter, EnqueueOptions, TranscriptQueue};
use transcriptq::repository::{InMemoryTranscriptRepository, TranscriptRepository};
use transcriptq::transcript::TranscriptFetcher;
use transcriptq::worker::{TranscriptWorker, WorkerStats};

use super::helpers::{open_repository, print_state};

const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Run worker loops until Ctrl-C.
///
/// With the memory backend the queue and rows only exist in this process:
/// the seeded videos are processed and the command exits once all of them
/// reached a terminal state.
pub async fn cmd_worker(
    config: &Config,
    workers: usize,
    backend: Option<QueueBackendType>,
    videos: Vec<String>,
    language: &str,
) -> anyhow::Result<()> {
    let mut config = config.clone();
    if let Some(backend) = backend {
        config.queue.backend = backend;
    }
    let in_memory = config.queue.backend == QueueBackendType::Memory;

    let store = queue::connect(&config.queue)
        .await
        .context("Failed to connect to queue store")?;
    store.ping().await.context("Queue store is not reachable")?;
    let queue = TranscriptQueue::new(store, config.queue.dedupe_ttl());

    let fetcher = Arc::new(TranscriptFetcher::from_config(&config)?);
    let providers = fetcher.available_providers();
    if providers.is_empty() {
        println!(
            "{} No transcript providers are enabled; every job will fail",
            style("!").yellow()
        );
    }

    let memory_repo = InMemoryTranscriptRepository::new();
    let repo: Arc<dyn TranscriptRepository> = if in_memory {
        for id in &videos {
            memory_repo.insert_video(id, language).await;
        }
        Arc::new(memory_repo.clone())
    } else {
        let repo = open_repository(&config).await?;
        for id in &videos {
            repo.insert_video(id, language).await?;
        }
        Arc::new(repo)
    };

    for id in &videos {
        let result = queue
            .enqueue(id, id, language, EnqueueOptions::default())
            .await;
        println!("  {} {} ({})", style("+").cyan(), id, result.reason);
    }

    let workers = workers.max(1);
    println!(
        "{} Starting {} worker(s) [{}] with providers: {}",
        style("→").cyan(),
        workers,
        if in_memory { "memory" } else { "redis" },
        providers.join(", ")
    );

    let stats = Arc::new(WorkerStats::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let promoter = DelayedJobPromoter::from_config(queue.store().clone(), &config.queue);
    let promoter_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { promoter.run(shutdown).await }
    });

    let handles: Vec<_> = (0..workers)
        .map(|id| {
            let worker =
                TranscriptWorker::from_config(&config, queue.clone(), fetcher.clone(), repo.clone())
                    .with_id(id)
                    .with_stats(stats.clone());
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        })
        .collect();

    if in_memory && !videos.is_empty() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted, finishing in-flight jobs"),
            _ = wait_until_settled(repo.as_ref(), &videos) => {}
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Interrupted, finishing in-flight jobs");
    }

    let _ = shutdown_tx.send(true);
    for handle in handles {
        handle.await.context("Worker task failed")?;
    }
    promoter_handle.await.context("Promoter task failed")?;

    let snapshot = stats.snapshot();
    println!(
        "{} processed {}, ready {}, retried {}, failed {}, dropped {}",
        style("✓").green(),
        snapshot.processed,
        snapshot.succeeded,
        snapshot.retried,
        snapshot.failed,
        snapshot.dropped
    );

    if in_memory {
        for id in &videos {
            if let Some(state) = repo.get(id).await? {
                print_state(&state);
            }
        }
    }
    Ok(())
}

/// Resolve once every listed video is ready or failed.
async fn wait_until_settled(repo: &dyn TranscriptRepository, videos: &[String]) {
    loop {
        let mut settled = true;
        for id in videos {
            let status = repo.get(id).await.ok().flatten().and_then(|s| s.status);
            if !matches!(
                status,
                Some(TranscriptStatus::Ready) | Some(TranscriptStatus::Failed)
            ) {
                settled = false;
                break;
            }
        }
        if settled {
            return;
        }
        tokio::time::sleep(IDLE_CHECK_INTERVAL).await;
    }
}
