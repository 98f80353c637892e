//! Enqueue command.

use anyhow::{bail, Context};
use console::style;

use transcriptq::config::{Config, QueueBackendType};
use transcriptq::queue::{self, EnqueueOptions, EnqueueReason, TranscriptQueue};

use super::helpers::open_repository;

/// Queue a transcript job, creating the video row if needed.
pub async fn cmd_enqueue(
    config: &Config,
    resource_id: &str,
    provider_id: &str,
    language: &str,
    force: bool,
) -> anyhow::Result<()> {
    if config.queue.backend == QueueBackendType::Memory {
        bail!("enqueue needs a shared queue backend; the memory queue only lives inside `worker`");
    }

    let repo = open_repository(config).await?;
    if repo.insert_video(resource_id, language).await? {
        println!("  {} Created video row {}", style("+").cyan(), resource_id);
    }

    let store = queue::connect(&config.queue)
        .await
        .context("Failed to connect to queue store")?;
    let queue = TranscriptQueue::new(store, config.queue.dedupe_ttl());

    let result = queue
        .enqueue(resource_id, provider_id, language, EnqueueOptions { force })
        .await;

    match result.reason {
        EnqueueReason::Queued => println!(
            "{} Queued {} ({})",
            style("✓").green(),
            resource_id,
            language
        ),
        EnqueueReason::Duplicate => println!(
            "{} {} ({}) is already queued or in progress; use --force to re-queue",
            style("!").yellow(),
            resource_id,
            language
        ),
        EnqueueReason::StoreUnavailable => {
            bail!("queue store unavailable, job for {} was not queued", resource_id)
        }
    }
    Ok(())
}
