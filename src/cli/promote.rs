//! Promote command.

use anyhow::Context;
use console::style;

use transcriptq::config::Config;
use transcriptq::queue::{self, DelayedJobPromoter};

/// Run a single promotion sweep of the delayed set.
pub async fn cmd_promote(config: &Config) -> anyhow::Result<()> {
    let store = queue::connect(&config.queue)
        .await
        .context("Failed to connect to queue store")?;
    let promoter = DelayedJobPromoter::new(
        store.clone(),
        config.queue.promote_batch_size,
        config.queue.promote_interval(),
    );

    let promoted = promoter.tick().await?;
    let remaining = store.delayed_len().await?;
    println!(
        "{} Promoted {} job(s), {} still delayed",
        style("✓").green(),
        promoted,
        remaining
    );
    Ok(())
}
