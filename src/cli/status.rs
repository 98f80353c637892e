//! Status command.

use console::style;

use transcriptq::config::Config;
use transcriptq::queue;
use transcriptq::repository::TranscriptRepository;

use super::helpers::{open_repository, print_state};

/// Show queue depths, per-status row counts and optionally one video's state.
pub async fn cmd_status(config: &Config, resource_id: Option<String>) -> anyhow::Result<()> {
    println!("{}", style("Queue").bold());
    match queue::connect(&config.queue).await {
        Ok(store) => match store.ping().await {
            Ok(()) => {
                println!("  {:<10} {}", "ready", store.ready_len().await?);
                println!("  {:<10} {}", "delayed", store.delayed_len().await?);
            }
            Err(e) => println!("  {} unreachable: {}", style("✗").red(), e),
        },
        Err(e) => println!("  {} unreachable: {}", style("✗").red(), e),
    }

    let repo = open_repository(config).await?;

    println!("{}", style("Transcripts").bold());
    let counts = repo.status_counts().await?;
    if counts.is_empty() {
        println!("  no videos");
    }
    for (status, count) in counts {
        println!("  {:<10} {}", status, count);
    }

    if let Some(id) = resource_id {
        println!();
        match repo.get(&id).await? {
            Some(state) => print_state(&state),
            None => println!("{} No video with id {}", style("!").yellow(), id),
        }
    }
    Ok(())
}
