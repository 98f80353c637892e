//! Shared helper functions for CLI commands.

use console::style;

use transcriptq::config::Config;
use transcriptq::models::{TranscriptState, TranscriptStatus};
use transcriptq::repository::DieselTranscriptRepository;

/// Open the SQLite repository, creating the videos table when missing.
pub async fn open_repository(config: &Config) -> anyhow::Result<DieselTranscriptRepository> {
    let repo = DieselTranscriptRepository::from_url(&config.database.url);
    repo.ensure_schema().await?;
    Ok(repo)
}

/// Format a millisecond offset as `mm:ss.mmm` (hours prefixed when needed).
pub fn format_offset(ms: u64) -> String {
    let total_secs = ms / 1000;
    let (hours, minutes, seconds) = (total_secs / 3600, (total_secs / 60) % 60, total_secs % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, ms % 1000)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, seconds, ms % 1000)
    }
}

pub fn print_state(state: &TranscriptState) {
    let status = match state.status {
        Some(TranscriptStatus::Ready) => style("ready").green(),
        Some(TranscriptStatus::Failed) => style("failed").red(),
        Some(TranscriptStatus::Processing) => style("processing").yellow(),
        None => style("new").dim(),
    };

    println!("{} ({})", style(&state.resource_id).bold(), state.language);
    println!("  {:<10} {}", "status", status);
    println!("  {:<10} {}", "source", state.source);
    println!("  {:<10} {}", "attempts", state.attempts);
    if let Some(segments) = &state.transcript {
        println!("  {:<10} {}", "segments", segments.len());
    }
    if let Some(error) = &state.last_error {
        println!("  {:<10} {}", "error", error);
    }
    if let Some(updated) = state.updated_at {
        println!("  {:<10} {}", "updated", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}
