//! Initialize command.

use console::style;

use transcriptq::config::Config;

use super::helpers::open_repository;

/// Create the videos table in the configured database.
pub async fn cmd_init(config: &Config) -> anyhow::Result<()> {
    open_repository(config).await?;

    println!(
        "{} Initialized transcript storage in {}",
        style("✓").green(),
        config.database.url
    );
    if config.source_path.is_none() {
        println!(
            "  {} No config file found, using defaults",
            style("!").yellow()
        );
    }
    Ok(())
}
