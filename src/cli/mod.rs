//! CLI parser and command dispatch.

mod enqueue;
mod fetch;
mod helpers;
mod init;
mod promote;
mod status;
mod worker;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use transcriptq::config::{Config, QueueBackendType};
use transcriptq::models::DEFAULT_LANGUAGE;

#[derive(Parser)]
#[command(name = "transcriptq")]
#[command(about = "Caption transcript acquisition queue")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the videos table if it does not exist
    Init,

    /// Run transcript workers until interrupted
    Worker {
        /// Number of concurrent worker loops
        #[arg(short, long, default_value = "1")]
        workers: usize,
        /// Queue backend (overrides config)
        #[arg(long, value_enum)]
        queue_backend: Option<QueueBackendType>,
        /// Video ids to enqueue before starting (used as both resource and provider id)
        videos: Vec<String>,
        /// Language for the seeded videos
        #[arg(short, long, default_value = DEFAULT_LANGUAGE)]
        language: String,
    },

    /// Queue a transcript job for a video
    Enqueue {
        /// Local video resource id
        resource_id: String,
        /// Id of the video at the upstream host
        provider_id: String,
        /// Caption language
        #[arg(short, long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        /// Bypass the duplicate guard
        #[arg(short, long)]
        force: bool,
    },

    /// Move due retries back to the ready queue once
    Promote,

    /// Fetch a transcript directly, without the queue
    Fetch {
        /// Id of the video at the upstream host
        provider_id: String,
        /// Caption language
        #[arg(short, long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        /// Apply sentence normalization
        #[arg(short, long)]
        normalize: bool,
        /// Print segments as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show queue depths and transcript state
    Status {
        /// Video resource id to inspect
        resource_id: Option<String>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_with_override(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    if let Some(path) = &config.source_path {
        tracing::info!("Using config {}", path.display());
    }

    match cli.command {
        Commands::Init => init::cmd_init(&config).await,
        Commands::Worker {
            workers,
            queue_backend,
            videos,
            language,
        } => worker::cmd_worker(&config, workers, queue_backend, videos, &language).await,
        Commands::Enqueue {
            resource_id,
            provider_id,
            language,
            force,
        } => enqueue::cmd_enqueue(&config, &resource_id, &provider_id, &language, force).await,
        Commands::Promote => promote::cmd_promote(&config).await,
        Commands::Fetch {
            provider_id,
            language,
            normalize,
            json,
        } => fetch::cmd_fetch(&config, &provider_id, &language, normalize, json).await,
        Commands::Status { resource_id } => status::cmd_status(&config, resource_id).await,
    }
}
