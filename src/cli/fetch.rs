//! One-off fetch command.

use console::style;
use serde::Serialize;

use transcriptq::config::Config;
use transcriptq::models::Segment;
use transcriptq::normalize::{NormalizeReason, TranscriptNormalizer};
use transcriptq::transcript::TranscriptFetcher;

use super::helpers::format_offset;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchOutput<'a> {
    source: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    normalization: Option<NormalizeReason>,
    segments: &'a [Segment],
}

/// Fetch a transcript through the provider chain and print it.
pub async fn cmd_fetch(
    config: &Config,
    provider_id: &str,
    language: &str,
    normalize: bool,
    json: bool,
) -> anyhow::Result<()> {
    let fetcher = TranscriptFetcher::from_config(config)?;
    let providers = fetcher.available_providers();
    if !json {
        println!(
            "{} Providers: {}",
            style("→").cyan(),
            if providers.is_empty() {
                "none".to_string()
            } else {
                providers.join(", ")
            }
        );
    }

    let fetched = match fetcher.fetch(provider_id, language).await {
        Ok(fetched) => fetched,
        Err(e) => {
            eprintln!(
                "{} {} ({})",
                style("✗").red(),
                e.code.user_message(),
                style(e.code).dim()
            );
            anyhow::bail!(e);
        }
    };

    let (segments, reason) = if normalize {
        let outcome =
            TranscriptNormalizer::from_config(&config.normalize).normalize(&fetched.segments, language);
        (outcome.segments, Some(outcome.reason))
    } else {
        (fetched.segments, None)
    };

    if json {
        let output = FetchOutput {
            source: &fetched.source,
            language,
            normalization: reason,
            segments: &segments,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for segment in &segments {
        println!(
            "{} {}",
            style(format!("[{}]", format_offset(segment.offset_ms))).dim(),
            segment.text
        );
    }
    println!(
        "{} {} segment(s) from {}",
        style("✓").green(),
        segments.len(),
        fetched.source
    );
    if let Some(reason) = reason {
        println!("  normalization: {}", reason);
    }
    Ok(())
}
