use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use show_discovery::import::{changed_fields, ImportClient, MessageKind};
use show_discovery::models::DiscoveredEvent;
use show_discovery::{logging, progress, utils, DiscoveryEngine, EngineConfig, VenueRoster};

#[derive(Parser)]
#[command(name = "show-discovery")]
#[command(about = "Discover and normalize upcoming shows from venue web properties")]
#[command(version)]
struct Cli {
    /// Venue roster (JSON array of venue configs)
    #[arg(long, global = true)]
    venues: Option<PathBuf>,
    /// Engine config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured venues
    Venues,
    /// Cheap listing pass for one or more venues
    Preview {
        #[arg(required = true)]
        slugs: Vec<String>,
    },
    /// Full extraction for a venue; all previewed events when no IDs are given
    Scrape { slug: String, ids: Vec<String> },
    /// Ask the import backend which events it already holds
    Status {
        slug: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Scrape and hand the events to the import backend (dry run unless --live)
    Import {
        slug: String,
        ids: Vec<String>,
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(utils::config_path);
    let venues_path = cli.venues.unwrap_or_else(utils::venues_path);
    let config = EngineConfig::load(&config_path)?;
    let roster = VenueRoster::load(&venues_path)?;
    let engine = DiscoveryEngine::from_config(&config, roster)?;

    match cli.command {
        Commands::Venues => print_json(&engine.venues()),
        Commands::Preview { slugs } => {
            let (callback, rx) = progress::channel();
            let reporter = tokio::spawn(report_progress(rx));
            let results = engine.preview_batch(&slugs, Some(callback.as_ref())).await;
            drop(callback);
            let _ = reporter.await;
            for failed in results.iter().filter(|r| r.error.is_some()) {
                warn!(venue = %failed.venue_slug, error = ?failed.error, "preview failed");
            }
            print_json(&results)
        }
        Commands::Scrape { slug, ids } => {
            let events = scrape(&engine, &slug, ids).await?;
            print_json(&events)
        }
        Commands::Status { slug, ids } => {
            let client = ImportClient::from_config(&config)?;
            let query: Vec<(String, String)> =
                ids.into_iter().map(|id| (id, slug.clone())).collect();
            let statuses = client.check_status(&query).await?;
            print_json(&statuses)
        }
        Commands::Import { slug, ids, live } => {
            let client = ImportClient::from_config(&config)?;
            let events = scrape(&engine, &slug, ids).await?;
            report_changes(&client, &slug, &events).await;
            let report = client.import(&events, !live).await?;
            for (kind, line) in report.classified() {
                match kind {
                    MessageKind::Error | MessageKind::Rejected => warn!("{line}"),
                    _ => info!("{line}"),
                }
            }
            print_json(&report)
        }
    }
}

async fn scrape(engine: &DiscoveryEngine, slug: &str, ids: Vec<String>) -> Result<Vec<DiscoveredEvent>> {
    let ids = if ids.is_empty() {
        engine
            .preview(slug)
            .await?
            .into_iter()
            .map(|preview| preview.id)
            .collect()
    } else {
        ids
    };

    let (callback, rx) = progress::channel();
    let reporter = tokio::spawn(report_progress(rx));
    let events = engine.scrape(slug, &ids, Some(callback.as_ref())).await;
    drop(callback);
    let _ = reporter.await;
    Ok(events?)
}

/// Logs which already-imported events would change. Status lookup failures
/// only cost the summary, never the import.
async fn report_changes(client: &ImportClient, slug: &str, events: &[DiscoveredEvent]) {
    let query: Vec<(String, String)> = events
        .iter()
        .map(|event| (event.id.clone(), slug.to_string()))
        .collect();
    let statuses = match client.check_status(&query).await {
        Ok(statuses) => statuses,
        Err(err) => {
            warn!(error = %err, "status check failed");
            return;
        }
    };
    for status in statuses.iter().filter(|s| s.exists) {
        let (Some(snapshot), Some(event)) = (
            status.snapshot.as_ref(),
            events.iter().find(|event| event.id == status.id),
        ) else {
            continue;
        };
        let changed = changed_fields(snapshot, event);
        if !changed.is_empty() {
            info!(id = %event.id, title = %event.title, fields = ?changed, "imported event changed upstream");
        }
    }
}

async fn report_progress(mut rx: tokio::sync::mpsc::UnboundedReceiver<progress::ScrapeProgress>) {
    while let Some(update) = rx.recv().await {
        eprintln!(
            "[{:?}] {}/{} {}",
            update.phase, update.current, update.total, update.item_label
        );
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("unable to render output")?;
    println!("{rendered}");
    Ok(())
}
