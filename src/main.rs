use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use autocat_sync::crawling::report::{PartialPanoramaError, completeness_report};
use autocat_sync::crawling::{MediaDownloader, SyncOrchestrator};
use autocat_sync::domain::EntityKind;
use autocat_sync::infrastructure::entity_store::PendingMedia;
use autocat_sync::infrastructure::{
    AppConfig, EntityStore, FeedSource, HttpClient, HttpClientConfig, HttpFeed,
    init_logging_with_config,
};

#[derive(Debug, Parser)]
#[command(name = "autocat-sync", version, about)]
struct Cli {
    /// Configuration file (TOML or JSON); AUTOCAT__* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides logging.level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one sync pass against the feed
    Sync {
        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Report stored completeness without touching the network
    Verify {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct Verification {
    rows: Vec<(EntityKind, i64)>,
    pending_media: PendingMedia,
    partial_panoramas: Vec<PartialPanoramaError>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging_with_config(&config.logging)?;

    let store = EntityStore::open(&config.database)
        .await
        .with_context(|| format!("Failed to open store at {}", config.database.url))?;

    match cli.command {
        Command::Sync { json } => sync(config, store, json).await,
        Command::Verify { json } => verify(&store, json).await,
    }
}

async fn sync(config: AppConfig, store: EntityStore, json: bool) -> Result<()> {
    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, finishing in-flight writes");
            shutdown.cancel();
        }
    });

    let client = Arc::new(HttpClient::new(HttpClientConfig::from_app(&config))?);
    let feed: Arc<dyn FeedSource> = Arc::new(HttpFeed::new(
        Arc::clone(&client),
        config.feed.clone(),
        token.clone(),
    ));
    let downloader: Arc<dyn MediaDownloader> = client;

    let orchestrator = SyncOrchestrator::new(feed, store, downloader, &config, token);
    let report = orchestrator.run_pass().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

async fn verify(store: &EntityStore, json: bool) -> Result<()> {
    let mut rows = Vec::with_capacity(EntityKind::ALL.len());
    for kind in EntityKind::ALL {
        rows.push((kind, store.count(kind).await?));
    }
    let verification = Verification {
        rows,
        pending_media: store.pending_media().await?,
        partial_panoramas: completeness_report(&store.frame_set_summaries().await?),
    };
    info!(
        "Verified store: {} partial panorama sets",
        verification.partial_panoramas.len()
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&verification)?);
        return Ok(());
    }

    for (kind, count) in &verification.rows {
        println!("{kind:<16} {count:>8}");
    }
    println!(
        "pending media    {} photos, {} panorama frames",
        verification.pending_media.photos, verification.pending_media.panorama_frames
    );
    for partial in &verification.partial_panoramas {
        println!("{partial}");
    }
    Ok(())
}
