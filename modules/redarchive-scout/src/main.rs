use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use redarchive_common::IngestConfig;
use redarchive_scout::browser::{HttpMediaFetcher, RedditBrowser};
use redarchive_scout::comments::extract_post_comments;
use redarchive_scout::gate::StdinGate;
use redarchive_scout::ingest::Ingestor;
use redarchive_scout::legacy::LegacyMigrator;
use redarchive_scout::manifest::BandwidthPolicy;
use redarchive_scout::video::VideoResolver;
use redarchive_store::OpendalBlobStore;

#[derive(Parser)]
#[command(name = "redarchive", about = "Reddit post archiver")]
struct Cli {
    /// Load environment variables from this file before the default `.env`
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl listing pages starting at URL and archive unseen posts
    Ingest {
        #[arg(long)]
        url: String,
        /// Skip the login step and operator confirmation
        #[arg(long)]
        no_login: bool,
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Download hosted videos for posts with an unresolved video slot
    ResolveVideos {
        /// Restrict to these posts (repeatable). Default: every candidate
        #[arg(long = "post-id")]
        post_ids: Vec<Uuid>,
        #[arg(long, default_value_t = BandwidthPolicy::Lowest)]
        bandwidth: BandwidthPolicy,
    },
    /// Print a stored post's comment graph as JSON lines
    Comments {
        #[arg(long)]
        post_id: Uuid,
    },
    /// Rebuild rows for post blobs uploaded without one
    MigrateLegacy,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("redarchive=info".parse()?))
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to load env file {}", path.display()))?;
    }

    let mut config = IngestConfig::from_env()?;
    let store = redarchive_store::connect(&config.db_engine)
        .await
        .context("Failed to open relational store")?;
    let blobs = OpendalBlobStore::new(&config.blob_backend);

    match cli.command {
        Command::Ingest {
            url,
            no_login,
            max_pages,
        } => {
            if max_pages.is_some() {
                config.max_pages = max_pages;
            }
            let browser = RedditBrowser::new(
                &config.browserless_url,
                config.browserless_token.as_deref(),
                config.politeness,
            )?;
            let gate = StdinGate;
            let ingestor = Ingestor::new(&browser, &browser, &blobs, store.as_ref(), &gate, &config);

            let report = ingestor.run(&url, !no_login).await?;
            if !report.failed.is_empty() {
                warn!(failed = report.failed.len(), "Some posts were skipped");
            }
            if report.outcome.is_aborted() {
                bail!("Crawl aborted: {:?}", report.outcome);
            }
            info!(
                ingested = report.ingested.len(),
                outcome = ?report.outcome,
                "Ingest complete"
            );
        }
        Command::ResolveVideos {
            post_ids,
            bandwidth,
        } => {
            let fetcher = HttpMediaFetcher::new()?;
            let resolver =
                VideoResolver::new(&blobs, store.as_ref(), &fetcher, &config).with_policy(bandwidth);
            let ids = (!post_ids.is_empty()).then_some(post_ids.as_slice());

            let report = resolver.run(ids).await?;
            info!(
                resolved = report.resolved.len(),
                failed = report.failed.len(),
                "Video resolution complete"
            );
        }
        Command::Comments { post_id } => {
            let records = extract_post_comments(&blobs, store.as_ref(), &config, post_id).await?;
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        Command::MigrateLegacy => {
            let report = LegacyMigrator::new(&blobs, store.as_ref(), &config)
                .run()
                .await?;
            info!(
                migrated = report.migrated.len(),
                failed = report.failed.len(),
                "Legacy migration complete"
            );
        }
    }

    Ok(())
}
