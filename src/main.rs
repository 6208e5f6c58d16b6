//! # Catalog Harvest CLI (`harv`)
//!
//! The `harv` binary drives the harvest pipeline: database initialization,
//! source and profile inspection, and running harvest jobs.
//!
//! ## Usage
//!
//! ```bash
//! harv --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harv init` | Create the SQLite database and run schema migrations |
//! | `harv sources` | List configured sources and their mapping profiles |
//! | `harv profiles` | List loaded mapping profiles |
//! | `harv run <source>` | Run one harvest job against a configured source |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use catalog_harvest::config::{self, Config};
use catalog_harvest::error::HarvestError;
use catalog_harvest::job::HarvestRunner;
use catalog_harvest::registry::ProfileRegistry;
use catalog_harvest::retry::RetryPolicy;
use catalog_harvest::source::{DcatJsonSource, SourceCatalog};
use catalog_harvest::sqlite_store::SqliteStore;
use catalog_harvest::target::HttpTargetCatalog;
use catalog_harvest::{db, migrate};

/// Catalog Harvest — pull dataset descriptions from a remote open-data
/// portal and reconcile them into a target catalog.
#[derive(Parser)]
#[command(
    name = "harv",
    about = "Catalog Harvest — reconcile open-data portal records into a target catalog",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the harvest database schema.
    ///
    /// Creates the SQLite database file and the job/object tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// List configured sources and whether their profiles resolve.
    Sources,

    /// List loaded mapping profiles.
    Profiles,

    /// Run one harvest job against a configured source.
    Run {
        /// Source name from the `[sources.<name>]` config table.
        source: String,

        /// List the source and report counts without fetching or importing.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => cmd_init(&config).await,
        Commands::Sources => cmd_sources(&config),
        Commands::Profiles => cmd_profiles(&config),
        Commands::Run { source, dry_run } => cmd_run(&config, &source, dry_run).await,
    }
}

async fn cmd_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

fn cmd_sources(config: &Config) -> Result<()> {
    let registry = ProfileRegistry::from_config(config)?;

    println!("{:<16} {:<40} {:<20} PROFILE OK", "SOURCE", "ENDPOINT", "PROFILE");
    let mut names: Vec<&String> = config.sources.keys().collect();
    names.sort();
    for name in names {
        let source = &config.sources[name];
        let resolved = registry.find(&source.profile).is_some();
        println!(
            "{:<16} {:<40} {:<20} {}",
            name, source.endpoint, source.profile, resolved
        );
    }
    Ok(())
}

fn cmd_profiles(config: &Config) -> Result<()> {
    let registry = ProfileRegistry::from_config(config)?;
    if registry.is_empty() {
        println!("No mapping profiles in {}", config.profiles.dir.display());
        return Ok(());
    }
    for name in registry.names() {
        println!("{}", name);
    }
    Ok(())
}

async fn cmd_run(config: &Config, source_name: &str, dry_run: bool) -> Result<()> {
    let source_config = config
        .sources
        .get(source_name)
        .with_context(|| format!("Unknown source: '{}'. See `harv sources`.", source_name))?;

    // The profile must resolve before any network call.
    let registry = ProfileRegistry::from_config(config)?;
    let profile = registry
        .find(&source_config.profile)
        .with_context(|| {
            format!(
                "Source '{}' names unknown mapping profile '{}'",
                source_name, source_config.profile
            )
        })?
        .clone();

    let source = DcatJsonSource::new(source_config)?;
    let retry = RetryPolicy::from_config(&config.retry);

    if dry_run {
        let guids = retry
            .run(|| source.list(), HarvestError::is_retryable)
            .await?;
        println!("run {} (dry-run)", source_name);
        println!("  records listed: {}", guids.len());
        return Ok(());
    }

    let target = HttpTargetCatalog::new(&config.target)?;
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    let store = SqliteStore::new(pool);

    let runner = HarvestRunner::new(
        source_name,
        source,
        target,
        store,
        profile,
        retry,
        config.import.concurrency,
    );

    let cancel = CancellationToken::new();
    let report = runner.run(cancel).await?;

    println!("run {}", source_name);
    println!("  job: {}", report.job.id);
    println!(
        "  outcome: {}",
        report
            .job
            .outcome
            .map(|o| o.as_str())
            .unwrap_or("unknown")
    );
    println!("  created: {}", report.summary.created);
    println!("  updated: {}", report.summary.updated);
    println!("  skipped: {}", report.summary.skipped);
    println!("  errored: {}", report.summary.errored);
    println!("  flagged missing: {}", report.summary.flagged_missing);
    if let Some(error) = &report.job.error {
        println!("  error: {}", error);
    }
    println!("ok");
    Ok(())
}
