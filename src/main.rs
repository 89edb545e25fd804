use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intelwatcher::config::{Config, MAX_TILES_PER_WORKER};
use intelwatcher::geo::areas::load_areas;
use intelwatcher::intel::IntelClient;
use intelwatcher::metrics;
use intelwatcher::scraper::{PortalDetailUpdater, Scheduler, SchedulerConfig, TileRegistry};
use intelwatcher::storage::create_sqlite_repository;
use intelwatcher::utils::error::FetchError;
use intelwatcher::utils::format_hms;

#[derive(Parser)]
#[command(
    name = "intelwatcher",
    version,
    about = "Harvest portals from the Ingress intel map into a database",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every configured area until all tiles are done
    Scrape {
        /// Worker count, overrides the config
        #[arg(short, long)]
        workers: Option<usize>,

        /// Tiles per worker request, at most 25
        #[arg(short, long)]
        tiles: Option<usize>,

        /// Print Prometheus metrics when finished
        #[arg(long, default_value = "false")]
        metrics: bool,
    },

    /// Fill in names of gyms and stops from portal details
    Update,

    /// Check whether the intel cookie still works
    Check,

    /// Print the number of stored portals
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    config.apply_env();

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, cli.debug, &config.logging.level)?;

    tracing::info!(config = %cli.config.display(), "intelwatcher starting");

    match cli.command {
        Commands::Scrape {
            workers,
            tiles,
            metrics,
        } => {
            if let Some(workers) = workers.filter(|&w| w > 0) {
                config.scraper.workers = workers;
            }
            if let Some(tiles) = tiles {
                if tiles > MAX_TILES_PER_WORKER {
                    anyhow::bail!("Please use a -t count of at most {MAX_TILES_PER_WORKER}");
                }
                config.scraper.tiles_per_worker = tiles;
            }
            scrape(&config, metrics).await?;
        }
        Commands::Update => update(&config).await?,
        Commands::Check => {
            connect(&config).await?;
            tracing::info!("Cookie works!");
        }
        Commands::Stats => {
            let repo = create_sqlite_repository(&config.database.sqlite_path)?;
            println!("Stored portals: {}", repo.portal_count()?);
        }
    }

    Ok(())
}

fn load_config(path: &std::path::Path) -> Result<Config> {
    if path.exists() {
        Config::from_file(path)
    } else {
        eprintln!(
            "Config file {} not found, using defaults and environment",
            path.display()
        );
        Ok(Config::default())
    }
}

fn setup_tracing(format: &str, debug: bool, level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            tracing_subscriber::EnvFilter::new("intelwatcher=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new(format!("intelwatcher={level},warn"))
        }
    });

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> Result<IntelClient> {
    config.validate_session()?;

    match IntelClient::connect(&config.intel, config.scraper.requests_per_second).await {
        Ok(client) => {
            tracing::debug!(version = client.version(), "Connected to intel");
            Ok(client)
        }
        Err(FetchError::SessionExpired) => {
            tracing::error!("Your intel cookie probably ran out, get a new one or check your account");
            Err(FetchError::SessionExpired.into())
        }
        Err(e) => Err(e).context("Failed to connect to intel"),
    }
}

async fn scrape(config: &Config, print_metrics: bool) -> Result<()> {
    config.validate()?;
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;
    let boxes = load_areas(&config.areas, &http)
        .await
        .context("Failed to load areas")?;

    let registry = TileRegistry::from_boxes(&boxes);
    tracing::info!(
        areas = boxes.len(),
        tiles = registry.len(),
        duplicates_removed = registry.duplicates_removed(),
        "Tile grid built"
    );

    let transport = Arc::new(connect(config).await?);
    let sink = create_sqlite_repository(&config.database.sqlite_path)?;
    tracing::info!("Got everything, starting to scrape");

    let mut scheduler = Scheduler::new(
        registry,
        transport,
        sink,
        SchedulerConfig::from_config(config),
    );

    tokio::select! {
        summary = scheduler.run() => {
            tracing::info!(
                iterations = summary.iterations,
                tiles = summary.tiles,
                succeeded = summary.succeeded,
                exhausted = summary.exhausted,
                portals = summary.portals_persisted,
                persist_failures = summary.persist_failures,
                "Total runtime: {}",
                format_hms(summary.elapsed)
            );
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping scrape");
        }
    }

    if print_metrics {
        println!("{}", metrics::encode_metrics().map_err(|e| anyhow::anyhow!("{e}"))?);
    }

    Ok(())
}

async fn update(config: &Config) -> Result<()> {
    let transport = Arc::new(connect(config).await?);
    let sink = create_sqlite_repository(&config.database.sqlite_path)?;

    let updater = PortalDetailUpdater::new(transport, sink);
    for (kind, result) in updater.update_all().await {
        if let Ok(summary) = result {
            tracing::info!(
                kind = %kind,
                found = summary.found,
                updated = summary.updated,
                failed = summary.failed,
                "Update finished"
            );
        }
    }

    Ok(())
}
