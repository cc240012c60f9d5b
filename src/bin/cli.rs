//! FTBFS Tracker CLI
//!
//! Local execution entry point: one-shot fetches, the polling service with
//! its dashboard, and maintenance commands over the record store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use clap::{Parser, Subcommand};
use ftbfs_tracker::{
    error::Result,
    models::{Config, PatternFile, RecordFilter},
    pipeline::{self, Reconciler, Scheduler},
    services::{Classifier, LaunchpadClient, LogFetcher},
    storage::{LocalStore, RecordStore},
    utils::http,
};

/// ftbfs - Failed-To-Build-From-Source tracker
#[derive(Parser, Debug)]
#[command(
    name = "ftbfs",
    version,
    about = "Track packages that fail to build on the build farm"
)]
struct Cli {
    /// Path to storage directory containing config and records
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one reconciliation cycle
    Fetch {
        /// Only poll builds of this source package
        #[arg(long)]
        source: Option<String>,
    },

    /// Poll continuously and serve the dashboard
    Serve {
        /// Dashboard port (default from config)
        #[arg(long)]
        port: Option<u16>,

        /// Seconds between cycles (default from config)
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Re-label stored records with the current patterns
    Reclassify,

    /// List stored failures with a given cause
    Query {
        /// Cause label to match
        #[arg(long)]
        cause: String,

        /// Print only the number of matching records
        #[arg(long)]
        count: bool,
    },

    /// Validate configuration and pattern files
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn load_classifier(storage_dir: &Path) -> Result<Classifier> {
    let overrides = PatternFile::load_optional(storage_dir.join("patterns.toml"))?;
    if !overrides.is_empty() {
        log::info!("Loaded {} pattern overrides", overrides.len());
    }
    Classifier::layered(overrides)
}

fn build_reconciler(
    config: Arc<Config>,
    store: Arc<dyn RecordStore>,
    classifier: Classifier,
) -> Result<Reconciler> {
    let client = http::create_client(&config.fetch)?;
    let farm = LaunchpadClient::new(
        client.clone(),
        config.farm.clone(),
        config.fetch.max_concurrent,
    );
    let logs = LogFetcher::with_client(client, &config.fetch);
    Ok(Reconciler::new(
        Arc::new(farm),
        Arc::new(logs),
        store,
        Arc::new(classifier),
        config,
    ))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("FTBFS tracker starting...");

    // Load configurations
    let config_path = cli.storage_dir.join("config.toml");
    let mut config = Config::load_or_default(&config_path);
    config.validate()?;

    log::info!("Loaded configuration from {}", cli.storage_dir.display());

    match cli.command {
        Command::Fetch { source } => {
            if source.is_some() {
                config.farm.source_name = source;
            }
            let store: Arc<dyn RecordStore> = Arc::new(LocalStore::open(&cli.storage_dir).await?);
            let classifier = load_classifier(&cli.storage_dir)?;
            let reconciler = build_reconciler(Arc::new(config), store, classifier)?;

            let report = reconciler.run_cycle().await;
            log::info!(
                "Fetch complete: {} failing packages observed",
                report.observed.len()
            );
        }

        Command::Serve {
            port,
            interval_secs,
        } => {
            if let Some(port) = port {
                config.dashboard.port = port;
            }
            if let Some(secs) = interval_secs {
                config.schedule.interval_secs = secs;
            }
            config.validate()?;

            let store: Arc<dyn RecordStore> = Arc::new(LocalStore::open(&cli.storage_dir).await?);
            let classifier = load_classifier(&cli.storage_dir)?;
            let config = Arc::new(config);
            let reconciler = build_reconciler(Arc::clone(&config), Arc::clone(&store), classifier)?;
            let scheduler = Scheduler::new(Arc::new(reconciler), config.schedule.interval());

            serve(&config, store, scheduler).await?;
        }

        Command::Reclassify => {
            let store = LocalStore::open(&cli.storage_dir).await?;
            let classifier = load_classifier(&cli.storage_dir)?;
            let report = pipeline::run_reclassify(&store, &classifier).await?;
            log::info!(
                "Reclassify complete: {} of {} records changed",
                report.changed,
                report.examined
            );
        }

        Command::Query { cause, count } => {
            let store = LocalStore::open(&cli.storage_dir).await?;
            let filter = RecordFilter::by_cause(cause);
            if count {
                println!("{}", store.count_matching(&filter).await?);
            } else {
                for record in store.find_matching(&filter).await? {
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        record.package, record.version, record.arch, record.component, record.url
                    );
                }
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            log::info!("✓ Config OK");

            let classifier = load_classifier(&cli.storage_dir)?;
            log::info!("✓ Patterns OK ({} rules)", classifier.rules().len());

            log::info!("All validations passed!");
        }
    }

    log::info!("Done!");

    Ok(())
}

/// Run the scheduler and dashboard until Ctrl-C.
#[cfg(feature = "dashboard")]
async fn serve(config: &Config, store: Arc<dyn RecordStore>, scheduler: Scheduler) -> Result<()> {
    use ftbfs_tracker::dashboard;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.dashboard.port)).await?;
    let (snapshots, refresher) = dashboard::spawn_refresher(
        Arc::clone(&store),
        config.dashboard.refresh(),
        shutdown_rx.clone(),
    );
    let server = tokio::spawn(dashboard::serve(listener, snapshots, store, shutdown_rx.clone()));
    let polling = tokio::spawn(async move { scheduler.run_periodic(shutdown_rx).await });

    wait_for_ctrl_c().await;
    let _ = shutdown_tx.send(true);

    let cycles = join_logged("Scheduler", polling).await;
    join_logged("Dashboard refresher", refresher).await;
    match server.await {
        Ok(result) => result?,
        Err(e) => log::error!("Dashboard task ended abnormally: {e}"),
    }
    log::info!("Stopped after {cycles} cycles");
    Ok(())
}

/// Run the scheduler until Ctrl-C.
#[cfg(not(feature = "dashboard"))]
async fn serve(_config: &Config, _store: Arc<dyn RecordStore>, scheduler: Scheduler) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let polling = tokio::spawn(async move { scheduler.run_periodic(shutdown_rx).await });

    wait_for_ctrl_c().await;
    let _ = shutdown_tx.send(true);

    let cycles = join_logged("Scheduler", polling).await;
    log::info!("Stopped after {cycles} cycles");
    Ok(())
}

/// Wait for a background task, logging a panic or cancellation instead of
/// dropping it.
async fn join_logged<T: Default>(name: &str, handle: JoinHandle<T>) -> T {
    match handle.await {
        Ok(value) => value,
        Err(e) => {
            log::error!("{name} task ended abnormally: {e}");
            T::default()
        }
    }
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Cannot listen for Ctrl-C, shutting down: {e}");
        return;
    }
    log::info!("Shutdown requested; waiting for the current cycle to finish");
}
