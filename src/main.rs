use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use replay_server::config::{AppConfig, CliConfig, FileConfig};
use replay_server::importer::ImportManager;
use replay_server::library_store::SqliteLibraryStore;
use replay_server::provider::ProviderGateway;
use replay_server::recommend::RecommendationEngine;
use replay_server::server::{self, RequestsLoggingLevel, ServerConfig};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite library database file.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to a TOML config file. Its values override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// OAuth client id for the music provider.
    #[clap(long)]
    pub client_id: Option<String>,

    /// OAuth client secret for the music provider.
    #[clap(long)]
    pub client_secret: Option<String>,

    /// Timeout in seconds for provider requests.
    #[clap(long, default_value_t = 30)]
    pub provider_timeout_sec: u64,

    /// Number of days to retain finished import runs before pruning. Set to 0 to disable pruning.
    #[clap(long, default_value_t = 30)]
    pub run_retention_days: u64,

    /// Interval in hours between pruning runs. Only used if run_retention_days > 0.
    #[clap(long, default_value_t = 24)]
    pub prune_interval_hours: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .ok();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_path: cli_args.db_path,
        port: cli_args.port,
        metrics_port: cli_args.metrics_port,
        logging_level: cli_args.logging_level,
        client_id: cli_args.client_id,
        client_secret: cli_args.client_secret,
        run_retention_days: cli_args.run_retention_days,
        prune_interval_hours: cli_args.prune_interval_hours,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening SQLite library database at {:?}...", config.db_path);
    let store = SqliteLibraryStore::new(&config.db_path)?;

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    let gateway = Arc::new(ProviderGateway::new(
        config.provider.clone(),
        store.clone(),
        config.backoff.clone(),
        cli_args.provider_timeout_sec,
    )?);
    let import_manager = Arc::new(ImportManager::new(
        store.clone(),
        gateway.clone(),
        config.import.clone(),
    ));
    let recommender = Arc::new(RecommendationEngine::new(store.clone(), gateway.clone()));

    // Spawn background task for import run pruning if enabled
    if config.run_retention_days > 0 {
        let retention_days = config.run_retention_days;
        let interval_hours = config.prune_interval_hours;
        let pruning_store = store.clone();

        info!(
            "Import run pruning enabled: retaining {} days, pruning every {} hours",
            retention_days, interval_hours
        );

        tokio::spawn(async move {
            let interval = Duration::from_secs(interval_hours * 60 * 60);
            let mut ticker = tokio::time::interval(interval);

            // Skip the first immediate tick, wait for the first interval
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
                match pruning_store.prune_import_runs_older_than(&cutoff) {
                    Ok(count) => {
                        if count > 0 {
                            info!("Pruned {} old import runs", count);
                        }
                    }
                    Err(e) => {
                        error!("Failed to prune import runs: {}", e);
                    }
                }
            }
        });
    }

    let state = server::make_state(
        ServerConfig {
            port: config.port,
            metrics_port: config.metrics_port,
            requests_logging_level: config.logging_level,
        },
        store,
        gateway,
        import_manager,
        recommender,
    );
    server::run_server(state).await
}
