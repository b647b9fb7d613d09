//! Trust graph indexer
//!
//! This binary provides:
//! - Trust event listening from the hub contract
//! - Trust line storage with latest-wins semantics
//! - Delivery of accepted lines to a file or a remote service
//! - CSV snapshot export
//!
//! Note: queries are served by the separate `trustgraph-api` service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trustgraph_engine::TrustGraph;
use trustgraph_indexer::config::{Config, EnrichmentConfig, LoggingConfig, SinkKind};
use trustgraph_indexer::listener::{RpcProvider, SyncEngine};
use trustgraph_indexer::{
    export, CirclesClient, FileExportSink, ProfileCache, ProfileDirectory, RemoteSink, Storage,
    TrustLineSink,
};

#[derive(Parser)]
#[command(name = "trustgraph-indexer")]
#[command(version, about = "Trust line indexer for the hub contract", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the indexer service
    Run,

    /// Show indexer status and sync progress
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://trustgraph.db")]
        database_url: String,
    },

    /// Write the stored trust graph as CSV
    Export {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it is readable.
    let config = Config::from_file(&cli.config);
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(cli.debug, &logging);

    info!("Trust graph indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_indexer(config?).await,
        Commands::Status => show_status(config?).await,
        Commands::InitDb { database_url } => init_database(&database_url).await,
        Commands::Export { output } => export_graph(config?, &output).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("trustgraph_indexer=debug,trustgraph_engine=debug,sqlx=info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "trustgraph_indexer={level},trustgraph_engine={level}",
                level = logging.level
            ))
        })
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_line_number(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

async fn open_storage(config: &Config) -> Result<Storage> {
    let storage = Storage::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(storage)
}

fn profile_directory(config: &EnrichmentConfig) -> Result<ProfileDirectory> {
    let cache = Arc::new(ProfileCache::new());
    if !config.enabled {
        return Ok(ProfileDirectory::new(cache, None));
    }
    let client = CirclesClient::new(&config.base_url, Duration::from_secs(config.timeout_secs))?;
    info!("Profile enrichment enabled: {}", config.base_url);
    Ok(ProfileDirectory::new(cache, Some(client)))
}

/// Main indexer service: ledger sync into the configured sink
async fn run_indexer(config: Config) -> Result<()> {
    info!("Configuration loaded successfully");
    info!("  Chain ID: {}", config.network.chain_id);
    info!("  RPC URL: {}", config.network.rpc_url);
    info!("  Database: {}", config.database.url);
    info!("  Start block: {}", config.sync.start_block);
    info!("  Sink: {:?}", config.sink.kind);

    let storage = open_storage(&config).await?;

    let sync_state = storage.get_sync_state().await?;
    if sync_state.is_fresh() {
        // The engine resumes at last_block + 1.
        let initial_block = config.sync.start_block.saturating_sub(1);
        info!(
            "Fresh database detected, initializing sync state with chain_id={} (will start syncing from block {})",
            config.network.chain_id, config.sync.start_block
        );
        storage
            .initialize_sync_state(config.network.chain_id, initial_block)
            .await?;
    } else if sync_state.chain_id != config.network.chain_id {
        anyhow::bail!(
            "Database belongs to chain {} but config says {}",
            sync_state.chain_id,
            config.network.chain_id
        );
    } else {
        info!(
            "Existing sync state found: chain_id={} last_block={}",
            sync_state.chain_id, sync_state.last_block_number
        );
    }

    let provider = RpcProvider::new(&config.network.rpc_url, config.contracts.hub)
        .context("Failed to create RPC provider")?;
    let directory = profile_directory(&config.enrichment)?;

    let result = match config.sink.kind {
        SinkKind::File => {
            let path = config
                .sink
                .file_path
                .as_ref()
                .context("Sink file_path is not set")?;
            let sink = FileExportSink::open(path, directory).await?;
            run_sync(provider, storage.clone(), sink, &config).await
        }
        SinkKind::Remote => {
            let sink = RemoteSink::new(
                config.sink.remote_url.clone().unwrap_or_default(),
                config.sink.tcb_id.clone().unwrap_or_default(),
                config.sink.timeout(),
                config.sink.max_retries,
            )?;
            run_sync(provider, storage.clone(), sink, &config).await
        }
    };

    storage.close().await;
    result
}

async fn run_sync<S>(provider: RpcProvider, storage: Storage, sink: S, config: &Config) -> Result<()>
where
    S: TrustLineSink,
{
    let engine = SyncEngine::new(provider, storage, sink, config.sync.clone());
    let progress = engine.progress();

    info!("Indexer is running. Press Ctrl+C to stop.");

    tokio::select! {
        result = engine.run() => {
            match result {
                Ok(()) => {
                    warn!("Sync engine exited unexpectedly");
                    Ok(())
                }
                Err(e) => Err(e).context("Sync engine failed"),
            }
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            let stats = progress.stats();
            info!(
                "Received shutdown signal at block {} (head {}), shutting down...",
                stats.latest_block, stats.current_block
            );
            Ok(())
        }
    }
}

async fn show_status(config: Config) -> Result<()> {
    let storage = open_storage(&config).await?;

    let state = storage.get_sync_state().await?;
    let lines = storage.count_trust_lines().await?;

    println!("Database:      {}", config.database.url);
    println!("Chain ID:      {}", state.chain_id);
    println!("Last block:    {}", state.last_block_number);
    println!("Trust lines:   {}", lines);

    match RpcProvider::new(&config.network.rpc_url, config.contracts.hub) {
        Ok(provider) => match provider.get_block_number().await {
            Ok(head) => {
                println!("Chain head:    {}", head);
                println!(
                    "Behind:        {} blocks",
                    head.saturating_sub(state.last_block_number)
                );
            }
            Err(e) => warn!("Could not reach RPC: {:#}", e),
        },
        Err(e) => warn!("Invalid RPC configuration: {:#}", e),
    }

    storage.close().await;
    Ok(())
}

async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None).await?;
    storage.run_migrations().await?;
    storage.close().await;

    info!("Database initialized");
    Ok(())
}

async fn export_graph(config: Config, output: &Path) -> Result<()> {
    let storage = open_storage(&config).await?;

    let graph = TrustGraph::new();
    for line in storage.all_trust_lines().await? {
        graph.apply(&line);
    }
    storage.close().await;

    let directory = profile_directory(&config.enrichment)?;
    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let rows = export::write_snapshot(&graph.snapshot_all(), &directory, &mut file).await?;
    info!("Exported {} trust lines to {}", rows, output.display());

    Ok(())
}
