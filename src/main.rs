//! The `relay` binary: scheduled entry points for both pipelines.
//!
//! `relay flush` drains the staging directory into every destination;
//! `relay pull` replicates the configured databases downward from the
//! cloud source. Both are designed to be run from cron and exit nonzero
//! only on hard-stop conditions (unreadable config, no usable endpoints).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use telemetry_relay::{
    ClickHouseEndpoint, DownsyncEngine, Endpoint, FlushEngine, RelayConfig, RelayError, Result,
    StagingStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay", about = "Telemetry staging flush and downward sync")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "relay.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Flush staged telemetry batches into every destination.
    Flush,
    /// Bootstrap and incrementally sync databases down from the cloud.
    Pull,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Flush => run_flush(config).await,
        Command::Pull => run_pull(config).await,
    }
}

fn load_config(path: &PathBuf) -> Result<RelayConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        RelayError::Config(format!("cannot read config {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        RelayError::Config(format!("cannot parse config {}: {}", path.display(), e))
    })
}

async fn run_flush(config: RelayConfig) -> Result<()> {
    if config.destinations.is_empty() {
        return Err(RelayError::Config(
            "no flush destinations configured".to_string(),
        ));
    }

    let timeout = config.flush.op_timeout_duration();
    let mut destinations: Vec<Arc<dyn Endpoint>> = Vec::with_capacity(config.destinations.len());
    for endpoint in &config.destinations {
        destinations.push(Arc::new(ClickHouseEndpoint::new(endpoint.clone(), timeout)?));
    }

    info!(
        staging_dir = %config.staging.dir.display(),
        destinations = destinations.len(),
        categories = config.categories.len(),
        "Starting flush"
    );

    let staging = Arc::new(StagingStore::new(config.staging.dir.clone()));
    let engine = FlushEngine::new(staging, destinations, config.categories.clone(), &config.flush);
    let reports = engine.flush_all().await;

    let retained: usize = reports.iter().filter(|r| !r.deleted).map(|r| r.files).sum();
    info!(retained_files = retained, "Flush done");
    Ok(())
}

async fn run_pull(config: RelayConfig) -> Result<()> {
    let timeout = config.downsync.op_timeout_duration();
    let source: Arc<dyn Endpoint> = Arc::new(ClickHouseEndpoint::new(
        config.downsync.source.clone(),
        timeout,
    )?);
    let target: Arc<dyn Endpoint> = Arc::new(ClickHouseEndpoint::new(
        config.downsync.target.clone(),
        timeout,
    )?);

    info!(
        source = %config.downsync.source.name,
        target = %config.downsync.target.name,
        databases = config.downsync.databases.len(),
        "Starting downward sync"
    );

    let engine = DownsyncEngine::new(source, target, config.downsync);
    engine.run().await;

    info!("Pull done");
    Ok(())
}
