//! QuantumShield chain node
//! Runs the chain core: genesis, mining coordinator, difficulty and reward loops

use clap::Parser;
use qshield_chain::{ChainConfig, ChainNode, InMemoryLedger};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qshield-node")]
#[command(about = "QuantumShield private chain node with external-miner coordination")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the block log and pending pool snapshot
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the starting difficulty
    #[arg(long)]
    initial_difficulty: Option<u32>,

    /// Override the target block interval in seconds
    #[arg(long)]
    target_block_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("QuantumShield chain node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ChainConfig::from_toml_file(path)?
        }
        None => ChainConfig::default(),
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }
    if let Some(difficulty) = args.initial_difficulty {
        config.initial_difficulty = difficulty;
    }
    if let Some(secs) = args.target_block_secs {
        config.target_block_time_secs = secs;
    }

    // The production token ledger lives outside the chain core
    let ledger = Arc::new(InMemoryLedger::new());
    let node = match ChainNode::new(config, ledger).await {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to start node: {}", e);
            std::process::exit(1);
        }
    };

    let genesis = node.start().await?;
    info!("Genesis block: {}", genesis.hash);

    if !node.chain().validate_chain().await {
        error!("Stored chain failed validation; refusing to start");
        std::process::exit(1);
    }

    let tasks = node.spawn_background_tasks();
    info!(
        "Node running (difficulty {}, target block time {}s)",
        node.chain().difficulty().get(),
        node.config().target_block_time_secs
    );

    wait_for_shutdown().await;

    info!("Shutdown signal received, stopping background loops...");
    tasks.shutdown().await;

    let stats = node.chain().get_stats().await;
    info!(
        "Node stopped at {} blocks, {} pending transactions",
        stats.total_blocks, stats.pending_count
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("Failed to setup SIGTERM handler: {}", e);
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received SIGINT signal (Ctrl+C)"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        },
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
}
