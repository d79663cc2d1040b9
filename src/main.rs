use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use daisy_chain::block;
use daisy_chain::config::{BlockReference, NodeConfig};
use daisy_chain::crypto::{generate_keypair, save_keypair};
use daisy_chain::dag::{DagClient, HttpDagClient, HttpNameStore, NameStore};
use daisy_chain::errors::ChainResult;
use daisy_chain::loops::{spawn_follower_loop, spawn_leader_loop, Publisher};
use daisy_chain::runner::{reader_from_name, runner_from_name};
use daisy_chain::serializer::from_name as serializer_from_name;
use daisy_chain::storage::Storage;
use daisy_chain::tracker::{Mode, Tracker};
use daisy_chain::{api, types::Block};

#[derive(Parser)]
#[command(author, version, about = "Daisy side-chain node over an IPFS-compatible MerkleDAG")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node using the provided configuration file
    Start {
        #[arg(short, long, default_value = "config/node.toml")]
        config: PathBuf,
    },
    /// Generate a default node configuration file
    GenerateConfig {
        #[arg(short, long, default_value = "config/node.toml")]
        path: PathBuf,
    },
    /// Generate a new secp256k1 keypair for signing transactions
    Keygen {
        #[arg(short, long, default_value = "keys/node.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => start_node(config).await?,
        Commands::GenerateConfig { path } => generate_config(path)?,
        Commands::Keygen { path } => keygen(path)?,
    }

    Ok(())
}

async fn start_node(config_path: PathBuf) -> Result<()> {
    let config = if config_path.exists() {
        NodeConfig::load(&config_path)?
    } else {
        let config = NodeConfig::default();
        config.save(&config_path)?;
        config
    };
    config.validate()?;

    let dag: Arc<dyn DagClient> = Arc::new(HttpDagClient::new(&config.dag_api)?);
    let names: Arc<dyn NameStore> = Arc::new(HttpNameStore::new(&config.dag_api)?);
    let storage = Storage::new(dag);
    let runner = runner_from_name(&config.runner)?;
    let reader = reader_from_name(&config.reader)?;
    let serializer = serializer_from_name(&config.serializer)?;
    let publisher = Publisher::spawn(names, config.ipfs_key.clone());

    let initial = initial_block(&config, &storage, &publisher, serializer.as_ref()).await?;
    info!(
        block_number = initial.block_number,
        "starting from block"
    );

    let mode = if config.run_leader {
        Mode::Leader
    } else {
        Mode::Follower
    };
    let tracker = Tracker::spawn(
        storage.clone(),
        initial,
        runner,
        reader,
        serializer.clone(),
        mode,
    );

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    if config.run_leader {
        tasks.push(spawn_leader_loop(
            tracker.clone(),
            publisher.clone(),
            Duration::from_millis(config.mining_interval_ms),
        ));
    }
    if config.run_follower {
        tasks.push(spawn_follower_loop(
            tracker.clone(),
            publisher.clone(),
            storage.clone(),
            serializer,
            Duration::from_millis(config.pulling_interval_ms),
        ));
    }

    let api_task: Option<JoinHandle<ChainResult<()>>> = if config.run_api {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
        Some(tokio::spawn(api::serve(tracker.clone(), addr)))
    } else {
        None
    };

    match api_task {
        Some(task) => {
            tokio::select! {
                result = task => {
                    result??;
                }
                _ = signal::ctrl_c() => {
                    info!("shutdown signal received");
                }
            }
        }
        None => {
            signal::ctrl_c().await?;
            info!("shutdown signal received");
        }
    }

    for task in tasks {
        task.abort();
    }
    Ok(())
}

async fn initial_block(
    config: &NodeConfig,
    storage: &Storage,
    publisher: &daisy_chain::loops::PublisherHandle,
    serializer: &dyn daisy_chain::serializer::BlockSerializer,
) -> Result<Block> {
    let block = match &config.initial_block_reference {
        BlockReference::Genesis => block::genesis(storage).await?,
        BlockReference::Resolve => {
            let hash = publisher.resolve().await?;
            block::load(storage, &hash, serializer).await?
        }
        BlockReference::BlockHash(hash) => block::load(storage, hash, serializer).await?,
    };
    Ok(block)
}

fn generate_config(path: PathBuf) -> Result<()> {
    let config = NodeConfig::default();
    config.ensure_directories()?;
    config.save(&path)?;
    info!(?path, "wrote default configuration");
    Ok(())
}

fn keygen(path: PathBuf) -> Result<()> {
    let keypair = generate_keypair();
    save_keypair(&path, &keypair)?;
    info!(?path, "generated node keypair");
    Ok(())
}
