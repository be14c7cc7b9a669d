//! Shard Node
//!
//! Main entry point for the sharded block pipeline.
//! Runs as the supervisor (shards the mempool and assembles base blocks),
//! as a validator (verifies child blocks and votes), or as a load
//! generator submitting signed transactions to a supervisor.
//! Blocks and state snapshots are persisted to disk and survive restarts.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use shard_consensus::{
    BlockProducer, BroadcastClient, BroadcastServer, ConsensusMessage, Dispatcher, Network,
    NodeRole, SupervisorBuilder, SupervisorHandler, ValidatorHandler, ValidatorNodeBuilder,
};
use shard_primitives::SignedTransaction;
use shard_storage::{MemoryStateStore, PersistentStore, StateStorePersistence};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// Node mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Supervisor mode - shards transactions and assembles base blocks
    Supervisor,
    /// Validator mode - verifies child blocks and votes
    Validator,
    /// Submit signed test transactions to a supervisor
    Submit,
}

/// Sharded block pipeline node
#[derive(Parser, Debug)]
#[command(name = "shard-node")]
#[command(about = "Supervisor / validator node for sharded block production", long_about = None)]
struct Args {
    /// Node mode (supervisor, validator or submit)
    #[arg(long, value_enum, default_value = "supervisor")]
    mode: Mode,

    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Broadcast bind address (supervisor mode)
    #[arg(long)]
    listen_addr: Option<String>,

    /// Supervisor address to connect to (validator and submit modes)
    #[arg(long)]
    supervisor_addr: Option<String>,

    /// Data directory for persistent state
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Block time in milliseconds
    #[arg(long)]
    block_time_ms: Option<u64>,

    /// Transactions per child block
    #[arg(long)]
    batch_size: Option<usize>,

    /// Key scheme for a new identity (ed25519 or secp256k1)
    #[arg(long)]
    key_type: Option<String>,

    /// File holding the node identity
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Save state every N heights (0 = only on shutdown)
    #[arg(long)]
    save_interval: Option<u64>,

    /// Number of transactions to send (submit mode)
    #[arg(long, default_value = "1000")]
    count: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Config file (or defaults) with command line overrides applied
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };

        if let Some(addr) = &self.listen_addr {
            config.listen_addr = addr.clone();
        }
        if let Some(addr) = &self.supervisor_addr {
            config.supervisor_addr = addr.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(ms) = self.block_time_ms {
            config.consensus.block_time_ms = ms;
        }
        if let Some(size) = self.batch_size {
            config.consensus.batch_size = size;
        }
        if let Some(kind) = &self.key_type {
            config.key_type = kind.clone();
        }
        if let Some(path) = &self.key_file {
            config.key_file = Some(path.clone());
        }
        if let Some(interval) = self.save_interval {
            config.save_interval = interval;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.node_config()?;

    match args.mode {
        Mode::Supervisor => run_supervisor(config).await,
        Mode::Validator => run_validator(config).await,
        Mode::Submit => run_submit(config, args.count).await,
    }
}

/// Run in supervisor mode - shard transactions and assemble base blocks
async fn run_supervisor(config: NodeConfig) -> Result<()> {
    tracing::info!("Starting shard node - SUPERVISOR MODE");
    tracing::info!("  Listen address: {}", config.listen_addr);
    tracing::info!("  Block time: {}ms", config.consensus.block_time_ms);
    tracing::info!("  Batch size: {}", config.consensus.batch_size);
    tracing::info!("  Data directory: {:?}", config.data_dir);
    tracing::info!("  Save interval: {} heights", config.save_interval);

    // Create data directory if it doesn't exist
    std::fs::create_dir_all(&config.data_dir)?;

    // Open persistent store and restore state
    let persistent_store = Arc::new(PersistentStore::open(&config.data_dir)?);
    let state_store = Arc::new(MemoryStateStore::new());
    match persistent_store.load_metadata()? {
        Some(metadata) => {
            tracing::info!(
                "Loading state from disk: height {}, {} blocks",
                metadata.height,
                metadata.block_count
            );
            state_store.load_from_disk(&persistent_store)?;
        }
        None => tracing::info!("No existing chain found, starting fresh"),
    }

    let identity = config.load_identity()?;
    tracing::info!("  Supervisor address: {}", identity.pub_key().address());

    // Start broadcast server
    let dispatcher = Dispatcher::new();
    let server = Arc::new(BroadcastServer::new(&identity, dispatcher.clone())?);
    server.start(&config.listen_addr).await?;

    let supervisor = Arc::new(
        SupervisorBuilder::new()
            .config(config.consensus.clone())
            .build(server.clone()),
    );
    SupervisorHandler::new(supervisor.clone()).register(&dispatcher);

    // Initialize block producer
    let block_producer =
        BlockProducer::new(supervisor.clone(), persistent_store.clone(), state_store.clone())?;
    let producer_handle = block_producer.handle();
    let mut block_updates = block_producer.subscribe();
    let mut producer_task = tokio::spawn(block_producer.run_async());

    // Periodic snapshots and stats
    let persist_store = persistent_store.clone();
    let persist_state = state_store.clone();
    let stats_supervisor = supervisor.clone();
    let save_interval = config.save_interval;
    let update_handler = tokio::spawn(async move {
        while let Ok(update) = block_updates.recv().await {
            if save_interval > 0 && update.height % save_interval == 0 {
                match persist_state.save_to_disk(&persist_store) {
                    Ok(_) => tracing::info!("Saved state at height {}", update.height),
                    Err(e) => tracing::error!("Failed to save state: {}", e),
                }
            }

            if update.height % 10 == 0 {
                let stats = stats_supervisor.stats();
                tracing::info!(
                    "Height {}: {} validators, {} pending txs, {} votes received",
                    update.height,
                    stats.connected_validators,
                    stats_supervisor.mempool().len(),
                    stats.votes_received
                );
            }
        }
    });

    tracing::info!("Supervisor running. Validators can connect to {}.", config.listen_addr);
    tracing::info!("Press Ctrl+C to stop.");

    let finished = tokio::select! {
        result = &mut producer_task => Some(result),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutting down...");
            producer_handle.stop();
            None
        }
    };
    // Let an in-flight tick finish before the final save
    let result = match finished {
        Some(result) => result,
        None => producer_task.await,
    };
    let outcome = match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::anyhow!("block producer failed: {}", e)),
        Err(e) => Err(anyhow::anyhow!("block producer panicked: {}", e)),
    };
    update_handler.abort();

    // Save state before shutdown
    if let Err(e) = state_store.save_to_disk(&persistent_store) {
        tracing::error!("Failed to save final state: {}", e);
    } else {
        tracing::info!("Final state saved: {} entries", state_store.len());
    }
    persistent_store.flush()?;

    tracing::info!("Supervisor stopped");
    outcome
}

/// Run in validator mode - verify child blocks and vote
async fn run_validator(config: NodeConfig) -> Result<()> {
    tracing::info!("Starting shard node - VALIDATOR MODE");
    tracing::info!("  Connecting to supervisor: {}", config.supervisor_addr);

    let identity = config.load_identity()?;
    let dispatcher = Dispatcher::new();
    let client = Arc::new(
        BroadcastClient::connect(
            &config.supervisor_addr,
            &identity,
            NodeRole::Validator,
            dispatcher.clone(),
        )
        .await?,
    );

    // Create validator node
    let validator = Arc::new(
        ValidatorNodeBuilder::new(identity)
            .config(config.consensus.clone())
            .build(client.clone()),
    );
    ValidatorHandler::new(validator.clone()).register(&dispatcher);

    tracing::info!("Validator {} verifying child blocks", validator.address());
    tracing::info!("Press Ctrl+C to stop.");

    tokio::select! {
        _ = client.closed() => {
            tracing::warn!("Supervisor connection lost");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutting down validator...");
        }
    }

    let stats = validator.stats();
    tracing::info!(
        "Validator stopped: {} batches verified, {} rejected, last height {}",
        stats.batches_verified,
        stats.batches_rejected,
        validator.last_verified_height()
    );

    Ok(())
}

/// Send `count` signed transactions to the supervisor
async fn run_submit(config: NodeConfig, count: u64) -> Result<()> {
    let identity = config.load_identity()?;
    let client = BroadcastClient::connect(
        &config.supervisor_addr,
        &identity,
        NodeRole::Client,
        Dispatcher::new(),
    )
    .await?;

    let supervisor = client.supervisor_address();
    for nonce in 0..count {
        let payload = format!("transfer #{} from {}", nonce, identity.pub_key().address());
        let tx = SignedTransaction::sign(&identity, nonce, payload.into_bytes())?;
        client
            .send_to(&[supervisor], ConsensusMessage::Transaction(tx))
            .await?;
    }

    client.shutdown().await;
    tracing::info!("Submitted {} transactions to {}", count, supervisor);
    Ok(())
}
