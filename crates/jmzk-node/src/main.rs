//! jmzkd — the jmzkChain node binary.
//!
//! Startup sequence:
//!   1. Load the genesis state (file or built-in development default)
//!   2. Open the controller: token database, state store, fork database,
//!      block log — replaying from the log when the fork database is fresh
//!   3. If a producer key is configured, run the block production loop
//!
//! Exit codes follow the legacy daemon: 0 success, 2 dirty token database,
//! 4 extracted genesis, -1 initialisation failure.

use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use jmzk_chain::controller::{Config, Controller};
use jmzk_core::block::BlockTimestamp;
use jmzk_core::error::ChainError;
use jmzk_crypto::KeyPair;
use jmzk_genesis::GenesisState;

const EXIT_DATABASE_DIRTY: i32 = 2;
const EXIT_EXTRACTED_GENESIS: i32 = 4;
const EXIT_INIT_FAIL: i32 = -1;

#[derive(Parser, Debug)]
#[command(name = "jmzkd", version, about = "jmzkChain node daemon")]
struct Args {
    /// Directory for chain data (blocks, state, tokendb).
    #[arg(long, default_value = "~/.jmzk/data")]
    data_dir: PathBuf,

    /// Directory for configuration files.
    #[arg(long, default_value = "~/.jmzk/config")]
    config_dir: PathBuf,

    /// Path to the genesis JSON. Required on first run of a shared chain.
    #[arg(long)]
    genesis: Option<PathBuf>,

    /// Write the chain's genesis JSON to this path and exit.
    #[arg(long)]
    extract_genesis: Option<PathBuf>,

    /// Hex seed for the block-signing key; enables block production.
    #[arg(long)]
    producer_seed: Option<String>,

    /// Re-run every check on replayed blocks instead of trusting them.
    #[arg(long, default_value_t = false)]
    force_all_checks: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,jmzk=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("jmzkChain node starting");

    match run(args).await {
        Ok(code) => exit(code),
        Err(e) => {
            if let Some(ChainError::TokenDatabaseDirty) = e.downcast_ref::<ChainError>() {
                error!("token database is dirty; wipe tokendb/ and state/ then replay from blocks");
                exit(EXIT_DATABASE_DIRTY);
            }
            error!(error = %e, "initialisation failed");
            exit(EXIT_INIT_FAIL);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    std::fs::create_dir_all(expand_tilde(&args.config_dir)).ok();

    let genesis = load_genesis(args.genesis.as_deref(), args.producer_seed.as_deref())?;
    info!(chain_id = %genesis.compute_chain_id(), "genesis loaded");

    let mut conf = Config::new(&data_dir, genesis.clone());
    conf.force_all_checks = args.force_all_checks;

    let mut controller = Controller::open(conf)?;
    info!(
        head = controller.head_block_num(),
        lib = controller.last_irreversible_block_num(),
        "controller ready"
    );

    if let Some(path) = &args.extract_genesis {
        let stored = controller.block_log().genesis().cloned().unwrap_or(genesis);
        std::fs::write(path, serde_json::to_string_pretty(&stored)?)?;
        info!(path = %path.display(), "genesis extracted");
        controller.close()?;
        return Ok(EXIT_EXTRACTED_GENESIS);
    }

    let Some(seed) = &args.producer_seed else {
        info!("no producer key configured; observer mode — press ctrl-c to exit");
        tokio::signal::ctrl_c().await?;
        controller.close()?;
        return Ok(0);
    };

    // ── Block production loop ─────────────────────────────────────────────────
    let producer = KeyPair::from_seed(seed.as_bytes());
    info!(key = %producer.public_key, "producing blocks");

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if let Err(e) = produce_one(&mut controller, &producer) {
                    warn!(error = %e, "block production failed");
                    controller.abort_block();
                }
            }
        }
    }

    controller.close()?;
    Ok(0)
}

fn produce_one(controller: &mut Controller, producer: &KeyPair) -> Result<(), ChainError> {
    let now = chrono::Utc::now().timestamp();
    let when = BlockTimestamp::from_unix(now);
    if when <= controller.head_state().header.timestamp {
        return Ok(()); // Not our slot yet.
    }

    controller.start_block(when, 0)?;

    // Drain transactions that earlier blocks returned to us.
    let unapplied: Vec<_> = controller.unapplied_transactions.values().cloned().collect();
    for trx in unapplied {
        let _ = controller.push_transaction(trx, None);
    }

    controller.finalize_block()?;
    controller.sign_block(|digest| producer.sign(digest))?;
    controller.commit_block()?;

    let head = controller.head_block_num();
    if head % 100 == 0 {
        info!(block = head, lib = controller.last_irreversible_block_num(), "produced");
    }
    Ok(())
}

fn load_genesis(path: Option<&Path>, producer_seed: Option<&str>) -> anyhow::Result<GenesisState> {
    if let Some(p) = path {
        let json = std::fs::read_to_string(p)
            .with_context(|| format!("reading genesis from {}", p.display()))?;
        return Ok(GenesisState::from_json(&json)?);
    }
    warn!("no --genesis provided; using a development genesis — do not share this chain");
    let mut genesis = GenesisState::default();
    if let Some(seed) = producer_seed {
        // Single-node development chain: the producer is the genesis key.
        genesis.initial_key = KeyPair::from_seed(seed.as_bytes()).public_key;
    }
    Ok(genesis)
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
