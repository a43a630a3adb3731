#![forbid(unsafe_code)]
//! ForgeLedger node: API server plus miner.

use clap::{Parser, Subcommand};
use colored::*;
use forgeledger::config::{load_config, DEFAULT_CONFIG_PATH};
use forgeledger::contract::parser::parse;
use forgeledger::crypto::KeyPair;
use forgeledger::miner::Miner;
use forgeledger::node::Node;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forge-node", version, about = "Proof-of-work ledger node with contracts")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node (default)
    Run {
        /// Override node.api_port
        #[arg(long)]
        port: Option<u16>,
        /// Disable the miner for this run
        #[arg(long)]
        no_mining: bool,
    },
    /// Compile a contract file and list its functions
    CheckContract { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run {
        port: None,
        no_mining: false,
    }) {
        Command::Run { port, no_mining } => run(cli.config, port, no_mining).await,
        Command::CheckContract { path } => check_contract(path),
    }
}

async fn run(
    config_path: PathBuf,
    port: Option<u16>,
    no_mining: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&config_path)?;
    if let Some(port) = port {
        config.node.api_port = port;
    }
    if no_mining {
        config.mining.enabled = false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.node.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let address = match &config.mining.beneficiary_address {
        Some(address) => address.clone(),
        None => {
            let keypair = KeyPair::generate();
            warn!(
                address = %keypair.address(),
                "no beneficiary configured, using a fresh key for this run"
            );
            keypair.address()
        }
    };

    info!(
        node_id = %config.node.node_id,
        port = config.node.api_port,
        difficulty = config.mining.difficulty,
        peers = config.node.peers.len(),
        "starting ForgeLedger node"
    );
    let node = Node::open(config.clone(), address.clone())?;

    if config.contracts.deploy_samples {
        node.deploy_sample_contracts().await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        let _ = shutdown_tx.send(true);
    });

    let miner_task = if config.mining.enabled {
        let miner = Miner::new(node.clone(), address, &config.mining)?;
        Some(tokio::spawn(miner.run(shutdown_rx.clone())))
    } else {
        info!("mining disabled");
        None
    };

    let mut api_shutdown = shutdown_rx.clone();
    let wait_for_shutdown = async move {
        while !*api_shutdown.borrow() {
            if api_shutdown.changed().await.is_err() {
                break;
            }
        }
    };

    #[cfg(feature = "api")]
    {
        let served =
            forgeledger::api::run_api_server(node.clone(), config.node.api_port, wait_for_shutdown)
                .await;
        if let Err(e) = served {
            error!(error = %e, "API server stopped");
        }
    }
    #[cfg(not(feature = "api"))]
    wait_for_shutdown.await;

    if let Some(task) = miner_task {
        if let Err(e) = task.await {
            error!(error = %e, "miner task panicked");
        }
    }
    info!(height = node.stats().await.latest_height, "node stopped");
    Ok(())
}

fn check_contract(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(&path)?;
    match parse(&source) {
        Ok(program) => {
            println!("{} {}", "✓".bright_green(), path.display().to_string().bold());
            for function in program.functions.values() {
                println!(
                    "  {} {}({})",
                    "fn".bright_cyan(),
                    function.name.bright_white(),
                    function.params.join(", ")
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".bright_red(), path.display().to_string().bold());
            println!("  {}", e.to_string().red());
            Err(e.into())
        }
    }
}
