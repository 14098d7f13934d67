use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use shared::chain::{ChainClient, RpcChainClient};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::{
    config::load_config_file,
    farm::Farmer,
    submitter::CliSubmitter,
    supervisor::WorkerSupervisor,
};

mod config;
mod farm;
mod parser;
mod submitter;
mod supervisor;
mod tracker;


#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    #[arg(long, value_name = "CONFIG", help = "Path of the farmer config file", default_value = "./config.json", global = true)]
    config: String,

    #[arg(
        long,
        value_name = "MILLISECONDS",
        help = "Overrides poll_interval_ms from the config file",
        global = true
    )]
    poll_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Poll the farm and keep a worker on the open round (default)")]
    Run,

    #[command(about = "Print the current round state, or the fingerprint of one round")]
    Peek {
        #[arg(long, value_name = "INDEX", help = "Round whose fingerprint to read")]
        index: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shared::log::init_log("farmer=debug");

    let args = Args::parse();
    let mut cfg = load_config_file(&args.config)?;
    if let Some(ms) = args.poll_interval_ms {
        anyhow::ensure!(ms > 0, "--poll-interval-ms must be positive");
        cfg.poll_interval_ms = ms;
    }
    debug!("{cfg:?}");

    let chain = RpcChainClient::new(&cfg.rpc, &cfg.contract, cfg.rpc_timeout()).context("fail to build rpc client")?;

    match args.command.unwrap_or(Commands::Run) {
        Commands::Peek { index } => peek(&chain, index).await,
        Commands::Run => {
            let submitter = CliSubmitter::from_config(&cfg);
            let supervisor = WorkerSupervisor::new(cfg.worker.clone());
            let farmer = Farmer::new(chain, submitter, supervisor, cfg.poll_interval());

            let (tx, rx) = broadcast::channel(1);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        let _ = tx.send(());
                    }
                    Err(err) => error!("fail to listen for ctrl-c, farming continues without it: {err}"),
                }
            });

            info!("farming {} every {:?}", cfg.contract, Duration::from_millis(cfg.poll_interval_ms));
            farmer.run(rx).await?;
            Ok(())
        }
    }
}

async fn peek<C: ChainClient>(chain: &C, index: Option<u64>) -> anyhow::Result<()> {
    match index {
        Some(index) => {
            let fingerprint = chain.read_round_fingerprint(index).await?;
            println!("{index} {fingerprint}");
        }
        None => {
            let round = chain.read_round_state().await?;
            println!(
                "index={} difficulty={} fingerprint={} miner={} paused={}",
                round.index, round.difficulty, round.fingerprint, round.miner, round.halted
            );
        }
    }
    Ok(())
}
