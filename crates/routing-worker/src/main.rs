use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lead_routing::{ResponseStatus, SystemClock};
use routing_worker::{SeedFile, Worker, WorkerConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker configuration TOML (defaults plus ROUTING_* overrides when absent)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed TOML with agents and leads to load before the command runs
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Path of the persisted ledger and lock state
    #[arg(long, default_value = "routing-state.json")]
    ledger: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route pending leads, or a single lead
    Route {
        #[arg(long)]
        lead: Option<String>,
    },
    /// Cascade every lead whose phase window has elapsed, once
    Tick,
    /// Route and cascade continuously until Ctrl-C
    Run,
    /// Record an agent's response (accepted, declined, ignored)
    Respond {
        lead: String,
        agent: String,
        status: ResponseStatus,
    },
    /// Hand a lead to manual handling
    Escalate {
        lead: String,
        #[arg(long, default_value = "manual escalation")]
        reason: String,
    },
    /// Print a summary of every lead
    Status,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = WorkerConfig::load(args.config.as_deref())?;
    let seed = args.seed.as_deref().map(SeedFile::from_file).transpose()?;
    let worker = Worker::open(config, seed, &args.ledger, Arc::new(SystemClock))?;

    match args.command {
        Command::Route { lead: Some(lead) } => {
            let result = worker.route(&lead).await?;
            print_json(&result)?;
        }
        Command::Route { lead: None } => {
            let summary = worker.route_pending().await?;
            print_json(&summary)?;
        }
        Command::Tick => {
            let report = worker.tick().await?;
            print_json(&report)?;
        }
        Command::Run => {
            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutdown requested");
                        cancel.cancel();
                    }
                });
            }
            worker.run(cancel).await?;
        }
        Command::Respond {
            lead,
            agent,
            status,
        } => {
            let assignment = worker.respond(&lead, &agent, status).await?;
            print_json(&assignment)?;
        }
        Command::Escalate { lead, reason } => {
            let result = worker.escalate(&lead, &reason).await?;
            print_json(&result)?;
        }
        Command::Status => {
            print_json(&worker.status()?)?;
        }
    }

    worker.save()
}
