//! Bookie - storage node daemon
//!
//! `bookie run` mounts the storage and serves until interrupted.
//! `bookie format` wipes the configured directories of a stopped bookie.
//! `bookie info` prints the resolved identity and directory layout.

use anyhow::{Context, Result};
use bookie_common::ServerConfig;
use bookie_server::{Bookie, SystemNetwork};
use bookie_storage::dirs::{self, LineConfirmation};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bookie")]
#[command(about = "Bookie ledger storage node")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "BOOKIE_CONFIG")]
    config: Option<PathBuf>,

    /// Journal directories (repeatable)
    #[arg(long = "journal-dir")]
    journal_dirs: Vec<PathBuf>,

    /// Ledger directories (repeatable)
    #[arg(long = "ledger-dir")]
    ledger_dirs: Vec<PathBuf>,

    /// Port clients connect to
    #[arg(short, long)]
    port: Option<u16>,

    /// Address advertised to clients
    #[arg(long)]
    advertised_address: Option<String>,

    /// Explicit bookie id
    #[arg(long)]
    bookie_id: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount storage and serve until interrupted
    Run {
        /// Interval between metrics dumps in seconds (0 disables)
        #[arg(long, default_value = "60")]
        metrics_interval: u64,
    },
    /// Delete all data in the configured directories
    Format {
        /// Never prompt; only format directories holding data with --force
        #[arg(long)]
        non_interactive: bool,

        /// Format without asking
        #[arg(long)]
        force: bool,
    },
    /// Print the resolved identity and directory layout
    Info,
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if !args.journal_dirs.is_empty() {
        config.journal_dirs = Some(args.journal_dirs.clone());
    }
    if !args.ledger_dirs.is_empty() {
        config.ledger_dirs = Some(args.ledger_dirs.clone());
    }
    if let Some(port) = args.port {
        config.bookie_port = port;
    }
    if let Some(addr) = &args.advertised_address {
        config.advertised_address = Some(addr.clone());
    }
    if let Some(id) = &args.bookie_id {
        config.bookie_id = Some(id.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;

    match args.command {
        Command::Run { metrics_interval } => run(config, metrics_interval).await,
        Command::Format {
            non_interactive,
            force,
        } => {
            let formatted = tokio::task::spawn_blocking(move || {
                let mut confirmation = LineConfirmation::stdin();
                Bookie::format(&config, !non_interactive, force, &mut confirmation)
            })
            .await??;
            if formatted {
                info!("Bookie directories formatted");
                Ok(())
            } else {
                anyhow::bail!("format did not complete")
            }
        }
        Command::Info => print_info(&config),
    }
}

async fn run(config: ServerConfig, metrics_interval: u64) -> Result<()> {
    info!("Starting bookie");
    let bookie = tokio::task::spawn_blocking(move || Bookie::start(config))
        .await?
        .context("failed to start bookie")?;

    let mut metrics_tick = (metrics_interval > 0)
        .then(|| tokio::time::interval(Duration::from_secs(metrics_interval)));

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
            _ = async {
                match metrics_tick.as_mut() {
                    Some(tick) => { tick.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                info!("Storage metrics:\n{}", bookie.metrics());
            }
        }
    }

    info!("Shutting down...");
    tokio::task::spawn_blocking(move || bookie.shutdown()).await?;
    Ok(())
}

fn print_info(config: &ServerConfig) -> Result<()> {
    match bookie_server::resolve(config, &SystemNetwork) {
        Ok(identity) => {
            println!("Bookie id:      {}", identity.id);
            match identity.address {
                Some(address) => println!("Address:        {address}"),
                None => println!("Address:        (unresolved)"),
            }
        }
        Err(e) => warn!("Unable to resolve bookie identity: {}", e),
    }

    let groups = [
        ("Journal dirs", config.journal_dirs.as_deref()),
        ("Ledger dirs", config.ledger_dirs.as_deref()),
        ("Index dirs", config.index_dirs()),
    ];
    for (name, list) in groups {
        let current = dirs::current_directories(list)?;
        println!("{name}:");
        for dir in current {
            println!("  {}", dir.display());
        }
    }
    println!("Digest type: {:?}", config.digest_type);
    println!(
        "Disk thresholds: warn {:.2}, hard {:.2}",
        config.disk_usage_warn_threshold, config.disk_usage_threshold
    );
    Ok(())
}
