//! swim-daemon: SWIM membership over UDP.
//!
//! Joins a cluster through one or more seeds and logs membership changes
//! until interrupted.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use swim_core::SwimSettings;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swim_daemon::{SwimDaemon, parse_seed};

#[derive(Parser, Debug)]
#[command(name = "swim-daemon")]
#[command(about = "SWIM cluster membership daemon")]
struct Args {
    /// UDP address to listen on
    #[arg(short, long, default_value = "0.0.0.0:7946")]
    listen: String,

    /// Host other members should use to reach us (defaults to the listen IP)
    #[arg(long)]
    advertise: Option<String>,

    /// Seed member, as host:port or udp://host:port#uid (repeatable)
    #[arg(short, long = "seed")]
    seeds: Vec<String>,

    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node uid (random if not provided)
    #[arg(long)]
    uid: Option<u64>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Skip announcing our departure on shutdown
    #[arg(long)]
    no_leave: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,swim_core=debug,swim_daemon=debug"
    } else {
        "info,swim_core=info,swim_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting swim-daemon");

    let settings = match &args.config {
        Some(path) => SwimSettings::load(path)?,
        None => SwimSettings::default(),
    };
    let seeds = args
        .seeds
        .iter()
        .map(|s| parse_seed(s))
        .collect::<Result<Vec<_>, _>>()?;

    let mut daemon =
        SwimDaemon::bind(&args.listen, args.advertise.as_deref(), args.uid, settings).await?;
    info!("Node identity: {}", daemon.myself());

    daemon.join(seeds).await;

    info!("Daemon running. Press Ctrl+C to stop.");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let mut daemon = daemon.run(shutdown).await;

    if !args.no_leave {
        daemon.leave().await;
        info!("Announced departure");
    }

    info!("Shutting down");
    Ok(())
}
