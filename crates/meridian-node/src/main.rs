//! meridian-node — the Meridian ledger-node binary.
//!
//! Startup sequence:
//!   1. Load configuration and the node identity
//!   2. Open (or initialise) the node store and build/recover the chain
//!   3. Start the job queue, message pump and consensus heartbeat
//!   4. Run until interrupted; shut components down in reverse order

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use meridian_node::{Application, Config, PeerMessage};

#[derive(Parser, Debug)]
#[command(
    name = "meridian-node",
    version,
    about = "Meridian replicated payment-ledger node"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "meridian.toml")]
    config: PathBuf,

    /// Override the database path from the config.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,meridian=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("Meridian node starting");

    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = if args.config.exists() {
        Config::load(&args.config)
            .with_context(|| format!("loading config {}", args.config.display()))?
    } else {
        info!("no config file; using defaults");
        Config::default()
    };
    if let Some(data_dir) = args.data_dir {
        config.database_path = data_dir;
    }
    std::fs::create_dir_all(&config.database_path)
        .with_context(|| format!("creating data dir {}", config.database_path.display()))?;

    // ── Application ───────────────────────────────────────────────────────────
    let app = Arc::new(Application::prepare(config).context("preparing application")?);
    let (last_hash, last_seq) = app.last_closed();
    info!(seq = last_seq, hash = %last_hash, "chain tip");

    // The peer overlay is out-of-process: inbound messages arrive on this
    // channel, outbound broadcasts drain from the returned receiver.
    let (_inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel::<PeerMessage>();
    let mut outbound_rx = app.start(inbound_rx);
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            tracing::trace!(?message, "outbound");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("interrupt received; shutting down");
    app.stop();
    Ok(())
}
