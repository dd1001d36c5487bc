#![forbid(unsafe_code)]

//! `install-queue-launcher`: relaunch helper started at logon.
//!
//! Checks for a pending resume marker and tells the user a resume is
//! available. Never creates the store or writes records; if another process
//! holds the store lock it does nothing.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use install_queue::config::GlobalConfig;
use install_queue::orchestrator::{ConsoleNotifier, Notifier, RestartCoordinator};
use install_queue::persistence::db;
use install_queue::persistence::lock::StoreLock;
use install_queue::persistence::store::Store;
use install_queue::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "install-queue-launcher",
    about = "Announce a pending installer resume",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;

    let _lock = match StoreLock::acquire(&config.lock_path()) {
        Ok(lock) => lock,
        Err(AppError::Locked(owner)) => {
            info!(owner, "installer queue already running; nothing to announce");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    let db = match db::connect_existing(&config.db_path()).await {
        Ok(db) => Arc::new(db),
        Err(AppError::NotFound(_)) => {
            info!("no store yet; nothing to announce");
            return Ok(());
        }
        Err(err) => {
            warn!(%err, "store unreadable; start install-queue to recover it");
            return Ok(());
        }
    };

    match RestartCoordinator::pending_notice(&Store::new(db)).await? {
        Some(notice) => ConsoleNotifier.resume_available(&notice).await,
        None => {
            info!("no pending resume");
            Ok(())
        }
    }
}
