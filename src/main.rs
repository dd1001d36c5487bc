#![forbid(unsafe_code)]

//! `install-queue`: runs installers one at a time and resumes after a
//! host restart.
//!
//! Every invocation takes the store lock, opens (or recovers) the store and
//! lets the restart coordinator decide between a fresh run and a resume.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use install_queue::audit::{self, AuditEntry, AuditEventType, AuditLogger, JsonlAuditWriter};
use install_queue::config::GlobalConfig;
use install_queue::engine::{executor_for_host, ExecutionEngine};
use install_queue::models::job::InstallerItem;
use install_queue::models::summary::RunSummary;
use install_queue::orchestrator::{
    platform_hook, run_queue, ConsoleNotifier, Entry, EntryMode, JobQueue, RelaunchCommand,
    RestartCoordinator, RunOptions, RunReport,
};
use install_queue::persistence::lock::StoreLock;
use install_queue::persistence::store::Store;
use install_queue::persistence::{db, retention};
use install_queue::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "install-queue", about = "Restart-aware installer queue", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new session with the given installers, in order.
    ///
    /// Any pending resume marker is abandoned.
    Run {
        /// Installer packages (`.msi` or `.exe`).
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Continue the session halted for a host restart.
    Resume,

    /// Discard the pending resume marker without running anything.
    Abandon,

    /// Show stored sessions and their jobs.
    Status {
        /// Show only this session.
        #[arg(long)]
        session: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    if let Command::Status { session } = &args.command {
        let db = Arc::new(db::connect(&config.db_path()).await?);
        return print_status(&Store::new(db), session.as_deref()).await;
    }

    let _lock = StoreLock::acquire(&config.lock_path())?;
    let (pool, recovery) = db::open(&config.db_path()).await?;
    let db = Arc::new(pool);

    let purged = retention::purge_retired(&db, config.retention_days).await?;
    if purged > 0 {
        info!(purged, "retired sessions purged");
    }

    let store = Store::new(db);
    let audit: Arc<dyn AuditLogger> = Arc::new(JsonlAuditWriter::new(config.audit_dir())?);
    let mut coordinator = build_coordinator(&config, &args.config, store.clone())
        .with_audit(Arc::clone(&audit))
        .with_store_recovery(recovery);

    match args.command {
        Command::Run { paths } => {
            let items = paths
                .into_iter()
                .map(InstallerItem::from_path)
                .collect::<Result<Vec<_>>>()?;
            if let Entry::Fresh {
                abandoned,
                inconsistency,
            } = coordinator.begin(EntryMode::Fresh).await?
            {
                if let Some(marker) = abandoned {
                    eprintln!(
                        "warning: discarded pending resume of session {}",
                        marker.session_id
                    );
                }
                if let Some(found) = inconsistency {
                    eprintln!("warning: {}", found.reason);
                }
            }

            let mut queue = JobQueue::enqueue(&store, &items).await?;
            audit::record(
                Some(audit.as_ref()),
                AuditEntry::new(AuditEventType::SessionCreated)
                    .with_session(queue.session().id.clone())
                    .with_message(format!("{} installer(s)", items.len())),
            );
            execute(&config, &mut queue, &mut coordinator, audit).await
        }
        Command::Resume => match coordinator.begin(EntryMode::Resume).await? {
            Entry::Resume(mut queue) => execute(&config, &mut queue, &mut coordinator, audit).await,
            Entry::Fresh { inconsistency, .. } => {
                if let Some(found) = inconsistency {
                    eprintln!("warning: resume marker discarded: {}", found.reason);
                }
                println!("nothing to resume");
                Ok(())
            }
        },
        Command::Abandon => {
            match coordinator.abandon().await? {
                Some(marker) => println!("abandoned resume of session {}", marker.session_id),
                None => println!("no resume marker found"),
            }
            Ok(())
        }
        Command::Status { .. } => Ok(()),
    }
}

fn build_coordinator(config: &GlobalConfig, config_path: &Path, store: Store) -> RestartCoordinator {
    let coordinator = RestartCoordinator::new(store).with_notifier(Arc::new(ConsoleNotifier));
    if !config.relaunch.enabled {
        return coordinator;
    }
    match RelaunchCommand::for_config(config, config_path) {
        Ok(command) => coordinator.with_relaunch(platform_hook(config), command),
        Err(err) => {
            warn!(%err, "auto-relaunch disabled");
            coordinator
        }
    }
}

async fn execute(
    config: &GlobalConfig,
    queue: &mut JobQueue,
    coordinator: &mut RestartCoordinator,
    audit: Arc<dyn AuditLogger>,
) -> Result<()> {
    let engine = ExecutionEngine::new(executor_for_host(config));
    info!(executor = engine.executor_name(), "execution engine ready");

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        warn!("cancel requested; the running installer finishes, the rest are skipped");
        signal_token.cancel();
    });

    let options = RunOptions {
        retry: config.retry,
        cancel,
        events: None,
        audit: Some(audit),
    };
    let result = run_queue(queue, &engine, coordinator, &options).await;
    signal_task.abort();

    let report = result?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("session {}: {}", report.session_id, describe(&report.summary));
    if report.halted_for_restart {
        println!("restart the computer to continue; the remaining installers resume afterwards");
    } else if report.cancelled {
        println!("cancelled; installers that had not started were skipped");
    } else if report.summary.is_partial() {
        println!("completed with failures");
    } else {
        println!("completed");
    }
}

fn describe(summary: &RunSummary) -> String {
    format!(
        "{} succeeded, {} succeeded (restart required), {} failed, {} unknown, {} skipped",
        summary.succeeded,
        summary.succeeded_restart_required,
        summary.failed,
        summary.unknown,
        summary.skipped
    )
}

async fn print_status(store: &Store, only: Option<&str>) -> Result<()> {
    let sessions = match only {
        Some(id) => vec![store.sessions().get(id).await?],
        None => store.sessions().list().await?,
    };
    let marker = store.markers().latest().await?;

    if sessions.is_empty() {
        println!("no sessions");
    }
    for session in sessions {
        let jobs = store.jobs().list(&session.id).await?;
        let waiting = marker.as_ref().is_some_and(|m| m.session_id == session.id);
        println!(
            "session {} created {} cursor {}/{}{}{}",
            session.id,
            session.created_at.to_rfc3339(),
            session.cursor,
            session.job_ids.len(),
            if waiting { " [awaiting restart]" } else { "" },
            if session.retired_at.is_some() { " [retired]" } else { "" },
        );
        for job in jobs {
            println!(
                "  {:>3} {:<28} {:<12} {}{}",
                job.position,
                job.state.as_str(),
                job.exit_code.map_or_else(|| "-".to_owned(), |c| c.to_string()),
                job.display_name,
                job.message
                    .as_deref()
                    .map_or_else(String::new, |m| format!(" ({m})")),
            );
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
