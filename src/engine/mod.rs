//! Installer execution: run one installer, wait for it, classify the exit.
//!
//! The [`Executor`] trait is the pluggable strategy. [`ProcessExecutor`]
//! spawns the real installer; [`SimulatedExecutor`] stands in on hosts
//! without the native installer subsystem. [`ExecutionEngine`] wraps
//! either one, timestamps each attempt and guarantees that at most one
//! installer runs at a time.

pub mod process;
pub mod simulated;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{ExecutorKind, GlobalConfig};
use crate::models::job::{Job, JobState};

pub use process::ProcessExecutor;
pub use simulated::SimulatedExecutor;

/// Installer finished and changes are in effect.
pub const EXIT_SUCCESS: i32 = 0;
/// Installer finished; a host restart is required to complete it.
pub const EXIT_RESTART_REQUIRED: i32 = 3010;
/// Installer finished and has initiated a host restart itself.
pub const EXIT_RESTART_INITIATED: i32 = 1641;

/// Raw result of one installer process as seen by an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitObservation {
    /// Exit code, or `None` when the process could not start or its exit
    /// could not be observed.
    pub exit_code: Option<i32>,
    /// Detail explaining an unobservable outcome.
    pub message: Option<String>,
}

impl ExitObservation {
    /// A process that exited with `code`.
    #[must_use]
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            message: None,
        }
    }

    /// A process whose exit was never observed.
    #[must_use]
    pub fn unobservable(message: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            message: Some(message.into()),
        }
    }
}

/// Classified outcome of one installer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Terminal state derived from the exit code.
    pub state: JobState,
    /// Raw exit code, if observed.
    pub exit_code: Option<i32>,
    /// Human-readable detail for anything but plain success.
    pub message: Option<String>,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt ended.
    pub ended_at: DateTime<Utc>,
}

/// Strategy that launches an installer and waits for it to exit.
///
/// Implementations never retry and never apply timeouts; an interactive
/// installer may legitimately wait on a human for hours.
pub trait Executor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run the job's installer to completion.
    fn execute<'a>(
        &'a self,
        job: &'a Job,
    ) -> Pin<Box<dyn Future<Output = ExitObservation> + Send + 'a>>;
}

/// Map a raw exit code to a job state.
///
/// | exit code      | state                      |
/// |----------------|----------------------------|
/// | 0              | `Succeeded`                |
/// | 3010, 1641     | `SucceededRestartRequired` |
/// | anything else  | `Failed`                   |
/// | not observed   | `Unknown`                  |
#[must_use]
pub fn classify(exit_code: Option<i32>) -> JobState {
    match exit_code {
        Some(EXIT_SUCCESS) => JobState::Succeeded,
        Some(EXIT_RESTART_REQUIRED | EXIT_RESTART_INITIATED) => JobState::SucceededRestartRequired,
        Some(_) => JobState::Failed,
        None => JobState::Unknown,
    }
}

/// Human-readable explanation of a failing Windows Installer exit code.
///
/// Returns `None` for success codes.
#[must_use]
pub fn describe_exit_code(code: i32) -> Option<String> {
    let text = match code {
        EXIT_SUCCESS | EXIT_RESTART_REQUIRED | EXIT_RESTART_INITIATED => return None,
        1602 => "installation cancelled by user",
        1618 => "another installation is already in progress",
        1619 => "installation package could not be opened",
        1620 => "installation package is invalid",
        1622 => "error opening installation log file",
        1625 => "installation prohibited by system policy",
        1638 => "another version is already installed",
        other => return Some(format!("installation failed with exit code {other}")),
    };
    Some(text.to_owned())
}

/// Pick the executor for this host according to configuration.
#[must_use]
pub fn executor_for_host(config: &GlobalConfig) -> Arc<dyn Executor> {
    let native = match config.executor {
        ExecutorKind::Process => true,
        ExecutorKind::Simulated => false,
        ExecutorKind::Auto => cfg!(windows),
    };

    if native {
        Arc::new(ProcessExecutor::new(config.msiexec_path.clone()))
    } else {
        info!("native installer subsystem unavailable, using simulated executor");
        Arc::new(SimulatedExecutor::new(config.simulation.clone()))
    }
}

/// Runs installers one at a time through an [`Executor`].
pub struct ExecutionEngine {
    executor: Arc<dyn Executor>,
    gate: Mutex<()>,
}

impl ExecutionEngine {
    /// Wrap an executor.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            gate: Mutex::new(()),
        }
    }

    /// Name of the wrapped executor.
    #[must_use]
    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    /// Run the job's installer and classify the result.
    ///
    /// Blocks until the installer exits. Concurrent callers queue behind
    /// the one currently running.
    pub async fn run(&self, job: &Job) -> ExecutionReport {
        let _running = self.gate.lock().await;
        let span = info_span!(
            "run_installer",
            job_id = job.id,
            installer = %job.source_path.display(),
            executor = self.executor.name()
        );

        async {
            let started_at = Utc::now();
            info!(kind = job.kind.as_str(), "installer started");
            let observation = self.executor.execute(job).await;
            let ended_at = Utc::now();

            let state = classify(observation.exit_code);
            let message = observation
                .message
                .or_else(|| observation.exit_code.and_then(describe_exit_code));

            match state {
                JobState::Succeeded | JobState::SucceededRestartRequired => {
                    info!(exit_code = ?observation.exit_code, state = state.as_str(), "installer finished");
                }
                _ => {
                    warn!(
                        exit_code = ?observation.exit_code,
                        state = state.as_str(),
                        message = message.as_deref().unwrap_or_default(),
                        "installer did not succeed"
                    );
                }
            }

            ExecutionReport {
                state,
                exit_code: observation.exit_code,
                message,
                started_at,
                ended_at,
            }
        }
        .instrument(span)
        .await
    }
}
