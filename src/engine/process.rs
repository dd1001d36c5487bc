//! Real installer processes.
//!
//! Installers run in the foreground with inherited stdio and without any
//! silent switches, so their own dialogs stay interactive. The child is not
//! killed if this process goes away; the installer must be allowed to
//! finish on its own.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error};

use super::{ExitObservation, Executor};
use crate::models::job::{Job, JobKind};

/// Spawns installer processes and waits for their exit status.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    msiexec: PathBuf,
}

impl ProcessExecutor {
    /// Create an executor using `msiexec` for MSI packages.
    #[must_use]
    pub fn new(msiexec: PathBuf) -> Self {
        Self { msiexec }
    }

    fn command_for(&self, job: &Job) -> Command {
        let mut cmd = match job.kind {
            JobKind::Msi => {
                let mut cmd = Command::new(&self.msiexec);
                cmd.arg("/i").arg(&job.source_path);
                cmd
            }
            JobKind::Exe => Command::new(&job.source_path),
        };
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);
        cmd
    }
}

impl Executor for ProcessExecutor {
    fn name(&self) -> &'static str {
        "process"
    }

    fn execute<'a>(
        &'a self,
        job: &'a Job,
    ) -> Pin<Box<dyn Future<Output = ExitObservation> + Send + 'a>> {
        Box::pin(async move {
            if !job.source_path.is_file() {
                return ExitObservation::unobservable(format!(
                    "installer file not found: {}",
                    job.source_path.display()
                ));
            }

            let mut cmd = self.command_for(job);
            debug!(?cmd, "spawning installer");

            match cmd.status().await {
                Ok(status) => status.code().map_or_else(
                    || ExitObservation::unobservable("installer terminated without an exit code"),
                    ExitObservation::exited,
                ),
                Err(err) => {
                    error!(%err, "failed to start installer");
                    ExitObservation::unobservable(format!("failed to start installer: {err}"))
                }
            }
        })
    }
}
