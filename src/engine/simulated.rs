//! Deterministic stand-in for hosts without the native installer subsystem.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use super::{ExitObservation, Executor};
use crate::config::SimulationConfig;
use crate::models::job::Job;

/// Reports configured exit codes instead of launching anything.
///
/// Outcomes are keyed by installer file name; the same configuration always
/// yields the same outcome for the same file.
#[derive(Debug, Default)]
pub struct SimulatedExecutor {
    config: SimulationConfig,
    invocations: Mutex<Vec<PathBuf>>,
}

impl SimulatedExecutor {
    /// Build from a simulation configuration.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Report `code` for installers named `file_name`.
    #[must_use]
    pub fn with_exit_code(mut self, file_name: &str, code: i32) -> Self {
        self.config.exit_codes.insert(file_name.to_owned(), code);
        self
    }

    /// Report an unobservable outcome for installers named `file_name`.
    #[must_use]
    pub fn with_unobservable(mut self, file_name: &str) -> Self {
        self.config.unobservable.push(file_name.to_owned());
        self
    }

    /// Installer paths executed so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<PathBuf> {
        self.invocations
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn outcome_for(&self, file_name: &str) -> ExitObservation {
        if self.config.unobservable.iter().any(|n| n == file_name) {
            return ExitObservation::unobservable("simulated installer exit was not observed");
        }
        let code = self
            .config
            .exit_codes
            .get(file_name)
            .copied()
            .unwrap_or(self.config.default_exit_code);
        ExitObservation::exited(code)
    }
}

impl Executor for SimulatedExecutor {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn execute<'a>(
        &'a self,
        job: &'a Job,
    ) -> Pin<Box<dyn Future<Output = ExitObservation> + Send + 'a>> {
        Box::pin(async move {
            if let Ok(mut guard) = self.invocations.lock() {
                guard.push(job.source_path.clone());
            }

            if self.config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
            }

            let file_name = job
                .source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let outcome = self.outcome_for(&file_name);
            debug!(file_name, exit_code = ?outcome.exit_code, "simulated installer finished");
            outcome
        })
    }
}
