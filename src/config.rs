//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Which execution strategy runs installers.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Real processes on Windows, simulation everywhere else.
    #[default]
    Auto,
    /// Always spawn the installer process.
    Process,
    /// Always use the deterministic simulation.
    Simulated,
}

/// What the auto-relaunch entry starts after the host restarts.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelaunchMode {
    /// Start the launcher helper, which only notifies the user.
    #[default]
    Notify,
    /// Start the main binary directly in resume mode.
    Resume,
}

/// Auto-relaunch registration settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelaunchConfig {
    /// Whether an auto-relaunch entry is registered at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Name of the startup entry (registry value or desktop file stem).
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// What the entry starts.
    #[serde(default)]
    pub mode: RelaunchMode,
}

impl Default for RelaunchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: default_app_name(),
            mode: RelaunchMode::default(),
        }
    }
}

/// Caller-level retry policy for unobservable installer outcomes.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryPolicy {
    /// Extra attempts after an `Unknown` outcome; 0 runs every job once.
    #[serde(default)]
    pub unknown_attempts: u32,
}

/// Deterministic outcomes for hosts without the native installer subsystem.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SimulationConfig {
    /// Exit code reported for installers without an explicit entry.
    #[serde(default)]
    pub default_exit_code: i32,
    /// Artificial run time per installer.
    #[serde(default)]
    pub delay_ms: u64,
    /// Exit code per installer file name.
    #[serde(default)]
    pub exit_codes: HashMap<String, i32>,
    /// Installer file names whose outcome cannot be observed.
    #[serde(default)]
    pub unobservable: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_app_name() -> String {
    "InstallQueue".into()
}

fn default_retention_days() -> u32 {
    30
}

fn default_msiexec_path() -> PathBuf {
    PathBuf::from("msiexec.exe")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the store, lock file and audit logs.
    pub data_dir: PathBuf,
    /// Days after retirement before a session is purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Execution strategy selector.
    #[serde(default)]
    pub executor: ExecutorKind,
    /// Windows Installer host used for MSI packages.
    #[serde(default = "default_msiexec_path")]
    pub msiexec_path: PathBuf,
    /// Auto-relaunch registration settings.
    #[serde(default)]
    pub relaunch: RelaunchConfig,
    /// Retry policy for `Unknown` outcomes.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Simulated outcomes.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the `SQLite` store.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("install-queue.db")
    }

    /// Path of the single-writer lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("install-queue.lock")
    }

    /// Directory for JSONL audit logs.
    #[must_use]
    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    fn validate(&mut self) -> Result<()> {
        if self.relaunch.app_name.trim().is_empty() {
            return Err(AppError::Config("relaunch.app_name must not be empty".into()));
        }

        fs::create_dir_all(&self.data_dir)
            .map_err(|err| AppError::Config(format!("cannot create data_dir: {err}")))?;
        self.data_dir = self
            .data_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("data_dir invalid: {err}")))?;

        Ok(())
    }
}
