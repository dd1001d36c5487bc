//! Job model: one installer's unit of work within a session.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Installer package format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Windows Installer package, run through `msiexec`.
    Msi,
    /// Self-contained executable installer.
    Exe,
}

impl JobKind {
    /// Infer the kind from a file extension (case-insensitive).
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "msi" => Some(Self::Msi),
            "exe" => Some(Self::Exe),
            _ => None,
        }
    }

    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Msi => "msi",
            Self::Exe => "exe",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for unrecognised values.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "msi" => Ok(Self::Msi),
            "exe" => Ok(Self::Exe),
            other => Err(AppError::Db(format!("invalid job kind: {other}"))),
        }
    }
}

/// Lifecycle state of a job. Transitions only move toward a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued, not yet started.
    Pending,
    /// Installer process started; exit not yet recorded.
    Running,
    /// Exit code 0.
    Succeeded,
    /// Exit code 3010 or 1641: installed, effective after a host restart.
    SucceededRestartRequired,
    /// Any other exit code.
    Failed,
    /// Process could not start or its exit was never observed.
    Unknown,
    /// Cancelled before it started.
    Skipped,
}

impl JobState {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::SucceededRestartRequired => "succeeded_restart_required",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
            Self::Skipped => "skipped",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for unrecognised values.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "succeeded_restart_required" => Ok(Self::SucceededRestartRequired),
            "failed" => Ok(Self::Failed),
            "unknown" => Ok(Self::Unknown),
            "skipped" => Ok(Self::Skipped),
            other => Err(AppError::Db(format!("invalid job state: {other}"))),
        }
    }
}

/// An installer path handed to the queue by the scanning collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerItem {
    /// Installer file location.
    pub path: PathBuf,
    /// Package format.
    pub kind: JobKind,
    /// Name shown to the user.
    pub display_name: String,
}

impl InstallerItem {
    /// Build an item, inferring kind and display name from the path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Exec` if the extension is neither `.msi` nor `.exe`.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let kind = JobKind::from_path(&path).ok_or_else(|| {
            AppError::Exec(format!("unsupported installer type: {}", path.display()))
        })?;
        let display_name = path
            .file_stem()
            .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());
        Ok(Self {
            path,
            kind,
            display_name,
        })
    }
}

/// Job domain entity persisted in the `job` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Job {
    /// Unique record identifier.
    pub id: String,
    /// Owning session identifier.
    pub session_id: String,
    /// Zero-based position in enqueue order.
    pub position: u32,
    /// Installer file location.
    pub source_path: PathBuf,
    /// Name shown to the user.
    pub display_name: String,
    /// Package format.
    pub kind: JobKind,
    /// Current lifecycle state.
    pub state: JobState,
    /// Raw installer exit code, when one was observed.
    pub exit_code: Option<i32>,
    /// Number of times the installer process was launched.
    pub attempts: u32,
    /// Human-readable outcome detail.
    pub message: Option<String>,
    /// When the most recent attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the outcome was recorded.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Construct a pending job with a generated identifier.
    #[must_use]
    pub fn new(session_id: String, position: u32, item: &InstallerItem) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            position,
            source_path: item.path.clone(),
            display_name: item.display_name.clone(),
            kind: item.kind,
            state: JobState::Pending,
            exit_code: None,
            attempts: 0,
            message: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Running -> Running` is a retry of the same job.
    #[must_use]
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self.state, next) {
            (JobState::Pending, next) => next != JobState::Pending,
            (JobState::Running, next) => next != JobState::Pending && next != JobState::Skipped,
            _ => false,
        }
    }
}
