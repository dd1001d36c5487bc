//! Structured audit trail for queue and restart events.
//!
//! Provides the [`AuditLogger`] trait and associated types. The primary
//! implementation, [`JsonlAuditWriter`], appends JSONL records to
//! daily-rotating files under `<data_dir>/logs/`.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type classification for audit log entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A session and its jobs were persisted.
    SessionCreated,
    /// An installer was launched.
    JobStarted,
    /// An installer attempt ended with a recorded outcome.
    JobFinished,
    /// A resume marker was written after a restart-required outcome.
    MarkerWritten,
    /// A resumed session cleared its marker.
    MarkerCleared,
    /// The user started fresh and discarded a marker.
    MarkerAbandoned,
    /// A marker pointed at data that could not be loaded.
    MarkerInconsistency,
}

/// A structured record of one queue event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ISO 8601 timestamp with timezone.
    pub timestamp: DateTime<Utc>,
    /// Event classification.
    pub event_type: AuditEventType,
    /// Associated session identifier.
    pub session_id: Option<String>,
    /// Associated job identifier.
    pub job_id: Option<String>,
    /// Installer path for job events.
    pub source_path: Option<String>,
    /// Attempt start (for `job_finished`).
    pub started_at: Option<DateTime<Utc>>,
    /// Attempt end (for `job_finished`).
    pub ended_at: Option<DateTime<Utc>>,
    /// Raw installer exit code, if observed.
    pub exit_code: Option<i32>,
    /// Recorded job state or other short result.
    pub outcome: Option<String>,
    /// Free-form detail.
    pub message: Option<String>,
}

impl AuditEntry {
    /// Construct a minimal audit entry for the given event type.
    #[must_use]
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            session_id: None,
            job_id: None,
            source_path: None,
            started_at: None,
            ended_at: None,
            exit_code: None,
            outcome: None,
            message: None,
        }
    }

    /// Set the session identifier for this entry.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the job identifier and installer path for this entry.
    #[must_use]
    pub fn with_job(mut self, job_id: impl Into<String>, source_path: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self.source_path = Some(source_path.into());
        self
    }

    /// Set the attempt window for this entry.
    #[must_use]
    pub fn with_times(mut self, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self.ended_at = Some(ended_at);
        self
    }

    /// Set the outcome and exit code for this entry.
    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>, exit_code: Option<i32>) -> Self {
        self.outcome = Some(outcome.into());
        self.exit_code = exit_code;
        self
    }

    /// Set the detail message for this entry.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Writes structured audit entries to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()>;
}

/// Record an entry, logging a warning instead of failing the caller.
pub fn record(logger: Option<&dyn AuditLogger>, entry: AuditEntry) {
    if let Some(logger) = logger {
        if let Err(err) = logger.log_entry(entry) {
            tracing::warn!(%err, "failed to write audit entry");
        }
    }
}

pub use writer::JsonlAuditWriter;
