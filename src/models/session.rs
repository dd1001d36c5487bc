//! Session model: one run-installations operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An ordered batch of jobs and the position of the next one to attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier.
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last persisted change.
    pub updated_at: DateTime<Utc>,
    /// Job identifiers in enqueue order; never reordered.
    pub job_ids: Vec<String>,
    /// Index of the next job to attempt; never decreases.
    pub cursor: u32,
    /// Set while the host must restart before the queue continues.
    pub restart_pending: bool,
    /// Set once every job is terminal and no marker references the session.
    pub retired_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Construct a new session with a generated identifier.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            job_ids: Vec::new(),
            cursor: 0,
            restart_pending: false,
            retired_at: None,
        }
    }

    /// Identifier of the job at the cursor, if any remain.
    #[must_use]
    pub fn current_job_id(&self) -> Option<&str> {
        self.job_ids
            .get(self.cursor as usize)
            .map(String::as_str)
    }

    /// Whether the cursor has moved past the last job.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.cursor as usize >= self.job_ids.len()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
