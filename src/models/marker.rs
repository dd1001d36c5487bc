//! Resume marker: durable flag that a session waits on a host restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Written when a restart-required outcome halts a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ResumeMarker {
    /// Unique record identifier.
    pub id: String,
    /// Session to resume.
    pub session_id: String,
    /// When the marker was written.
    pub written_at: DateTime<Utc>,
}

impl ResumeMarker {
    /// Construct a marker for the given session.
    #[must_use]
    pub fn new(session_id: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            written_at: Utc::now(),
        }
    }
}
