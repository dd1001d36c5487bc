//! Final per-session outcome counts.

use serde::{Deserialize, Serialize};

use super::job::JobState;

/// Counts of terminal job outcomes for one session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RunSummary {
    /// Exit code 0.
    pub succeeded: u32,
    /// Exit code 3010 or 1641.
    pub succeeded_restart_required: u32,
    /// Any other exit code.
    pub failed: u32,
    /// Outcome never observed.
    pub unknown: u32,
    /// Cancelled before start.
    pub skipped: u32,
}

impl RunSummary {
    /// Build a summary from job states; non-terminal states are ignored.
    #[must_use]
    pub fn from_states(states: impl IntoIterator<Item = JobState>) -> Self {
        let mut summary = Self::default();
        for state in states {
            summary.record(state);
        }
        summary
    }

    /// Count one job state.
    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Succeeded => self.succeeded += 1,
            JobState::SucceededRestartRequired => self.succeeded_restart_required += 1,
            JobState::Failed => self.failed += 1,
            JobState::Unknown => self.unknown += 1,
            JobState::Skipped => self.skipped += 1,
            JobState::Pending | JobState::Running => {}
        }
    }

    /// Number of jobs with a terminal outcome.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.succeeded + self.succeeded_restart_required + self.failed + self.unknown + self.skipped
    }

    /// True when at least one job did not succeed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.failed + self.unknown + self.skipped > 0
    }
}
