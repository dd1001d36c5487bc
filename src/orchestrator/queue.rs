//! Ordered, persisted job queue for one session.
//!
//! The store is the source of truth: every mutation is written first and
//! only then applied to the in-memory copy, so a [`JobQueue`] can always be
//! rebuilt with [`JobQueue::load`].

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use crate::engine::ExecutionReport;
use crate::models::job::{InstallerItem, Job, JobState};
use crate::models::marker::ResumeMarker;
use crate::models::session::Session;
use crate::models::summary::RunSummary;
use crate::persistence::store::Store;
use crate::{AppError, Result};

/// Message recorded on a job whose process outlived its observer.
pub const INTERRUPTED_MESSAGE: &str = "interrupted before exit was observed";

/// A session and its jobs, backed by the store.
#[derive(Clone)]
pub struct JobQueue {
    store: Store,
    session: Session,
    jobs: Vec<Job>,
}

impl JobQueue {
    /// Create and persist a new session holding one pending job per item.
    ///
    /// Jobs keep the order of `items` for the lifetime of the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Exec` if `items` is empty, or `AppError::Db` if the
    /// session cannot be persisted.
    pub async fn enqueue(store: &Store, items: &[InstallerItem]) -> Result<Self> {
        if items.is_empty() {
            return Err(AppError::Exec("no installers to run".into()));
        }

        let mut session = Session::new();
        let mut jobs = Vec::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            let position = u32::try_from(position)
                .map_err(|_| AppError::Exec("too many installers in one session".into()))?;
            jobs.push(Job::new(session.id.clone(), position, item));
        }
        session.job_ids = jobs.iter().map(|j| j.id.clone()).collect();

        store.create_session(&session, &jobs).await?;
        info!(session_id = session.id, jobs = jobs.len(), "session created");

        Ok(Self {
            store: store.clone(),
            session,
            jobs,
        })
    }

    /// Rebuild a queue from the store.
    ///
    /// A job left `Running` at the cursor belongs to a process that died
    /// before the installer exit was seen; it is recorded as `Unknown` and
    /// the cursor moves past it, so it is never launched twice.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is missing, or
    /// `AppError::Db` if its records are malformed or contradict each other.
    pub async fn load(store: &Store, session_id: &str) -> Result<Self> {
        Self::load_inner(store, session_id)
            .instrument(info_span!("load_session", session_id))
            .await
    }

    async fn load_inner(store: &Store, session_id: &str) -> Result<Self> {
        let session = store.sessions().get(session_id).await?;
        let jobs = store.jobs().list(session_id).await?;
        validate(&session, &jobs)?;

        let mut queue = Self {
            store: store.clone(),
            session,
            jobs,
        };

        let interrupted = queue
            .current()
            .filter(|j| j.state == JobState::Running)
            .map(|j| (j.id.clone(), j.started_at));
        if let Some((job_id, started_at)) = interrupted {
            warn!(job_id, "job was running when the previous process ended");
            let now = Utc::now();
            let report = ExecutionReport {
                state: JobState::Unknown,
                exit_code: None,
                message: Some(INTERRUPTED_MESSAGE.into()),
                started_at: started_at.unwrap_or(now),
                ended_at: now,
            };
            queue.advance(&job_id, &report).await?;
        }

        Ok(queue)
    }

    /// The session this queue belongs to.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// All jobs in enqueue order.
    #[must_use]
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Look up a job by identifier.
    #[must_use]
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// The next job to attempt: the job at the cursor, if it is still pending.
    #[must_use]
    pub fn next(&self) -> Option<Job> {
        self.current()
            .filter(|j| j.state == JobState::Pending)
            .cloned()
    }

    /// Persist that the job at the cursor is about to launch.
    ///
    /// Calling it again on a running job records another attempt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the job is not at the cursor,
    /// is already terminal, or another job is running anywhere in the store.
    pub async fn mark_running(&mut self, job_id: &str) -> Result<Job> {
        let index = self.index_at_cursor(job_id)?;

        let others: Vec<Job> = self
            .store
            .jobs()
            .list_running()
            .await?
            .into_iter()
            .filter(|j| j.id != job_id)
            .collect();
        if let Some(other) = others.first() {
            return Err(AppError::InvalidTransition(format!(
                "job {} is already running",
                other.id
            )));
        }

        let mut job = self.jobs[index].clone();
        if !job.can_transition_to(JobState::Running) {
            return Err(AppError::InvalidTransition(format!(
                "job {job_id} cannot start from {}",
                job.state.as_str()
            )));
        }
        job.state = JobState::Running;
        job.attempts += 1;
        job.started_at = Some(Utc::now());

        self.store.jobs().put(&job).await?;
        self.jobs[index] = job.clone();
        Ok(job)
    }

    /// Record an outcome for a job.
    ///
    /// A `Running` outcome is persisted without moving the cursor. A terminal
    /// outcome is persisted together with the incremented cursor. Repeating
    /// an outcome already recorded for the job changes nothing and returns
    /// `false`; use [`JobQueue::mark_running`] to count another attempt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown job,
    /// `AppError::InvalidTransition` for a regression, a conflicting outcome
    /// or a job that is not at the cursor, or `AppError::Db` if persistence
    /// fails (in which case the in-memory queue is unchanged).
    pub async fn advance(&mut self, job_id: &str, report: &ExecutionReport) -> Result<bool> {
        let index = self
            .jobs
            .iter()
            .position(|j| j.id == job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {job_id} not in session")))?;
        let current = &self.jobs[index];

        if current.state.is_terminal() {
            if current.state == report.state && current.exit_code == report.exit_code {
                return Ok(false);
            }
            return Err(AppError::InvalidTransition(format!(
                "job {job_id} already ended as {}",
                current.state.as_str()
            )));
        }

        if report.state == JobState::Running {
            if current.state == JobState::Running {
                return Ok(false);
            }
            self.mark_running(job_id).await?;
            return Ok(true);
        }

        let index = self.index_at_cursor(job_id)?;
        let mut job = self.jobs[index].clone();
        if !job.can_transition_to(report.state) {
            return Err(AppError::InvalidTransition(format!(
                "job {job_id} cannot move from {} to {}",
                job.state.as_str(),
                report.state.as_str()
            )));
        }

        job.state = report.state;
        job.exit_code = report.exit_code;
        job.message.clone_from(&report.message);
        if job.started_at.is_none() && report.state != JobState::Skipped {
            job.started_at = Some(report.started_at);
        }
        job.ended_at = Some(report.ended_at);

        let mut session = self.session.clone();
        session.cursor += 1;
        session.updated_at = Utc::now();

        self.store.record_job(&job, &session).await?;
        info!(
            session_id = session.id,
            job_id,
            state = job.state.as_str(),
            cursor = session.cursor,
            "job outcome recorded"
        );
        self.jobs[index] = job;
        self.session = session;
        Ok(true)
    }

    /// Cancel the pending job at the cursor before it starts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the job is not the pending
    /// job at the cursor.
    pub async fn skip(&mut self, job_id: &str, reason: &str) -> Result<()> {
        let index = self.index_at_cursor(job_id)?;
        if self.jobs[index].state != JobState::Pending {
            return Err(AppError::InvalidTransition(format!(
                "job {job_id} has already started"
            )));
        }
        let now = Utc::now();
        let report = ExecutionReport {
            state: JobState::Skipped,
            exit_code: None,
            message: Some(reason.to_owned()),
            started_at: now,
            ended_at: now,
        };
        self.advance(job_id, &report).await.map(|_| ())
    }

    /// Counts of terminal outcomes so far.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_states(self.jobs.iter().map(|j| j.state))
    }

    /// Number of jobs not yet attempted.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.state == JobState::Pending)
            .count()
    }

    /// Whether every job has a terminal outcome.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.session.is_exhausted() && self.jobs.iter().all(|j| j.state.is_terminal())
    }

    /// Stamp the session retired if it is complete and no marker references it.
    ///
    /// Returns whether the session is retired after the call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be read or written.
    pub async fn retire(&mut self) -> Result<bool> {
        if self.session.retired_at.is_some() {
            return Ok(true);
        }
        if !self.is_complete() || self.session.restart_pending {
            return Ok(false);
        }
        if self
            .store
            .markers()
            .get_for_session(&self.session.id)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        let mut session = self.session.clone();
        let now = Utc::now();
        session.retired_at = Some(now);
        session.updated_at = now;
        self.store.sessions().put(&session).await?;
        info!(session_id = session.id, "session retired");
        self.session = session;
        Ok(true)
    }

    /// Flag the session as waiting on a host restart and write its marker.
    pub(crate) async fn pause_for_restart(&mut self, marker: &ResumeMarker) -> Result<()> {
        let mut session = self.session.clone();
        session.restart_pending = true;
        session.updated_at = Utc::now();
        self.store.write_marker(&session, marker).await?;
        self.session = session;
        Ok(())
    }

    /// Clear the restart flag without touching the marker.
    pub(crate) async fn acknowledge_restart(&mut self) -> Result<()> {
        if !self.session.restart_pending {
            return Ok(());
        }
        let mut session = self.session.clone();
        session.restart_pending = false;
        session.updated_at = Utc::now();
        self.store.sessions().put(&session).await?;
        self.session = session;
        Ok(())
    }

    /// Remove the session's marker and restart flag together.
    pub(crate) async fn clear_restart(&mut self) -> Result<u64> {
        let mut session = self.session.clone();
        session.restart_pending = false;
        session.updated_at = Utc::now();
        let removed = self.store.clear_marker(&session).await?;
        self.session = session;
        Ok(removed)
    }

    fn current(&self) -> Option<&Job> {
        self.session
            .current_job_id()
            .and_then(|id| self.jobs.iter().find(|j| j.id == id))
    }

    fn index_at_cursor(&self, job_id: &str) -> Result<usize> {
        if self.session.current_job_id() != Some(job_id) {
            return Err(AppError::InvalidTransition(format!(
                "job {job_id} is not at the cursor of session {}",
                self.session.id
            )));
        }
        self.jobs
            .iter()
            .position(|j| j.id == job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {job_id} not in session")))
    }
}

/// Check that stored jobs match the session's ordering and cursor.
fn validate(session: &Session, jobs: &[Job]) -> Result<()> {
    let stored: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    let expected: Vec<&str> = session.job_ids.iter().map(String::as_str).collect();
    if stored != expected {
        return Err(AppError::Db(format!(
            "session {} lists {} jobs but {} are stored in a different order or set",
            session.id,
            expected.len(),
            stored.len()
        )));
    }

    let cursor = session.cursor as usize;
    for (index, job) in jobs.iter().enumerate() {
        let consistent = if index < cursor {
            job.state.is_terminal()
        } else if index == cursor {
            matches!(job.state, JobState::Pending | JobState::Running)
        } else {
            job.state == JobState::Pending
        };
        if !consistent {
            return Err(AppError::Db(format!(
                "job {} at position {index} is {} with cursor {cursor}",
                job.id,
                job.state.as_str()
            )));
        }
    }
    Ok(())
}
