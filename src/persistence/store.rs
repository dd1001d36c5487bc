//! Durable record store for sessions, jobs and resume markers.
//!
//! [`Store`] bundles the three repositories over one pool and provides
//! the multi-record writes that must become visible together. Every write
//! has been committed (and flushed, see [`super::db::connect`]) by the time
//! the returned future resolves.

use std::sync::Arc;

use tracing::debug;

use crate::models::job::Job;
use crate::models::marker::ResumeMarker;
use crate::models::session::Session;
use crate::{AppError, Result};

use super::db::Database;
use super::job_repo::JobRepo;
use super::marker_repo::MarkerRepo;
use super::session_repo::SessionRepo;

/// Facade over the session, job and marker collections.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    sessions: SessionRepo,
    jobs: JobRepo,
    markers: MarkerRepo,
}

impl Store {
    /// Build a store over an open pool.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            sessions: SessionRepo::new(Arc::clone(&db)),
            jobs: JobRepo::new(Arc::clone(&db)),
            markers: MarkerRepo::new(Arc::clone(&db)),
            db,
        }
    }

    /// Underlying pool.
    #[must_use]
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Session collection.
    #[must_use]
    pub fn sessions(&self) -> &SessionRepo {
        &self.sessions
    }

    /// Job collection.
    #[must_use]
    pub fn jobs(&self) -> &JobRepo {
        &self.jobs
    }

    /// Resume marker collection.
    #[must_use]
    pub fn markers(&self) -> &MarkerRepo {
        &self.markers
    }

    /// Persist a new session together with all of its jobs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails; nothing is written.
    pub async fn create_session(&self, session: &Session, jobs: &[Job]) -> Result<()> {
        let mut tx = self.db.begin().await?;
        for job in jobs {
            JobRepo::put_with(&mut *tx, job).await?;
        }
        SessionRepo::put_with(&mut *tx, session).await?;
        tx.commit().await?;
        debug!(session_id = session.id, jobs = jobs.len(), "session persisted");
        Ok(())
    }

    /// Persist a job outcome and the session cursor in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the cursor would regress, or
    /// `AppError::Db` if the transaction fails.
    pub async fn record_job(&self, job: &Job, session: &Session) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let stored: Option<i64> = sqlx::query_scalar("SELECT cursor FROM session WHERE id = ?1")
            .bind(&session.id)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(stored) = stored {
            if stored >= i64::from(session.cursor) {
                return Err(AppError::InvalidTransition(format!(
                    "session {} cursor is already at {stored}",
                    session.id
                )));
            }
        }
        JobRepo::put_with(&mut *tx, job).await?;
        SessionRepo::put_with(&mut *tx, session).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Write a resume marker and the session's restart flag atomically.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails; no marker is visible.
    pub async fn write_marker(&self, session: &Session, marker: &ResumeMarker) -> Result<()> {
        let mut tx = self.db.begin().await?;
        SessionRepo::put_with(&mut *tx, session).await?;
        MarkerRepo::put_with(&mut *tx, marker).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove the session's marker and persist the session in one transaction.
    ///
    /// Returns the number of markers removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails.
    pub async fn clear_marker(&self, session: &Session) -> Result<u64> {
        let mut tx = self.db.begin().await?;
        let removed = MarkerRepo::delete_for_session_with(&mut *tx, &session.id).await?;
        SessionRepo::put_with(&mut *tx, session).await?;
        tx.commit().await?;
        Ok(removed)
    }
}
