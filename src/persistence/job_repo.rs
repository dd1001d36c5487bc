//! Job repository for `SQLite` persistence.

use std::path::PathBuf;
use std::sync::Arc;

use crate::models::job::{Job, JobKind, JobState};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_optional_timestamp, to_u32};

/// Repository for job records.
#[derive(Clone)]
pub struct JobRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    session_id: String,
    position: i64,
    source_path: String,
    display_name: String,
    kind: String,
    state: String,
    exit_code: Option<i64>,
    attempts: i64,
    message: Option<String>,
    started_at: Option<String>,
    ended_at: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let exit_code = self
            .exit_code
            .map(|code| {
                i32::try_from(code).map_err(|_| AppError::Db(format!("invalid exit_code: {code}")))
            })
            .transpose()?;

        Ok(Job {
            id: self.id,
            session_id: self.session_id,
            position: to_u32(self.position, "position")?,
            source_path: PathBuf::from(self.source_path),
            display_name: self.display_name,
            kind: JobKind::parse(&self.kind)?,
            state: JobState::parse(&self.state)?,
            exit_code,
            attempts: to_u32(self.attempts, "attempts")?,
            message: self.message,
            started_at: parse_optional_timestamp(self.started_at.as_deref(), "started_at")?,
            ended_at: parse_optional_timestamp(self.ended_at.as_deref(), "ended_at")?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, session_id, position, source_path, display_name, kind, \
     state, exit_code, attempts, message, started_at, ended_at FROM job";

impl JobRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a job record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn put(&self, job: &Job) -> Result<()> {
        Self::put_with(self.db.as_ref(), job).await
    }

    pub(crate) async fn put_with<'e, E>(executor: E, job: &Job) -> Result<()>
    where
        E: sqlx::SqliteExecutor<'e>,
    {
        sqlx::query(
            "INSERT OR REPLACE INTO job (id, session_id, position, source_path, display_name, kind,
                state, exit_code, attempts, message, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&job.id)
        .bind(&job.session_id)
        .bind(i64::from(job.position))
        .bind(job.source_path.to_string_lossy().into_owned())
        .bind(&job.display_name)
        .bind(job.kind.as_str())
        .bind(job.state.as_str())
        .bind(job.exit_code)
        .bind(i64::from(job.attempts))
        .bind(&job.message)
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.ended_at.map(|t| t.to_rfc3339()))
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Retrieve a job by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the job does not exist.
    pub async fn get(&self, id: &str) -> Result<Job> {
        let row: Option<JobRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.ok_or_else(|| AppError::NotFound(format!("job {id} not found")))?
            .into_job()
    }

    /// List the jobs of a session in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a record is malformed.
    pub async fn list(&self, session_id: &str) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE session_id = ?1 ORDER BY position ASC"
        ))
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// List every job currently recorded as `Running`, across all sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a record is malformed.
    pub async fn list_running(&self) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE state = 'running'"))
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Delete a job record. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
