//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::session::Session;
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_optional_timestamp, parse_timestamp, to_u32};

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    job_ids: String,
    cursor: i64,
    restart_pending: i64,
    created_at: String,
    updated_at: String,
    retired_at: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let job_ids: Vec<String> = serde_json::from_str(&self.job_ids)?;
        let cursor = to_u32(self.cursor, "cursor")?;
        if cursor as usize > job_ids.len() {
            return Err(AppError::Db(format!(
                "session {} cursor {cursor} beyond {} jobs",
                self.id,
                job_ids.len()
            )));
        }

        Ok(Session {
            id: self.id,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
            job_ids,
            cursor,
            restart_pending: self.restart_pending != 0,
            retired_at: parse_optional_timestamp(self.retired_at.as_deref(), "retired_at")?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, job_ids, cursor, restart_pending, created_at, updated_at, retired_at FROM session";

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the stored cursor is ahead of
    /// `session.cursor`, or `AppError::Db` if the write fails.
    pub async fn put(&self, session: &Session) -> Result<()> {
        Self::put_with(self.db.as_ref(), session).await
    }

    /// Upsert on any executor, so the write can join a transaction.
    ///
    /// The update is refused at the storage level when it would move the
    /// cursor backwards.
    pub(crate) async fn put_with<'e, E>(executor: E, session: &Session) -> Result<()>
    where
        E: sqlx::SqliteExecutor<'e>,
    {
        let job_ids = serde_json::to_string(&session.job_ids)?;
        let result = sqlx::query(
            "INSERT INTO session (id, job_ids, cursor, restart_pending, created_at, updated_at, retired_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                job_ids = excluded.job_ids,
                cursor = excluded.cursor,
                restart_pending = excluded.restart_pending,
                updated_at = excluded.updated_at,
                retired_at = excluded.retired_at
             WHERE excluded.cursor >= session.cursor",
        )
        .bind(&session.id)
        .bind(&job_ids)
        .bind(i64::from(session.cursor))
        .bind(i64::from(session.restart_pending))
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.retired_at.map(|t| t.to_rfc3339()))
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::InvalidTransition(format!(
                "session {} cursor cannot move backwards",
                session.id
            )));
        }
        Ok(())
    }

    /// Retrieve a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Db` if the stored record is malformed.
    pub async fn get(&self, id: &str) -> Result<Session> {
        let row: Option<SessionRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?
            .into_session()
    }

    /// List all sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a record is malformed.
    pub async fn list(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC"))
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Delete a session record. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM session WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
