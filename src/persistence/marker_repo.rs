//! Resume marker repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::marker::ResumeMarker;
use crate::Result;

use super::db::Database;
use super::parse_timestamp;

/// Repository for resume marker records. At most one marker per session.
#[derive(Clone)]
pub struct MarkerRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct MarkerRow {
    id: String,
    session_id: String,
    written_at: String,
}

impl MarkerRow {
    fn into_marker(self) -> Result<ResumeMarker> {
        Ok(ResumeMarker {
            written_at: parse_timestamp(&self.written_at, "written_at")?,
            id: self.id,
            session_id: self.session_id,
        })
    }
}

impl MarkerRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Write a marker, replacing any existing marker of the same session.
    ///
    /// A single statement, so readers see either the old or the new marker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn put(&self, marker: &ResumeMarker) -> Result<()> {
        Self::put_with(self.db.as_ref(), marker).await
    }

    pub(crate) async fn put_with<'e, E>(executor: E, marker: &ResumeMarker) -> Result<()>
    where
        E: sqlx::SqliteExecutor<'e>,
    {
        sqlx::query(
            "INSERT INTO resume_marker (id, session_id, written_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET id = excluded.id, written_at = excluded.written_at",
        )
        .bind(&marker.id)
        .bind(&marker.session_id)
        .bind(marker.written_at.to_rfc3339())
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Retrieve a marker by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the record is malformed.
    pub async fn get(&self, id: &str) -> Result<Option<ResumeMarker>> {
        let row: Option<MarkerRow> =
            sqlx::query_as("SELECT id, session_id, written_at FROM resume_marker WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;
        row.map(MarkerRow::into_marker).transpose()
    }

    /// The marker referencing `session_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the record is malformed.
    pub async fn get_for_session(&self, session_id: &str) -> Result<Option<ResumeMarker>> {
        let row: Option<MarkerRow> = sqlx::query_as(
            "SELECT id, session_id, written_at FROM resume_marker WHERE session_id = ?1",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(MarkerRow::into_marker).transpose()
    }

    /// The most recently written marker, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the record is malformed.
    pub async fn latest(&self) -> Result<Option<ResumeMarker>> {
        let row: Option<MarkerRow> = sqlx::query_as(
            "SELECT id, session_id, written_at FROM resume_marker
             ORDER BY written_at DESC LIMIT 1",
        )
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(MarkerRow::into_marker).transpose()
    }

    /// List all markers, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a record is malformed.
    pub async fn list(&self) -> Result<Vec<ResumeMarker>> {
        let rows: Vec<MarkerRow> = sqlx::query_as(
            "SELECT id, session_id, written_at FROM resume_marker ORDER BY written_at DESC",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(MarkerRow::into_marker).collect()
    }

    /// Delete a marker by identifier. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM resume_marker WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn delete_for_session_with<'e, E>(executor: E, session_id: &str) -> Result<u64>
    where
        E: sqlx::SqliteExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM resume_marker WHERE session_id = ?1")
            .bind(session_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Remove every marker, whatever it references.
    ///
    /// Used when marker rows themselves cannot be read.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM resume_marker")
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
