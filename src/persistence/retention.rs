//! Time-based purge of retired sessions.
//!
//! Deletes jobs first, then the sessions retired more than
//! `retention_days` ago. Sessions still referenced by a marker are never
//! retired, so they are never purged.

use chrono::Utc;
use tracing::info;

use super::db::Database;
use crate::Result;

/// Purge retired sessions older than `retention_days`.
///
/// Returns the number of sessions deleted.
///
/// # Errors
///
/// Returns `AppError::Db` if the transaction fails.
pub async fn purge_retired(db: &Database, retention_days: u32) -> Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let cutoff_str = cutoff.to_rfc3339();

    let mut tx = db.begin().await?;
    sqlx::query(
        "DELETE FROM job WHERE session_id IN
            (SELECT id FROM session
             WHERE retired_at IS NOT NULL AND retired_at < ?1
               AND id NOT IN (SELECT session_id FROM resume_marker))",
    )
    .bind(&cutoff_str)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query(
        "DELETE FROM session
         WHERE retired_at IS NOT NULL AND retired_at < ?1
           AND id NOT IN (SELECT session_id FROM resume_marker)",
    )
    .bind(&cutoff_str)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let purged = result.rows_affected();
    info!(retention_days, purged, "retention purge completed");
    Ok(purged)
}
