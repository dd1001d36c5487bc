//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are re-applied
//! on every process start.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    job_ids         TEXT NOT NULL,
    cursor          INTEGER NOT NULL DEFAULT 0 CHECK(cursor >= 0),
    restart_pending INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    retired_at      TEXT
);

CREATE TABLE IF NOT EXISTS job (
    id              TEXT PRIMARY KEY NOT NULL,
    session_id      TEXT NOT NULL,
    position        INTEGER NOT NULL,
    source_path     TEXT NOT NULL,
    display_name    TEXT NOT NULL,
    kind            TEXT NOT NULL,
    state           TEXT NOT NULL,
    exit_code       INTEGER,
    attempts        INTEGER NOT NULL DEFAULT 0,
    message         TEXT,
    started_at      TEXT,
    ended_at        TEXT
);

CREATE TABLE IF NOT EXISTS resume_marker (
    id              TEXT PRIMARY KEY NOT NULL,
    session_id      TEXT NOT NULL UNIQUE,
    written_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_session ON job(session_id, position);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
