//! `SQLite` connection setup with durable writes and fail-safe open.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{AppError, Result};

use super::schema;

/// Alias for the shared `SQLite` pool.
pub type Database = SqlitePool;

/// Connect to the on-disk store and apply the schema.
///
/// Every commit is flushed with `synchronous = FULL`, so a write is durable
/// once the call that issued it returns.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema bootstrap fails.
pub async fn connect(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| AppError::Db(format!("failed to create db dir: {err}")))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    if let Err(err) = bootstrap(&pool).await {
        pool.close().await;
        return Err(err);
    }
    Ok(pool)
}

/// Connect to an existing on-disk store without creating or migrating it.
///
/// Used by readers that must leave the disk untouched when no store exists.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the file does not exist, or
/// `AppError::Db` if it cannot be opened.
pub async fn connect_existing(path: &Path) -> Result<Database> {
    if !path.exists() {
        return Err(AppError::NotFound(format!("no store at {}", path.display())));
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Connect to a private in-memory store (tests and dry runs).
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema bootstrap fails.
pub async fn connect_memory() -> Result<Database> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Open the store, replacing it with an empty one if it is unreadable.
///
/// Returns the pool plus, when recovery happened, a description of what
/// was wrong. The damaged file is kept next to the new one for inspection.
///
/// # Errors
///
/// Returns `AppError::Db` if even a fresh store cannot be created.
pub async fn open(path: &Path) -> Result<(Database, Option<String>)> {
    match connect(path).await {
        Ok(pool) => Ok((pool, None)),
        Err(err) => {
            warn!(path = %path.display(), %err, "store unreadable, starting with a fresh one");
            let moved = quarantine(path)?;
            let pool = connect(path).await?;
            info!(quarantined = %moved.display(), "fresh store created");
            Ok((pool, Some(format!("store unreadable ({err}); moved to {}", moved.display()))))
        }
    }
}

async fn bootstrap(pool: &SqlitePool) -> Result<()> {
    schema::bootstrap_schema(pool).await?;
    let check: String = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_one(pool)
        .await?;
    if check != "ok" {
        return Err(AppError::Db(format!("integrity check failed: {check}")));
    }
    Ok(())
}

fn quarantine(path: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let target = suffixed(path, &format!(".corrupt-{stamp}"));
    std::fs::rename(path, &target)
        .map_err(|err| AppError::Io(format!("failed to quarantine store: {err}")))?;
    for side in ["-wal", "-shm"] {
        let sidecar = suffixed(path, side);
        if !sidecar.exists() {
            continue;
        }
        let kept = suffixed(path, &format!(".corrupt-{stamp}{side}"));
        if let Err(err) = std::fs::rename(&sidecar, &kept) {
            warn!(sidecar = %sidecar.display(), %err, "failed to quarantine store sidecar");
        }
    }
    Ok(target)
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
