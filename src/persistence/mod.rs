//! Persistence layer modules.

use chrono::{DateTime, Utc};

use crate::{AppError, Result};

pub mod db;
pub mod job_repo;
pub mod lock;
pub mod marker_repo;
pub mod retention;
pub mod schema;
pub mod session_repo;
pub mod store;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

pub(crate) fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

pub(crate) fn parse_optional_timestamp(
    raw: Option<&str>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_timestamp(s, field)).transpose()
}

pub(crate) fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| AppError::Db(format!("invalid {field}: {value}")))
}
