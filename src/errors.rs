//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when reading or writing the `SQLite` store.
    Db(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// A job or coordinator state change that would move backwards.
    InvalidTransition(String),
    /// Resume marker references data that cannot be loaded.
    MarkerInconsistency(String),
    /// Installer could not be prepared for execution.
    Exec(String),
    /// Auto-relaunch registration failure.
    Startup(String),
    /// Another process instance owns the store.
    Locked(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::MarkerInconsistency(msg) => write!(f, "marker inconsistency: {msg}"),
            Self::Exec(msg) => write!(f, "exec: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::Locked(msg) => write!(f, "locked: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Db(format!("invalid record payload: {err}"))
    }
}
