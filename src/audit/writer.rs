//! JSONL audit writer with daily file rotation.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use tracing::warn;

use super::{AuditEntry, AuditLogger};
use crate::{AppError, Result};

/// Day file currently open for appending.
struct OpenDay {
    date: NaiveDate,
    out: BufWriter<File>,
}

/// A daily-rotating JSONL audit writer.
///
/// Appends one JSON object per line to `<log_dir>/audit-YYYY-MM-DD.jsonl`
/// and flushes after every entry, since the host may restart at any point.
/// Opens a new file when the UTC date changes between writes.
pub struct JsonlAuditWriter {
    log_dir: PathBuf,
    day: Mutex<Option<OpenDay>>,
}

impl JsonlAuditWriter {
    /// Construct a writer that stores logs in `log_dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|e| {
            AppError::Io(format!(
                "failed to create audit log directory {}: {e}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            day: Mutex::new(None),
        })
    }

    /// File that receives entries written on `date`.
    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        day_file(&self.log_dir, date)
    }
}

fn day_file(log_dir: &Path, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("audit-{date}.jsonl"))
}

fn open_day(log_dir: &Path, date: NaiveDate) -> Result<OpenDay> {
    let path = day_file(log_dir, date);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| AppError::Io(format!("failed to open audit log {}: {e}", path.display())))?;
    Ok(OpenDay {
        date,
        out: BufWriter::new(file),
    })
}

impl AuditLogger for JsonlAuditWriter {
    fn log_entry(&self, entry: AuditEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)
            .map_err(|e| AppError::Io(format!("failed to serialize audit entry: {e}")))?;
        let today = Utc::now().date_naive();

        let mut guard = self
            .day
            .lock()
            .map_err(|_| AppError::Io("audit writer mutex poisoned".into()))?;

        let day = match guard.take() {
            Some(day) if day.date == today => day,
            _ => open_day(&self.log_dir, today)?,
        };
        let day = guard.insert(day);

        writeln!(day.out, "{line}")
            .and_then(|()| day.out.flush())
            .map_err(|e| {
                warn!(error = %e, "audit append failed");
                AppError::Io(format!("audit write failed: {e}"))
            })
    }
}
