//! Single-writer guard for the store.
//!
//! Whoever mutates sessions holds an exclusive advisory lock on the lock
//! file for its whole lifetime. The OS releases it when the process dies,
//! so a crash never leaves the store locked.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::{AppError, Result};

/// Held exclusive lock on the store's lock file.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Take the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Locked` if another process holds it, or
    /// `AppError::Io` if the lock file cannot be opened.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| AppError::Io(format!("cannot open lock file: {err}")))?;

        file.try_lock_exclusive().map_err(|err| {
            AppError::Locked(format!(
                "{} is held by another install-queue process: {err}",
                path.display()
            ))
        })?;

        debug!(path = %path.display(), "store lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
