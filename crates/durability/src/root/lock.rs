//! Process role locks.
//!
//! Only one writer, one dealer and one cleaner may run against a log root.
//! Each role takes an exclusive advisory lock on `<root>/<role>.lock` at
//! startup and holds it for the lifetime of the returned guard. A second
//! writer would leave a locked RAW head behind the newest one, which the
//! dealer never gets past.

use doclog_core::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

/// Role name of the writer lock
pub const WRITER_LOCK: &str = "writer";

/// Role name of the dealer lock
pub const DEALER_LOCK: &str = "dealer";

/// Role name of the cleaner lock
pub const CLEANER_LOCK: &str = "cleaner";

/// Guard holding an exclusive lock file. Unlocked on drop.
#[derive(Debug)]
pub struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// Try to take the lock at `path` without blocking.
    ///
    /// Fails with [`Error::AlreadyLocked`] if another process (or another
    /// guard in this process) holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.try_lock_exclusive().map_err(|_| Error::AlreadyLocked {
            path: path.to_path_buf(),
        })?;
        info!(target: "doclog::root", path = %path.display(), "Acquired process lock");
        Ok(ProcessLock {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
