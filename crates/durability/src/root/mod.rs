//! Log root
//!
//! A log root is a directory holding all state of one log: the RAW write
//! path, every tenant directory, the persisted scalars of the dealer and the
//! replica staging areas. See [`paths`] for the layout.
//!
//! The root also owns the index-wide reader/writer lock. Appends, sorts and
//! optimizer merges hold the read side; deleting a whole tenant and
//! promoting a replica snapshot hold the write side.

pub mod info;
pub mod lock;
pub mod paths;

pub use info::{InfoStore, LAST_ID, MASTER_DELTA, NEXT_TIMESTAMP};
pub use lock::{ProcessLock, CLEANER_LOCK, DEALER_LOCK, WRITER_LOCK};
pub use paths::{RootPaths, CONFIG_FILE};

use crate::segment::sync_dir;
use doclog_core::{validate_index_code, Error, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Entries replaced as a unit when a replica snapshot is promoted
const PROMOTED_ENTRIES: &[&str] = &["indexes", "dealer.next_timestamp.info", "dealer.last_id.info"];

/// An open log root.
#[derive(Debug)]
pub struct LogRoot {
    paths: RootPaths,
    info: InfoStore,
    index_lock: RwLock<()>,
}

impl LogRoot {
    /// Open (creating if needed) the log root at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let paths = RootPaths::from_root(path);
        paths.create_directories()?;
        debug!(target: "doclog::root", root = %paths.root().display(), "Opened log root");
        Ok(LogRoot {
            info: InfoStore::new(paths.clone()),
            paths,
            index_lock: RwLock::new(()),
        })
    }

    /// Directory layout
    pub fn paths(&self) -> &RootPaths {
        &self.paths
    }

    /// Persisted scalars
    pub fn info(&self) -> &InfoStore {
        &self.info
    }

    /// Shared side of the index-wide lock. May be taken recursively.
    pub fn read_indexes(&self) -> RwLockReadGuard<'_, ()> {
        self.index_lock.read_recursive()
    }

    /// Exclusive side of the index-wide lock
    pub fn write_indexes(&self) -> RwLockWriteGuard<'_, ()> {
        self.index_lock.write()
    }

    /// Take the process lock for `role` (see [`WRITER_LOCK`], [`DEALER_LOCK`], [`CLEANER_LOCK`]).
    pub fn lock_role(&self, role: &str) -> Result<ProcessLock> {
        ProcessLock::acquire(&self.paths.lock(role))
    }

    /// Whether the safe-to-read marker exists
    pub fn is_safe_to_read(&self) -> bool {
        self.paths.safe_to_read().exists()
    }

    /// Fail with [`Error::NotReady`] unless the marker exists
    pub fn require_safe_to_read(&self) -> Result<()> {
        if self.is_safe_to_read() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    /// Create the safe-to-read marker
    pub fn set_safe_to_read(&self) -> Result<()> {
        if !self.is_safe_to_read() {
            std::fs::write(self.paths.safe_to_read(), b"")?;
            sync_dir(self.paths.root())?;
            info!(target: "doclog::root", "Log root marked safe to read");
        }
        Ok(())
    }

    /// Remove the safe-to-read marker
    pub fn clear_safe_to_read(&self) -> Result<()> {
        match std::fs::remove_file(self.paths.safe_to_read()) {
            Ok(()) => sync_dir(self.paths.root()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Index codes that currently have a tenant directory, sorted.
    pub fn list_index_codes(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(self.paths.indexes()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut codes = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_index_code(&name).is_ok() {
                codes.push(name);
            }
        }
        codes.sort();
        Ok(codes)
    }

    /// Whether a completed mirror snapshot is waiting in `migrated/`.
    ///
    /// The mirroring side renames a fully written staging directory to
    /// `migrated/`, so its presence means the snapshot is complete.
    pub fn has_migrated(&self) -> bool {
        self.paths.migrated().is_dir()
    }

    /// Promote `migrated/` to be the current state.
    ///
    /// The current tenant directories and dealer scalars move to
    /// `previous/` (replacing what was there), the migrated ones take their
    /// place. Holds the index write lock throughout. Returns the promoted
    /// dealer watermark, or `None` if there was nothing to promote.
    pub fn promote_migrated(&self) -> Result<Option<u64>> {
        if !self.has_migrated() {
            return Ok(None);
        }
        let _guard = self.write_indexes();

        let migrated = self.paths.migrated();
        let previous = self.paths.previous();
        remove_dir_if_exists(&previous)?;
        std::fs::create_dir_all(&previous)?;

        for entry in PROMOTED_ENTRIES {
            let current = self.paths.root().join(entry);
            if current.exists() {
                std::fs::rename(&current, previous.join(entry))?;
            }
            let incoming = migrated.join(entry);
            if incoming.exists() {
                std::fs::rename(&incoming, &current)?;
            }
        }

        remove_dir_if_exists(&migrated)?;
        std::fs::create_dir_all(self.paths.indexes())?;
        sync_dir(&previous)?;
        sync_dir(self.paths.root())?;

        let watermark = self.info.get_or(NEXT_TIMESTAMP, 0)?;
        info!(target: "doclog::root", watermark, "Promoted migrated snapshot");
        Ok(Some(watermark))
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
