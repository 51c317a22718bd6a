//! Persisted scalar state.
//!
//! Each key lives in its own `<key>.info` file as plain decimal text, so an
//! operator can inspect or repair it with a text editor. Writes go through a
//! temporary file, fsync and rename.

use super::paths::RootPaths;
use crate::segment::sync_dir;
use doclog_core::{Error, Result};
use std::fs::OpenOptions;
use std::io::{self, Write};

/// Dealer watermark: the lowest RAW timestamp not yet dealt
pub const NEXT_TIMESTAMP: &str = "dealer.next_timestamp";

/// Last id handed out by the dealer
pub const LAST_ID: &str = "dealer.last_id";

/// Clock-skew allowance between master and replica, in ms
pub const MASTER_DELTA: &str = "master_delta";

/// Key/value store of `u64` scalars under a log root.
#[derive(Debug, Clone)]
pub struct InfoStore {
    paths: RootPaths,
}

impl InfoStore {
    /// Store rooted at `paths`
    pub fn new(paths: RootPaths) -> Self {
        InfoStore { paths }
    }

    /// Read `key`, or `None` if it was never written.
    pub fn get(&self, key: &str) -> Result<Option<u64>> {
        let path = self.paths.info(key);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        text.trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::corruption(format!("{}: {}", path.display(), e)))
    }

    /// Read `key`, falling back to `default`.
    pub fn get_or(&self, key: &str, default: u64) -> Result<u64> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Durably replace the value of `key`.
    pub fn set(&self, key: &str, value: u64) -> Result<()> {
        let final_path = self.paths.info(key);
        let temp_path = self.paths.root().join(format!(".{}.info.tmp", key));

        {
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&temp_path)?;
            writeln!(file, "{}", value)?;
            file.sync_all()?;
        }

        std::fs::rename(&temp_path, &final_path)?;
        sync_dir(self.paths.root())
    }
}
