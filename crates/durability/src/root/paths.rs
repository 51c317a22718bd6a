//! Log root directory structure
//!
//! ```text
//! <root>/
//! ├── doclog.toml                  # Optional configuration
//! ├── writer.lock, dealer.lock,    # Process role locks
//! │   cleaner.lock
//! ├── dealer.next_timestamp.info   # Persisted scalars
//! ├── dealer.last_id.info
//! ├── master_delta.info
//! ├── safe_to_read                 # Marker: reads and compaction enabled
//! ├── raw/
//! │   ├── live/<ms>.raw            # Undealt RAW segments (incl. write head)
//! │   └── history/<ms>.raw         # Dealt RAW segments
//! ├── indexes/<code>/
//! │   ├── segments/                # UNSORTED and SORTED segments
//! │   ├── optimized/               # OPTIMIZED segments
//! │   └── last_read                # mtime = last page read
//! ├── migrated/                    # Replica: completed mirror snapshot
//! └── previous/                    # Replica: state replaced by the last promotion
//! ```

use std::path::{Path, PathBuf};

/// Name of the configuration file inside a log root
pub const CONFIG_FILE: &str = "doclog.toml";

/// Log root paths
#[derive(Debug, Clone)]
pub struct RootPaths {
    root: PathBuf,
}

impl RootPaths {
    /// Create paths from root directory
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        RootPaths {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configuration file
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// RAW segments not yet dealt
    pub fn raw_live(&self) -> PathBuf {
        self.root.join("raw").join("live")
    }

    /// RAW segments already dealt
    pub fn raw_history(&self) -> PathBuf {
        self.root.join("raw").join("history")
    }

    /// Parent of all tenant directories
    pub fn indexes(&self) -> PathBuf {
        self.root.join("indexes")
    }

    /// Tenant directory
    pub fn index_dir(&self, code: &str) -> PathBuf {
        self.indexes().join(code)
    }

    /// UNSORTED and SORTED segments of a tenant
    pub fn index_segments(&self, code: &str) -> PathBuf {
        self.index_dir(code).join("segments")
    }

    /// OPTIMIZED segments of a tenant
    pub fn index_optimized(&self, code: &str) -> PathBuf {
        self.index_dir(code).join("optimized")
    }

    /// Last-read marker of a tenant
    pub fn last_read(&self, code: &str) -> PathBuf {
        self.index_dir(code).join("last_read")
    }

    /// Safe-to-read marker
    pub fn safe_to_read(&self) -> PathBuf {
        self.root.join("safe_to_read")
    }

    /// Replica promotion source
    pub fn migrated(&self) -> PathBuf {
        self.root.join("migrated")
    }

    /// Replica promotion backup
    pub fn previous(&self) -> PathBuf {
        self.root.join("previous")
    }

    /// Info file for `key`
    pub fn info(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.info", key))
    }

    /// Lock file for role `name`
    pub fn lock(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.lock", name))
    }

    /// Create the directory skeleton
    pub fn create_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.raw_live())?;
        std::fs::create_dir_all(self.raw_history())?;
        std::fs::create_dir_all(self.indexes())?;
        Ok(())
    }
}
