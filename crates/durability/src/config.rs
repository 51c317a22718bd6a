//! Log configuration via `doclog.toml`
//!
//! Every key is optional; missing keys take their defaults. A default file
//! with comments can be written next to the data with
//! [`LogConfig::write_default_if_missing`]. Edit it and restart to apply.

use doclog_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Role of the node owning a log root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Authoritative node: deals RAW segments into tenant logs
    #[default]
    Master,
    /// Mirror: promotes migrated snapshots instead of dealing
    Replica,
}

/// Configuration loaded from `doclog.toml`.
///
/// # Example
///
/// ```toml
/// role = "master"
/// raw_segment_size = 67108864
/// page_size = 1000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Node role
    pub role: NodeRole,
    /// RAW write head rotates once it exceeds this many bytes
    pub raw_segment_size: u64,
    /// Cumulative UNSORTED bytes that trigger a sort
    pub segment_size: u64,
    /// UNSORTED segment count that triggers a sort
    pub sort_segment_threshold: usize,
    /// Pending segment count that makes a tenant an optimization candidate
    pub optimize_segment_threshold: usize,
    /// Most SORTED segments merged in one optimizer pass
    pub max_merge_width: usize,
    /// Most records returned by one page read
    pub page_size: usize,
    /// Tenants read more recently than this are never cleaned
    pub cleaner_grace_secs: u64,
    /// RAW flush cadence
    pub flush_interval_ms: u64,
    /// Dealer poll cadence
    pub dealer_interval_ms: u64,
    /// Optimizer worker poll cadence
    pub optimizer_interval_ms: u64,
    /// Optimizer discovery cadence
    pub discovery_interval_ms: u64,
    /// Cleaner cadence
    pub cleaner_interval_ms: u64,
    /// Sleep after a failed background cycle
    pub error_backoff_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            role: NodeRole::Master,
            raw_segment_size: 64 * 1024 * 1024,
            segment_size: 16 * 1024 * 1024,
            sort_segment_threshold: 10,
            optimize_segment_threshold: 8,
            max_merge_width: 40,
            page_size: 1000,
            cleaner_grace_secs: 30 * 60,
            flush_interval_ms: 1000,
            dealer_interval_ms: 1000,
            optimizer_interval_ms: 5000,
            discovery_interval_ms: 30_000,
            cleaner_interval_ms: 10_000,
            error_backoff_ms: 5000,
        }
    }
}

impl LogConfig {
    /// Small segments, short cadences and no cleaner grace, for tests.
    pub fn for_testing() -> Self {
        LogConfig {
            raw_segment_size: 4 * 1024,
            segment_size: 16 * 1024,
            sort_segment_threshold: 4,
            optimize_segment_threshold: 2,
            max_merge_width: 40,
            page_size: 50,
            cleaner_grace_secs: 0,
            flush_interval_ms: 10,
            dealer_interval_ms: 10,
            optimizer_interval_ms: 10,
            discovery_interval_ms: 20,
            cleaner_interval_ms: 20,
            error_backoff_ms: 20,
            ..LogConfig::default()
        }
    }

    /// Check that values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.raw_segment_size == 0 || self.segment_size == 0 {
            return Err(Error::config("segment sizes must be greater than zero"));
        }
        if self.max_merge_width == 0 {
            return Err(Error::config("max_merge_width must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(Error::config("page_size must be at least 1"));
        }
        Ok(())
    }

    /// Grace period as a `Duration`
    pub fn cleaner_grace(&self) -> Duration {
        Duration::from_secs(self.cleaner_grace_secs)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# doclog configuration
#
# Node role: "master" (deals raw segments) or "replica" (promotes mirrored snapshots)
role = "master"

# Rotate the raw write head after this many bytes (default: 64 MiB)
raw_segment_size = 67108864

# Sort a tenant once its unsorted segments exceed this many bytes (default: 16 MiB)
segment_size = 16777216

# Sort a tenant once it has more than this many unsorted segments
sort_segment_threshold = 10

# Queue a tenant for optimization once it has more than this many pending segments
optimize_segment_threshold = 8

# Most sorted segments merged per optimizer pass
max_merge_width = 40

# Most records per page read
page_size = 1000

# Never clean a tenant read within this many seconds (default: 30 minutes)
cleaner_grace_secs = 1800

# Background cadences in milliseconds
flush_interval_ms = 1000
dealer_interval_ms = 1000
optimizer_interval_ms = 5000
discovery_interval_ms = 30000
cleaner_interval_ms = 10000
error_backoff_ms = 5000
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: LogConfig = toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_toml_matches_defaults() {
        let parsed: LogConfig = toml::from_str(LogConfig::default_toml()).unwrap();
        assert_eq!(parsed, LogConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: LogConfig = toml::from_str("role = \"replica\"\npage_size = 10\n").unwrap();
        assert_eq!(parsed.role, NodeRole::Replica);
        assert_eq!(parsed.page_size, 10);
        assert_eq!(parsed.max_merge_width, 40);
    }

    #[test]
    fn test_write_default_if_missing_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doclog.toml");
        std::fs::write(&path, "page_size = 5\n").unwrap();
        LogConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(LogConfig::from_file(&path).unwrap().page_size, 5);
    }

    #[test]
    fn test_write_to_file_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doclog.toml");
        let config = LogConfig::for_testing();
        config.write_to_file(&path).unwrap();
        assert_eq!(LogConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doclog.toml");
        std::fs::write(&path, "page_size = 0\n").unwrap();
        assert!(matches!(LogConfig::from_file(&path), Err(Error::Config(_))));

        std::fs::write(&path, "role = \"leader\"\n").unwrap();
        assert!(matches!(LogConfig::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, LogConfig::default());
    }
}
