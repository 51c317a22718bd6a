//! Segment files.
//!
//! A segment is one file of CRC-framed records. RAW segments are appended to
//! while they are the write head and hold an exclusive advisory lock for
//! that time; every other kind is written under a temporary name and renamed
//! into place once complete, after which it never changes.

pub mod reader;
pub mod writer;

pub use reader::SegmentReader;
pub use writer::{write_segment, SegmentWriter};

use crate::format::{SegmentKind, SegmentName};
use doclog_core::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A segment file on disk, identified by its directory and parsed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    dir: PathBuf,
    name: SegmentName,
}

impl Segment {
    /// Refer to the segment `name` inside `dir`.
    pub fn new(dir: impl Into<PathBuf>, name: SegmentName) -> Self {
        Segment {
            dir: dir.into(),
            name,
        }
    }

    /// Parsed segment name
    pub fn name(&self) -> &SegmentName {
        &self.name
    }

    /// Segment kind
    pub fn kind(&self) -> SegmentKind {
        self.name.kind()
    }

    /// Segment timestamp (ms since epoch)
    pub fn timestamp(&self) -> u64 {
        self.name.timestamp()
    }

    /// Record count encoded in the name (absent for RAW)
    pub fn record_count(&self) -> Option<u64> {
        self.name.record_count()
    }

    /// Directory holding the segment
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the segment file
    pub fn path(&self) -> PathBuf {
        self.dir.join(self.name.file_name())
    }

    /// Whether the file is still present
    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Current file size in bytes
    pub fn size(&self) -> Result<u64> {
        match std::fs::metadata(self.path()) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::vanished(self.path().display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a writer currently holds the segment's exclusive lock.
    ///
    /// Probes with a non-blocking exclusive lock that is released right
    /// away. Any failure other than contention is returned as an error.
    pub fn is_locked(&self) -> Result<bool> {
        let path = self.path();
        let file = match OpenOptions::new().read(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::vanished(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                file.unlock()?;
                Ok(false)
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(true),
            Err(e) => Err(Error::invariant(format!(
                "lock probe failed on {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Delete the segment file. A file that is already gone is not an error.
    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move the segment into `dir` (rename, never copy).
    pub fn move_to(&self, dir: &Path) -> Result<Segment> {
        std::fs::create_dir_all(dir)?;
        let moved = Segment::new(dir, self.name.clone());
        std::fs::rename(self.path(), moved.path())?;
        sync_dir(dir)?;
        Ok(moved)
    }

    /// List segments of `kind` in `dir`, ordered by timestamp.
    ///
    /// A missing directory lists as empty. Files whose names do not parse
    /// (temporary files, markers) are skipped.
    pub fn list(dir: &Path, kind: SegmentKind) -> Result<Vec<Segment>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut segments = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            match SegmentName::parse(&file_name) {
                Ok(name) if name.kind() == kind => segments.push(Segment::new(dir, name)),
                Ok(_) => {}
                Err(e) => {
                    debug!(target: "doclog::segment", file = %file_name, error = %e, "Skipping non-segment file");
                }
            }
        }

        segments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(segments)
    }
}

/// fsync a directory so renames and deletions inside it are durable.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use doclog_core::Record;
    use tempfile::tempdir;

    #[test]
    fn test_list_orders_and_filters() {
        let dir = tempdir().unwrap();
        for ts in [30u64, 10, 20] {
            writer::write_segment(
                dir.path(),
                SegmentKind::Sorted,
                ts,
                &[Record::new("t", "a")],
            )
            .unwrap();
        }
        writer::write_segment(dir.path(), SegmentKind::Unsorted, 5, &[]).unwrap();
        std::fs::write(dir.path().join("last_read"), b"").unwrap();

        let sorted = Segment::list(dir.path(), SegmentKind::Sorted).unwrap();
        let ts: Vec<u64> = sorted.iter().map(|s| s.timestamp()).collect();
        assert_eq!(ts, vec![10, 20, 30]);

        let unsorted = Segment::list(dir.path(), SegmentKind::Unsorted).unwrap();
        assert_eq!(unsorted.len(), 1);
        assert_eq!(unsorted[0].record_count(), Some(0));
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let listed = Segment::list(&dir.path().join("nope"), SegmentKind::Raw).unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn test_lock_probe_sees_write_head() {
        let dir = tempdir().unwrap();
        let mut head = SegmentWriter::create_raw(dir.path(), 1_000).unwrap();
        head.append(&Record::new("t", "a")).unwrap();

        let segment = Segment::new(dir.path(), SegmentName::raw(1_000).unwrap());
        assert!(segment.is_locked().unwrap());

        head.finish().unwrap();
        assert!(!segment.is_locked().unwrap());
    }

    #[test]
    fn test_move_and_delete() {
        let dir = tempdir().unwrap();
        let history = dir.path().join("history");
        let segment =
            writer::write_segment(dir.path(), SegmentKind::Sorted, 7, &[Record::new("t", "a")])
                .unwrap();

        let moved = segment.move_to(&history).unwrap();
        assert!(!segment.exists());
        assert!(moved.exists());

        moved.delete().unwrap();
        assert!(!moved.exists());
        moved.delete().unwrap();
    }

    #[test]
    fn test_vanished_segment_probe() {
        let dir = tempdir().unwrap();
        let segment = Segment::new(dir.path(), SegmentName::raw(42).unwrap());
        assert!(matches!(segment.is_locked(), Err(Error::SegmentVanished(_))));
        assert!(matches!(segment.size(), Err(Error::SegmentVanished(_))));
    }
}
