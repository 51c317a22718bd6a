//! Segment writer.
//!
//! RAW segments are created under a temporary name, locked exclusively and
//! renamed into place before the first record is appended, so a reader never
//! sees an unlocked write head. Tenant segments (UNSORTED, SORTED,
//! OPTIMIZED) stay under their temporary name until [`SegmentWriter::finish`]
//! renames them to their final name, which carries the record count.

use super::{sync_dir, Segment};
use crate::format::{encode_record, SegmentHeader, SegmentKind, SegmentName, SEGMENT_HEADER_SIZE};
use doclog_core::{Error, Record, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only writer for one segment file.
pub struct SegmentWriter {
    /// Buffered file handle; `None` once finished
    file: Option<BufWriter<File>>,

    /// Directory the segment lives in
    dir: PathBuf,

    /// Kind of segment being written
    kind: SegmentKind,

    /// Segment timestamp
    timestamp: u64,

    /// Path the bytes are currently written to
    write_path: PathBuf,

    /// Current write position (bytes from start, header included)
    position: u64,

    /// Records appended so far
    record_count: u64,

    /// Whether buffered bytes have not been synced yet
    has_unsynced_data: bool,
}

impl SegmentWriter {
    /// Create a new RAW write head at `timestamp` in `dir`.
    ///
    /// Fails with [`Error::AlreadyLocked`] if the lock cannot be taken.
    pub fn create_raw(dir: &Path, timestamp: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let name = SegmentName::raw(timestamp)?;
        let final_path = dir.join(name.file_name());
        if final_path.exists() {
            return Err(Error::invariant(format!(
                "raw segment {} already exists",
                final_path.display()
            )));
        }
        let temp_path = temp_path(dir, SegmentKind::Raw, timestamp);

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .read(true)
            .open(&temp_path)?;
        file.try_lock_exclusive().map_err(|_| Error::AlreadyLocked {
            path: temp_path.clone(),
        })?;

        let mut writer = BufWriter::new(file);
        writer.write_all(&SegmentHeader::new(SegmentKind::Raw).to_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        std::fs::rename(&temp_path, &final_path)?;
        sync_dir(dir)?;

        Ok(SegmentWriter {
            file: Some(writer),
            dir: dir.to_path_buf(),
            kind: SegmentKind::Raw,
            timestamp,
            write_path: final_path,
            position: SEGMENT_HEADER_SIZE as u64,
            record_count: 0,
            has_unsynced_data: false,
        })
    }

    /// Start a tenant segment of `kind` at `timestamp` in `dir`.
    pub fn create_tenant(dir: &Path, kind: SegmentKind, timestamp: u64) -> Result<Self> {
        if kind == SegmentKind::Raw {
            return Err(Error::invariant("create_tenant called for a RAW segment"));
        }
        // Validate the timestamp up front; the count is only known at finish.
        SegmentName::tenant(kind, timestamp, 0)?;
        std::fs::create_dir_all(dir)?;
        let temp_path = temp_path(dir, kind, timestamp);

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&SegmentHeader::new(kind).to_bytes())?;

        Ok(SegmentWriter {
            file: Some(writer),
            dir: dir.to_path_buf(),
            kind,
            timestamp,
            write_path: temp_path,
            position: SEGMENT_HEADER_SIZE as u64,
            record_count: 0,
            has_unsynced_data: true,
        })
    }

    /// Append a record. Returns the byte offset the record was written at.
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        let frame = encode_record(record)?;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::invariant("append to a finished segment"))?;
        file.write_all(&frame)?;

        let offset = self.position;
        self.position += frame.len() as u64;
        self.record_count += 1;
        self.has_unsynced_data = true;
        Ok(offset)
    }

    /// Force buffered bytes to stable storage.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
            if self.has_unsynced_data {
                file.get_ref().sync_data()?;
                self.has_unsynced_data = false;
            }
        }
        Ok(())
    }

    /// Close the segment and return a handle to it under its final name.
    ///
    /// For RAW segments this releases the write lock. For tenant segments the
    /// temporary file is synced and renamed to `<ts>.<kind>_<count>`.
    pub fn finish(mut self) -> Result<Segment> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::invariant("segment finished twice"))?;
        file.flush()?;
        let file = file
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;

        if self.kind == SegmentKind::Raw {
            file.unlock()?;
            drop(file);
            return Ok(Segment::new(&self.dir, SegmentName::raw(self.timestamp)?));
        }
        drop(file);

        let name = SegmentName::tenant(self.kind, self.timestamp, self.record_count)?;
        let final_path = self.dir.join(name.file_name());
        std::fs::rename(&self.write_path, &final_path)?;
        sync_dir(&self.dir)?;
        self.write_path = final_path;
        Ok(Segment::new(&self.dir, name))
    }

    /// Discard an unfinished tenant segment.
    pub fn abort(mut self) -> Result<()> {
        self.file.take();
        if self.kind != SegmentKind::Raw {
            match std::fs::remove_file(&self.write_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Segment kind
    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// Segment timestamp
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Bytes written so far, header included
    pub fn size(&self) -> u64 {
        self.position
    }

    /// Records appended so far
    pub fn record_count(&self) -> u64 {
        self.record_count
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if self.kind == SegmentKind::Raw && self.has_unsynced_data {
                let _ = file.flush();
                let _ = file.get_ref().sync_data();
            }
        }
    }
}

/// Write a complete tenant segment from `records` in one go.
pub fn write_segment<'a, I>(
    dir: &Path,
    kind: SegmentKind,
    timestamp: u64,
    records: I,
) -> Result<Segment>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut writer = SegmentWriter::create_tenant(dir, kind, timestamp)?;
    for record in records {
        if let Err(e) = writer.append(record) {
            let _ = writer.abort();
            return Err(e);
        }
    }
    writer.finish()
}

fn temp_path(dir: &Path, kind: SegmentKind, timestamp: u64) -> PathBuf {
    dir.join(format!(".{}.{}.tmp", timestamp, kind))
}
