//! RAW log: the global write path.
//!
//! All tenants append to one RAW write head. The head is created lazily on
//! the first write, rotated once it grows past `raw_segment_size`, and never
//! reopened after rotation or restart. Once dealt, RAW segments are archived
//! from `raw/live` into `raw/history`; [`RawLog::segments`] lists both as one
//! timeline.

use crate::config::LogConfig;
use crate::format::SegmentKind;
use crate::root::LogRoot;
use crate::segment::{Segment, SegmentWriter};
use doclog_core::{now_millis, Record, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

struct Head {
    writer: Option<SegmentWriter>,
    last_timestamp: u64,
}

/// The global append log.
pub struct RawLog {
    root: Arc<LogRoot>,
    segment_size: u64,
    head: Mutex<Head>,
}

impl RawLog {
    /// Open the RAW log of `root`. No segment is created until the first write.
    pub fn open(root: Arc<LogRoot>, config: &LogConfig) -> Self {
        RawLog {
            root,
            segment_size: config.raw_segment_size,
            head: Mutex::new(Head {
                writer: None,
                last_timestamp: 0,
            }),
        }
    }

    /// Append one record.
    ///
    /// Rejects records that already carry an id or lack a valid index code.
    pub fn write(&self, record: Record) -> Result<()> {
        self.write_batch(vec![record])
    }

    /// Append a batch of records under one head lock.
    ///
    /// The whole batch is validated before anything is written.
    pub fn write_batch(&self, records: Vec<Record>) -> Result<()> {
        for record in &records {
            record.validate_for_write()?;
        }

        let mut head = self.head.lock();
        for mut record in records {
            record.timestamp_ms = now_millis();
            let writer = self.ensure_head(&mut head)?;
            writer.append(&record)?;
            if writer.size() > self.segment_size {
                self.rotate(&mut head)?;
            }
        }
        Ok(())
    }

    /// Force buffered bytes of the write head to stable storage.
    pub fn flush(&self) -> Result<()> {
        let mut head = self.head.lock();
        if let Some(writer) = head.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Close the current write head, if any, releasing its lock.
    pub fn close_head(&self) -> Result<()> {
        let mut head = self.head.lock();
        self.rotate(&mut head)
    }

    /// Timestamp of the current write head, if one is open.
    pub fn head_timestamp(&self) -> Option<u64> {
        self.head.lock().writer.as_ref().map(|w| w.timestamp())
    }

    /// RAW segments not yet archived, by timestamp
    pub fn live_segments(&self) -> Result<Vec<Segment>> {
        Segment::list(&self.root.paths().raw_live(), SegmentKind::Raw)
    }

    /// Archived RAW segments, by timestamp
    pub fn history_segments(&self) -> Result<Vec<Segment>> {
        Segment::list(&self.root.paths().raw_history(), SegmentKind::Raw)
    }

    /// Live and archived RAW segments as one timeline.
    ///
    /// Segments only move from live to history, so live is listed first:
    /// an archive landing between the two listings shows the segment in
    /// both rather than in neither. Duplicates are reported once, at their
    /// history path.
    pub fn segments(&self) -> Result<Vec<Segment>> {
        let live = self.live_segments()?;
        let mut all = self.history_segments()?;
        all.extend(live);
        // Stable sort keeps the history entry ahead of its live twin.
        all.sort_by_key(|s| s.timestamp());
        all.dedup_by_key(|s| s.timestamp());
        Ok(all)
    }

    /// First RAW segment with timestamp `>= timestamp`
    pub fn segment_at_or_after(&self, timestamp: u64) -> Result<Option<Segment>> {
        Ok(self
            .segments()?
            .into_iter()
            .find(|s| s.timestamp() >= timestamp))
    }

    /// First RAW segment with timestamp `> timestamp`
    pub fn segment_after(&self, timestamp: u64) -> Result<Option<Segment>> {
        Ok(self
            .segments()?
            .into_iter()
            .find(|s| s.timestamp() > timestamp))
    }

    /// Resolve a RAW segment by timestamp in either directory.
    pub fn find(&self, timestamp: u64) -> Result<Option<Segment>> {
        Ok(self
            .segments()?
            .into_iter()
            .find(|s| s.timestamp() == timestamp))
    }

    /// Move a dealt segment from `raw/live` to `raw/history`.
    pub fn archive(&self, segment: &Segment) -> Result<Segment> {
        let archived = segment.move_to(&self.root.paths().raw_history())?;
        debug!(target: "doclog::raw", segment = %segment.name(), "Archived raw segment");
        Ok(archived)
    }

    fn ensure_head<'a>(&self, head: &'a mut Head) -> Result<&'a mut SegmentWriter> {
        if head.writer.is_none() {
            let newest = self
                .segments()?
                .last()
                .map(|s| s.timestamp())
                .unwrap_or(0);
            let timestamp = now_millis()
                .max(newest.saturating_add(1))
                .max(head.last_timestamp.saturating_add(1));
            let writer = SegmentWriter::create_raw(&self.root.paths().raw_live(), timestamp)?;
            info!(target: "doclog::raw", timestamp, "Opened raw write head");
            head.last_timestamp = timestamp;
            head.writer = Some(writer);
        }
        head.writer
            .as_mut()
            .ok_or_else(|| doclog_core::Error::internal("raw write head missing"))
    }

    fn rotate(&self, head: &mut Head) -> Result<()> {
        if let Some(writer) = head.writer.take() {
            let records = writer.record_count();
            let bytes = writer.size();
            let segment = writer.finish()?;
            info!(target: "doclog::raw", segment = %segment.name(), records, bytes, "Rotated raw segment");
        }
        Ok(())
    }
}

impl Drop for RawLog {
    fn drop(&mut self) {
        let mut head = self.head.lock();
        if let Some(writer) = head.writer.take() {
            let _ = writer.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentReader;
    use doclog_core::Error;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path, config: &LogConfig) -> (Arc<LogRoot>, RawLog) {
        let root = Arc::new(LogRoot::open(dir).unwrap());
        let log = RawLog::open(Arc::clone(&root), config);
        (root, log)
    }

    #[test]
    fn test_write_rejects_invalid_records() {
        let dir = tempdir().unwrap();
        let (_root, log) = open(dir.path(), &LogConfig::for_testing());

        let mut with_id = Record::new("t", "a");
        with_id.id = Some(1);
        assert!(matches!(log.write(with_id), Err(Error::InvalidRecord(_))));

        let no_code = Record {
            docid: Some("a".into()),
            ..Default::default()
        };
        assert!(log.write(no_code).is_err());
        assert!(log.segments().unwrap().is_empty());
    }

    #[test]
    fn test_batch_validation_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let (_root, log) = open(dir.path(), &LogConfig::for_testing());
        let mut bad = Record::new("t", "b");
        bad.id = Some(3);
        assert!(log.write_batch(vec![Record::new("t", "a"), bad]).is_err());
        assert!(log.segments().unwrap().is_empty());
    }

    #[test]
    fn test_write_stamps_timestamp() {
        let dir = tempdir().unwrap();
        let (_root, log) = open(dir.path(), &LogConfig::for_testing());
        let before = now_millis();
        log.write(Record::new("t", "a").with_field("x", "1")).unwrap();
        log.close_head().unwrap();

        let segments = log.segments().unwrap();
        let records = SegmentReader::read_all(&segments[0]).unwrap();
        assert!(records[0].timestamp_ms >= before);
        assert_eq!(records[0].index_code.as_deref(), Some("t"));
    }

    #[test]
    fn test_rotation_by_size() {
        let dir = tempdir().unwrap();
        let config = LogConfig {
            raw_segment_size: 200,
            ..LogConfig::for_testing()
        };
        let (_root, log) = open(dir.path(), &config);
        for i in 0..30 {
            log.write(Record::new("t", format!("doc-{}", i)).with_field("body", "x".repeat(20)))
                .unwrap();
        }
        log.close_head().unwrap();

        let segments = log.segments().unwrap();
        assert!(segments.len() > 1);
        let total: usize = segments
            .iter()
            .map(|s| SegmentReader::read_all(s).unwrap().len())
            .sum();
        assert_eq!(total, 30);
        for pair in segments.windows(2) {
            assert!(pair[0].timestamp() < pair[1].timestamp());
        }
    }

    #[test]
    fn test_head_is_locked_until_rotated() {
        let dir = tempdir().unwrap();
        let (_root, log) = open(dir.path(), &LogConfig::for_testing());
        log.write(Record::new("t", "a")).unwrap();
        let head = log.live_segments().unwrap().pop().unwrap();
        assert!(head.is_locked().unwrap());
        assert_eq!(log.head_timestamp(), Some(head.timestamp()));

        log.close_head().unwrap();
        assert!(!head.is_locked().unwrap());
        assert_eq!(log.head_timestamp(), None);
    }

    #[test]
    fn test_new_head_after_restart_is_newer() {
        let dir = tempdir().unwrap();
        let config = LogConfig::for_testing();
        let first_ts = {
            let (_root, log) = open(dir.path(), &config);
            log.write(Record::new("t", "a")).unwrap();
            log.head_timestamp().unwrap()
        };

        let (_root, log) = open(dir.path(), &config);
        log.write(Record::new("t", "b")).unwrap();
        assert!(log.head_timestamp().unwrap() > first_ts);
        assert_eq!(log.segments().unwrap().len(), 2);
    }

    #[test]
    fn test_segments_spans_live_and_history() {
        let dir = tempdir().unwrap();
        let (_root, log) = open(dir.path(), &LogConfig::for_testing());
        log.write(Record::new("t", "a")).unwrap();
        log.close_head().unwrap();
        log.write(Record::new("t", "b")).unwrap();
        log.close_head().unwrap();

        let first = log.live_segments().unwrap().remove(0);
        log.archive(&first).unwrap();

        assert_eq!(log.history_segments().unwrap().len(), 1);
        assert_eq!(log.live_segments().unwrap().len(), 1);
        let all = log.segments().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].timestamp(), first.timestamp());
        assert!(log.find(first.timestamp()).unwrap().is_some());
        assert_eq!(
            log.segment_after(first.timestamp()).unwrap().unwrap().timestamp(),
            all[1].timestamp()
        );
    }

    #[test]
    fn test_segment_in_both_directories_is_listed_once_at_history_path() {
        let dir = tempdir().unwrap();
        let (root, log) = open(dir.path(), &LogConfig::for_testing());
        log.write(Record::new("t", "a")).unwrap();
        log.close_head().unwrap();
        let live = log.live_segments().unwrap().remove(0);

        // Snapshot of a listing that raced an archive: the live file is seen
        // and the archived copy is seen too.
        std::fs::create_dir_all(root.paths().raw_history()).unwrap();
        std::fs::copy(
            live.path(),
            root.paths().raw_history().join(live.name().file_name()),
        )
        .unwrap();

        let all = log.segments().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].dir(), root.paths().raw_history().as_path());

        std::fs::remove_file(live.path()).unwrap();
        let found = log.find(live.timestamp()).unwrap().unwrap();
        assert_eq!(SegmentReader::read_all(&found).unwrap().len(), 1);
    }

    #[test]
    fn test_listing_never_misses_segments_archived_concurrently() {
        let dir = tempdir().unwrap();
        let (_root, log) = open(dir.path(), &LogConfig::for_testing());
        for i in 0..200 {
            log.write(Record::new("t", format!("doc-{}", i))).unwrap();
            log.close_head().unwrap();
        }
        let log = Arc::new(log);
        let expected = log.segments().unwrap().len();
        assert_eq!(expected, 200);

        let archiver = {
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for segment in log.live_segments().unwrap() {
                    log.archive(&segment).unwrap();
                }
            })
        };
        while !archiver.is_finished() {
            assert_eq!(log.segments().unwrap().len(), expected);
        }
        archiver.join().unwrap();
        assert_eq!(log.history_segments().unwrap().len(), expected);
    }
}
