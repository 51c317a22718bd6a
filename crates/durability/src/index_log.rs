//! Per-tenant segment log.
//!
//! An [`IndexLog`] is a view over one tenant directory. It holds no cached
//! segment state: every query lists the directory, so several handles (and
//! the cleaner deleting files underneath) stay consistent.
//!
//! Segment timestamps chain through the stages. An UNSORTED segment takes
//! the timestamp of the RAW segment it was dealt from, a SORTED segment the
//! newest UNSORTED it consumed, an OPTIMIZED segment the newest SORTED it
//! merged. "Newer than" therefore means "holds later data" in every kind.

use crate::compaction::{CompactInfo, RecordMerger};
use crate::config::LogConfig;
use crate::format::SegmentKind;
use crate::root::LogRoot;
use crate::segment::{write_segment, Segment, SegmentReader};
use dashmap::DashMap;
use doclog_core::{validate_index_code, Record, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};
use tracing::{debug, info};

/// Summary of one segment for info calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// File name
    pub name: String,
    /// Segment timestamp (ms since epoch)
    pub timestamp: u64,
    /// Record count from the name (absent for RAW)
    pub record_count: Option<u64>,
}

impl From<&Segment> for SegmentInfo {
    fn from(segment: &Segment) -> Self {
        SegmentInfo {
            name: segment.name().file_name(),
            timestamp: segment.timestamp(),
            record_count: segment.record_count(),
        }
    }
}

/// State of one tenant log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexLogInfo {
    /// Index code
    pub code: String,
    /// OPTIMIZED segments, oldest first
    pub optimized: Vec<SegmentInfo>,
    /// SORTED segments, oldest first
    pub sorted: Vec<SegmentInfo>,
    /// UNSORTED segments, oldest first
    pub unsorted: Vec<SegmentInfo>,
    /// Records in the newest OPTIMIZED segment
    pub optimized_records: u64,
    /// Records in UNSORTED segments and SORTED segments newer than the newest OPTIMIZED one
    pub unoptimized_records: u64,
    /// Timestamp of the newest OPTIMIZED segment
    pub last_optimized: Option<u64>,
    /// Time of the last page read (ms since epoch)
    pub last_read: Option<u64>,
}

/// One tenant's UNSORTED, SORTED and OPTIMIZED segments.
pub struct IndexLog {
    code: String,
    root: Arc<LogRoot>,
    sort_lock: Mutex<()>,
    sort_segment_threshold: usize,
    sort_size_threshold: u64,
}

impl IndexLog {
    fn new(code: String, root: Arc<LogRoot>, config: &LogConfig) -> Self {
        IndexLog {
            code,
            root,
            sort_lock: Mutex::new(()),
            sort_segment_threshold: config.sort_segment_threshold,
            sort_size_threshold: config.segment_size,
        }
    }

    /// Index code
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Tenant directory
    pub fn dir(&self) -> PathBuf {
        self.root.paths().index_dir(&self.code)
    }

    /// Whether the tenant directory exists
    pub fn exists(&self) -> bool {
        self.dir().is_dir()
    }

    fn segments_dir(&self) -> PathBuf {
        self.root.paths().index_segments(&self.code)
    }

    fn optimized_dir(&self) -> PathBuf {
        self.root.paths().index_optimized(&self.code)
    }

    /// UNSORTED segments, oldest first
    pub fn unsorted_segments(&self) -> Result<Vec<Segment>> {
        Segment::list(&self.segments_dir(), SegmentKind::Unsorted)
    }

    /// SORTED segments, oldest first
    pub fn sorted_segments(&self) -> Result<Vec<Segment>> {
        Segment::list(&self.segments_dir(), SegmentKind::Sorted)
    }

    /// OPTIMIZED segments, oldest first
    pub fn optimized_segments(&self) -> Result<Vec<Segment>> {
        Segment::list(&self.optimized_dir(), SegmentKind::Optimized)
    }

    /// The newest OPTIMIZED segment
    pub fn newest_optimized(&self) -> Result<Option<Segment>> {
        Ok(self.optimized_segments()?.pop())
    }

    /// OPTIMIZED segment with exactly `timestamp`
    pub fn find_optimized(&self, timestamp: u64) -> Result<Option<Segment>> {
        Ok(self
            .optimized_segments()?
            .into_iter()
            .find(|s| s.timestamp() == timestamp))
    }

    /// SORTED segment with exactly `timestamp`
    pub fn find_sorted(&self, timestamp: u64) -> Result<Option<Segment>> {
        Ok(self
            .sorted_segments()?
            .into_iter()
            .find(|s| s.timestamp() == timestamp))
    }

    /// Oldest SORTED segment
    pub fn first_sorted(&self) -> Result<Option<Segment>> {
        Ok(self.sorted_segments()?.into_iter().next())
    }

    /// Oldest SORTED segment with timestamp `> timestamp`
    pub fn sorted_after(&self, timestamp: u64) -> Result<Option<Segment>> {
        Ok(self
            .sorted_segments()?
            .into_iter()
            .find(|s| s.timestamp() > timestamp))
    }

    /// SORTED segments newer than the newest OPTIMIZED one
    pub fn sorted_since_optimized(&self) -> Result<Vec<Segment>> {
        let cutoff = self.newest_optimized()?.map(|s| s.timestamp());
        Ok(self
            .sorted_segments()?
            .into_iter()
            .filter(|s| cutoff.map_or(true, |ts| s.timestamp() > ts))
            .collect())
    }

    /// Whether the data of RAW segment `timestamp` is already in this tenant.
    ///
    /// True if an UNSORTED segment carries the timestamp, or a SORTED or
    /// OPTIMIZED segment has absorbed it.
    pub fn has_absorbed(&self, timestamp: u64) -> Result<bool> {
        if self
            .unsorted_segments()?
            .iter()
            .any(|s| s.timestamp() == timestamp)
        {
            return Ok(true);
        }
        if self
            .sorted_segments()?
            .last()
            .map_or(false, |s| s.timestamp() >= timestamp)
        {
            return Ok(true);
        }
        Ok(self
            .newest_optimized()?
            .map_or(false, |s| s.timestamp() >= timestamp))
    }

    /// Append dealt records as one UNSORTED segment at `timestamp`.
    ///
    /// Skips segments this tenant has already absorbed, so re-dealing a RAW
    /// segment after a crash does not duplicate data. May trigger a sort.
    pub fn append_unsorted(&self, timestamp: u64, records: &[Record]) -> Result<Option<Segment>> {
        let _guard = self.root.read_indexes();
        if self.has_absorbed(timestamp)? {
            debug!(target: "doclog::index", code = %self.code, timestamp, "Segment already absorbed, skipping");
            return Ok(None);
        }

        let segment = write_segment(&self.segments_dir(), SegmentKind::Unsorted, timestamp, records)?;
        debug!(
            target: "doclog::index",
            code = %self.code,
            segment = %segment.name(),
            "Appended unsorted segment"
        );

        if self.needs_sort()? {
            self.sort_now()?;
        }
        Ok(Some(segment))
    }

    fn needs_sort(&self) -> Result<bool> {
        let unsorted = self.unsorted_segments()?;
        if unsorted.len() > self.sort_segment_threshold {
            return Ok(true);
        }
        let mut total = 0u64;
        for segment in &unsorted {
            total += segment.size()?;
        }
        Ok(total > self.sort_size_threshold)
    }

    /// Sort all pending UNSORTED segments into one SORTED segment.
    ///
    /// Serialized per tenant. With nothing pending this is a no-op.
    pub fn sort_now(&self) -> Result<CompactInfo> {
        let _index = self.root.read_indexes();
        let _sort = self.sort_lock.lock();
        let started = Instant::now();
        let mut compact = CompactInfo::new(SegmentKind::Sorted);

        let unsorted = self.unsorted_segments()?;
        let Some(newest) = unsorted.last().map(|s| s.timestamp()) else {
            return Ok(compact);
        };

        let mut records = Vec::new();
        for segment in &unsorted {
            records.extend(SegmentReader::read_all(segment)?);
        }
        compact.inputs = unsorted.len();
        compact.records_in = records.len() as u64;

        let sorted = RecordMerger::compact_and_sort(records);
        compact.records_out = sorted.len() as u64;
        let output = write_segment(&self.segments_dir(), SegmentKind::Sorted, newest, &sorted)?;

        for segment in &unsorted {
            segment.delete()?;
        }

        compact.output = Some(output.name().clone());
        compact.duration_ms = started.elapsed().as_millis() as u64;
        info!(target: "doclog::index", code = %self.code, "Sorted tenant log: {}", compact.summary());
        Ok(compact)
    }

    /// Record that a page was just read.
    pub fn touch_last_read(&self) -> Result<()> {
        let path = self.root.paths().last_read(&self.code);
        if !self.exists() {
            return Ok(());
        }
        let mut file = std::fs::File::create(path)?;
        write!(file, "{}", doclog_core::now_millis())?;
        Ok(())
    }

    /// Time of the last page read (mtime of `last_read`), ms since epoch
    pub fn last_read(&self) -> Result<Option<u64>> {
        let path = self.root.paths().last_read(&self.code);
        let modified = match std::fs::metadata(path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let ms = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(Some(ms))
    }

    /// Record counts used by optimizer scoring: `(optimized, unoptimized)`.
    pub fn record_counts(&self) -> Result<(u64, u64)> {
        let optimized = self
            .newest_optimized()?
            .and_then(|s| s.record_count())
            .unwrap_or(0);
        let pending: u64 = self
            .unsorted_segments()?
            .iter()
            .chain(self.sorted_since_optimized()?.iter())
            .filter_map(|s| s.record_count())
            .sum();
        Ok((optimized, pending))
    }

    /// Number of segments waiting for optimization
    pub fn pending_segments(&self) -> Result<usize> {
        Ok(self.unsorted_segments()?.len() + self.sorted_since_optimized()?.len())
    }

    /// Full state summary
    pub fn info(&self) -> Result<IndexLogInfo> {
        let optimized = self.optimized_segments()?;
        let (optimized_records, unoptimized_records) = self.record_counts()?;
        Ok(IndexLogInfo {
            code: self.code.clone(),
            last_optimized: optimized.last().map(|s| s.timestamp()),
            optimized: optimized.iter().map(SegmentInfo::from).collect(),
            sorted: self.sorted_segments()?.iter().map(SegmentInfo::from).collect(),
            unsorted: self.unsorted_segments()?.iter().map(SegmentInfo::from).collect(),
            optimized_records,
            unoptimized_records,
            last_read: self.last_read()?,
        })
    }

    /// Remove the whole tenant directory.
    ///
    /// The caller must hold the index write lock.
    pub fn delete_all(&self) -> Result<()> {
        match std::fs::remove_dir_all(self.dir()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(target: "doclog::index", code = %self.code, "Deleted tenant log");
        Ok(())
    }
}

/// Open tenant logs of one root, keyed by index code.
pub struct IndexRegistry {
    root: Arc<LogRoot>,
    config: LogConfig,
    logs: DashMap<String, Arc<IndexLog>>,
}

impl IndexRegistry {
    /// Registry over `root`
    pub fn new(root: Arc<LogRoot>, config: LogConfig) -> Self {
        IndexRegistry {
            root,
            config,
            logs: DashMap::new(),
        }
    }

    /// Log root
    pub fn root(&self) -> &Arc<LogRoot> {
        &self.root
    }

    /// Configuration the logs were opened with
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Handle for `code`, validating the code. Does not create any directory.
    pub fn get(&self, code: &str) -> Result<Arc<IndexLog>> {
        if let Some(log) = self.logs.get(code) {
            return Ok(Arc::clone(log.value()));
        }
        validate_index_code(code)?;
        let log = self
            .logs
            .entry(code.to_string())
            .or_insert_with(|| {
                Arc::new(IndexLog::new(
                    code.to_string(),
                    Arc::clone(&self.root),
                    &self.config,
                ))
            })
            .clone();
        Ok(log)
    }

    /// Forget the cached handle for `code`
    pub fn forget(&self, code: &str) {
        self.logs.remove(code);
    }

    /// Index codes with a tenant directory on disk
    pub fn existing_codes(&self) -> Result<Vec<String>> {
        self.root.list_index_codes()
    }
}
