//! Segment file names.
//!
//! Segment identity (kind, timestamp, record count) is encoded in the file
//! name so listing a directory is enough to plan dealing, sorting,
//! optimization and cleanup without opening any file.
//!
//! ```text
//! raw/live/1700000000000.raw                                  RAW
//! indexes/<code>/segments/2023-11-14T22:13:20.000Z.unsorted_42   UNSORTED
//! indexes/<code>/segments/2023-11-14T22:13:20.000Z.sorted_40     SORTED
//! indexes/<code>/optimized/2023-11-14T22:13:20.000Z.optimized_900 OPTIMIZED
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::time::{Duration, UNIX_EPOCH};

/// Largest timestamp representable in a segment name (9999-12-31T23:59:59.999Z).
pub const MAX_SEGMENT_TIMESTAMP: u64 = 253_402_300_799_999;

/// The four kinds of segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentKind {
    /// Global append log, all tenants interleaved
    Raw,
    /// Per-tenant, arrival order
    Unsorted,
    /// Per-tenant, compacted and sorted by docid
    Sorted,
    /// Per-tenant, merge of all sorted data up to its timestamp
    Optimized,
}

impl SegmentKind {
    /// File name suffix for this kind
    pub fn suffix(&self) -> &'static str {
        match self {
            SegmentKind::Raw => "raw",
            SegmentKind::Unsorted => "unsorted",
            SegmentKind::Sorted => "sorted",
            SegmentKind::Optimized => "optimized",
        }
    }

    /// Tag byte stored in the segment header
    pub fn tag(&self) -> u8 {
        match self {
            SegmentKind::Raw => 1,
            SegmentKind::Unsorted => 2,
            SegmentKind::Sorted => 3,
            SegmentKind::Optimized => 4,
        }
    }

    /// Parse a header tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(SegmentKind::Raw),
            2 => Some(SegmentKind::Unsorted),
            3 => Some(SegmentKind::Sorted),
            4 => Some(SegmentKind::Optimized),
            _ => None,
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "raw" => Some(SegmentKind::Raw),
            "unsorted" => Some(SegmentKind::Unsorted),
            "sorted" => Some(SegmentKind::Sorted),
            "optimized" => Some(SegmentKind::Optimized),
            _ => None,
        }
    }

    /// Whether segments of this kind are internally sorted by docid
    pub fn is_sorted(&self) -> bool {
        matches!(self, SegmentKind::Sorted | SegmentKind::Optimized)
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Parsed segment file name.
///
/// Ordering is by timestamp first, so a sorted `Vec<SegmentName>` of one
/// kind is the segment timeline of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentName {
    timestamp: u64,
    kind: SegmentKind,
    record_count: Option<u64>,
}

impl SegmentName {
    /// Name of a RAW segment created at `timestamp` (ms since epoch).
    pub fn raw(timestamp: u64) -> Result<Self, SegmentNameError> {
        check_timestamp(timestamp)?;
        Ok(SegmentName {
            timestamp,
            kind: SegmentKind::Raw,
            record_count: None,
        })
    }

    /// Name of a tenant segment holding `record_count` records.
    pub fn tenant(
        kind: SegmentKind,
        timestamp: u64,
        record_count: u64,
    ) -> Result<Self, SegmentNameError> {
        if kind == SegmentKind::Raw {
            return Err(SegmentNameError::UnexpectedKind(kind));
        }
        check_timestamp(timestamp)?;
        Ok(SegmentName {
            timestamp,
            kind,
            record_count: Some(record_count),
        })
    }

    /// Segment kind
    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// Segment timestamp in ms since epoch
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Record count (absent for RAW segments)
    pub fn record_count(&self) -> Option<u64> {
        self.record_count
    }

    /// File name for this segment.
    pub fn file_name(&self) -> String {
        match (self.kind, self.record_count) {
            (SegmentKind::Raw, _) | (_, None) => format!("{}.{}", self.timestamp, self.kind),
            (kind, Some(count)) => {
                format!("{}.{}_{}", format_timestamp(self.timestamp), kind, count)
            }
        }
    }

    /// Strictly parse a file name.
    ///
    /// Hidden files (temporary names) and anything not matching one of the
    /// four shapes is rejected.
    pub fn parse(name: &str) -> Result<Self, SegmentNameError> {
        if name.starts_with('.') {
            return Err(SegmentNameError::Hidden(name.to_string()));
        }

        if let Some(stem) = name.strip_suffix(".raw") {
            if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
                return Err(SegmentNameError::BadTimestamp(name.to_string()));
            }
            let timestamp = stem
                .parse::<u64>()
                .map_err(|_| SegmentNameError::BadTimestamp(name.to_string()))?;
            return Self::raw(timestamp);
        }

        let (ts_part, ext) = name
            .rsplit_once('.')
            .ok_or_else(|| SegmentNameError::Unrecognized(name.to_string()))?;
        let (kind_part, count_part) = ext
            .split_once('_')
            .ok_or_else(|| SegmentNameError::Unrecognized(name.to_string()))?;
        let kind = SegmentKind::from_suffix(kind_part)
            .ok_or_else(|| SegmentNameError::Unrecognized(name.to_string()))?;
        if kind == SegmentKind::Raw {
            return Err(SegmentNameError::UnexpectedKind(kind));
        }
        if count_part.is_empty() || !count_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SegmentNameError::BadCount(name.to_string()));
        }
        let record_count = count_part
            .parse::<u64>()
            .map_err(|_| SegmentNameError::BadCount(name.to_string()))?;
        let timestamp = parse_timestamp(ts_part)
            .ok_or_else(|| SegmentNameError::BadTimestamp(name.to_string()))?;

        Self::tenant(kind, timestamp, record_count)
    }
}

impl fmt::Display for SegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Format a ms timestamp as RFC 3339 UTC with millisecond precision.
pub fn format_timestamp(timestamp: u64) -> String {
    let time = UNIX_EPOCH + Duration::from_millis(timestamp.min(MAX_SEGMENT_TIMESTAMP));
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(text: &str) -> Option<u64> {
    let parsed = DateTime::parse_from_rfc3339(text).ok()?;
    u64::try_from(parsed.timestamp_millis()).ok()
}

fn check_timestamp(timestamp: u64) -> Result<(), SegmentNameError> {
    if timestamp > MAX_SEGMENT_TIMESTAMP {
        return Err(SegmentNameError::TimestampOutOfRange(timestamp));
    }
    Ok(())
}

/// Segment name parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentNameError {
    /// Hidden or temporary file
    #[error("hidden file: {0}")]
    Hidden(String),

    /// Name does not match any segment shape
    #[error("unrecognized segment name: {0}")]
    Unrecognized(String),

    /// Timestamp part is malformed
    #[error("bad timestamp in segment name: {0}")]
    BadTimestamp(String),

    /// Record count part is malformed
    #[error("bad record count in segment name: {0}")]
    BadCount(String),

    /// Kind not allowed in this position
    #[error("unexpected segment kind: {0}")]
    UnexpectedKind(SegmentKind),

    /// Timestamp beyond the representable range
    #[error("segment timestamp out of range: {0}")]
    TimestampOutOfRange(u64),
}

impl From<SegmentNameError> for doclog_core::Error {
    fn from(e: SegmentNameError) -> Self {
        doclog_core::Error::InvalidSegmentName(e.to_string())
    }
}
