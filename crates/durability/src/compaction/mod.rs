//! Tenant log compaction
//!
//! Two compaction stages exist:
//!
//! - **Sort**: all pending UNSORTED segments of a tenant are deduplicated by
//!   docid and written as one SORTED segment. The consumed UNSORTED segments
//!   are deleted.
//! - **Optimize**: the previous OPTIMIZED segment is merged with newer SORTED
//!   segments into a new OPTIMIZED segment. Inputs are never deleted here;
//!   the cleaner removes them once no reader can still need them.
//!
//! # Key Invariants
//!
//! - Compaction is **deterministic**: same input segments, same output
//! - Output segments become visible atomically (temp file + rename)
//! - Sorting with nothing pending is a no-op

pub mod merger;

pub use merger::{MergeIter, RecordMerger};

use crate::format::{SegmentKind, SegmentName};

/// Result of one compaction pass
#[derive(Debug, Clone)]
pub struct CompactInfo {
    /// Kind of segment produced
    pub kind: SegmentKind,

    /// Number of input segments
    pub inputs: usize,

    /// Records read from the inputs
    pub records_in: u64,

    /// Records written to the output
    pub records_out: u64,

    /// Docids dropped because their final state was a bare tombstone
    pub dropped: u64,

    /// Name of the segment written, if any
    pub output: Option<SegmentName>,

    /// Duration of the pass in milliseconds
    pub duration_ms: u64,
}

impl CompactInfo {
    /// Create an empty CompactInfo for a stage producing `kind`
    pub fn new(kind: SegmentKind) -> Self {
        CompactInfo {
            kind,
            inputs: 0,
            records_in: 0,
            records_out: 0,
            dropped: 0,
            output: None,
            duration_ms: 0,
        }
    }

    /// Check if a segment was written
    pub fn did_compact(&self) -> bool {
        self.output.is_some()
    }

    /// Get a summary string for logging
    pub fn summary(&self) -> String {
        format!(
            "kind={}, inputs={}, records_in={}, records_out={}, dropped={}, duration_ms={}",
            self.kind, self.inputs, self.records_in, self.records_out, self.dropped, self.duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_info_new() {
        let info = CompactInfo::new(SegmentKind::Sorted);
        assert_eq!(info.kind, SegmentKind::Sorted);
        assert_eq!(info.inputs, 0);
        assert!(!info.did_compact());
    }

    #[test]
    fn test_compact_info_summary() {
        let mut info = CompactInfo::new(SegmentKind::Optimized);
        info.inputs = 3;
        info.records_in = 100;
        info.records_out = 40;
        info.dropped = 2;
        info.output = Some(SegmentName::tenant(SegmentKind::Optimized, 1, 40).unwrap());

        let summary = info.summary();
        assert!(info.did_compact());
        assert!(summary.contains("kind=optimized"));
        assert!(summary.contains("inputs=3"));
        assert!(summary.contains("records_out=40"));
        assert!(summary.contains("dropped=2"));
    }
}
