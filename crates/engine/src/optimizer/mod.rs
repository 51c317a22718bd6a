//! Log optimizer: SORTED (+ previous OPTIMIZED) → new OPTIMIZED.
//!
//! Two loops share one [`LogOptimizer`]:
//!
//! - **discovery** scores every tenant and queues those with more pending
//!   segments than the threshold
//! - **worker** pops the most urgent tenant, forces a sort of its pending
//!   UNSORTED data and merges the newest OPTIMIZED segment with up to
//!   `max_merge_width` newer SORTED segments
//!
//! Inputs are never deleted here; the cleaner removes them once superseded.

pub mod queue;

pub use queue::{OptimizationQueue, QueueEntry, DISCOVERY_PRIORITY};

use doclog_core::Result;
use doclog_durability::{
    CompactInfo, IndexLog, IndexRegistry, LogRoot, RecordMerger, SegmentKind, SegmentReader,
    SegmentWriter,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Compaction scheduler and executor.
pub struct LogOptimizer {
    root: Arc<LogRoot>,
    registry: Arc<IndexRegistry>,
    queue: Arc<OptimizationQueue>,
    segment_threshold: usize,
    max_merge_width: usize,
}

impl LogOptimizer {
    /// Optimizer over `registry`, feeding from `queue`
    pub fn new(registry: Arc<IndexRegistry>, queue: Arc<OptimizationQueue>) -> Self {
        let config = registry.config();
        LogOptimizer {
            root: Arc::clone(registry.root()),
            segment_threshold: config.optimize_segment_threshold,
            max_merge_width: config.max_merge_width,
            registry,
            queue,
        }
    }

    /// The queue this optimizer works from
    pub fn queue(&self) -> &Arc<OptimizationQueue> {
        &self.queue
    }

    /// Score of a tenant: unoptimized records per optimized record.
    ///
    /// The optimized count is floored at 2 so nearly empty tenants do not
    /// dominate the queue.
    pub fn score(optimized_records: u64, unoptimized_records: u64) -> f64 {
        unoptimized_records as f64 / optimized_records.max(2) as f64
    }

    /// Scan all tenants and queue those needing optimization.
    ///
    /// Returns the number of tenants queued. Inert until the root is safe
    /// to read.
    pub fn discover(&self) -> Result<usize> {
        if !self.root.is_safe_to_read() {
            return Ok(0);
        }

        let mut queued = 0;
        for code in self.registry.existing_codes()? {
            let log = self.registry.get(&code)?;
            let pending = log.pending_segments()?;
            if pending <= self.segment_threshold {
                continue;
            }
            let (optimized, unoptimized) = log.record_counts()?;
            let score = Self::score(optimized, unoptimized);
            if self.queue.enqueue(&code, DISCOVERY_PRIORITY, score) {
                debug!(target: "doclog::optimizer", code = %code, pending, score, "Queued for optimization");
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Optimize the most urgent queued tenant, if any.
    pub fn optimize_next(&self) -> Result<Option<CompactInfo>> {
        if !self.root.is_safe_to_read() {
            return Ok(None);
        }
        let Some((code, entry)) = self.queue.pop() else {
            return Ok(None);
        };
        match self.optimize(&code, entry.priority) {
            Ok(compact) => Ok(Some(compact)),
            Err(e) => {
                // Keep the tenant eligible for a later attempt.
                self.queue.enqueue(&code, entry.priority, entry.score);
                Err(e)
            }
        }
    }

    /// Run one optimization pass on `code`.
    ///
    /// If more SORTED segments are pending than fit in one pass, the tenant
    /// is queued again at `priority`.
    pub fn optimize(&self, code: &str, priority: i32) -> Result<CompactInfo> {
        let log = self.registry.get(code)?;
        if !log.exists() {
            debug!(target: "doclog::optimizer", code, "Tenant gone, skipping");
            return Ok(CompactInfo::new(SegmentKind::Optimized));
        }

        let _guard = self.root.read_indexes();
        log.sort_now()?;
        let compact = self.merge_pass(&log)?;

        let remaining = log.sorted_since_optimized()?.len();
        if remaining > 0 {
            let (optimized, unoptimized) = log.record_counts()?;
            self.queue
                .enqueue(code, priority, Self::score(optimized, unoptimized));
        }
        Ok(compact)
    }

    fn merge_pass(&self, log: &IndexLog) -> Result<CompactInfo> {
        let started = Instant::now();
        let mut compact = CompactInfo::new(SegmentKind::Optimized);

        let prior = log.newest_optimized()?;
        let mut sorted = log.sorted_since_optimized()?;
        if sorted.is_empty() {
            return Ok(compact);
        }
        sorted.truncate(self.max_merge_width);
        let timestamp = sorted
            .last()
            .map(|s| s.timestamp())
            .unwrap_or_default();

        let mut cursors = Vec::with_capacity(sorted.len() + 1);
        for segment in prior.iter().chain(sorted.iter()) {
            cursors.push(SegmentReader::open(segment)?);
        }
        compact.inputs = cursors.len();

        let optimized_dir = self.root.paths().index_optimized(log.code());
        let mut writer = SegmentWriter::create_tenant(&optimized_dir, SegmentKind::Optimized, timestamp)?;
        let mut merge = RecordMerger::merge(cursors);
        for record in merge.by_ref() {
            let appended = record.and_then(|r| writer.append(&r));
            if let Err(e) = appended {
                let _ = writer.abort();
                return Err(e);
            }
        }
        compact.records_in = merge.records_in();
        compact.dropped = merge.dropped();
        compact.records_out = writer.record_count();

        let output = writer.finish()?;
        compact.output = Some(output.name().clone());
        compact.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            target: "doclog::optimizer",
            code = %log.code(),
            segment = %output.name(),
            "Optimized tenant log: {}",
            compact.summary()
        );
        Ok(compact)
    }
}
