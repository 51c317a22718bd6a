//! Log cleaner.
//!
//! Deletes what compaction has superseded:
//!
//! 1. whole tenants queued for deletion, each under the index write lock
//! 2. for every tenant not read within the grace period, all but the newest
//!    OPTIMIZED segment and every SORTED segment at or before it
//!
//! Data not yet covered by an OPTIMIZED segment is never touched, and a
//! tenant read recently is skipped entirely so in-flight page streams keep
//! their segments.

use crate::optimizer::OptimizationQueue;
use doclog_core::{now_millis, validate_index_code, Result};
use doclog_durability::root::CLEANER_LOCK;
use doclog_durability::{IndexLog, IndexRegistry, LogRoot, ProcessLock};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one cleaner cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanStats {
    /// Tenants deleted
    pub tenants_deleted: usize,
    /// OPTIMIZED segments deleted
    pub optimized_deleted: usize,
    /// SORTED segments deleted
    pub sorted_deleted: usize,
    /// Tenants skipped because they were read within the grace period
    pub skipped_recent: usize,
}

/// Sends tenant deletion requests to the cleaner.
#[derive(Clone)]
pub struct DeleteRequests {
    sender: Sender<String>,
}

impl DeleteRequests {
    /// Queue `code` for deletion.
    pub fn delete_index(&self, code: &str) -> Result<()> {
        validate_index_code(code)?;
        self.sender
            .send(code.to_string())
            .map_err(|_| doclog_core::Error::internal("cleaner is not running"))
    }
}

/// Garbage collector for superseded segments and deleted tenants.
pub struct LogCleaner {
    root: Arc<LogRoot>,
    registry: Arc<IndexRegistry>,
    queue: Arc<OptimizationQueue>,
    grace: Duration,
    requests: Receiver<String>,
    pending: VecDeque<String>,
    _lock: ProcessLock,
}

impl LogCleaner {
    /// Create the cleaner, taking the cleaner lock of the root.
    ///
    /// Returns the cleaner and the handle used to queue tenant deletions.
    pub fn open(
        registry: Arc<IndexRegistry>,
        queue: Arc<OptimizationQueue>,
    ) -> Result<(Self, DeleteRequests)> {
        let root = Arc::clone(registry.root());
        let lock = root.lock_role(CLEANER_LOCK)?;
        let grace = registry.config().cleaner_grace();
        let (sender, requests) = mpsc::channel();
        let cleaner = LogCleaner {
            root,
            registry,
            queue,
            grace,
            requests,
            pending: VecDeque::new(),
            _lock: lock,
        };
        Ok((cleaner, DeleteRequests { sender }))
    }

    /// Tenants waiting to be deleted
    pub fn pending_deletions(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }

    /// Run one cleaner cycle. Inert until the root is safe to read.
    pub fn clean_once(&mut self) -> Result<CleanStats> {
        let mut stats = CleanStats::default();
        while let Ok(code) = self.requests.try_recv() {
            if !self.pending.contains(&code) {
                self.pending.push_back(code);
            }
        }
        if !self.root.is_safe_to_read() {
            return Ok(stats);
        }

        while let Some(code) = self.pending.front().cloned() {
            self.delete_tenant(&code)?;
            self.pending.pop_front();
            stats.tenants_deleted += 1;
        }

        let now = now_millis();
        let grace_ms = self.grace.as_millis() as u64;
        for code in self.registry.existing_codes()? {
            let log = self.registry.get(&code)?;
            if let Some(last_read) = log.last_read()? {
                if now.saturating_sub(last_read) < grace_ms {
                    debug!(target: "doclog::cleaner", code = %code, "Recently read, skipping");
                    stats.skipped_recent += 1;
                    continue;
                }
            }
            self.clean_tenant(&log, &mut stats)?;
        }

        if stats != CleanStats::default() {
            info!(
                target: "doclog::cleaner",
                tenants_deleted = stats.tenants_deleted,
                optimized_deleted = stats.optimized_deleted,
                sorted_deleted = stats.sorted_deleted,
                skipped_recent = stats.skipped_recent,
                "Clean cycle complete"
            );
        }
        Ok(stats)
    }

    fn delete_tenant(&self, code: &str) -> Result<()> {
        let _guard = self.root.write_indexes();
        let log = self.registry.get(code)?;
        log.delete_all()?;
        self.registry.forget(code);
        self.queue.remove(code);
        Ok(())
    }

    fn clean_tenant(&self, log: &IndexLog, stats: &mut CleanStats) -> Result<()> {
        let _guard = self.root.read_indexes();
        let mut optimized = log.optimized_segments()?;
        let Some(newest) = optimized.pop() else {
            return Ok(());
        };

        for segment in &optimized {
            segment.delete()?;
            stats.optimized_deleted += 1;
        }
        for segment in log.sorted_segments()? {
            if segment.timestamp() > newest.timestamp() {
                break;
            }
            if let Err(e) = segment.delete() {
                warn!(target: "doclog::cleaner", segment = %segment.name(), error = %e, "Failed to delete sorted segment");
                return Err(e);
            }
            stats.sorted_deleted += 1;
        }
        Ok(())
    }
}
