//! Call surface.
//!
//! The operations a transport exposes, split by process role: the writer
//! role accepts record batches, the manager role serves reads, inspection
//! and administration. Request and response types are plain `serde`
//! structs; page tokens cross the boundary as opaque strings.
//!
//! ## Errors
//!
//! | Condition | Error |
//! |-----------|-------|
//! | Record already has an id or lacks a valid index code | `InvalidRecord` |
//! | Malformed index code | `InvalidIndexCode` |
//! | Token string does not decode | `InvalidToken` |
//! | Root not yet safe to read (replica bootstrap) | `NotReady` (retryable) |
//! | Disk failure | `Io` (retryable) |

use crate::background::Waker;
use crate::cleaner::DeleteRequests;
use crate::optimizer::{OptimizationQueue, QueueEntry};
use crate::reader::{LogReader, PageToken};
use doclog_core::{validate_index_code, Record, Result};
use doclog_durability::root::{LAST_ID, NEXT_TIMESTAMP};
use doclog_durability::{IndexLogInfo, IndexRegistry, RawLog, SegmentInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// A page as shipped to remote consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResponse {
    /// Records in stream order
    pub records: Vec<Record>,
    /// Encoded token for the next page; absent at end of stream
    pub next_token: Option<String>,
    /// The stream restarted from the beginning
    pub restarted: bool,
}

/// State of the RAW log and dealer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogInfo {
    /// Dealer watermark: lowest RAW timestamp not yet dealt
    pub next_timestamp: u64,
    /// Last id handed out by the dealer
    pub last_id: u64,
    /// RAW segments at or after the watermark, oldest first
    pub pending: Vec<SegmentInfo>,
    /// Whether reads and compaction are enabled
    pub safe_to_read: bool,
}

/// Writer-role operations
pub trait WriterApi {
    /// Append records to the RAW log.
    ///
    /// The batch is validated as a whole before anything is written.
    fn send_batch(&self, records: Vec<Record>) -> Result<()>;
}

/// Manager-role operations
pub trait ManagerApi {
    /// Read one page of a tenant's stream. `None` starts a new stream.
    fn read_page(&self, code: &str, token: Option<&str>) -> Result<PageResponse>;

    /// Segment lists and record counts of a tenant
    fn get_index_log_info(&self, code: &str) -> Result<IndexLogInfo>;

    /// Queue a tenant for optimization.
    ///
    /// Returns `false` when the tenant is already queued at an equal or
    /// better priority.
    fn enqueue_for_optimization(&self, code: &str, priority: i32, score: f64) -> Result<bool>;

    /// Delete a tenant and all its data. Happens asynchronously.
    fn delete_index(&self, code: &str) -> Result<()>;

    /// Snapshot of the optimization queue
    fn get_optimization_queue(&self) -> Result<BTreeMap<String, QueueEntry>>;

    /// Dealer watermark and pending RAW segments
    fn get_raw_log_info(&self) -> Result<RawLogInfo>;

    /// Index codes with a tenant directory
    fn list_existing_indexes(&self) -> Result<Vec<String>>;
}

/// [`WriterApi`] over a RAW log
pub struct WriterService {
    raw: Arc<RawLog>,
}

impl WriterService {
    /// Serve writes into `raw`
    pub fn new(raw: Arc<RawLog>) -> Self {
        WriterService { raw }
    }
}

impl WriterApi for WriterService {
    fn send_batch(&self, records: Vec<Record>) -> Result<()> {
        self.raw.write_batch(records)
    }
}

/// [`ManagerApi`] over the reader, registry and background workers
pub struct ManagerService {
    raw: Arc<RawLog>,
    registry: Arc<IndexRegistry>,
    reader: LogReader,
    queue: Arc<OptimizationQueue>,
    deletes: DeleteRequests,
    optimizer: Option<Waker>,
    cleaner: Option<Waker>,
}

impl ManagerService {
    /// Create the service. Deletions go to the cleaner behind `deletes`.
    pub fn new(
        raw: Arc<RawLog>,
        registry: Arc<IndexRegistry>,
        queue: Arc<OptimizationQueue>,
        deletes: DeleteRequests,
    ) -> Self {
        ManagerService {
            reader: LogReader::new(Arc::clone(&raw), Arc::clone(&registry)),
            raw,
            registry,
            queue,
            deletes,
            optimizer: None,
            cleaner: None,
        }
    }

    /// Wake these workers when work is queued for them
    pub fn with_wakers(mut self, optimizer: Waker, cleaner: Waker) -> Self {
        self.optimizer = Some(optimizer);
        self.cleaner = Some(cleaner);
        self
    }
}

impl ManagerApi for ManagerService {
    fn read_page(&self, code: &str, token: Option<&str>) -> Result<PageResponse> {
        let token = match token {
            Some(encoded) => PageToken::decode(encoded)?,
            None => PageToken::initial(),
        };
        let page = self.reader.read_page(code, &token)?;
        let next_token = page.next_token.map(|t| t.encode()).transpose()?;
        Ok(PageResponse {
            records: page.records,
            next_token,
            restarted: page.restarted,
        })
    }

    fn get_index_log_info(&self, code: &str) -> Result<IndexLogInfo> {
        self.registry.get(code)?.info()
    }

    fn enqueue_for_optimization(&self, code: &str, priority: i32, score: f64) -> Result<bool> {
        validate_index_code(code)?;
        let queued = self.queue.enqueue(code, priority, score);
        if queued {
            if let Some(optimizer) = &self.optimizer {
                optimizer.wake();
            }
        }
        Ok(queued)
    }

    fn delete_index(&self, code: &str) -> Result<()> {
        self.deletes.delete_index(code)?;
        info!(target: "doclog::cleaner", code, "Tenant queued for deletion");
        if let Some(cleaner) = &self.cleaner {
            cleaner.wake();
        }
        Ok(())
    }

    fn get_optimization_queue(&self) -> Result<BTreeMap<String, QueueEntry>> {
        Ok(self.queue.snapshot())
    }

    fn get_raw_log_info(&self) -> Result<RawLogInfo> {
        let root = self.registry.root();
        let next_timestamp = root.info().get_or(NEXT_TIMESTAMP, 0)?;
        let pending = self
            .raw
            .segments()?
            .iter()
            .filter(|s| s.timestamp() >= next_timestamp)
            .map(SegmentInfo::from)
            .collect();
        Ok(RawLogInfo {
            next_timestamp,
            last_id: root.info().get_or(LAST_ID, 0)?,
            pending,
            safe_to_read: root.is_safe_to_read(),
        })
    }

    fn list_existing_indexes(&self) -> Result<Vec<String>> {
        self.registry.existing_codes()
    }
}
