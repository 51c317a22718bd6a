//! Durability layer for doclog
//!
//! This crate handles everything that touches disk:
//!
//! - Segment files: header, CRC-framed records, file-name encoding
//! - Segment writer (temp name + rename, RAW write-head locking) and reader
//! - Record reconciliation for the sort and optimize stages
//! - Log root: directory layout, persisted scalars, role locks, replica staging
//! - RAW log (global write path) and per-tenant index logs
//! - Configuration (`doclog.toml`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compaction; // Sort/optimize reconciliation (RecordMerger)
pub mod config; // LogConfig loaded from doclog.toml
pub mod format; // Binary on-disk formats and segment names
pub mod index_log; // Per-tenant segment log and registry
pub mod raw_log; // Global RAW write path
pub mod root; // Log root layout, info store, locks
pub mod segment; // Segment handles, writer, reader

pub use compaction::{CompactInfo, MergeIter, RecordMerger};
pub use config::{LogConfig, NodeRole};
pub use format::{SegmentKind, SegmentName, SegmentNameError};
pub use index_log::{IndexLog, IndexLogInfo, IndexRegistry, SegmentInfo};
pub use raw_log::RawLog;
pub use root::{InfoStore, LogRoot, ProcessLock, RootPaths};
pub use segment::{write_segment, Segment, SegmentReader, SegmentWriter};
