//! Background processes and call surface for doclog
//!
//! This crate drives records from the RAW log to compacted tenant logs and
//! back out to readers:
//! - Dealer: RAW segments → per-tenant UNSORTED segments (replica promotion)
//! - Optimizer: discovery, priority queue, SORTED → OPTIMIZED merges
//! - Cleaner: superseded segments and deleted tenants
//! - Reader: paginated, resumable tenant streams with opaque tokens
//! - Service and node roles wiring it all to worker threads

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod cleaner;
pub mod dealer;
pub mod node;
pub mod optimizer;
pub mod reader;
pub mod service;

pub use background::{Cycle, Waker, WorkerConfig, WorkerHandle};
pub use cleaner::{CleanStats, DeleteRequests, LogCleaner};
pub use dealer::{DealStats, LogDealer};
pub use node::{ManagerNode, WriterNode};
pub use optimizer::{LogOptimizer, OptimizationQueue, QueueEntry, DISCOVERY_PRIORITY};
pub use reader::{LogReader, Page, PageToken, TokenKind};
pub use service::{ManagerApi, ManagerService, PageResponse, RawLogInfo, WriterApi, WriterService};
