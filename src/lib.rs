//! doclog - segment-based, multi-tenant record log
//!
//! Writers append document records to a shared RAW log. Background workers
//! deal them into per-tenant logs, sort and compact them, and delete what
//! compaction has superseded. Readers replay a tenant's full logical stream
//! page by page with opaque, resumable tokens.
//!
//! # Quick Start
//!
//! ```ignore
//! use doclog::{ManagerApi, ManagerNode, Record, WriterApi, WriterNode};
//!
//! let writer = WriterNode::start("/var/lib/doclog")?;
//! let manager = ManagerNode::start("/var/lib/doclog")?;
//!
//! writer.service().send_batch(vec![
//!     Record::new("tenant-a", "doc-1").with_field("title", "hello"),
//! ])?;
//!
//! let mut token = None;
//! loop {
//!     let page = manager.service().read_page("tenant-a", token.as_deref())?;
//!     // consume page.records
//!     match page.next_token {
//!         Some(next) => token = Some(next),
//!         None => break,
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - `doclog-core`: the [`Record`] model and the crate-wide [`Error`]
//! - `doclog-durability`: segment files, RAW and tenant logs, the log root
//! - `doclog-engine`: dealer, optimizer, cleaner, reader, call surface, nodes

pub use doclog_core::{Categories, Error, Fields, Record, Result, Variables};
pub use doclog_durability::{IndexLogInfo, LogConfig, NodeRole, SegmentInfo};
pub use doclog_engine::*;
