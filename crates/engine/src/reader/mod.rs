//! Paginated replay of a tenant's logical record stream.
//!
//! A stream walks the tiers of a tenant's log oldest-first:
//!
//! ```text
//! newest OPTIMIZED ─► SORTED after it ─► ... ─► RAW at/after watermark ─► ... ─► end
//! ```
//!
//! Each page reads forward within one segment until the segment ends or the
//! page fills. Tiers overlap at the seams (a RAW segment can be dealt and
//! sorted while a stream is reading it), so a record may be delivered more
//! than once; records are upserts keyed by docid and carry their id, so
//! consumers converge on the same state. Nothing is ever skipped: every
//! hand-over re-reads the watermark before forcing a sort, and the data
//! behind any watermark is in SORTED segments by the time it is read.
//!
//! When the segment a token names has vanished, the stream restarts: the
//! page comes back empty with `restarted` set and a start-of-stream token.

mod token;

pub use token::{PageToken, TokenKind};

use doclog_core::{Error, Record, Result};
use doclog_durability::root::NEXT_TIMESTAMP;
use doclog_durability::{IndexLog, IndexRegistry, LogRoot, RawLog, Segment, SegmentReader};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// One page of a tenant's stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Records in stream order
    pub records: Vec<Record>,
    /// Token for the next page; `None` at end of stream
    pub next_token: Option<PageToken>,
    /// The stream was restarted because a segment vanished
    pub restarted: bool,
}

impl Page {
    fn restart() -> Self {
        Page {
            records: Vec::new(),
            next_token: Some(PageToken::initial()),
            restarted: true,
        }
    }

    fn end(records: Vec<Record>) -> Self {
        Page {
            records,
            next_token: None,
            restarted: false,
        }
    }
}

/// Serves pages of tenant streams. Stateless between calls.
pub struct LogReader {
    root: Arc<LogRoot>,
    raw: Arc<RawLog>,
    registry: Arc<IndexRegistry>,
    page_size: usize,
}

impl LogReader {
    /// Create a reader over the RAW log and tenant registry of one root
    pub fn new(raw: Arc<RawLog>, registry: Arc<IndexRegistry>) -> Self {
        LogReader {
            root: Arc::clone(registry.root()),
            page_size: registry.config().page_size.max(1),
            raw,
            registry,
        }
    }

    /// Maximum records per page
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Read the page of `code`'s stream at `token`.
    ///
    /// Fails with [`Error::NotReady`] until the root is safe to read.
    pub fn read_page(&self, code: &str, token: &PageToken) -> Result<Page> {
        self.root.require_safe_to_read()?;
        let log = self.registry.get(code)?;

        let page = match self.read(&log, token) {
            Err(Error::SegmentVanished(what)) => {
                warn!(target: "doclog::reader", code, segment = %what, "Segment vanished, restarting stream");
                Page::restart()
            }
            other => other?,
        };
        log.touch_last_read()?;
        Ok(page)
    }

    fn read(&self, log: &IndexLog, token: &PageToken) -> Result<Page> {
        let mut cursor = if token.is_initial() {
            self.initial(log)?
        } else {
            token.clone()
        };

        if cursor.kind.is_none() {
            let Some(next) = cursor.next() else {
                return Ok(Page::end(Vec::new()));
            };
            match self.promote(log, next)? {
                Some(promoted) => cursor = promoted,
                None => return Ok(Page::end(Vec::new())),
            }
        }

        self.read_segment(log, cursor)
    }

    /// Where a fresh stream starts.
    ///
    /// With no compacted tier the stream starts at the watermark, not at the
    /// earliest RAW segment. That is only safe because the watermark is read
    /// before the forced sort: whatever was dealt before the read is SORTED
    /// by the time `first_sorted` is asked, and whatever is dealt after it
    /// sits in RAW segments at or after it.
    fn initial(&self, log: &IndexLog) -> Result<PageToken> {
        if let Some(optimized) = log.newest_optimized()? {
            let hint = self.next_after(log, optimized.timestamp())?;
            return Ok(PageToken::at(
                TokenKind::Optimized,
                optimized.timestamp(),
                Some(hint),
            ));
        }

        let watermark = self.watermark()?;
        let mut first = log.first_sorted()?;
        if first.is_none() {
            log.sort_now()?;
            first = log.first_sorted()?;
        }
        if let Some(sorted) = first {
            return Ok(PageToken::at(TokenKind::Sorted, sorted.timestamp(), None));
        }

        // Nothing dealt for this tenant yet. History before the watermark
        // belongs to deleted incarnations, so start at the undealt tail.
        Ok(PageToken::between((TokenKind::Live, watermark)))
    }

    /// Turn a `next_*` hint into a segment position. `None` is end of stream.
    fn promote(&self, log: &IndexLog, next: (TokenKind, u64)) -> Result<Option<PageToken>> {
        let (kind, timestamp) = next;
        match kind {
            TokenKind::Optimized => {
                if log.find_optimized(timestamp)?.is_none() {
                    return Err(vanished(log, kind, timestamp));
                }
                let hint = self.next_after(log, timestamp)?;
                Ok(Some(PageToken::at(kind, timestamp, Some(hint))))
            }
            TokenKind::Sorted => {
                if log.find_sorted(timestamp)?.is_none() {
                    log.sort_now()?;
                    if log.find_sorted(timestamp)?.is_none() {
                        return Err(vanished(log, kind, timestamp));
                    }
                }
                Ok(Some(PageToken::at(kind, timestamp, None)))
            }
            TokenKind::Live => Ok(self
                .raw
                .segment_at_or_after(timestamp)?
                .map(|segment| PageToken::at(kind, segment.timestamp(), None))),
        }
    }

    fn locate(&self, log: &IndexLog, kind: TokenKind, timestamp: u64) -> Result<Segment> {
        let found = match kind {
            TokenKind::Optimized => log.find_optimized(timestamp)?,
            TokenKind::Sorted => log.find_sorted(timestamp)?,
            TokenKind::Live => self.raw.find(timestamp)?,
        };
        found.ok_or_else(|| vanished(log, kind, timestamp))
    }

    fn read_segment(&self, log: &IndexLog, cursor: PageToken) -> Result<Page> {
        let kind = cursor
            .kind
            .ok_or_else(|| Error::internal("reading a token without a segment"))?;
        let segment = self.locate(log, kind, cursor.timestamp)?;
        let mut reader = if cursor.file_position == 0 {
            SegmentReader::open(&segment)?
        } else {
            SegmentReader::open_at(&segment, cursor.file_position)?
        };

        let mut records = Vec::new();
        while records.len() < self.page_size {
            let Some(mut record) = reader.next_record()? else {
                let next = self.after_segment(log, &cursor)?;
                debug!(
                    target: "doclog::reader",
                    code = log.code(),
                    segment = %segment.name(),
                    records = records.len(),
                    "Segment exhausted"
                );
                return Ok(match next {
                    Some(next) => Page {
                        records,
                        next_token: Some(PageToken::between(next)),
                        restarted: false,
                    },
                    None => Page::end(records),
                });
            };

            if kind == TokenKind::Live {
                if record.index_code.as_deref() != Some(log.code()) {
                    continue;
                }
                record.index_code = None;
            }
            records.push(record);
        }

        Ok(Page {
            records,
            next_token: Some(PageToken {
                file_position: reader.position(),
                ..cursor
            }),
            restarted: false,
        })
    }

    /// Where the stream continues after the segment under `cursor`.
    fn after_segment(&self, log: &IndexLog, cursor: &PageToken) -> Result<Option<(TokenKind, u64)>> {
        match cursor.kind {
            Some(TokenKind::Optimized) => match cursor.next() {
                Some((TokenKind::Live, watermark)) => {
                    // A sort may have landed since the hint was computed.
                    Ok(Some(match log.sorted_after(cursor.timestamp)? {
                        Some(sorted) => (TokenKind::Sorted, sorted.timestamp()),
                        None => (TokenKind::Live, watermark),
                    }))
                }
                Some(hint) => Ok(Some(hint)),
                None => self.next_after(log, cursor.timestamp).map(Some),
            },
            Some(TokenKind::Sorted) => self.next_after(log, cursor.timestamp).map(Some),
            Some(TokenKind::Live) => Ok(self
                .raw
                .segment_after(cursor.timestamp)?
                .map(|segment| (TokenKind::Live, segment.timestamp()))),
            None => Ok(cursor.next()),
        }
    }

    /// First SORTED segment after `timestamp`, else the live tail.
    ///
    /// The watermark is read before sorting: anything dealt after that read
    /// sits in RAW segments at or after it.
    fn next_after(&self, log: &IndexLog, timestamp: u64) -> Result<(TokenKind, u64)> {
        let watermark = self.watermark()?;
        log.sort_now()?;
        Ok(match log.sorted_after(timestamp)? {
            Some(sorted) => (TokenKind::Sorted, sorted.timestamp()),
            None => (TokenKind::Live, watermark),
        })
    }

    fn watermark(&self) -> Result<u64> {
        self.root.info().get_or(NEXT_TIMESTAMP, 0)
    }
}

fn vanished(log: &IndexLog, kind: TokenKind, timestamp: u64) -> Error {
    Error::vanished(format!("{} segment {} of {}", kind, timestamp, log.code()))
}
