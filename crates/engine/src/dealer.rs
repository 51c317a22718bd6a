//! Log dealer: RAW → per-tenant UNSORTED.
//!
//! On a master node the dealer drains closed RAW segments in timestamp
//! order, starting at the persisted watermark. Each segment's records are
//! grouped by index code, stamped with fresh monotonic ids and appended to
//! their tenant as one UNSORTED segment carrying the RAW segment's
//! timestamp. The RAW segment is then archived and the watermark advanced.
//!
//! Dealing is idempotent: ids are only persisted after a segment is fully
//! dealt and tenants skip segments they already absorbed, so a crash at any
//! point re-deals the same segment to the same result.
//!
//! On a replica node the dealer does not deal. It promotes completed mirror
//! snapshots and trims RAW segments the snapshot already covers.

use doclog_core::{Error, Record, Result};
use doclog_durability::root::{DEALER_LOCK, LAST_ID, MASTER_DELTA, NEXT_TIMESTAMP};
use doclog_durability::{IndexRegistry, LogRoot, NodeRole, ProcessLock, RawLog, Segment, SegmentReader};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one dealer cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DealStats {
    /// RAW segments dealt and archived
    pub segments: usize,
    /// Records appended to tenant logs
    pub records: u64,
    /// Payload-less records without docid that were dropped
    pub dropped: u64,
    /// Distinct tenants written to
    pub tenants: usize,
    /// Whether a replica snapshot was promoted
    pub promoted: bool,
    /// Watermark after the cycle
    pub watermark: u64,
}

/// Demultiplexes the RAW log into tenant logs.
pub struct LogDealer {
    root: Arc<LogRoot>,
    raw: Arc<RawLog>,
    registry: Arc<IndexRegistry>,
    role: NodeRole,
    _lock: ProcessLock,
}

impl LogDealer {
    /// Create the dealer, taking the dealer lock of the root.
    ///
    /// Fails with [`Error::AlreadyLocked`] if another dealer runs on this root.
    pub fn open(root: Arc<LogRoot>, raw: Arc<RawLog>, registry: Arc<IndexRegistry>) -> Result<Self> {
        let lock = root.lock_role(DEALER_LOCK)?;
        let role = registry.config().role;
        Ok(LogDealer {
            root,
            raw,
            registry,
            role,
            _lock: lock,
        })
    }

    /// Node role the dealer runs as
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Run one dealer cycle for the node's role.
    pub fn deal_once(&self) -> Result<DealStats> {
        match self.role {
            NodeRole::Master => self.deal_raw(),
            NodeRole::Replica => self.promote_replica(),
        }
    }

    /// Current watermark: the lowest RAW timestamp not yet dealt
    pub fn watermark(&self) -> Result<u64> {
        self.root.info().get_or(NEXT_TIMESTAMP, 0)
    }

    fn deal_raw(&self) -> Result<DealStats> {
        self.root.set_safe_to_read()?;

        let info = self.root.info();
        let mut next = info.get_or(NEXT_TIMESTAMP, 0)?;
        let mut last_id = info.get_or(LAST_ID, 0)?;
        let mut stats = DealStats {
            watermark: next,
            ..Default::default()
        };

        let live = self.raw.live_segments()?;
        let mut tenants = std::collections::BTreeSet::new();

        for (i, segment) in live.iter().enumerate() {
            if segment.timestamp() < next {
                // Dealt before a crash that came ahead of the archive step.
                debug!(target: "doclog::dealer", segment = %segment.name(), "Archiving already dealt segment");
                self.raw.archive(segment)?;
                continue;
            }

            if segment.is_locked()? {
                if i + 1 == live.len() {
                    // The write head; dealt once rotated.
                    break;
                }
                return Err(Error::invariant(format!(
                    "raw segment {} is locked but is not the write head",
                    segment.name()
                )));
            }

            let (per_tenant, dropped) = self.read_grouped(segment, &mut last_id)?;
            for (code, records) in &per_tenant {
                let log = self.registry.get(code)?;
                log.append_unsorted(segment.timestamp(), records)?;
                stats.records += records.len() as u64;
                tenants.insert(code.clone());
            }

            self.raw.archive(segment)?;

            let following = live.get(i + 1).map(|s| s.timestamp()).unwrap_or(0);
            next = next.max(segment.timestamp()).saturating_add(1).max(following);
            info.set(LAST_ID, last_id)?;
            info.set(NEXT_TIMESTAMP, next)?;

            stats.segments += 1;
            stats.dropped += dropped;
            debug!(
                target: "doclog::dealer",
                segment = %segment.name(),
                tenants = per_tenant.len(),
                watermark = next,
                "Dealt raw segment"
            );
        }

        stats.tenants = tenants.len();
        stats.watermark = next;
        if stats.segments > 0 {
            info!(
                target: "doclog::dealer",
                segments = stats.segments,
                records = stats.records,
                tenants = stats.tenants,
                watermark = next,
                "Deal cycle complete"
            );
        }
        Ok(stats)
    }

    /// Read one RAW segment into per-tenant buffers, assigning ids.
    fn read_grouped(
        &self,
        segment: &Segment,
        last_id: &mut u64,
    ) -> Result<(BTreeMap<String, Vec<Record>>, u64)> {
        let mut per_tenant: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        let mut dropped = 0;

        for record in SegmentReader::open(segment)? {
            let mut record = record?;
            if record.docid.is_none() {
                if record.has_payload() {
                    return Err(Error::invalid_record(format!(
                        "record with payload but no docid in {}",
                        segment.name()
                    )));
                }
                warn!(target: "doclog::dealer", segment = %segment.name(), "Dropping empty record without docid");
                dropped += 1;
                continue;
            }

            let code = record.index_code.take().ok_or_else(|| {
                Error::invalid_record(format!("record without index code in {}", segment.name()))
            })?;
            *last_id += 1;
            record.id = Some(*last_id);
            per_tenant.entry(code).or_default().push(record);
        }

        Ok((per_tenant, dropped))
    }

    fn promote_replica(&self) -> Result<DealStats> {
        let Some(watermark) = self.root.promote_migrated()? else {
            return Ok(DealStats {
                watermark: self.watermark()?,
                ..Default::default()
            });
        };

        let delta = self.root.info().get_or(MASTER_DELTA, 0)?;
        let cutoff = watermark.saturating_sub(delta);
        let mut trimmed = 0;
        for segment in self.raw.segments()? {
            if segment.timestamp() < cutoff {
                segment.delete()?;
                trimmed += 1;
            }
        }

        self.root.set_safe_to_read()?;
        info!(
            target: "doclog::dealer",
            watermark,
            delta,
            trimmed,
            "Promoted replica snapshot"
        );
        Ok(DealStats {
            promoted: true,
            watermark,
            ..Default::default()
        })
    }
}
