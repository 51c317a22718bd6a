//! Record reconciliation.
//!
//! [`RecordMerger`] folds updates and deletions for the same docid into one
//! record. It is used in two places:
//!
//! - the sort stage ([`RecordMerger::compact_and_sort`]) turns a batch of
//!   UNSORTED records into one docid-sorted, deduplicated SORTED segment.
//!   Tombstones are kept, since they still have to cancel older data.
//! - the optimizer ([`RecordMerger::merge`]) k-way merges the previous
//!   OPTIMIZED segment with newer SORTED segments. The output is the full
//!   state of the tenant, so tombstones are resolved: a bare tombstone drops
//!   the docid, a tombstone carrying payload becomes a live record.

use doclog_core::{Record, Result};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Stateless record reconciliation.
pub struct RecordMerger;

impl RecordMerger {
    /// Apply `source` on top of `target`.
    ///
    /// `id` and `timestamp_ms` always come from `source`. A deleting source
    /// resets the target to its own payload and marks it deleted. Otherwise
    /// `fields` is replaced wholesale when present, while `variables` and
    /// `categories` are merged key by key with the source winning.
    ///
    /// Note the asymmetry: a partial `fields` map is taken as the complete
    /// field set. Existing data depends on this.
    ///
    /// A non-deleting source leaves the deleted flag alone, so a delete
    /// followed by updates stays a tombstone carrying the new payload. That
    /// keeps the fold associative across segment boundaries.
    pub fn merge_record_into(source: &Record, target: &mut Record) {
        target.id = source.id;
        target.timestamp_ms = source.timestamp_ms;

        if source.deleted {
            target.deleted = true;
            target.fields = source.fields.clone();
            target.variables = source.variables.clone();
            target.categories = source.categories.clone();
            return;
        }

        if let Some(fields) = &source.fields {
            target.fields = Some(fields.clone());
        }
        if let Some(variables) = &source.variables {
            target
                .variables
                .get_or_insert_with(Default::default)
                .extend(variables.iter().map(|(k, v)| (*k, *v)));
        }
        if let Some(categories) = &source.categories {
            target
                .categories
                .get_or_insert_with(Default::default)
                .extend(categories.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    /// Deduplicate records by docid in arrival order, then sort by docid.
    ///
    /// Tombstones survive so they can cancel data in older segments.
    pub fn compact_and_sort<I>(records: I) -> Vec<Record>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut out: Vec<Record> = Vec::new();

        for record in records {
            match slots.get(record.docid_str()) {
                Some(&slot) => Self::merge_record_into(&record, &mut out[slot]),
                None => {
                    slots.insert(record.docid_str().to_string(), out.len());
                    out.push(record);
                }
            }
        }

        out.sort_by(|a, b| a.docid_str().cmp(b.docid_str()));
        out
    }

    /// K-way merge of docid-sorted cursors, oldest cursor first.
    ///
    /// Records sharing a docid are folded in cursor order. The stream yields
    /// resolved records only: see [`MergeIter`].
    pub fn merge<I>(cursors: Vec<I>) -> MergeIter<I>
    where
        I: Iterator<Item = Result<Record>>,
    {
        MergeIter::new(cursors)
    }

    /// Resolve a folded record for the fully merged stream.
    ///
    /// Returns `None` for a bare tombstone. A tombstone with payload is
    /// returned as a live record.
    pub fn resolve(mut record: Record) -> Option<Record> {
        if record.deleted {
            if !record.has_payload() {
                return None;
            }
            record.deleted = false;
        }
        Some(record)
    }
}

struct HeapEntry {
    record: Record,
    source: usize,
}

impl HeapEntry {
    fn key(&self) -> (&str, usize) {
        (self.record.docid_str(), self.source)
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on (docid, source).
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

/// Iterator returned by [`RecordMerger::merge`].
///
/// Yields one record per surviving docid in ascending docid order. The first
/// cursor error is returned and the merge should then be abandoned.
pub struct MergeIter<I> {
    cursors: Vec<I>,
    heap: BinaryHeap<HeapEntry>,
    pending_error: Option<doclog_core::Error>,
    records_in: u64,
    dropped: u64,
}

impl<I> MergeIter<I>
where
    I: Iterator<Item = Result<Record>>,
{
    fn new(mut cursors: Vec<I>) -> Self {
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        let mut pending_error = None;
        let mut records_in = 0;
        for (source, cursor) in cursors.iter_mut().enumerate() {
            match cursor.next() {
                Some(Ok(record)) => {
                    records_in += 1;
                    heap.push(HeapEntry { record, source });
                }
                Some(Err(e)) => {
                    pending_error.get_or_insert(e);
                }
                None => {}
            }
        }
        MergeIter {
            cursors,
            heap,
            pending_error,
            records_in,
            dropped: 0,
        }
    }

    fn refill(&mut self, source: usize) -> Result<()> {
        if let Some(next) = self.cursors[source].next() {
            let record = next?;
            self.records_in += 1;
            self.heap.push(HeapEntry { record, source });
        }
        Ok(())
    }

    /// Records pulled from the cursors so far
    pub fn records_in(&self) -> u64 {
        self.records_in
    }

    /// Docids dropped by a trailing bare tombstone so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<I> Iterator for MergeIter<I>
where
    I: Iterator<Item = Result<Record>>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.pending_error.take() {
                return Some(Err(e));
            }

            let first = self.heap.pop()?;
            if let Err(e) = self.refill(first.source) {
                return Some(Err(e));
            }
            let mut merged = first.record;

            while self
                .heap
                .peek()
                .map_or(false, |top| top.record.docid_str() == merged.docid_str())
            {
                let Some(entry) = self.heap.pop() else { break };
                if let Err(e) = self.refill(entry.source) {
                    return Some(Err(e));
                }
                RecordMerger::merge_record_into(&entry.record, &mut merged);
            }

            match RecordMerger::resolve(merged) {
                Some(record) => return Some(Ok(record)),
                None => self.dropped += 1,
            }
        }
    }
}
