//! Pipeline Tests
//!
//! Drive the whole record flow synchronously, one stage at a time:
//! write → deal → sort → optimize → clean → replay.
//!
//! Key properties tested:
//! - Trailing bare deletes remove a docid; deletes carrying data revive it
//! - Dealing loses nothing and only partitions by tenant
//! - A replayed stream folds to the same state as compacting the input
//! - Cleanup never removes data compaction has not absorbed
//! - Sorting an already sorted tenant is a no-op
//! - A fresh stream racing the dealer still sees every dealt record

use doclog_core::{Categories, Fields, Record, Variables};
use doclog_durability::{
    IndexRegistry, LogConfig, LogRoot, RawLog, RecordMerger, SegmentKind, SegmentReader,
};
use doclog_engine::{LogCleaner, LogDealer, LogOptimizer, LogReader, OptimizationQueue, PageToken};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::{mpsc, Arc};
use std::thread;
use tempfile::TempDir;

type Payload = (Option<Fields>, Option<Variables>, Option<Categories>);

struct Pipeline {
    raw: Arc<RawLog>,
    registry: Arc<IndexRegistry>,
    dealer: LogDealer,
    optimizer: LogOptimizer,
    cleaner: LogCleaner,
    reader: LogReader,
    _dir: TempDir,
}

impl Pipeline {
    fn new(config: LogConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let root = Arc::new(LogRoot::open(dir.path()).unwrap());
        let raw = Arc::new(RawLog::open(Arc::clone(&root), &config));
        let registry = Arc::new(IndexRegistry::new(Arc::clone(&root), config));
        let queue = Arc::new(OptimizationQueue::new());
        let dealer = LogDealer::open(root, Arc::clone(&raw), Arc::clone(&registry)).unwrap();
        let optimizer = LogOptimizer::new(Arc::clone(&registry), Arc::clone(&queue));
        let (cleaner, _deletes) = LogCleaner::open(Arc::clone(&registry), queue).unwrap();
        let reader = LogReader::new(Arc::clone(&raw), Arc::clone(&registry));
        Pipeline {
            raw,
            registry,
            dealer,
            optimizer,
            cleaner,
            reader,
            _dir: dir,
        }
    }

    fn write(&self, records: Vec<Record>) {
        if !records.is_empty() {
            self.raw.write_batch(records).unwrap();
        }
        self.raw.close_head().unwrap();
    }

    fn deal(&self) {
        self.dealer.deal_once().unwrap();
    }

    fn optimize(&self, code: &str) {
        self.optimizer.optimize(code, 1).unwrap();
        while self.optimizer.optimize_next().unwrap().is_some() {}
    }

    /// Replay `code` from the start, passing tokens through their string form.
    fn replay(&self, code: &str) -> Vec<Record> {
        let mut token = PageToken::initial();
        let mut records = Vec::new();
        for _ in 0..10_000 {
            let page = self.reader.read_page(code, &token).unwrap();
            assert!(!page.restarted);
            records.extend(page.records);
            match page.next_token {
                Some(next) => token = PageToken::decode(&next.encode().unwrap()).unwrap(),
                None => return records,
            }
        }
        panic!("stream of {} does not terminate", code);
    }

    fn optimized_records(&self, code: &str) -> Vec<Record> {
        let log = self.registry.get(code).unwrap();
        let newest = log.newest_optimized().unwrap().expect("optimized segment");
        SegmentReader::read_all(&newest).unwrap()
    }
}

/// Fold records in order per docid and resolve tombstones.
fn fold(records: impl IntoIterator<Item = Record>) -> BTreeMap<String, Payload> {
    let mut state: BTreeMap<String, Record> = BTreeMap::new();
    for record in records {
        let key = record.docid_str().to_string();
        if let Some(target) = state.get_mut(&key) {
            RecordMerger::merge_record_into(&record, target);
        } else {
            state.insert(key, record);
        }
    }
    state
        .into_values()
        .filter_map(RecordMerger::resolve)
        .map(|r| (r.docid_str().to_string(), (r.fields, r.variables, r.categories)))
        .collect()
}

fn op(code: &str, docid: u8, kind: u8, n: usize) -> Record {
    let docid = format!("d{}", docid);
    match kind {
        0 => Record::new(code, docid).with_field("x", n.to_string()),
        1 => Record::new(code, docid).with_variable((n % 3) as i32, n as f64),
        2 => Record::new(code, docid).with_category(format!("c{}", n % 2), n.to_string()),
        3 => Record::delete(code, docid),
        _ => Record::delete(code, docid).with_field("x", n.to_string()),
    }
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[test]
fn test_trailing_bare_delete_removes_docid() {
    let p = Pipeline::new(LogConfig::for_testing());
    p.write(vec![
        Record::new("T", "a").with_field("x", "1"),
        Record::new("T", "a").with_variable(1, 2.0),
        Record::delete("T", "a"),
        Record::new("T", "keep").with_field("x", "1"),
    ]);
    p.deal();
    p.optimize("T");

    let optimized = p.optimized_records("T");
    assert_eq!(optimized.len(), 1);
    assert_eq!(optimized[0].docid_str(), "keep");

    let replayed = p.replay("T");
    assert!(replayed.iter().all(|r| r.docid_str() != "a"));
    assert!(!fold(replayed).contains_key("a"));
}

#[test]
fn test_delete_with_payload_is_live_update() {
    let p = Pipeline::new(LogConfig::for_testing());
    p.write(vec![
        Record::new("T", "b").with_field("x", "1"),
        Record::delete("T", "b").with_field("x", "2"),
    ]);
    p.deal();
    p.optimize("T");

    let optimized = p.optimized_records("T");
    assert_eq!(optimized.len(), 1);
    assert!(!optimized[0].deleted);
    let fields = optimized[0].fields.as_ref().unwrap();
    assert_eq!(fields.get("x").map(String::as_str), Some("2"));
}

#[test]
fn test_updates_across_segments_fold_like_one_history() {
    let p = Pipeline::new(LogConfig::for_testing());
    p.write(vec![Record::new("T", "a")
        .with_field("x", "1")
        .with_field("y", "1")
        .with_variable(1, 1.0)
        .with_category("color", "red")]);
    p.deal();
    p.optimize("T");
    p.write(vec![Record::new("T", "a")
        .with_field("x", "2")
        .with_variable(2, 2.0)
        .with_category("size", "L")]);
    p.deal();
    p.optimize("T");

    let optimized = p.optimized_records("T");
    assert_eq!(optimized.len(), 1);
    let a = &optimized[0];
    // fields are replaced as a whole, variables and categories per key
    assert_eq!(a.fields.as_ref().unwrap().len(), 1);
    assert_eq!(a.variables.as_ref().unwrap().len(), 2);
    assert_eq!(a.categories.as_ref().unwrap().len(), 2);
}

// ============================================================================
// Sort idempotence
// ============================================================================

#[test]
fn test_sort_of_sorted_tenant_is_noop() {
    let p = Pipeline::new(LogConfig::for_testing());
    p.write(vec![Record::new("T", "a").with_field("x", "1")]);
    p.deal();

    let log = p.registry.get("T").unwrap();
    assert!(log.sort_now().unwrap().did_compact());
    let before = log.sorted_segments().unwrap();
    assert_eq!(before.len(), 1);

    let again = log.sort_now().unwrap();
    assert!(!again.did_compact());
    assert_eq!(log.sorted_segments().unwrap(), before);
    assert!(log.unsorted_segments().unwrap().is_empty());
}

// ============================================================================
// Cleanup safety
// ============================================================================

#[test]
fn test_cleanup_keeps_unabsorbed_sorted_segments() {
    let mut p = Pipeline::new(LogConfig::for_testing());
    let mut history = Vec::new();
    for round in 0..3 {
        let batch: Vec<Record> = (0..5u8).map(|d| op("T", d, (d + round) % 5, round as usize)).collect();
        history.extend(batch.clone());
        p.write(batch);
        p.deal();
        p.optimize("T");
    }
    let tail: Vec<Record> = (0..5u8).map(|d| op("T", d, 0, 99)).collect();
    history.extend(tail.clone());
    p.write(tail);
    p.deal();
    let log = p.registry.get("T").unwrap();
    log.sort_now().unwrap();

    let newest = log.newest_optimized().unwrap().unwrap();
    let stats = p.cleaner.clean_once().unwrap();
    assert!(stats.optimized_deleted >= 2);

    assert_eq!(log.optimized_segments().unwrap(), vec![newest.clone()]);
    let sorted = log.sorted_segments().unwrap();
    assert_eq!(sorted.len(), 1);
    assert!(sorted[0].timestamp() > newest.timestamp());

    assert_eq!(fold(p.replay("T")), fold(history));
}

#[test]
fn test_recently_read_tenant_is_not_cleaned() {
    let config = LogConfig {
        cleaner_grace_secs: 3600,
        ..LogConfig::for_testing()
    };
    let mut p = Pipeline::new(config);
    for round in 0..2 {
        p.write(vec![op("T", 0, 0, round)]);
        p.deal();
        p.optimize("T");
    }
    p.replay("T");

    let stats = p.cleaner.clean_once().unwrap();
    assert_eq!(stats.skipped_recent, 1);
    let log = p.registry.get("T").unwrap();
    assert_eq!(log.optimized_segments().unwrap().len(), 2);

    // A tenant that was never read is fair game
    p.write(vec![op("U", 0, 0, 0)]);
    p.deal();
    p.optimize("U");
    p.write(vec![op("U", 0, 0, 1)]);
    p.deal();
    p.optimize("U");
    p.cleaner.clean_once().unwrap();
    assert_eq!(p.registry.get("U").unwrap().optimized_segments().unwrap().len(), 1);
}

// ============================================================================
// Streams racing the dealer
// ============================================================================

/// Drain a fresh stream of `code`, following restarts.
fn drain(reader: &LogReader, code: &str) -> Vec<Record> {
    let mut token = PageToken::initial();
    let mut records = Vec::new();
    for _ in 0..10_000 {
        let page = reader.read_page(code, &token).unwrap();
        if page.restarted {
            records.clear();
        }
        records.extend(page.records);
        match page.next_token {
            Some(next) => token = next,
            None => return records,
        }
    }
    panic!("stream of {} does not terminate", code);
}

#[test]
fn test_fresh_streams_racing_the_dealer_lose_nothing() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig::for_testing();
    let root = Arc::new(LogRoot::open(dir.path()).unwrap());
    let raw = Arc::new(RawLog::open(Arc::clone(&root), &config));
    let registry = Arc::new(IndexRegistry::new(Arc::clone(&root), config));
    let dealer = LogDealer::open(root, Arc::clone(&raw), Arc::clone(&registry)).unwrap();
    let reader = LogReader::new(Arc::clone(&raw), Arc::clone(&registry));

    raw.write(Record::new("warmup", "w").with_field("x", "1")).unwrap();
    raw.close_head().unwrap();
    dealer.deal_once().unwrap();

    let (go, go_rx) = mpsc::channel::<()>();
    let (done_tx, done) = mpsc::channel::<()>();
    let dealing = thread::spawn(move || {
        for () in go_rx {
            dealer.deal_once().unwrap();
            done_tx.send(()).unwrap();
        }
    });

    let mut missed = Vec::new();
    for i in 0..300 {
        let code = format!("t{}", i);
        raw.write(Record::new(code.as_str(), "doc").with_field("n", i.to_string()))
            .unwrap();
        raw.close_head().unwrap();

        go.send(()).unwrap();
        let records = drain(&reader, &code);
        done.recv().unwrap();

        if !records.iter().any(|r| r.docid_str() == "doc") {
            missed.push(code);
        }
    }
    drop(go);
    dealing.join().unwrap();

    assert!(missed.is_empty(), "streams missed their record: {:?}", missed);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Every docid-bearing record lands in its tenant's UNSORTED segments,
    /// exactly once, stripped of its code and stamped with an id.
    #[test]
    fn prop_dealing_loses_nothing(
        ops in prop::collection::vec((0u8..3, 0u8..6, 0u8..5), 1..60),
        cuts in prop::collection::vec(0usize..60, 0..4),
    ) {
        let config = LogConfig {
            sort_segment_threshold: usize::MAX,
            segment_size: u64::MAX,
            ..LogConfig::for_testing()
        };
        let p = Pipeline::new(config);
        let tenants = ["alpha", "beta", "gamma"];
        let records: Vec<Record> = ops
            .iter()
            .enumerate()
            .map(|(n, &(t, d, k))| op(tenants[t as usize], d, k, n))
            .collect();

        let mut bounds: Vec<usize> = cuts.into_iter().map(|c| c.min(records.len())).collect();
        bounds.push(0);
        bounds.push(records.len());
        bounds.sort_unstable();
        bounds.dedup();
        for window in bounds.windows(2) {
            p.write(records[window[0]..window[1]].to_vec());
        }
        p.deal();

        let mut expected: BTreeMap<&str, Vec<(String, Payload, bool)>> = BTreeMap::new();
        for r in &records {
            expected.entry(r.index_code.as_deref().unwrap()).or_default().push((
                r.docid_str().to_string(),
                (r.fields.clone(), r.variables.clone(), r.categories.clone()),
                r.deleted,
            ));
        }

        let none = Vec::new();
        let mut ids = Vec::new();
        for code in tenants {
            let log = p.registry.get(code).unwrap();
            let mut dealt = Vec::new();
            for segment in log.unsorted_segments().unwrap() {
                prop_assert_eq!(segment.kind(), SegmentKind::Unsorted);
                for r in SegmentReader::read_all(&segment).unwrap() {
                    prop_assert!(r.index_code.is_none());
                    ids.push(r.id.unwrap());
                    dealt.push((r.docid_str().to_string(), (r.fields, r.variables, r.categories), r.deleted));
                }
            }
            prop_assert_eq!(&dealt, expected.get(code).unwrap_or(&none));
        }

        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), records.len());
    }

    /// Replaying a stream that spans OPTIMIZED, SORTED, UNSORTED and
    /// undealt RAW data folds to the state of the whole input history.
    #[test]
    fn prop_replay_matches_compacted_history(
        ops in prop::collection::vec((0u8..6, 0u8..5), 1..60),
        optimized_cut in 0usize..60,
        dealt_cut in 0usize..60,
        page_size in 1usize..8,
    ) {
        let config = LogConfig {
            page_size,
            ..LogConfig::for_testing()
        };
        let p = Pipeline::new(config);
        let mut records: Vec<Record> = ops
            .iter()
            .enumerate()
            .map(|(n, &(d, k))| op("T", d, k, n))
            .collect();
        records.insert(0, Record::new("noise", "d0").with_field("x", "noise"));

        let first = optimized_cut.min(records.len());
        let second = dealt_cut.min(records.len()).max(first);

        p.write(records[..first].to_vec());
        p.deal();
        if p.registry.get("T").unwrap().exists() {
            p.optimize("T");
        }
        for chunk in records[first..second].chunks(7) {
            p.write(chunk.to_vec());
        }
        p.deal();
        p.write(records[second..].to_vec());

        let history: Vec<Record> = records
            .into_iter()
            .filter(|r| r.index_code.as_deref() == Some("T"))
            .collect();
        prop_assert_eq!(fold(p.replay("T")), fold(history));
    }
}
