//! In-memory sorted table
//!
//! A concurrent skip list of entries laid out by [`codec`](crate::codec),
//! read through the scan-time iterator stack and rewritten in place by
//! [`MemoryTable::compact`].

use crate::codec;
use crate::iterators::{
    AgeOffFilter, AgeOffIterator, CompactionIterator, ExpansionIterator, Key, Range,
    SortedKeyValueIterator, SortedMapIterator, Value, WindowOptions,
};
use crate::types::{Metric, SeriesKey, Timestamp};
use crate::Result;
use crossbeam_skiplist::SkipMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Read stack: packed entries are expanded first so retention is judged per
/// point, not by a blob's first timestamp
pub type TableScanner = AgeOffIterator<ExpansionIterator<SortedMapIterator>>;

/// Outcome of a compaction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Entries in the snapshot
    pub entries_read: usize,
    /// Entries written back
    pub entries_written: usize,
    /// Snapshot entries removed (aged off or merged)
    pub entries_removed: usize,
}

/// Sorted key/value table held in memory
pub struct MemoryTable {
    data: SkipMap<Key, Value>,
    size_bytes: AtomicUsize,
}

impl MemoryTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
            size_bytes: AtomicUsize::new(0),
        }
    }

    /// Insert one raw entry
    pub fn insert(&self, key: Key, value: Value) {
        self.size_bytes
            .fetch_add(entry_size(&key, &value), Ordering::Relaxed);
        self.data.insert(key, value);
    }

    /// Store a metric sample, one entry per tag. Returns the entry count.
    pub fn put(&self, metric: &Metric) -> usize {
        let entries = codec::to_entries(metric);
        let count = entries.len();
        for (key, value) in entries {
            self.insert(key, value);
        }
        count
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the table holds nothing
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Approximate bytes written since creation
    pub fn size(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Sorted snapshot of every entry
    pub fn snapshot(&self) -> SortedMapIterator {
        let entries: Vec<(Key, Value)> = self
            .data
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        SortedMapIterator::from_sorted(Arc::new(entries))
    }

    /// Unseeked read stack over a snapshot
    pub fn scanner(&self, filter: AgeOffFilter) -> TableScanner {
        AgeOffIterator::new(ExpansionIterator::new(self.snapshot()), filter)
    }

    /// Samples of `metric` within `[start, end]`, one per series and
    /// timestamp, ordered by series then time
    pub fn read(
        &self,
        metric: &str,
        start: Timestamp,
        end: Timestamp,
        filter: AgeOffFilter,
    ) -> Result<Vec<Metric>> {
        let mut scanner = self.scanner(filter);
        scanner.seek(&Range::metric_between(metric, start, end))?;

        // every tag of a sample has its own entry
        let mut samples: BTreeMap<(SeriesKey, Timestamp), f64> = BTreeMap::new();
        while let Some((key, value)) = scanner.top() {
            let sample = codec::parse_entry(key, value)?;
            samples.insert((sample.key, sample.point.timestamp), sample.point.value);
            scanner.next()?;
        }

        Ok(samples
            .into_iter()
            .map(|((key, timestamp), value)| Metric::new(key, timestamp, value))
            .collect())
    }

    /// Rewrite the table through expansion, age-off and compaction. Points
    /// still retained are repacked; a blob is never dropped because its
    /// first point expired. On any error the table is left untouched.
    pub fn compact(&self, filter: AgeOffFilter, options: WindowOptions) -> Result<CompactionReport> {
        let snapshot = self.snapshot();
        let entries_read = snapshot.len();
        let snapshot_keys: Vec<Key> = {
            let mut keys = Vec::with_capacity(entries_read);
            let mut all = snapshot.clone();
            all.seek(&Range::all())?;
            while let Some(key) = all.top_key() {
                keys.push(key.clone());
                all.next()?;
            }
            keys
        };

        let retained = AgeOffIterator::new(ExpansionIterator::new(snapshot), filter);
        let mut stack = CompactionIterator::compaction(retained, options);
        stack.seek(&Range::all())?;
        let mut output: BTreeMap<Key, Value> = BTreeMap::new();
        while let Some((key, value)) = stack.top() {
            output.insert(key.clone(), value.clone());
            stack.next()?;
        }

        let mut report = CompactionReport {
            entries_read,
            entries_written: output.len(),
            entries_removed: 0,
        };
        for key in snapshot_keys {
            if !output.contains_key(&key) && self.data.remove(&key).is_some() {
                report.entries_removed += 1;
            }
        }
        for (key, value) in output {
            self.data.insert(key, value);
        }

        debug!("Compaction rewrote {} entries into {}", entries_read, report.entries_written);
        if report.entries_removed > 0 {
            info!(
                "Compacted table: read {}, wrote {}, removed {}",
                report.entries_read, report.entries_written, report.entries_removed
            );
        }
        Ok(report)
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_size(key: &Key, value: &Value) -> usize {
    key.row.len()
        + key.column_family.len()
        + key.column_qualifier.len()
        + key.visibility.len()
        + 8
        + value.len()
}
