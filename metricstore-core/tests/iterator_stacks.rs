//! Iterator stacks over the in-memory table

use metricstore_core::codec;
use metricstore_core::iterators::{
    drain, AgeOffConfig, AgeOffFilter, ExpansionIterator, Key, LookaheadIterator, Range,
    SlidingWindowIterator, SortedKeyValueIterator, SortedMapIterator, TimeSeriesGroupingIterator,
    Value, WarmUp, WeightedFilter, WindowOptions,
};
use metricstore_core::table::MemoryTable;
use metricstore_core::{Metric, SeriesKey, Timestamp};
use std::sync::Arc;

const NOW: Timestamp = 1_700_000_000_000;

fn keep_all() -> AgeOffFilter {
    AgeOffFilter::new(Arc::new(AgeOffConfig::new(365 * 86_400_000)), NOW)
}

/// Single-tag samples, so each sample is exactly one entry
fn entries(host: &str, values: &[f64]) -> Vec<(Key, Value)> {
    values
        .iter()
        .enumerate()
        .flat_map(|(i, v)| {
            codec::to_entries(&Metric::new(
                SeriesKey::new("sys.load").with_tag("host", host),
                NOW - 60_000 + i as i64 * 1_000,
                *v,
            ))
        })
        .collect()
}

fn values(out: &[(Key, Value)]) -> Vec<f64> {
    out.iter()
        .map(|(_, v)| codec::decode_value(v).unwrap())
        .collect()
}

#[test]
fn test_compaction_then_expansion_is_identity() {
    let table = MemoryTable::new();
    for i in 0..300 {
        let key = SeriesKey::new("sys.load")
            .with_tag("host", if i % 2 == 0 { "a" } else { "b" })
            .with_tag("dc", "east");
        table.put(&Metric::new(key, NOW - 300_000 + i * 1_000, (i * i) as f64));
    }
    let before = table.read("sys.load", 0, NOW, keep_all()).unwrap();
    assert_eq!(before.len(), 300);

    table.compact(keep_all(), WindowOptions::all_in_one()).unwrap();
    // one packed entry per (series, tag family)
    assert_eq!(table.len(), 4);

    let after = table.read("sys.load", 0, NOW, keep_all()).unwrap();
    assert_eq!(after, before);

    let middle = table
        .read("sys.load", NOW - 200_000, NOW - 100_000, keep_all())
        .unwrap();
    assert_eq!(middle.len(), 101);
}

#[test]
fn test_expansion_of_raw_source_passes_singles() {
    let source = SortedMapIterator::new(entries("a", &[1.0, 2.0, 3.0]));
    let mut expanded = ExpansionIterator::new(source);
    expanded.seek(&Range::all()).unwrap();
    assert_eq!(values(&drain(&mut expanded).unwrap()), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_grouping_keeps_interleaved_series_apart() {
    let mut all = entries("a", &[1.0, 2.0, 3.0, 4.0]);
    all.extend(entries("b", &[100.0, 200.0, 300.0, 400.0]));
    // rows sort by time first, so the two series interleave
    let source = SortedMapIterator::new(all);

    let filter = WeightedFilter::parse("1,1").unwrap();
    let mut grouped = TimeSeriesGroupingIterator::new(source, filter, WarmUp::Skip);
    grouped.seek(&Range::all()).unwrap();
    let out = drain(&mut grouped).unwrap();

    assert_eq!(grouped.series_count(), 2);
    let mut sums = values(&out);
    sums.sort_by(f64::total_cmp);
    assert_eq!(sums, vec![3.0, 5.0, 7.0, 300.0, 500.0, 700.0]);
}

#[test]
fn test_sliding_window_warm_up_modes() {
    let filter = WeightedFilter::parse("1,1,1").unwrap();

    let mut skip = SlidingWindowIterator::new(
        SortedMapIterator::new(entries("a", &[1.0, 2.0, 3.0, 4.0])),
        filter.clone(),
        WarmUp::Skip,
    );
    skip.seek(&Range::all()).unwrap();
    assert_eq!(values(&drain(&mut skip).unwrap()), vec![6.0, 9.0]);

    let mut partial = SlidingWindowIterator::new(
        SortedMapIterator::new(entries("a", &[1.0, 2.0, 3.0, 4.0])),
        filter,
        WarmUp::Partial,
    );
    partial.seek(&Range::all()).unwrap();
    assert_eq!(values(&drain(&mut partial).unwrap()), vec![1.0, 3.0, 6.0, 9.0]);
}

#[test]
fn test_lookahead_over_table_snapshot() {
    let table = MemoryTable::new();
    for (key, value) in entries("a", &[5.0, 6.0]) {
        table.insert(key, value);
    }

    let mut lookahead = LookaheadIterator::new(table.snapshot());
    lookahead.seek(&Range::metric("sys.load")).unwrap();
    let peeked = lookahead.peek().unwrap().map(|(k, _)| k.timestamp);
    assert_eq!(peeked, Some(NOW - 59_000));
    // peeking again does not advance
    assert_eq!(lookahead.peek().unwrap().map(|(k, _)| k.timestamp), peeked);
    assert_eq!(lookahead.top_key().map(|k| k.timestamp), Some(NOW - 60_000));

    lookahead.next().unwrap();
    assert_eq!(
        lookahead.top_value().map(|v| codec::decode_value(v).unwrap()),
        Some(6.0)
    );
    lookahead.next().unwrap();
    assert!(!lookahead.has_top());
}
