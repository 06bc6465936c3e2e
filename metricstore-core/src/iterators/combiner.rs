//! Time-window combiner
//!
//! Groups the entries of one series whose timestamps fall in the same
//! aligned window and hands each group to a [`WindowReducer`]. Output keeps
//! key order. The compaction and downsampling iterators are both instances
//! of it.

use super::{Key, LookaheadIterator, Range, SortedKeyValueIterator, Value};
use crate::types::Timestamp;
use crate::{Result, StoreError};
use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

/// Reduces the entries of one window to a single value
pub trait WindowReducer: Send {
    /// Combine `entries` (all of one series and window, in source order)
    /// into the value stored under `key`, the window's first key.
    ///
    /// Returning [`StoreError::IncompatibleMerge`] makes the combiner pass
    /// the window's entries through unmerged; any other error is returned
    /// to the caller.
    fn reduce(&mut self, key: &Key, entries: &[(Key, Value)]) -> Result<Value>;
}

/// Window sizing for a combiner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOptions {
    /// Window width in milliseconds
    pub window_millis: i64,
    /// Collapse each series into a single window regardless of width
    pub all_in_one: bool,
}

impl WindowOptions {
    /// Aligned windows of the given width
    pub fn new(window_millis: i64) -> Result<Self> {
        if window_millis <= 0 {
            return Err(StoreError::Configuration(format!(
                "window must be positive, got {}",
                window_millis
            )));
        }
        Ok(Self {
            window_millis,
            all_in_one: false,
        })
    }

    /// One window per series
    pub fn all_in_one() -> Self {
        Self {
            window_millis: i64::MAX,
            all_in_one: true,
        }
    }

    /// Start of the window containing `timestamp`
    pub fn window_start(&self, timestamp: Timestamp) -> Timestamp {
        if self.all_in_one {
            Timestamp::MIN
        } else {
            timestamp - timestamp.rem_euclid(self.window_millis)
        }
    }
}

/// Combiner over a sorted source; see the module docs
pub struct TimeWindowCombiner<S, R> {
    source: LookaheadIterator<S>,
    reducer: R,
    options: WindowOptions,
    output: VecDeque<(Key, Value)>,
}

impl<S: SortedKeyValueIterator, R: WindowReducer> TimeWindowCombiner<S, R> {
    /// Wrap a source
    pub fn new(source: S, reducer: R, options: WindowOptions) -> Self {
        Self {
            source: LookaheadIterator::new(source),
            reducer,
            options,
            output: VecDeque::new(),
        }
    }

    fn same_window(options: &WindowOptions, first: &Key, other: &Key) -> bool {
        options.window_start(first.timestamp) == options.window_start(other.timestamp)
            && matches!((first.metric(), other.metric()), (Ok(a), Ok(b)) if a == b)
    }

    /// Consume one metric window from the source into the output queue.
    ///
    /// Rows sort by metric then time, so a window of one metric is a
    /// contiguous run even when several series interleave inside it. The
    /// run is split per series and each part reduced on its own.
    fn combine_next(&mut self) -> Result<()> {
        let first = match self.source.top() {
            Some((k, v)) => (k.clone(), v.clone()),
            None => return Ok(()),
        };
        let mut run = vec![first];

        loop {
            let joins = match self.source.peek()? {
                Some((next, _)) => Self::same_window(&self.options, &run[0].0, next),
                None => false,
            };
            if !joins {
                break;
            }
            self.source.next()?;
            match self.source.top() {
                Some((k, v)) => run.push((k.clone(), v.clone())),
                None => break,
            }
        }
        self.source.next()?;

        let mut series: BTreeMap<(String, String, String), Vec<(Key, Value)>> = BTreeMap::new();
        for (k, v) in run {
            let id = (
                k.column_family.clone(),
                k.column_qualifier.clone(),
                k.visibility.clone(),
            );
            series.entry(id).or_default().push((k, v));
        }

        let mut combined = Vec::new();
        let mut failure = None;
        for (_, window) in series {
            let key = window[0].0.clone();
            match self.reducer.reduce(&key, &window) {
                Ok(value) => combined.push((key, value)),
                Err(StoreError::IncompatibleMerge(reason)) => {
                    warn!("Leaving {} entries at {:?} unmerged: {}", window.len(), key, reason);
                    combined.extend(window);
                }
                Err(e) => {
                    warn!("Dropping window at {:?}: {}", key, e);
                    failure.get_or_insert(e);
                }
            }
        }
        combined.sort_by(|a, b| a.0.cmp(&b.0));
        self.output.extend(combined);

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fill the output queue; a failed window is dropped and reported after
    /// the iterator is positioned on the next good one
    fn fill(&mut self) -> Result<()> {
        let mut failure = None;
        while self.output.is_empty() && self.source.has_top() {
            if let Err(e) = self.combine_next() {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: SortedKeyValueIterator, R: WindowReducer> SortedKeyValueIterator for TimeWindowCombiner<S, R> {
    fn seek(&mut self, range: &Range) -> Result<()> {
        self.output.clear();
        self.source.seek(range)?;
        self.fill()
    }

    fn has_top(&self) -> bool {
        !self.output.is_empty()
    }

    fn top_key(&self) -> Option<&Key> {
        self.output.front().map(|(k, _)| k)
    }

    fn top_value(&self) -> Option<&Value> {
        self.output.front().map(|(_, v)| v)
    }

    fn next(&mut self) -> Result<()> {
        self.output.pop_front();
        self.fill()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::drain;
    use super::*;
    use crate::codec;

    /// Sums the window, or refuses when asked to
    struct SumReducer {
        refuse_over: usize,
    }

    impl WindowReducer for SumReducer {
        fn reduce(&mut self, _key: &Key, entries: &[(Key, Value)]) -> Result<Value> {
            if entries.len() > self.refuse_over {
                return Err(StoreError::IncompatibleMerge("too many".into()));
            }
            let mut sum = 0.0;
            for (_, v) in entries {
                sum += codec::decode_value(v)?;
            }
            Ok(codec::encode_value(sum))
        }
    }

    fn run(entries: Vec<(Key, Value)>, options: WindowOptions, refuse_over: usize) -> Vec<(Key, Value)> {
        let mut iter = TimeWindowCombiner::new(source(entries), SumReducer { refuse_over }, options);
        iter.seek(&Range::all()).unwrap();
        drain(&mut iter).unwrap()
    }

    #[test]
    fn test_groups_by_aligned_window() {
        let entries = (0..6).map(|i| single("m", "host=a", i * 500, 1.0)).collect();
        let out = run(entries, WindowOptions::new(1000).unwrap(), usize::MAX);
        assert_eq!(values(&out), vec![(0, 2.0), (1000, 2.0), (2000, 2.0)]);
    }

    #[test]
    fn test_interleaved_series_reduce_separately() {
        let out = run(
            vec![
                single("m", "host=a", 0, 1.0),
                single("m", "host=b", 10, 5.0),
                single("m", "host=a", 20, 1.0),
                single("m", "host=b", 1500, 5.0),
            ],
            WindowOptions::new(1000).unwrap(),
            usize::MAX,
        );
        assert_eq!(values(&out), vec![(0, 2.0), (10, 5.0), (1500, 5.0)]);
        assert_eq!(out[0].0.column_family, "host=a");
        assert_eq!(out[1].0.column_family, "host=b");
    }

    #[test]
    fn test_metrics_never_share_a_window() {
        let out = run(
            vec![single("a", "host=a", 0, 1.0), single("b", "host=a", 0, 1.0)],
            WindowOptions::new(1000).unwrap(),
            usize::MAX,
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_all_in_one() {
        let entries = (0..4).map(|i| single("m", "host=a", i * 100_000, 2.0)).collect();
        let out = run(entries, WindowOptions::all_in_one(), usize::MAX);
        assert_eq!(values(&out), vec![(0, 8.0)]);
    }

    #[test]
    fn test_incompatible_merge_passes_through() {
        let entries: Vec<_> = (0..3).map(|i| single("m", "host=a", i, 1.0)).collect();
        let out = run(entries.clone(), WindowOptions::new(1000).unwrap(), 2);
        assert_eq!(out, entries);
    }

    #[test]
    fn test_rejects_non_positive_window() {
        assert!(WindowOptions::new(0).is_err());
    }

    #[test]
    fn test_window_start_negative_timestamps() {
        let options = WindowOptions::new(1000).unwrap();
        assert_eq!(options.window_start(-1), -1000);
        assert_eq!(options.window_start(1999), 1000);
    }
}
