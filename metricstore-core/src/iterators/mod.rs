//! Scan-time iterators over a sorted key-value stream
//!
//! Every iterator here implements [`SortedKeyValueIterator`], a pull-based
//! contract any sorted store can satisfy: `seek` positions on a range,
//! `has_top`/`top_key`/`top_value` expose the current entry, and `next`
//! advances. Iterators wrap a source and compose into stacks:
//!
//! - [`LookaheadIterator`]: one-entry peek over any source
//! - [`ExpansionIterator`]: packed entries → one entry per point
//! - [`CompactionIterator`]: runs of single points → packed entries
//! - [`AgeOffIterator`]: drops entries past their metric's retention
//! - [`TimeWindowCombiner`]: per-bucket reduction
//! - [`DownsampleIterator`]: one aggregated value per series per bucket
//! - [`RateIterator`]: first difference with counter semantics
//! - [`SlidingWindowIterator`] / [`TimeSeriesGroupingIterator`]: weighted
//!   filters over a moving window of points
//!
//! None of them block or retry: all I/O happens in the source, and an error
//! is returned to the caller as soon as it is seen.

mod age_off;
mod combiner;
mod compaction;
mod downsample;
mod expansion;
mod grouping;
mod lookahead;
mod rate;
mod sliding;
mod source;

pub use age_off::{AgeOffConfig, AgeOffFilter, AgeOffIterator};
pub use combiner::{TimeWindowCombiner, WindowOptions, WindowReducer};
pub use compaction::{CompactionIterator, PackReducer};
pub use downsample::{DownsampleIterator, DownsampleReducer};
pub use expansion::ExpansionIterator;
pub use grouping::{TimeSeriesGroupingIterator, WarmUp, WindowFunction, WeightedFilter};
pub use lookahead::LookaheadIterator;
pub use rate::{RateFunction, RateIterator, RateOptions};
pub use sliding::SlidingWindowIterator;
pub use source::SortedMapIterator;

use crate::codec;
use crate::types::Timestamp;
use crate::Result;
use bytes::Bytes;
use std::fmt;
use std::ops::Bound;

/// Entry value: one encoded `f64` or a packed point array
pub type Value = Bytes;

/// Key of one stored entry
///
/// Ordering is row, column family, column qualifier, visibility, timestamp.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    /// Encoded metric + timestamp row
    pub row: Bytes,
    /// One `key=value` tag
    pub column_family: String,
    /// Remaining tags, `k=v,k=v`
    pub column_qualifier: String,
    /// Visibility expression, empty when unrestricted
    pub visibility: String,
    /// Point timestamp in milliseconds
    pub timestamp: Timestamp,
}

impl Key {
    /// Create a new key
    pub fn new(
        row: Bytes,
        column_family: impl Into<String>,
        column_qualifier: impl Into<String>,
        visibility: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            row,
            column_family: column_family.into(),
            column_qualifier: column_qualifier.into(),
            visibility: visibility.into(),
            timestamp,
        }
    }

    /// Smallest key of a row
    pub fn row_only(row: Bytes) -> Self {
        Self::new(row, "", "", "", Timestamp::MIN)
    }

    /// Metric name decoded from the row
    pub fn metric(&self) -> Result<&str> {
        codec::metric_from_row(&self.row)
    }

    /// True when both keys name the same series (metric, columns, visibility)
    pub fn same_series(&self, other: &Key) -> bool {
        self.column_family == other.column_family
            && self.column_qualifier == other.column_qualifier
            && self.visibility == other.visibility
            && matches!((self.metric(), other.metric()), (Ok(a), Ok(b)) if a == b)
    }

    /// Same key with a different point timestamp, row rewritten to match
    pub fn at_timestamp(&self, timestamp: Timestamp) -> Result<Key> {
        let metric = self.metric()?;
        Ok(Key {
            row: codec::encode_row_key(metric, timestamp),
            column_family: self.column_family.clone(),
            column_qualifier: self.column_qualifier.clone(),
            visibility: self.visibility.clone(),
            timestamp,
        })
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let row = match codec::decode_row_key(&self.row) {
            Ok((metric, ts)) => format!("{}@{}", metric, ts),
            Err(_) => format!("{:?}", self.row),
        };
        write!(
            f,
            "{} {}:{} [{}] {}",
            row, self.column_family, self.column_qualifier, self.visibility, self.timestamp
        )
    }
}

/// Key range for a seek
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub start: Bound<Key>,
    pub end: Bound<Key>,
}

impl Range {
    /// Create a range from explicit bounds
    pub fn new(start: Bound<Key>, end: Bound<Key>) -> Self {
        Self { start, end }
    }

    /// Unbounded range
    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// Every row of one metric
    pub fn metric(metric: &str) -> Self {
        Self::new(
            Bound::Included(Key::row_only(codec::metric_start_row(metric))),
            Bound::Excluded(Key::row_only(codec::metric_end_row(metric))),
        )
    }

    /// Rows of one metric with timestamps in `[start, end]`
    pub fn metric_between(metric: &str, start: Timestamp, end: Timestamp) -> Self {
        let upper = match end.checked_add(1) {
            Some(next) => Key::row_only(codec::encode_row_key(metric, next)),
            None => Key::row_only(codec::metric_end_row(metric)),
        };
        Self::new(
            Bound::Included(Key::row_only(codec::encode_row_key(metric, start))),
            Bound::Excluded(upper),
        )
    }

    /// Key sorts before the start of the range
    pub fn before_start(&self, key: &Key) -> bool {
        match &self.start {
            Bound::Included(start) => key < start,
            Bound::Excluded(start) => key <= start,
            Bound::Unbounded => false,
        }
    }

    /// Key sorts after the end of the range
    pub fn after_end(&self, key: &Key) -> bool {
        match &self.end {
            Bound::Included(end) => key > end,
            Bound::Excluded(end) => key >= end,
            Bound::Unbounded => false,
        }
    }

    /// Key lies within the range
    pub fn contains(&self, key: &Key) -> bool {
        !self.before_start(key) && !self.after_end(key)
    }

    /// Same range with the start widened to the first row of its metric, so
    /// packed or windowed entries that begin earlier are still visited
    pub fn widen_to_metric_start(&self) -> Range {
        let start = match &self.start {
            Bound::Included(key) | Bound::Excluded(key) => match key.metric() {
                Ok(metric) => Bound::Included(Key::row_only(codec::metric_start_row(metric))),
                Err(_) => self.start.clone(),
            },
            Bound::Unbounded => Bound::Unbounded,
        };
        Range::new(start, self.end.clone())
    }
}

impl Default for Range {
    fn default() -> Self {
        Self::all()
    }
}

/// Pull-based iterator over a sorted key-value source
pub trait SortedKeyValueIterator: Send {
    /// Position on the first entry within `range`
    fn seek(&mut self, range: &Range) -> Result<()>;

    /// True while an entry is available
    fn has_top(&self) -> bool;

    /// Current key
    fn top_key(&self) -> Option<&Key>;

    /// Current value
    fn top_value(&self) -> Option<&Value>;

    /// Advance to the following entry
    fn next(&mut self) -> Result<()>;

    /// Current entry as a pair
    fn top(&self) -> Option<(&Key, &Value)> {
        match (self.top_key(), self.top_value()) {
            (Some(k), Some(v)) => Some((k, v)),
            _ => None,
        }
    }
}

/// Type-erased iterator, used to assemble stacks at runtime
pub type BoxedIterator = Box<dyn SortedKeyValueIterator>;

impl<T: SortedKeyValueIterator + ?Sized> SortedKeyValueIterator for Box<T> {
    fn seek(&mut self, range: &Range) -> Result<()> {
        (**self).seek(range)
    }

    fn has_top(&self) -> bool {
        (**self).has_top()
    }

    fn top_key(&self) -> Option<&Key> {
        (**self).top_key()
    }

    fn top_value(&self) -> Option<&Value> {
        (**self).top_value()
    }

    fn next(&mut self) -> Result<()> {
        (**self).next()
    }
}

/// Pull every remaining entry out of an already-seeked iterator
pub fn drain<I: SortedKeyValueIterator + ?Sized>(iter: &mut I) -> Result<Vec<(Key, Value)>> {
    let mut entries = Vec::new();
    while let Some((k, v)) = iter.top() {
        entries.push((k.clone(), v.clone()));
        iter.next()?;
    }
    Ok(entries)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures for iterator tests

    use super::*;
    use crate::codec::{encode_packed, encode_row_key, encode_value};
    use crate::types::Point;

    pub fn key(metric: &str, tag: &str, ts: Timestamp) -> Key {
        Key::new(encode_row_key(metric, ts), tag, "", "", ts)
    }

    pub fn single(metric: &str, tag: &str, ts: Timestamp, value: f64) -> (Key, Value) {
        (key(metric, tag, ts), encode_value(value))
    }

    pub fn packed(metric: &str, tag: &str, points: &[Point]) -> (Key, Value) {
        (key(metric, tag, points[0].timestamp), encode_packed(points))
    }

    pub fn source(entries: Vec<(Key, Value)>) -> SortedMapIterator {
        SortedMapIterator::new(entries)
    }

    pub fn values(entries: &[(Key, Value)]) -> Vec<(Timestamp, f64)> {
        entries
            .iter()
            .map(|(k, v)| (k.timestamp, codec::decode_value(v).unwrap()))
            .collect()
    }
}
