//! Downsampling: one aggregated value per series per bucket

use super::{Key, SortedKeyValueIterator, TimeWindowCombiner, Value, WindowOptions, WindowReducer};
use crate::codec::{self, PackedPoints};
use crate::query::{Aggregator, Downsample};
use crate::{Result, StoreError};

/// Aggregates every point of a bucket, packed entries included
#[derive(Debug, Clone, Copy)]
pub struct DownsampleReducer {
    aggregator: Aggregator,
}

impl DownsampleReducer {
    pub fn new(aggregator: Aggregator) -> Self {
        Self { aggregator }
    }
}

impl WindowReducer for DownsampleReducer {
    fn reduce(&mut self, key: &Key, entries: &[(Key, Value)]) -> Result<Value> {
        let mut acc = self.aggregator.accumulator();
        for (k, v) in entries {
            if codec::is_packed(v) {
                for point in PackedPoints::new(v.clone())? {
                    let point = point?;
                    acc.add(point.timestamp, point.value);
                }
            } else {
                acc.add(k.timestamp, codec::decode_value(v)?);
            }
        }
        let value = acc
            .result()
            .ok_or_else(|| StoreError::Query(format!("empty bucket at {:?}", key)))?;
        Ok(codec::encode_value(value))
    }
}

/// Combiner emitting one aggregated entry per bucket, keyed by the
/// bucket's first key
pub type DownsampleIterator<S> = TimeWindowCombiner<S, DownsampleReducer>;

impl<S: SortedKeyValueIterator> TimeWindowCombiner<S, DownsampleReducer> {
    /// Downsample a source
    pub fn downsample(source: S, downsample: Downsample) -> Result<Self> {
        Ok(TimeWindowCombiner::new(
            source,
            DownsampleReducer::new(downsample.aggregator),
            WindowOptions::new(downsample.period_millis)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{drain, Range};
    use super::*;
    use crate::types::Point;

    #[test]
    fn test_one_minute_average() {
        // one point per second for three minutes
        let entries = (0..180).map(|i| single("m", "host=a", i * 1000, i as f64)).collect();
        let downsample = Downsample::parse("1m-avg").unwrap();
        let mut iter = DownsampleIterator::downsample(source(entries), downsample).unwrap();
        iter.seek(&Range::all()).unwrap();

        assert_eq!(
            values(&drain(&mut iter).unwrap()),
            vec![(0, 29.5), (60_000, 89.5), (120_000, 149.5)]
        );
    }

    #[test]
    fn test_packed_entries_are_aggregated() {
        let points: Vec<Point> = (0..4).map(|i| Point::new(i * 10, 2.0)).collect();
        let mut iter = DownsampleIterator::downsample(
            source(vec![packed("m", "host=a", &points), single("m", "host=a", 50, 2.0)]),
            Downsample::parse("1s-count").unwrap(),
        )
        .unwrap();
        iter.seek(&Range::all()).unwrap();
        assert_eq!(values(&drain(&mut iter).unwrap()), vec![(0, 5.0)]);
    }
}
