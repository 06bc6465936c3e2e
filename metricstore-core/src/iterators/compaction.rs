//! Compaction of single-point entries into packed entries

use super::{Key, SortedKeyValueIterator, TimeWindowCombiner, Value, WindowOptions, WindowReducer};
use crate::codec::{self, PackedPoints};
use crate::types::Point;
use crate::{Result, StoreError};

/// Packs every point of a window into one `(timestamp, value)` array.
///
/// Inputs may already be packed (a table compacted twice). Anything that
/// cannot be merged without reordering or losing data is refused with
/// [`StoreError::IncompatibleMerge`], which leaves the inputs as they were.
#[derive(Debug, Default, Clone, Copy)]
pub struct PackReducer;

impl PackReducer {
    fn collect(key: &Key, entries: &[(Key, Value)]) -> Result<Vec<Point>> {
        let mut points = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            if k.visibility != key.visibility {
                return Err(StoreError::IncompatibleMerge(format!(
                    "visibility '{}' differs from '{}'",
                    k.visibility, key.visibility
                )));
            }
            if codec::is_packed(v) {
                for point in PackedPoints::new(v.clone())? {
                    points.push(point?);
                }
            } else {
                points.push(Point::new(k.timestamp, codec::decode_value(v)?));
            }
        }
        Ok(points)
    }
}

impl WindowReducer for PackReducer {
    fn reduce(&mut self, key: &Key, entries: &[(Key, Value)]) -> Result<Value> {
        if let [(_, only)] = entries {
            return Ok(only.clone());
        }

        let points = Self::collect(key, entries).map_err(|e| match e {
            StoreError::MalformedBlob(reason) => StoreError::IncompatibleMerge(reason),
            other => other,
        })?;
        if let Some(pair) = points.windows(2).find(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(StoreError::IncompatibleMerge(format!(
                "timestamp {} does not follow {}",
                pair[1].timestamp, pair[0].timestamp
            )));
        }
        Ok(codec::encode_packed(&points))
    }
}

/// Combiner that packs each series' points per window
pub type CompactionIterator<S> = TimeWindowCombiner<S, PackReducer>;

impl<S: SortedKeyValueIterator> TimeWindowCombiner<S, PackReducer> {
    /// Compact a source with the given window sizing
    pub fn compaction(source: S, options: WindowOptions) -> Self {
        TimeWindowCombiner::new(source, PackReducer, options)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{drain, ExpansionIterator, Range};
    use super::*;

    fn compact(entries: Vec<(Key, Value)>, window: i64) -> Vec<(Key, Value)> {
        let mut iter = CompactionIterator::compaction(source(entries), WindowOptions::new(window).unwrap());
        iter.seek(&Range::all()).unwrap();
        drain(&mut iter).unwrap()
    }

    #[test]
    fn test_packs_window() {
        let entries: Vec<_> = (0..5).map(|i| single("m", "host=a", i * 100, i as f64)).collect();
        let out = compact(entries, 1000);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, key("m", "host=a", 0));
        assert_eq!(out[0].1.len(), 5 * codec::PACKED_POINT_BYTES);
    }

    #[test]
    fn test_compaction_then_expansion_is_identity() {
        let entries: Vec<_> = (0..30)
            .flat_map(|i| {
                vec![
                    single("m", "host=a", i * 250, i as f64),
                    single("m", "host=b", i * 250, -(i as f64)),
                ]
            })
            .collect();
        let compacted = compact(entries.clone(), 1000);
        assert!(compacted.len() < entries.len());

        let mut expanded = ExpansionIterator::new(source(compacted));
        expanded.seek(&Range::all()).unwrap();
        let mut out = drain(&mut expanded).unwrap();
        out.sort_by(|a, b| a.0.cmp(&b.0));

        let mut expected = entries;
        expected.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(out, expected);
    }

    #[test]
    fn test_merges_previously_packed() {
        let points: Vec<Point> = (0..3).map(|i| Point::new(i * 10, 1.0)).collect();
        let out = compact(
            vec![packed("m", "host=a", &points), single("m", "host=a", 500, 2.0)],
            1000,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(codec::decode_packed(&out[0].1).unwrap().len(), 4);
    }

    #[test]
    fn test_overlap_left_unmerged() {
        let points = [Point::new(0, 1.0), Point::new(600, 1.0)];
        let entries = vec![packed("m", "host=a", &points), single("m", "host=a", 300, 2.0)];
        let out = compact(entries.clone(), 1000);
        assert_eq!(out, entries);
    }

    #[test]
    fn test_single_entry_untouched() {
        let entries = vec![single("m", "host=a", 7, 7.0)];
        assert_eq!(compact(entries.clone(), 1000), entries);
    }
}
