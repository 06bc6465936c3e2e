//! Expansion of packed entries into one entry per point

use super::{Key, Range, SortedKeyValueIterator, Value};
use crate::codec::{self, PackedPoints};
use crate::{Result, StoreError};
use tracing::warn;

struct Pending {
    base: Key,
    points: PackedPoints,
}

/// Presents packed entries as individual single-value entries.
///
/// Each synthetic entry copies the packed entry's columns and visibility,
/// with the row and key timestamp rewritten to the point's own timestamp.
/// Single-value entries pass through unchanged. Expansion is lazy: a blob
/// is decoded one pair at a time as the caller advances.
///
/// A malformed blob is skipped. The iterator positions on the following
/// entry and returns [`StoreError::MalformedBlob`]; the caller may keep
/// reading from the current top.
pub struct ExpansionIterator<S> {
    source: S,
    range: Range,
    top: Option<(Key, Value)>,
    pending: Option<Pending>,
}

impl<S: SortedKeyValueIterator> ExpansionIterator<S> {
    /// Wrap a source
    pub fn new(source: S) -> Self {
        Self {
            source,
            range: Range::all(),
            top: None,
            pending: None,
        }
    }

    fn fill(&mut self) -> Result<()> {
        self.top = None;
        let mut failure: Option<StoreError> = None;

        loop {
            if let Some(pending) = self.pending.as_mut() {
                match pending.points.next() {
                    Some(Ok(point)) => {
                        let key = match pending.base.at_timestamp(point.timestamp) {
                            Ok(key) => key,
                            Err(e) => {
                                self.pending = None;
                                failure.get_or_insert(e);
                                continue;
                            }
                        };
                        if self.range.before_start(&key) {
                            continue;
                        }
                        if self.range.after_end(&key) {
                            // remaining points are later still
                            self.pending = None;
                            continue;
                        }
                        self.top = Some((key, codec::encode_value(point.value)));
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Skipping rest of packed entry {:?}: {}", pending.base, e);
                        self.pending = None;
                        failure.get_or_insert(e);
                    }
                    None => self.pending = None,
                }
                continue;
            }

            let (key, value) = match self.source.top() {
                Some((k, v)) => (k.clone(), v.clone()),
                None => break,
            };
            self.source.next()?;

            if !codec::is_packed(&value) {
                if self.range.contains(&key) {
                    self.top = Some((key, value));
                    break;
                }
                continue;
            }

            match PackedPoints::new(value) {
                Ok(points) => self.pending = Some(Pending { base: key, points }),
                Err(e) => {
                    warn!("Skipping malformed packed entry {:?}: {}", key, e);
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: SortedKeyValueIterator> SortedKeyValueIterator for ExpansionIterator<S> {
    fn seek(&mut self, range: &Range) -> Result<()> {
        self.range = range.clone();
        self.pending = None;
        // a packed entry keyed before the range may still hold points inside it
        self.source.seek(&range.widen_to_metric_start())?;
        self.fill()
    }

    fn has_top(&self) -> bool {
        self.top.is_some()
    }

    fn top_key(&self) -> Option<&Key> {
        self.top.as_ref().map(|(k, _)| k)
    }

    fn top_value(&self) -> Option<&Value> {
        self.top.as_ref().map(|(_, v)| v)
    }

    fn next(&mut self) -> Result<()> {
        self.fill()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::drain;
    use super::*;
    use crate::types::Point;
    use bytes::Bytes;

    fn points(stamps: &[i64]) -> Vec<Point> {
        stamps.iter().map(|&ts| Point::new(ts, ts as f64 / 10.0)).collect()
    }

    #[test]
    fn test_expands_packed_and_passes_singles() {
        let mut iter = ExpansionIterator::new(source(vec![
            packed("m", "host=a", &points(&[100, 200, 300])),
            single("m", "host=b", 150, 7.0),
        ]));
        iter.seek(&Range::all()).unwrap();
        let out = drain(&mut iter).unwrap();

        assert_eq!(
            values(&out),
            vec![(100, 10.0), (200, 20.0), (300, 30.0), (150, 7.0)]
        );
        // synthetic keys equal keys written as single points
        assert_eq!(out[1].0, key("m", "host=a", 200));
        assert_eq!(out[3].0, key("m", "host=b", 150));
    }

    #[test]
    fn test_range_filters_inside_blob() {
        let mut iter = ExpansionIterator::new(source(vec![packed(
            "m",
            "host=a",
            &points(&[100, 200, 300, 400]),
        )]));
        iter.seek(&Range::metric_between("m", 150, 300)).unwrap();
        assert_eq!(values(&drain(&mut iter).unwrap()), vec![(200, 20.0), (300, 30.0)]);
    }

    #[test]
    fn test_malformed_blob_is_skipped() {
        let (bad_key, _) = single("m", "host=a", 50, 0.0);
        let mut iter = ExpansionIterator::new(source(vec![
            (bad_key, Bytes::from(vec![0u8; 20])),
            single("m", "host=a", 60, 6.0),
        ]));

        let err = iter.seek(&Range::all()).unwrap_err();
        assert!(err.is_corruption());
        // positioned on the next good entry
        assert_eq!(values(&drain(&mut iter).unwrap()), vec![(60, 6.0)]);
    }

    #[test]
    fn test_empty_blob_yields_nothing() {
        let (k, _) = single("m", "host=a", 1, 0.0);
        let mut iter = ExpansionIterator::new(source(vec![(k, Bytes::new())]));
        iter.seek(&Range::all()).unwrap();
        assert!(!iter.has_top());
    }
}
