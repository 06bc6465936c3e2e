//! In-memory sorted source for iterator stacks

use super::{Key, Range, SortedKeyValueIterator, Value};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Iterator over an immutable, sorted snapshot of entries.
///
/// This is the backend adapter every stack is built on: the memory table
/// and the cache both materialize a snapshot and hand it over here.
#[derive(Debug, Clone)]
pub struct SortedMapIterator {
    entries: Arc<Vec<(Key, Value)>>,
    position: usize,
    range: Range,
}

impl SortedMapIterator {
    /// Build from entries; they are sorted by key here
    pub fn new(mut entries: Vec<(Key, Value)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_sorted(Arc::new(entries))
    }

    /// Build from a snapshot the caller guarantees is sorted
    pub fn from_sorted(entries: Arc<Vec<(Key, Value)>>) -> Self {
        Self {
            entries,
            position: 0,
            range: Range::all(),
        }
    }

    /// Number of entries in the snapshot
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<BTreeMap<Key, Value>> for SortedMapIterator {
    fn from(map: BTreeMap<Key, Value>) -> Self {
        Self::from_sorted(Arc::new(map.into_iter().collect()))
    }
}

impl SortedKeyValueIterator for SortedMapIterator {
    fn seek(&mut self, range: &Range) -> Result<()> {
        self.range = range.clone();
        self.position = self
            .entries
            .partition_point(|(key, _)| range.before_start(key));
        Ok(())
    }

    fn has_top(&self) -> bool {
        match self.entries.get(self.position) {
            Some((key, _)) => !self.range.after_end(key),
            None => false,
        }
    }

    fn top_key(&self) -> Option<&Key> {
        if self.has_top() {
            Some(&self.entries[self.position].0)
        } else {
            None
        }
    }

    fn top_value(&self) -> Option<&Value> {
        if self.has_top() {
            Some(&self.entries[self.position].1)
        } else {
            None
        }
    }

    fn next(&mut self) -> Result<()> {
        if self.position < self.entries.len() {
            self.position += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::drain;
    use super::*;

    #[test]
    fn test_seek_within_metric() {
        let mut iter = source(vec![
            single("b", "t=1", 5, 5.0),
            single("a", "t=1", 1, 1.0),
            single("a", "t=1", 2, 2.0),
            single("a", "t=1", 3, 3.0),
        ]);
        iter.seek(&Range::metric_between("a", 2, 3)).unwrap();
        let out = drain(&mut iter).unwrap();
        assert_eq!(values(&out), vec![(2, 2.0), (3, 3.0)]);
    }

    #[test]
    fn test_empty_source() {
        let mut iter = source(Vec::new());
        iter.seek(&Range::all()).unwrap();
        assert!(!iter.has_top());
        assert!(iter.top().is_none());
        iter.next().unwrap();
        assert!(!iter.has_top());
    }
}
