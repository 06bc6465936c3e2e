//! One-entry peek over any sorted source

use super::{Key, Range, SortedKeyValueIterator, Value};
use crate::Result;

/// Wraps a source and allows looking at the entry after the current one.
///
/// At most one entry is held outside the source. Without a pending peek
/// the current entry is served straight from the source; after `peek` the
/// current entry is held here and the source sits on the peeked entry.
pub struct LookaheadIterator<S> {
    source: S,
    held: Option<(Key, Value)>,
}

impl<S: SortedKeyValueIterator> LookaheadIterator<S> {
    /// Wrap a source
    pub fn new(source: S) -> Self {
        Self { source, held: None }
    }

    /// Entry following the current top, without consuming anything
    pub fn peek(&mut self) -> Result<Option<(&Key, &Value)>> {
        if self.held.is_none() {
            let current = match self.source.top() {
                Some((k, v)) => (k.clone(), v.clone()),
                None => return Ok(None),
            };
            self.source.next()?;
            self.held = Some(current);
        }
        Ok(self.source.top())
    }
}

impl<S: SortedKeyValueIterator> SortedKeyValueIterator for LookaheadIterator<S> {
    fn seek(&mut self, range: &Range) -> Result<()> {
        self.held = None;
        self.source.seek(range)
    }

    fn has_top(&self) -> bool {
        self.held.is_some() || self.source.has_top()
    }

    fn top_key(&self) -> Option<&Key> {
        match &self.held {
            Some((k, _)) => Some(k),
            None => self.source.top_key(),
        }
    }

    fn top_value(&self) -> Option<&Value> {
        match &self.held {
            Some((_, v)) => Some(v),
            None => self.source.top_value(),
        }
    }

    fn next(&mut self) -> Result<()> {
        if self.held.take().is_some() {
            // source already sits on the peeked entry
            return Ok(());
        }
        self.source.next()
    }
}
