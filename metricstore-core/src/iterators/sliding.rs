//! Sliding-window filter over a single series

use super::grouping::{entry_point, PointWindow};
use super::{Key, Range, SortedKeyValueIterator, Value, WarmUp, WindowFunction};
use crate::codec;
use crate::{Result, StoreError};
use tracing::debug;

/// Applies a [`WindowFunction`] over one window shared by the whole stream.
///
/// Use it when the source holds a single series; for mixed sources use
/// [`super::TimeSeriesGroupingIterator`], which keeps a window per series.
pub struct SlidingWindowIterator<S, F> {
    source: S,
    function: F,
    warm_up: WarmUp,
    window: PointWindow,
    top: Option<(Key, Value)>,
}

impl<S: SortedKeyValueIterator, F: WindowFunction> SlidingWindowIterator<S, F> {
    /// Wrap a source
    pub fn new(source: S, function: F, warm_up: WarmUp) -> Self {
        Self {
            source,
            function,
            warm_up,
            window: PointWindow::default(),
            top: None,
        }
    }

    fn fill(&mut self) -> Result<()> {
        self.top = None;
        let mut failure: Option<StoreError> = None;

        while let Some((key, value)) = self.source.top().map(|(k, v)| (k.clone(), v.clone())) {
            self.source.next()?;
            let point = match entry_point(&key, &value) {
                Ok(point) => point,
                Err(e) => {
                    failure.get_or_insert(e);
                    continue;
                }
            };
            if !self.window.push(point, self.function.size()) {
                debug!("Stepped back in time at {:?}; window restarted", key);
            }
            if let Some(result) = self.window.evaluate(&self.function, self.warm_up) {
                self.top = Some((key, codec::encode_value(result)));
                break;
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: SortedKeyValueIterator, F: WindowFunction> SortedKeyValueIterator for SlidingWindowIterator<S, F> {
    fn seek(&mut self, range: &Range) -> Result<()> {
        self.window = PointWindow::default();
        self.source.seek(range)?;
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
    use super::super::{drain, WeightedFilter};
    use super::*;

    fn run(values_in: &[f64], filter: &str, warm_up: WarmUp) -> Vec<(i64, f64)> {
        let entries = values_in
            .iter()
            .enumerate()
            .map(|(i, v)| single("m", "host=a", i as i64 * 1000, *v))
            .collect();
        let filter = WeightedFilter::parse(filter).unwrap();
        let mut iter = SlidingWindowIterator::new(source(entries), filter, warm_up);
        iter.seek(&Range::all()).unwrap();
        values(&drain(&mut iter).unwrap())
    }

    #[test]
    fn test_difference_filter() {
        assert_eq!(
            run(&[1.0, 3.0, 6.0, 10.0], "-1,1", WarmUp::Skip),
            vec![(1000, 2.0), (2000, 3.0), (3000, 4.0)]
        );
    }

    #[test]
    fn test_moving_average() {
        let third = (1.0f64 / 3.0).to_string();
        let filter = [third.as_str(); 3].join(",");
        let out = run(&[3.0, 6.0, 9.0, 12.0], &filter, WarmUp::Skip);
        assert_eq!(out.len(), 2);
        assert!((out[0].1 - 6.0).abs() < 1e-9);
        assert!((out[1].1 - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_emits_from_first_point() {
        let out = run(&[5.0, 7.0], "-1,1", WarmUp::Partial);
        assert_eq!(out, vec![(0, 5.0), (1000, 2.0)]);
    }

    #[test]
    fn test_short_input_skip() {
        assert!(run(&[5.0], "-1,1", WarmUp::Skip).is_empty());
    }
}
