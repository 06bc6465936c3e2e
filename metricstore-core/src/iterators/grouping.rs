//! Window functions over a moving window of points, kept per series
//!
//! The grouping iterator keeps one window per series (metric, columns and
//! visibility), so interleaved series never contaminate each other. Input
//! must be expanded single-value entries and each series must arrive in
//! time order; a series whose timestamps step backwards has its window
//! restarted.

use super::{Key, Range, SortedKeyValueIterator, Value};
use crate::codec;
use crate::types::Point;
use crate::{Result, StoreError};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Computation applied to a full (or warming) window
pub trait WindowFunction: Send {
    /// Number of points in a full window
    fn size(&self) -> usize;

    /// Compute over `window`, oldest first. `window.len()` is `size()`
    /// unless partial windows are enabled.
    fn compute(&self, window: &[Point]) -> f64;
}

/// Output behaviour while a window is still filling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarmUp {
    /// Emit nothing until the window is full
    #[default]
    Skip,
    /// Emit over the points seen so far
    Partial,
}

/// Weighted sum of the window, weights ordered oldest to newest
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedFilter {
    weights: Vec<f64>,
}

impl WeightedFilter {
    /// Filter with explicit weights
    pub fn new(weights: Vec<f64>) -> Result<Self> {
        if weights.is_empty() {
            return Err(StoreError::Configuration("filter needs at least one weight".into()));
        }
        Ok(Self { weights })
    }

    /// Parse a comma-separated weight list, e.g. `"-1,1"` or `"0.25,0.5,0.25"`
    pub fn parse(spec: &str) -> Result<Self> {
        let weights = spec
            .split(',')
            .map(|w| {
                w.trim()
                    .parse::<f64>()
                    .map_err(|_| StoreError::InvalidFormat(format!("bad filter weight '{}' in '{}'", w, spec)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(weights)
    }

    /// Weights, oldest first
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl WindowFunction for WeightedFilter {
    fn size(&self) -> usize {
        self.weights.len()
    }

    fn compute(&self, window: &[Point]) -> f64 {
        // a partial window lines up with the newest weights
        let offset = self.weights.len() - window.len();
        window
            .iter()
            .zip(&self.weights[offset..])
            .map(|(p, w)| p.value * w)
            .sum()
    }
}

/// Moving window of one series
#[derive(Debug, Default)]
pub(crate) struct PointWindow {
    points: VecDeque<Point>,
}

impl PointWindow {
    /// Push a point; returns false when the window had to restart because
    /// the point is older than the newest one held
    pub(crate) fn push(&mut self, point: Point, size: usize) -> bool {
        let in_order = match self.points.back() {
            Some(last) => point.timestamp >= last.timestamp,
            None => true,
        };
        if !in_order {
            self.points.clear();
        }
        self.points.push_back(point);
        while self.points.len() > size {
            self.points.pop_front();
        }
        in_order
    }

    /// Output for the current window, if one is due
    pub(crate) fn evaluate<F: WindowFunction>(&mut self, function: &F, warm_up: WarmUp) -> Option<f64> {
        let full = self.points.len() == function.size();
        if !full && warm_up == WarmUp::Skip {
            return None;
        }
        Some(function.compute(self.points.make_contiguous()))
    }
}

/// Decode the single-point entry under `key`
pub(crate) fn entry_point(key: &Key, value: &Value) -> Result<Point> {
    Ok(Point::new(key.timestamp, codec::decode_value(value)?))
}

type SeriesId = (String, String, String, String);

/// Applies a [`WindowFunction`] to each series independently.
///
/// Each output entry is keyed by the newest input key of its window.
pub struct TimeSeriesGroupingIterator<S, F> {
    source: S,
    function: F,
    warm_up: WarmUp,
    windows: HashMap<SeriesId, PointWindow>,
    top: Option<(Key, Value)>,
}

impl<S: SortedKeyValueIterator, F: WindowFunction> TimeSeriesGroupingIterator<S, F> {
    /// Wrap a source
    pub fn new(source: S, function: F, warm_up: WarmUp) -> Self {
        Self {
            source,
            function,
            warm_up,
            windows: HashMap::new(),
            top: None,
        }
    }

    /// Number of series with window state
    pub fn series_count(&self) -> usize {
        self.windows.len()
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
            let id = match key.metric() {
                Ok(metric) => (
                    metric.to_string(),
                    key.column_family.clone(),
                    key.column_qualifier.clone(),
                    key.visibility.clone(),
                ),
                Err(e) => {
                    failure.get_or_insert(e);
                    continue;
                }
            };

            let window = self.windows.entry(id).or_default();
            if !window.push(point, self.function.size()) {
                debug!("Series at {:?} stepped back in time; window restarted", key);
            }
            if let Some(result) = window.evaluate(&self.function, self.warm_up) {
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

impl<S: SortedKeyValueIterator, F: WindowFunction> SortedKeyValueIterator
    for TimeSeriesGroupingIterator<S, F>
{
    fn seek(&mut self, range: &Range) -> Result<()> {
        self.windows.clear();
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
