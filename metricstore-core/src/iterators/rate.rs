//! Rate of change between consecutive points of a series

use super::{SortedKeyValueIterator, TimeSeriesGroupingIterator, WarmUp, WindowFunction};
use crate::types::Point;
use serde::{Deserialize, Serialize};

/// Rate options, matching the query API's `rate_options`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateOptions {
    /// Values are monotonic counters that may wrap or reset
    pub counter: bool,
    /// Maximum counter value before wraparound; 0 means unknown
    pub counter_max: f64,
    /// A decrease larger than this is a reset and yields 0; 0 disables
    pub reset_value: f64,
    /// Rate unit in milliseconds; the default 1000 is per second
    pub interval_millis: i64,
}

impl Default for RateOptions {
    fn default() -> Self {
        Self {
            counter: false,
            counter_max: 0.0,
            reset_value: 0.0,
            interval_millis: 1_000,
        }
    }
}

impl RateOptions {
    /// Counter semantics with a known maximum
    pub fn counter(counter_max: f64) -> Self {
        Self {
            counter: true,
            counter_max,
            ..Self::default()
        }
    }
}

/// Rate between two consecutive points of one series
#[derive(Debug, Clone, Copy, Default)]
pub struct RateFunction {
    options: RateOptions,
}

impl RateFunction {
    /// Function with the given options
    pub fn new(options: RateOptions) -> Self {
        Self { options }
    }

    /// Rate from `previous` to `current`.
    ///
    /// Zero elapsed time yields 0. For counters a decrease is first checked
    /// against `reset_value` (reset, yields 0), then treated as wraparound:
    /// `counter_max` is added when known, otherwise the previous value is.
    pub fn rate(&self, previous: Point, current: Point) -> f64 {
        let elapsed = current.timestamp - previous.timestamp;
        if elapsed == 0 {
            return 0.0;
        }

        let mut value = current.value;
        if self.options.counter && current.value < previous.value {
            let decrease = previous.value - current.value;
            if self.options.reset_value > 0.0 && decrease > self.options.reset_value {
                return 0.0;
            }
            value += if self.options.counter_max > 0.0 {
                self.options.counter_max
            } else {
                previous.value
            };
        }

        let interval = self.options.interval_millis.max(1) as f64;
        (value - previous.value) / elapsed as f64 * interval
    }
}

impl WindowFunction for RateFunction {
    fn size(&self) -> usize {
        2
    }

    fn compute(&self, window: &[Point]) -> f64 {
        match window {
            [previous, current] => self.rate(*previous, *current),
            _ => 0.0,
        }
    }
}

/// Grouping iterator emitting one rate per consecutive pair of each series
pub type RateIterator<S> = TimeSeriesGroupingIterator<S, RateFunction>;

impl<S: SortedKeyValueIterator> TimeSeriesGroupingIterator<S, RateFunction> {
    /// Rate over a source; N points of a series yield N-1 outputs
    pub fn rate(source: S, options: RateOptions) -> Self {
        TimeSeriesGroupingIterator::new(source, RateFunction::new(options), WarmUp::Skip)
    }
}
