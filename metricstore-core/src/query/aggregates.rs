//! Aggregate function implementations

use crate::types::Timestamp;
use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Accumulator for computing aggregates incrementally
pub trait Accumulator: Send + Sync {
    /// Add a sample
    fn add(&mut self, timestamp: Timestamp, value: f64);

    /// Get the current result, `None` before any sample
    fn result(&self) -> Option<f64>;

    /// Reset the accumulator
    fn reset(&mut self);
}

/// Aggregation function named in a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Aggregator {
    Avg,
    Sum,
    Min,
    Max,
    Count,
    /// Population standard deviation
    Dev,
    First,
    Last,
    /// Nearest-rank percentile, 1..=99
    Percentile(u8),
}

impl Aggregator {
    /// Parse a name such as `avg`, `dev` or `p95`
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            "avg" | "mean" => Some(Aggregator::Avg),
            "sum" => Some(Aggregator::Sum),
            "min" => Some(Aggregator::Min),
            "max" => Some(Aggregator::Max),
            "count" => Some(Aggregator::Count),
            "dev" | "stddev" => Some(Aggregator::Dev),
            "first" => Some(Aggregator::First),
            "last" => Some(Aggregator::Last),
            "median" => Some(Aggregator::Percentile(50)),
            _ => name
                .strip_prefix('p')
                .and_then(|p| p.parse::<u8>().ok())
                .filter(|p| (1..=99).contains(p))
                .map(Aggregator::Percentile),
        }
    }

    /// Fresh accumulator for this function
    pub fn accumulator(&self) -> Box<dyn Accumulator> {
        match self {
            Aggregator::Avg => Box::<MeanAccumulator>::default(),
            Aggregator::Sum => Box::<SumAccumulator>::default(),
            Aggregator::Min => Box::<MinAccumulator>::default(),
            Aggregator::Max => Box::<MaxAccumulator>::default(),
            Aggregator::Count => Box::<CountAccumulator>::default(),
            Aggregator::Dev => Box::<StddevAccumulator>::default(),
            Aggregator::First => Box::<FirstAccumulator>::default(),
            Aggregator::Last => Box::<LastAccumulator>::default(),
            Aggregator::Percentile(p) => Box::new(PercentileAccumulator::new(*p)),
        }
    }

    /// Aggregate a set of samples in one call
    pub fn aggregate(&self, samples: impl IntoIterator<Item = (Timestamp, f64)>) -> Option<f64> {
        let mut acc = self.accumulator();
        for (ts, v) in samples {
            acc.add(ts, v);
        }
        acc.result()
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::Avg
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregator::Avg => write!(f, "avg"),
            Aggregator::Sum => write!(f, "sum"),
            Aggregator::Min => write!(f, "min"),
            Aggregator::Max => write!(f, "max"),
            Aggregator::Count => write!(f, "count"),
            Aggregator::Dev => write!(f, "dev"),
            Aggregator::First => write!(f, "first"),
            Aggregator::Last => write!(f, "last"),
            Aggregator::Percentile(p) => write!(f, "p{}", p),
        }
    }
}

impl FromStr for Aggregator {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Aggregator::from_name(s).ok_or_else(|| StoreError::Query(format!("unknown aggregator '{}'", s)))
    }
}

impl TryFrom<String> for Aggregator {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Aggregator> for String {
    fn from(agg: Aggregator) -> Self {
        agg.to_string()
    }
}

// ============================================================================
// Accumulators
// ============================================================================

/// Count accumulator
#[derive(Debug, Default)]
pub struct CountAccumulator {
    count: u64,
}

impl Accumulator for CountAccumulator {
    fn add(&mut self, _timestamp: Timestamp, _value: f64) {
        self.count += 1;
    }

    fn result(&self) -> Option<f64> {
        (self.count > 0).then_some(self.count as f64)
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Sum accumulator
#[derive(Debug, Default)]
pub struct SumAccumulator {
    sum: f64,
    count: u64,
}

impl Accumulator for SumAccumulator {
    fn add(&mut self, _timestamp: Timestamp, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn result(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.sum)
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Mean accumulator
#[derive(Debug, Default)]
pub struct MeanAccumulator {
    sum: f64,
    count: u64,
}

impl Accumulator for MeanAccumulator {
    fn add(&mut self, _timestamp: Timestamp, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn result(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.sum / self.count as f64)
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Min accumulator
#[derive(Debug, Default)]
pub struct MinAccumulator {
    min: Option<f64>,
}

impl Accumulator for MinAccumulator {
    fn add(&mut self, _timestamp: Timestamp, value: f64) {
        self.min = Some(match self.min {
            Some(current) => current.min(value),
            None => value,
        });
    }

    fn result(&self) -> Option<f64> {
        self.min
    }

    fn reset(&mut self) {
        self.min = None;
    }
}

/// Max accumulator
#[derive(Debug, Default)]
pub struct MaxAccumulator {
    max: Option<f64>,
}

impl Accumulator for MaxAccumulator {
    fn add(&mut self, _timestamp: Timestamp, value: f64) {
        self.max = Some(match self.max {
            Some(current) => current.max(value),
            None => value,
        });
    }

    fn result(&self) -> Option<f64> {
        self.max
    }

    fn reset(&mut self) {
        self.max = None;
    }
}

/// First value accumulator (keeps earliest value)
#[derive(Debug, Default)]
pub struct FirstAccumulator {
    value: Option<(Timestamp, f64)>,
}

impl Accumulator for FirstAccumulator {
    fn add(&mut self, timestamp: Timestamp, value: f64) {
        match &self.value {
            Some((ts, _)) if *ts <= timestamp => {}
            _ => self.value = Some((timestamp, value)),
        }
    }

    fn result(&self) -> Option<f64> {
        self.value.map(|(_, v)| v)
    }

    fn reset(&mut self) {
        self.value = None;
    }
}

/// Last value accumulator (keeps latest value)
#[derive(Debug, Default)]
pub struct LastAccumulator {
    value: Option<(Timestamp, f64)>,
}

impl Accumulator for LastAccumulator {
    fn add(&mut self, timestamp: Timestamp, value: f64) {
        match &self.value {
            Some((ts, _)) if *ts > timestamp => {}
            _ => self.value = Some((timestamp, value)),
        }
    }

    fn result(&self) -> Option<f64> {
        self.value.map(|(_, v)| v)
    }

    fn reset(&mut self) {
        self.value = None;
    }
}

/// Standard deviation accumulator (Welford's algorithm)
#[derive(Debug, Default)]
pub struct StddevAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Accumulator for StddevAccumulator {
    fn add(&mut self, _timestamp: Timestamp, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    fn result(&self) -> Option<f64> {
        if self.count > 0 {
            Some((self.m2 / self.count as f64).sqrt())
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.count = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
    }
}

/// Nearest-rank percentile; keeps every sample of the window
#[derive(Debug)]
pub struct PercentileAccumulator {
    percentile: u8,
    values: Vec<f64>,
}

impl PercentileAccumulator {
    pub fn new(percentile: u8) -> Self {
        Self {
            percentile: percentile.clamp(1, 99),
            values: Vec::new(),
        }
    }
}

impl Accumulator for PercentileAccumulator {
    fn add(&mut self, _timestamp: Timestamp, value: f64) {
        self.values.push(value);
    }

    fn result(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = (self.percentile as f64 / 100.0 * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.clamp(1, sorted.len()) - 1])
    }

    fn reset(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(agg: Aggregator, values: &[f64]) -> Option<f64> {
        agg.aggregate(values.iter().enumerate().map(|(i, v)| (i as i64, *v)))
    }

    #[test]
    fn test_mean_accumulator() {
        assert_eq!(run(Aggregator::Avg, &[10.0, 20.0, 30.0]), Some(20.0));
        assert_eq!(run(Aggregator::Avg, &[]), None);
    }

    #[test]
    fn test_min_max_accumulator() {
        let values = [5.0, 2.0, 8.0, 1.0, 9.0];
        assert_eq!(run(Aggregator::Min, &values), Some(1.0));
        assert_eq!(run(Aggregator::Max, &values), Some(9.0));
        assert_eq!(run(Aggregator::Count, &values), Some(5.0));
        assert_eq!(run(Aggregator::Sum, &values), Some(25.0));
    }

    #[test]
    fn test_stddev_accumulator() {
        let stddev = run(Aggregator::Dev, &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((stddev - 2.0).abs() < 0.01);
        assert_eq!(run(Aggregator::Dev, &[3.0]), Some(0.0));
    }

    #[test]
    fn test_first_last_use_timestamps() {
        let samples = [(30, 3.0), (10, 1.0), (20, 2.0)];
        assert_eq!(Aggregator::First.aggregate(samples), Some(1.0));
        assert_eq!(Aggregator::Last.aggregate(samples), Some(3.0));
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(run(Aggregator::Percentile(95), &values), Some(95.0));
        assert_eq!(run(Aggregator::Percentile(50), &[3.0, 1.0, 2.0]), Some(2.0));
    }

    #[test]
    fn test_names() {
        assert_eq!(Aggregator::from_name("AVG"), Some(Aggregator::Avg));
        assert_eq!(Aggregator::from_name("p99"), Some(Aggregator::Percentile(99)));
        assert_eq!(Aggregator::from_name("p100"), None);
        assert!("zimsum".parse::<Aggregator>().is_err());
        assert_eq!(Aggregator::Percentile(75).to_string(), "p75");
    }
}
