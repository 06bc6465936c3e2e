//! Core types for MetricStore

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Tag key reserved for the visibility expression on ingest
pub const VISIBILITY_TAG: &str = "viz";

/// Current wall clock in milliseconds
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// A single time series sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Timestamp in milliseconds
    pub timestamp: Timestamp,
    /// Sample value
    pub value: f64,
}

impl Point {
    /// Create a new point
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

impl From<(Timestamp, f64)> for Point {
    fn from((timestamp, value): (Timestamp, f64)) -> Self {
        Self { timestamp, value }
    }
}

/// Series identity: metric name, canonical tag set and visibility label.
///
/// Tags are kept in a `BTreeMap`, so insertion order never changes equality,
/// hashing or the canonical form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Metric name (e.g., "sys.cpu.user")
    pub metric: String,
    /// Sorted tags
    pub tags: BTreeMap<String, String>,
    /// Visibility expression, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

impl SeriesKey {
    /// Create a new series key
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            tags: BTreeMap::new(),
            visibility: None,
        }
    }

    /// Add a tag to the series key. A `viz` tag becomes the visibility label.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if key == VISIBILITY_TAG {
            self.visibility = Some(value.into());
        } else {
            self.tags.insert(key, value.into());
        }
        self
    }

    /// Set the visibility label
    pub fn with_visibility(mut self, visibility: impl Into<String>) -> Self {
        self.visibility = Some(visibility.into());
        self
    }

    /// Build a key from an arbitrary tag collection
    pub fn from_tags<I, K, V>(metric: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        tags.into_iter()
            .fold(Self::new(metric), |key, (k, v)| key.with_tag(k, v))
    }

    /// Create a canonical string representation
    pub fn canonical(&self) -> String {
        let mut s = self.metric.clone();
        for (k, v) in &self.tags {
            s.push(',');
            s.push_str(k);
            s.push('=');
            s.push_str(v);
        }
        if let Some(viz) = &self.visibility {
            s.push_str(",viz=");
            s.push_str(viz);
        }
        s
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// A complete sample with its series identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Series key (metric + tags + visibility)
    pub key: SeriesKey,
    /// Data point
    pub point: Point,
}

impl Metric {
    /// Create a new metric sample
    pub fn new(key: SeriesKey, timestamp: Timestamp, value: f64) -> Self {
        Self {
            key,
            point: Point::new(timestamp, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_canonical_ignores_insertion_order() {
        let a = SeriesKey::new("sys.cpu.user")
            .with_tag("rack", "r1")
            .with_tag("host", "h1");
        let b = SeriesKey::new("sys.cpu.user")
            .with_tag("host", "h1")
            .with_tag("rack", "r1");

        assert_eq!(a, b);
        assert_eq!(a.canonical(), "sys.cpu.user,host=h1,rack=r1");
    }

    #[test]
    fn test_viz_tag_becomes_visibility() {
        let key = SeriesKey::from_tags("m", [("host", "h1"), ("viz", "A&B")]);
        assert_eq!(key.visibility.as_deref(), Some("A&B"));
        assert!(!key.tags.contains_key("viz"));
        assert_ne!(key, SeriesKey::new("m").with_tag("host", "h1"));
    }
}
