//! Query model for the cache engine
//!
//! A [`QueryRequest`] names a time range and one or more [`SubQuery`]s.
//! Each subquery selects one metric, filters series by tag regex, and may
//! apply a rate and a downsample. Results come back grouped by the tag keys
//! the subquery filtered on.

mod aggregates;
mod downsample;

pub use aggregates::*;
pub use downsample::Downsample;

use crate::iterators::RateOptions;
use crate::types::Timestamp;
use crate::{Result, StoreError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Request
// ============================================================================

/// A query over a time range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Start of the range (ms, inclusive)
    pub start: Timestamp,
    /// End of the range (ms, inclusive)
    pub end: Timestamp,
    /// Report timestamps in milliseconds rather than seconds
    #[serde(default)]
    pub ms_resolution: bool,
    /// Subqueries, answered independently
    #[serde(alias = "queries")]
    pub subqueries: Vec<SubQuery>,
}

impl QueryRequest {
    /// Request over `[start, end]`
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end,
            ms_resolution: false,
            subqueries: Vec::new(),
        }
    }

    /// Add a subquery
    pub fn with_subquery(mut self, subquery: SubQuery) -> Self {
        self.subqueries.push(subquery);
        self
    }

    /// Keep millisecond timestamps in the response
    pub fn with_ms_resolution(mut self) -> Self {
        self.ms_resolution = true;
        self
    }

    /// Divisor applied to response timestamps
    pub fn timestamp_divisor(&self) -> i64 {
        if self.ms_resolution {
            1
        } else {
            1000
        }
    }

    /// Check the range itself
    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(StoreError::Query(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// One metric selection within a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    /// Metric name, matched exactly
    pub metric: String,
    /// Tag key to regex; a series must carry every key with a matching value
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Downsample spec such as `1m-avg`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downsample: Option<String>,
    /// Apply a rate before downsampling
    #[serde(default)]
    pub rate: bool,
    /// Rate options when `rate` is set
    #[serde(default)]
    pub rate_options: RateOptions,
    /// Function combining series that fall into the same group
    #[serde(default)]
    pub aggregator: Aggregator,
}

impl SubQuery {
    /// Select every series of a metric
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            tags: BTreeMap::new(),
            downsample: None,
            rate: false,
            rate_options: RateOptions::default(),
            aggregator: Aggregator::default(),
        }
    }

    /// Require a tag whose value matches `pattern`
    pub fn with_tag(mut self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.tags.insert(key.into(), pattern.into());
        self
    }

    /// Downsample with a spec such as `1m-avg`
    pub fn with_downsample(mut self, spec: impl Into<String>) -> Self {
        self.downsample = Some(spec.into());
        self
    }

    /// Apply a rate
    pub fn with_rate(mut self, options: RateOptions) -> Self {
        self.rate = true;
        self.rate_options = options;
        self
    }

    /// Combine grouped series with `aggregator`
    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Parsed downsample, if any
    pub fn parsed_downsample(&self) -> Result<Option<Downsample>> {
        self.downsample.as_deref().map(Downsample::parse).transpose()
    }

    /// Compile the tag filter
    pub fn tag_filter(&self) -> Result<TagFilter> {
        TagFilter::compile(&self.tags)
    }
}

// ============================================================================
// Tag matching
// ============================================================================

/// Compiled tag filter: every key must be present and its value must match
/// the anchored pattern
#[derive(Debug, Clone)]
pub struct TagFilter {
    patterns: Vec<(String, Regex)>,
}

impl TagFilter {
    /// Compile `key -> pattern` pairs; patterns match whole values
    pub fn compile(tags: &BTreeMap<String, String>) -> Result<Self> {
        let patterns = tags
            .iter()
            .map(|(key, pattern)| {
                Regex::new(&format!("^(?:{})$", pattern))
                    .map(|re| (key.clone(), re))
                    .map_err(|e| StoreError::Query(format!("bad pattern for tag '{}': {}", key, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// True when the series tags satisfy every pattern
    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        self.patterns.iter().all(|(key, re)| match tags.get(key) {
            Some(value) => re.is_match(value),
            None => false,
        })
    }

    /// Series tags restricted to the filtered keys; the grouping key
    pub fn group_key(&self, tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        self.patterns
            .iter()
            .filter_map(|(key, _)| tags.get(key).map(|v| (key.clone(), v.clone())))
            .collect()
    }
}

// ============================================================================
// Response
// ============================================================================

/// Points of one result group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesResult {
    /// Metric name
    pub metric: String,
    /// Group tags (series tags restricted to the filtered keys)
    pub tags: BTreeMap<String, String>,
    /// Timestamp (seconds, or ms with `ms_resolution`) to value
    pub dps: BTreeMap<Timestamp, f64>,
}

/// Query result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// One entry per group, per subquery
    pub series: Vec<SeriesResult>,
    /// Series or subqueries that failed and were left out
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl QueryResponse {
    /// Total number of points across all groups
    pub fn point_count(&self) -> usize {
        self.series.iter().map(|s| s.dps.len()).sum()
    }

    /// Results for one group, matched on exact group tags
    pub fn find(&self, metric: &str, tags: &HashMap<&str, &str>) -> Option<&SeriesResult> {
        self.series.iter().find(|s| {
            s.metric == metric
                && s.tags.len() == tags.len()
                && tags.iter().all(|(k, v)| s.tags.get(*k).map(String::as_str) == Some(*v))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_tag_filter_is_anchored() {
        let filter = TagFilter::compile(&tags(&[("host", "r01n0.*")])).unwrap();
        assert!(filter.matches(&tags(&[("host", "r01n01"), ("rack", "r1")])));
        assert!(!filter.matches(&tags(&[("host", "xr01n01")])));
        assert!(!filter.matches(&tags(&[("rack", "r1")])));
    }

    #[test]
    fn test_group_key_restricts_tags() {
        let filter = TagFilter::compile(&tags(&[("rack", ".*")])).unwrap();
        assert_eq!(
            filter.group_key(&tags(&[("host", "h1"), ("rack", "r1")])),
            tags(&[("rack", "r1")])
        );
    }

    #[test]
    fn test_bad_pattern() {
        assert!(SubQuery::new("m").with_tag("host", "(").tag_filter().is_err());
    }

    #[test]
    fn test_request_json() {
        let json = r#"{
            "start": 1000,
            "end": 2000,
            "queries": [{
                "metric": "sys.cpu.user",
                "tags": {"host": ".*"},
                "downsample": "1m-max",
                "rate": true,
                "rate_options": {"counter": true, "counter_max": 255}
            }]
        }"#;
        let request: QueryRequest = serde_json::from_str(json).unwrap();
        assert!(!request.ms_resolution);
        assert_eq!(request.timestamp_divisor(), 1000);

        let sub = &request.subqueries[0];
        assert!(sub.rate_options.counter);
        assert_eq!(sub.rate_options.interval_millis, 1_000);
        assert_eq!(sub.aggregator, Aggregator::Avg);
        assert_eq!(sub.parsed_downsample().unwrap().unwrap().aggregator, Aggregator::Max);
    }

    #[test]
    fn test_validate_range() {
        assert!(QueryRequest::new(5, 1).validate().is_err());
        assert!(QueryRequest::new(1, 1).validate().is_ok());
    }
}
