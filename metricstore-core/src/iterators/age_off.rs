//! Per-metric retention
//!
//! An entry is retained iff `now - timestamp <= ttl(metric)`. The same
//! filter backs scan-time filtering, table compaction and the cache's query
//! clamp, so every path agrees on the boundary.

use super::{Key, Range, SortedKeyValueIterator, Value};
use crate::types::Timestamp;
use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Retention settings: a mandatory default plus per-metric overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeOffConfig {
    /// Retention for metrics without an override (ms)
    pub default_ttl_millis: i64,
    /// Per-metric retention (ms)
    #[serde(default)]
    pub overrides: HashMap<String, i64>,
}

impl AgeOffConfig {
    /// Conventional option prefix
    pub const DEFAULT_PREFIX: &'static str = "ageoff.";

    /// Key suffix of the mandatory default retention
    pub const DEFAULT_KEY: &'static str = "default";

    /// Config with only a default retention
    pub fn new(default_ttl_millis: i64) -> Self {
        Self {
            default_ttl_millis,
            overrides: HashMap::new(),
        }
    }

    /// Add a per-metric override
    pub fn with_override(mut self, metric: impl Into<String>, ttl_millis: i64) -> Self {
        self.overrides.insert(metric.into(), ttl_millis);
        self
    }

    /// Parse iterator options: `<prefix>default` is mandatory, every other
    /// `<prefix><metric>` key overrides one metric. Keys without the prefix
    /// are ignored.
    pub fn from_options(options: &HashMap<String, String>, prefix: &str) -> Result<Self> {
        let mut default = None;
        let mut overrides = HashMap::new();

        for (key, value) in options {
            let Some(name) = key.strip_prefix(prefix) else {
                continue;
            };
            let ttl: i64 = value.trim().parse().map_err(|_| {
                StoreError::Configuration(format!("age-off for '{}' is not a number: {}", key, value))
            })?;
            if ttl < 0 {
                return Err(StoreError::Configuration(format!(
                    "age-off for '{}' is negative: {}",
                    key, ttl
                )));
            }
            if name == Self::DEFAULT_KEY {
                default = Some(ttl);
            } else {
                overrides.insert(name.to_string(), ttl);
            }
        }

        let default_ttl_millis = default.ok_or_else(|| {
            StoreError::Configuration(format!(
                "missing mandatory '{}{}' age-off",
                prefix,
                Self::DEFAULT_KEY
            ))
        })?;
        Ok(Self {
            default_ttl_millis,
            overrides,
        })
    }

    /// Validate values set directly or deserialized
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_millis < 0 {
            return Err(StoreError::Configuration("default age-off is negative".into()));
        }
        if let Some((metric, _)) = self.overrides.iter().find(|(_, ttl)| **ttl < 0) {
            return Err(StoreError::Configuration(format!(
                "age-off for '{}' is negative",
                metric
            )));
        }
        Ok(())
    }

    /// Retention for a metric
    pub fn ttl(&self, metric: &str) -> i64 {
        self.overrides
            .get(metric)
            .copied()
            .unwrap_or(self.default_ttl_millis)
    }

    /// Oldest timestamp of `metric` still retained at `now`
    pub fn oldest_retained(&self, metric: &str, now: Timestamp) -> Timestamp {
        now.saturating_sub(self.ttl(metric))
    }

    /// Retention predicate
    pub fn retains(&self, metric: &str, timestamp: Timestamp, now: Timestamp) -> bool {
        now.saturating_sub(timestamp) <= self.ttl(metric)
    }
}

/// Age-off evaluated against a fixed clock
#[derive(Debug, Clone)]
pub struct AgeOffFilter {
    config: Arc<AgeOffConfig>,
    now: Timestamp,
}

impl AgeOffFilter {
    /// Filter at `now`
    pub fn new(config: Arc<AgeOffConfig>, now: Timestamp) -> Self {
        Self { config, now }
    }

    /// True when the entry is still within its metric's retention.
    ///
    /// A key whose row cannot be decoded is kept; dropping data on a parse
    /// failure would be silent loss.
    pub fn accept(&self, key: &Key) -> bool {
        match key.metric() {
            Ok(metric) => self.config.retains(metric, key.timestamp, self.now),
            Err(e) => {
                debug!("Keeping entry with undecodable row: {}", e);
                true
            }
        }
    }

    /// Clock the filter evaluates against
    pub fn now(&self) -> Timestamp {
        self.now
    }
}

/// Iterator that drops entries past retention
pub struct AgeOffIterator<S> {
    source: S,
    filter: AgeOffFilter,
}

impl<S: SortedKeyValueIterator> AgeOffIterator<S> {
    /// Wrap a source
    pub fn new(source: S, filter: AgeOffFilter) -> Self {
        Self { source, filter }
    }

    fn skip_expired(&mut self) -> Result<()> {
        while let Some(key) = self.source.top_key() {
            if self.filter.accept(key) {
                break;
            }
            self.source.next()?;
        }
        Ok(())
    }
}

impl<S: SortedKeyValueIterator> SortedKeyValueIterator for AgeOffIterator<S> {
    fn seek(&mut self, range: &Range) -> Result<()> {
        // a source error still leaves it positioned; skip past expired
        // entries before reporting it
        let positioned = self.source.seek(range);
        self.skip_expired()?;
        positioned
    }

    fn has_top(&self) -> bool {
        self.source.has_top()
    }

    fn top_key(&self) -> Option<&Key> {
        self.source.top_key()
    }

    fn top_value(&self) -> Option<&Value> {
        self.source.top_value()
    }

    fn next(&mut self) -> Result<()> {
        let positioned = self.source.next();
        self.skip_expired()?;
        positioned
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::drain;
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_missing_default_is_configuration_error() {
        let err = AgeOffConfig::from_options(&options(&[("ageoff.sys.cpu", "10")]), "ageoff.")
            .unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[test]
    fn test_parse_overrides() {
        let config = AgeOffConfig::from_options(
            &options(&[
                ("ageoff.default", "1000"),
                ("ageoff.sys.cpu", "50"),
                ("other", "x"),
            ]),
            AgeOffConfig::DEFAULT_PREFIX,
        )
        .unwrap();
        assert_eq!(config.ttl("sys.cpu"), 50);
        assert_eq!(config.ttl("sys.mem"), 1000);
        assert!(AgeOffConfig::from_options(&options(&[("ageoff.default", "soon")]), "ageoff.").is_err());
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let config = AgeOffConfig::new(100);
        assert!(config.retains("m", 900, 1000));
        assert!(!config.retains("m", 899, 1000));
    }

    #[test]
    fn test_iterator_drops_expired_per_metric() {
        let config = Arc::new(AgeOffConfig::new(1000).with_override("short", 10));
        let mut iter = AgeOffIterator::new(
            source(vec![
                single("long", "t=1", 0, 1.0),
                single("long", "t=1", 995, 2.0),
                single("short", "t=1", 980, 3.0),
                single("short", "t=1", 995, 4.0),
            ]),
            AgeOffFilter::new(config, 1000),
        );
        iter.seek(&Range::all()).unwrap();
        assert_eq!(
            values(&drain(&mut iter).unwrap()),
            vec![(0, 1.0), (995, 2.0), (995, 4.0)]
        );
    }
}
