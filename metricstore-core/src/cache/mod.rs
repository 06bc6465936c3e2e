//! In-memory series cache backed by Gorilla-compressed blocks
//!
//! The cache keeps recent points for a bounded number of series and answers
//! [`QueryRequest`](crate::query::QueryRequest)s by stacking the scan-time
//! iterators over per-series snapshots.

mod engine;
mod store;

pub use engine::{CacheEngine, CacheStats, CacheStatus, MaintenanceReport};
pub use store::GorillaStore;

use crate::iterators::AgeOffConfig;
use crate::{Result, StoreError};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which series to drop when a new one arrives at the series cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Series admitted first
    #[default]
    Oldest,
    /// Series written or queried least recently
    LeastRecentlyUsed,
}

/// Cache engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of series held; 0 means unbounded
    pub max_series: usize,
    /// Victim selection at the cap
    pub eviction: EvictionPolicy,
    /// Retention per metric
    pub age_off: AgeOffConfig,
    /// Drop whole series whose newest point is older than this (ms)
    pub staleness_millis: Option<i64>,
    /// Seal the open block at this many points; 0 leaves sealing to maintenance
    pub max_points_per_block: usize,
    /// Period of the background maintenance task (ms)
    pub maintenance_interval_millis: u64,
    /// Patterns matched against whole metric names; matching metrics are
    /// never cached
    pub non_cached_metrics: Vec<String>,
    /// Stop caching a metric once it has more tag sets than this; 0 means
    /// unbounded
    pub max_tag_sets_per_metric: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_series: crate::config::MAX_SERIES,
            eviction: EvictionPolicy::default(),
            age_off: AgeOffConfig::new(crate::config::DEFAULT_AGE_OFF_MILLIS),
            staleness_millis: None,
            max_points_per_block: crate::config::MAX_POINTS_PER_BLOCK,
            maintenance_interval_millis: crate::config::MAINTENANCE_INTERVAL_MILLIS,
            non_cached_metrics: Vec::new(),
            max_tag_sets_per_metric: crate::config::MAX_TAG_SETS_PER_METRIC,
        }
    }
}

impl CacheConfig {
    /// Check values that deserialization cannot
    pub fn validate(&self) -> Result<()> {
        self.age_off.validate()?;
        if let Some(staleness) = self.staleness_millis {
            if staleness <= 0 {
                return Err(StoreError::Configuration(format!(
                    "staleness must be positive, got {}",
                    staleness
                )));
            }
        }
        if self.maintenance_interval_millis == 0 {
            return Err(StoreError::Configuration(
                "maintenance interval must be positive".into(),
            ));
        }
        self.non_cached_patterns()?;
        Ok(())
    }

    /// Compile `non_cached_metrics`, anchored to the whole name
    pub fn non_cached_patterns(&self) -> Result<Vec<Regex>> {
        self.non_cached_metrics
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                    StoreError::Configuration(format!("bad non-cached metric pattern '{}': {}", pattern, e))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_partial_json() {
        let config: CacheConfig = serde_json::from_str(
            r#"{
                "max_series": 10,
                "eviction": "least_recently_used",
                "age_off": {"default_ttl_millis": 3600000, "overrides": {"sys.cpu": 60000}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_series, 10);
        assert_eq!(config.eviction, EvictionPolicy::LeastRecentlyUsed);
        assert_eq!(config.age_off.ttl("sys.cpu"), 60_000);
        assert_eq!(
            config.maintenance_interval_millis,
            crate::config::MAINTENANCE_INTERVAL_MILLIS
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_config() {
        let config = CacheConfig {
            staleness_millis: Some(0),
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CacheConfig {
            age_off: AgeOffConfig::new(-1),
            ..CacheConfig::default()
        };
        assert!(matches!(config.validate(), Err(StoreError::Configuration(_))));

        let config = CacheConfig {
            non_cached_metrics: vec!["sys.(cpu".into()],
            ..CacheConfig::default()
        };
        assert!(matches!(config.validate(), Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_non_cached_patterns_match_whole_name() {
        let config = CacheConfig {
            non_cached_metrics: vec!["sys\\.debug\\..*".into()],
            ..CacheConfig::default()
        };
        let patterns = config.non_cached_patterns().unwrap();
        assert!(patterns[0].is_match("sys.debug.trace"));
        assert!(!patterns[0].is_match("app.sys.debug.trace"));
    }
}
