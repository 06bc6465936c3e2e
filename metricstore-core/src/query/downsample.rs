//! Downsample specs (`<amount><unit>-<aggregator>`)

use super::Aggregator;
use crate::types::Timestamp;
use crate::{Result, StoreError};

/// Parsed downsample: bucket width and the function applied per bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downsample {
    /// Bucket width in milliseconds
    pub period_millis: i64,
    /// Function applied to each bucket
    pub aggregator: Aggregator,
}

impl Downsample {
    /// Parse e.g. `1m-avg`, `30s-max`, `500ms-p95`
    pub fn parse(spec: &str) -> Result<Self> {
        let bad = || StoreError::Query(format!("invalid downsample '{}'", spec));

        let (interval, function) = spec.trim().split_once('-').ok_or_else(bad)?;
        let digits = interval.find(|c: char| !c.is_ascii_digit()).ok_or_else(bad)?;
        let (amount, unit) = interval.split_at(digits);
        let amount: i64 = amount.parse().map_err(|_| bad())?;

        let unit_millis = match unit {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            _ => return Err(bad()),
        };
        let period_millis = amount.checked_mul(unit_millis).filter(|p| *p > 0).ok_or_else(bad)?;

        Ok(Self {
            period_millis,
            aggregator: function.parse()?,
        })
    }

    /// Start of the bucket holding `timestamp`
    pub fn bucket_start(&self, timestamp: Timestamp) -> Timestamp {
        timestamp - timestamp.rem_euclid(self.period_millis)
    }

    /// End of the bucket holding `timestamp`; a timestamp already on a
    /// boundary is its own end
    pub fn bucket_end(&self, timestamp: Timestamp) -> Timestamp {
        match timestamp.rem_euclid(self.period_millis) {
            0 => timestamp,
            rem => timestamp.saturating_add(self.period_millis - rem),
        }
    }
}
