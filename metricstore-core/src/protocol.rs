//! Ingestion line protocol
//!
//! `put <metric> <timestamp> <value> <tag>=<value> [...] [viz=<expr>]`
//!
//! The `put` keyword is optional. A `viz` tag becomes the point's visibility
//! label instead of a tag.

use crate::types::{Metric, SeriesKey, Timestamp};
use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Unit of the timestamp field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePrecision {
    /// Epoch seconds
    Seconds,
    /// Epoch milliseconds
    #[default]
    Milliseconds,
}

impl TimePrecision {
    /// Parse `s` / `ms`
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "s" | "sec" | "seconds" => Some(Self::Seconds),
            "ms" | "millis" | "milliseconds" => Some(Self::Milliseconds),
            _ => None,
        }
    }

    fn to_millis(self, timestamp: i64) -> Option<Timestamp> {
        match self {
            Self::Seconds => timestamp.checked_mul(1000),
            Self::Milliseconds => Some(timestamp),
        }
    }
}

/// A line that failed to parse
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineError {
    /// 1-based line number
    pub line: usize,
    pub error: String,
}

/// Parse every non-empty, non-comment line, yielding each result with its
/// 1-based line number
pub fn parse_numbered(
    data: &str,
    precision: TimePrecision,
) -> impl Iterator<Item = (usize, Result<Metric>)> + '_ {
    data.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(move |(number, line)| (number, parse_put(line, precision)))
}

/// Parse every line. Good lines are returned even when others fail.
pub fn parse_lines(data: &str, precision: TimePrecision) -> (Vec<Metric>, Vec<LineError>) {
    let mut metrics = Vec::new();
    let mut errors = Vec::new();

    for (line, parsed) in parse_numbered(data, precision) {
        match parsed {
            Ok(metric) => metrics.push(metric),
            Err(e) => errors.push(LineError {
                line,
                error: e.to_string(),
            }),
        }
    }

    (metrics, errors)
}

/// Parse one `put` line
pub fn parse_put(line: &str, precision: TimePrecision) -> Result<Metric> {
    let mut fields = line.split_whitespace().peekable();
    if fields.peek() == Some(&"put") {
        fields.next();
    }

    let metric = fields
        .next()
        .ok_or_else(|| invalid(line, "missing metric"))?;
    if metric.contains('\0') {
        return Err(invalid(line, "metric name contains NUL"));
    }

    let timestamp = fields
        .next()
        .ok_or_else(|| invalid(line, "missing timestamp"))?
        .parse::<i64>()
        .map_err(|_| invalid(line, "invalid timestamp"))?;
    let timestamp = precision
        .to_millis(timestamp)
        .ok_or_else(|| invalid(line, "timestamp out of range"))?;

    let value = fields
        .next()
        .ok_or_else(|| invalid(line, "missing value"))?
        .parse::<f64>()
        .map_err(|_| invalid(line, "invalid value"))?;

    let mut key = SeriesKey::new(metric);
    for tag in fields {
        match tag.split_once('=') {
            Some((k, v)) if !k.is_empty() && !v.is_empty() => key = key.with_tag(k, v),
            _ => return Err(invalid(line, &format!("invalid tag '{}'", tag))),
        }
    }
    if key.tags.is_empty() {
        return Err(invalid(line, "at least one tag is required"));
    }

    Ok(Metric::new(key, timestamp, value))
}

fn invalid(line: &str, reason: &str) -> StoreError {
    StoreError::InvalidFormat(format!("{}: {}", reason, line))
}
