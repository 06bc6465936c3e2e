//! Binary encoding of row keys, single values and packed point arrays
//!
//! Row key layout:
//!
//! ```text
//! [metric UTF-8 bytes][0x00][timestamp: 8 bytes big-endian, sign bit flipped]
//! ```
//!
//! Flipping the sign bit makes the unsigned byte order of the encoded
//! timestamp match the numeric order of the signed value, so rows of one
//! metric sort by time. Values are either one big-endian `f64` (8 bytes) or
//! a packed run of `(i64 timestamp, f64 value)` pairs (16 bytes each) with
//! strictly increasing timestamps.

use crate::iterators::{Key, Value};
use crate::types::{Metric, Point, SeriesKey, Timestamp};
use crate::{Result, StoreError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Separator between the metric name and the encoded timestamp
pub const ROW_SEPARATOR: u8 = 0x00;

/// Width of the encoded timestamp suffix
pub const TIMESTAMP_BYTES: usize = 8;

/// Bytes for one single-point value
pub const VALUE_BYTES: usize = 8;

/// Bytes for one packed `(timestamp, value)` pair
pub const PACKED_POINT_BYTES: usize = 16;

const SIGN_BIT: u64 = 1 << 63;

// ============================================================================
// Row keys
// ============================================================================

/// Encode a row key; strictly monotonic in `timestamp` for a fixed metric
pub fn encode_row_key(metric: &str, timestamp: Timestamp) -> Bytes {
    let mut buf = BytesMut::with_capacity(metric.len() + 1 + TIMESTAMP_BYTES);
    buf.put_slice(metric.as_bytes());
    buf.put_u8(ROW_SEPARATOR);
    buf.put_u64(encode_timestamp(timestamp));
    buf.freeze()
}

/// Decode a row key into metric name and timestamp
pub fn decode_row_key(row: &[u8]) -> Result<(String, Timestamp)> {
    let metric = metric_from_row(row)?;
    let mut tail = &row[row.len() - TIMESTAMP_BYTES..];
    Ok((metric.to_string(), decode_timestamp(tail.get_u64())))
}

/// Extract the metric name by locating the metric/timestamp boundary
pub fn metric_from_row(row: &[u8]) -> Result<&str> {
    if row.len() < TIMESTAMP_BYTES + 1 {
        return Err(StoreError::MalformedBlob(format!(
            "row key too short: {} bytes",
            row.len()
        )));
    }
    let boundary = row.len() - TIMESTAMP_BYTES - 1;
    if row[boundary] != ROW_SEPARATOR {
        return Err(StoreError::MalformedBlob(
            "row key missing metric separator".into(),
        ));
    }
    std::str::from_utf8(&row[..boundary])
        .map_err(|e| StoreError::MalformedBlob(format!("metric name is not UTF-8: {}", e)))
}

/// Timestamp carried by a row key
pub fn timestamp_from_row(row: &[u8]) -> Result<Timestamp> {
    metric_from_row(row)?;
    let mut tail = &row[row.len() - TIMESTAMP_BYTES..];
    Ok(decode_timestamp(tail.get_u64()))
}

/// First row key of a metric (inclusive lower bound of a metric scan)
pub fn metric_start_row(metric: &str) -> Bytes {
    encode_row_key(metric, Timestamp::MIN)
}

/// Row key sorting after every row of a metric (exclusive upper bound)
pub fn metric_end_row(metric: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(metric.len() + 1);
    buf.put_slice(metric.as_bytes());
    buf.put_u8(ROW_SEPARATOR + 1);
    buf.freeze()
}

#[inline]
fn encode_timestamp(timestamp: Timestamp) -> u64 {
    (timestamp as u64) ^ SIGN_BIT
}

#[inline]
fn decode_timestamp(encoded: u64) -> Timestamp {
    (encoded ^ SIGN_BIT) as i64
}

// ============================================================================
// Values
// ============================================================================

/// Encode a single value as 8 big-endian bytes
pub fn encode_value(value: f64) -> Bytes {
    let mut buf = BytesMut::with_capacity(VALUE_BYTES);
    buf.put_f64(value);
    buf.freeze()
}

/// Decode a single 8-byte value
pub fn decode_value(data: &[u8]) -> Result<f64> {
    if data.len() != VALUE_BYTES {
        return Err(StoreError::MalformedBlob(format!(
            "expected {} value bytes, got {}",
            VALUE_BYTES,
            data.len()
        )));
    }
    let mut data = data;
    Ok(data.get_f64())
}

/// Encode points as a packed `(timestamp, value)` array.
///
/// Callers must pass points in strictly increasing timestamp order; the
/// blob is validated again on decode.
pub fn encode_packed(points: &[Point]) -> Bytes {
    let mut buf = BytesMut::with_capacity(points.len() * PACKED_POINT_BYTES);
    for point in points {
        buf.put_i64(point.timestamp);
        buf.put_f64(point.value);
    }
    buf.freeze()
}

/// Decode a packed array, validating length and timestamp order
pub fn decode_packed(data: &[u8]) -> Result<Vec<Point>> {
    PackedPoints::new(Bytes::copy_from_slice(data))?.collect()
}

/// True when a value holds a packed array rather than one value
pub fn is_packed(data: &[u8]) -> bool {
    data.len() != VALUE_BYTES
}

/// Lazy reader over a packed point blob
#[derive(Debug, Clone)]
pub struct PackedPoints {
    data: Bytes,
    previous: Option<Timestamp>,
    failed: bool,
}

impl PackedPoints {
    /// Wrap a packed blob; fails if the length is not a multiple of 16
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() % PACKED_POINT_BYTES != 0 {
            return Err(StoreError::MalformedBlob(format!(
                "packed length {} is not a multiple of {}",
                data.len(),
                PACKED_POINT_BYTES
            )));
        }
        Ok(Self {
            data,
            previous: None,
            failed: false,
        })
    }

    /// Number of points not yet read
    pub fn remaining(&self) -> usize {
        self.data.len() / PACKED_POINT_BYTES
    }
}

impl Iterator for PackedPoints {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.data.is_empty() {
            return None;
        }
        let timestamp = self.data.get_i64();
        let value = self.data.get_f64();
        if let Some(prev) = self.previous {
            if timestamp <= prev {
                self.failed = true;
                return Some(Err(StoreError::MalformedBlob(format!(
                    "packed timestamps not strictly increasing: {} after {}",
                    timestamp, prev
                ))));
            }
        }
        self.previous = Some(timestamp);
        Some(Ok(Point::new(timestamp, value)))
    }
}

// ============================================================================
// Column encoding
// ============================================================================

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '=' | ',') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Encode one tag as a `key=value` column family
pub fn encode_tag(key: &str, value: &str) -> String {
    format!("{}={}", escape(key), escape(value))
}

/// Join tags into a `k=v,k=v` column qualifier
pub fn join_tags<'a, I>(tags: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    tags.into_iter()
        .map(|(k, v)| encode_tag(k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Split a `k=v,k=v` column into tag pairs, honoring backslash escapes
pub fn split_tags(column: &str) -> Result<Vec<(String, String)>> {
    let mut tags = Vec::new();
    if column.is_empty() {
        return Ok(tags);
    }

    let mut key = String::new();
    let mut current = String::new();
    let mut seen_equals = false;
    let mut chars = column.chars();

    let mut finish = |key: &mut String, current: &mut String, seen_equals: &mut bool| {
        if !*seen_equals || key.is_empty() {
            return Err(StoreError::InvalidFormat(format!("bad tag in column: {}", column)));
        }
        tags.push((std::mem::take(key), std::mem::take(current)));
        *seen_equals = false;
        Ok(())
    };

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => {
                    return Err(StoreError::InvalidFormat(format!(
                        "dangling escape in column: {}",
                        column
                    )))
                }
            },
            '=' if !seen_equals => {
                key = std::mem::take(&mut current);
                seen_equals = true;
            }
            ',' => finish(&mut key, &mut current, &mut seen_equals)?,
            _ => current.push(c),
        }
    }
    finish(&mut key, &mut current, &mut seen_equals)?;
    Ok(tags)
}

// ============================================================================
// Metric <-> entries
// ============================================================================

/// Convert a metric sample into store entries: one entry per tag, with the
/// tag as column family and the remaining tags as column qualifier.
pub fn to_entries(metric: &Metric) -> Vec<(Key, Value)> {
    let row = encode_row_key(&metric.key.metric, metric.point.timestamp);
    let value = encode_value(metric.point.value);
    let visibility = metric.key.visibility.clone().unwrap_or_default();

    if metric.key.tags.is_empty() {
        let key = Key::new(row, "", "", visibility, metric.point.timestamp);
        return vec![(key, value)];
    }

    metric
        .key
        .tags
        .iter()
        .map(|(k, v)| {
            let family = encode_tag(k, v);
            let qualifier = join_tags(metric.key.tags.iter().filter(|(other, _)| *other != k));
            let key = Key::new(
                row.clone(),
                family,
                qualifier,
                visibility.clone(),
                metric.point.timestamp,
            );
            (key, value.clone())
        })
        .collect()
}

/// Series identity encoded in an entry key
pub fn series_of(key: &Key) -> Result<SeriesKey> {
    let metric = metric_from_row(&key.row)?;
    let mut series = SeriesKey::new(metric);
    for (k, v) in split_tags(&key.column_family)?
        .into_iter()
        .chain(split_tags(&key.column_qualifier)?)
    {
        series.tags.insert(k, v);
    }
    if !key.visibility.is_empty() {
        series.visibility = Some(key.visibility.clone());
    }
    Ok(series)
}

/// Rebuild a metric sample from a single-point entry
pub fn parse_entry(key: &Key, value: &[u8]) -> Result<Metric> {
    let series = series_of(key)?;
    let timestamp = timestamp_from_row(&key.row)?;
    Ok(Metric::new(series, timestamp, decode_value(value)?))
}
