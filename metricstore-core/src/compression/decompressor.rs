//! Gorilla decompressor for time-series data

use super::bitstream::BitReader;
use super::CompressedBlock;
use crate::types::{Point, Timestamp};
use crate::{Result, StoreError};

fn truncated() -> StoreError {
    StoreError::MalformedBlob("compressed block ends mid-point".into())
}

/// Read-once decoder over a compressed block.
///
/// Owns a reference-counted view of the block's buffer, so it stays valid
/// after the block is dropped or aged off.
#[derive(Debug, Clone)]
pub struct GorillaDecompressor {
    reader: BitReader,
    count: usize,
    decoded: usize,
    failed: bool,

    // Timestamp state
    prev_timestamp: Timestamp,
    prev_timestamp_delta: i64,

    // Value state
    prev_value_bits: u64,
    prev_leading_zeros: u32,
    prev_trailing_zeros: u32,
}

impl GorillaDecompressor {
    /// Decoder over a block
    pub fn new(block: &CompressedBlock) -> Self {
        Self {
            reader: BitReader::new(block.data.clone()),
            count: block.count,
            decoded: 0,
            failed: false,
            prev_timestamp: 0,
            prev_timestamp_delta: 0,
            prev_value_bits: 0,
            prev_leading_zeros: 0,
            prev_trailing_zeros: 0,
        }
    }

    /// Points not yet read
    pub fn remaining(&self) -> usize {
        self.count - self.decoded
    }

    /// Decode every remaining point
    pub fn decode_all(&mut self) -> Result<Vec<Point>> {
        let mut points = Vec::with_capacity(self.remaining());
        while let Some(point) = self.read_pair()? {
            points.push(point);
        }
        Ok(points)
    }

    /// Decode the next point; `None` once the block is exhausted
    pub fn read_pair(&mut self) -> Result<Option<Point>> {
        if self.failed || self.decoded >= self.count {
            return Ok(None);
        }

        let decoded = if self.decoded == 0 {
            self.decode_first()
        } else {
            self.decode_next()
        };

        match decoded {
            Ok(point) => {
                self.decoded += 1;
                Ok(Some(point))
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn decode_first(&mut self) -> Result<Point> {
        let timestamp = self.reader.read_bits(64).ok_or_else(truncated)? as i64;
        let value_bits = self.reader.read_bits(64).ok_or_else(truncated)?;

        self.prev_timestamp = timestamp;
        self.prev_value_bits = value_bits;

        Ok(Point::new(timestamp, f64::from_bits(value_bits)))
    }

    fn decode_next(&mut self) -> Result<Point> {
        let timestamp = self.decode_timestamp()?;
        let value = self.decode_value()?;
        Ok(Point::new(timestamp, value))
    }

    fn read_bit(&mut self) -> Result<bool> {
        self.reader.read_bit().ok_or_else(truncated)
    }

    fn read_bits(&mut self, num_bits: usize) -> Result<u64> {
        self.reader.read_bits(num_bits).ok_or_else(truncated)
    }

    fn decode_timestamp(&mut self) -> Result<Timestamp> {
        let delta_of_delta = if !self.read_bit()? {
            0
        } else if !self.read_bit()? {
            self.read_bits(7)? as i64 - 63
        } else if !self.read_bit()? {
            self.read_bits(9)? as i64 - 255
        } else if !self.read_bit()? {
            self.read_bits(12)? as i64 - 2047
        } else {
            self.read_bits(64)? as i64
        };

        let delta = self.prev_timestamp_delta.wrapping_add(delta_of_delta);
        let timestamp = self.prev_timestamp.wrapping_add(delta);

        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;

        Ok(timestamp)
    }

    fn decode_value(&mut self) -> Result<f64> {
        if !self.read_bit()? {
            return Ok(f64::from_bits(self.prev_value_bits));
        }

        if self.read_bit()? {
            let leading = self.read_bits(5)? as u32;
            let meaningful = self.read_bits(6)? as u32 + 1;
            let trailing = 64u32.checked_sub(leading + meaningful).ok_or_else(|| {
                StoreError::MalformedBlob(format!(
                    "value window of {} leading and {} meaningful bits exceeds 64",
                    leading, meaningful
                ))
            })?;
            self.prev_leading_zeros = leading;
            self.prev_trailing_zeros = trailing;
        }

        let meaningful_bits = 64 - self.prev_leading_zeros - self.prev_trailing_zeros;
        let meaningful_value = self.read_bits(meaningful_bits as usize)?;
        let xor = meaningful_value << self.prev_trailing_zeros;
        self.prev_value_bits ^= xor;

        Ok(f64::from_bits(self.prev_value_bits))
    }
}

impl Iterator for GorillaDecompressor {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_pair().transpose()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::GorillaCompressor;
    use rand::{Rng, SeedableRng};

    fn compress(points: &[Point]) -> CompressedBlock {
        let mut compressor = GorillaCompressor::new();
        for p in points {
            compressor.add_value(p.timestamp, p.value).unwrap();
        }
        compressor.finish()
    }

    #[test]
    fn test_roundtrip_is_bit_exact() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut ts = 1_700_000_000_000i64;
        let mut points = Vec::new();
        for i in 0..2000 {
            ts += rng.gen_range(0..5000);
            let value = match i % 5 {
                0 => rng.gen::<f64>() * 1e6,
                1 => -0.0,
                2 => f64::MIN_POSITIVE,
                3 => (i as f64).sin(),
                _ => f64::from_bits(rng.gen()),
            };
            points.push(Point::new(ts, value));
        }

        let decoded = GorillaDecompressor::new(&compress(&points)).decode_all().unwrap();
        assert_eq!(decoded.len(), points.len());
        for (orig, dec) in points.iter().zip(&decoded) {
            assert_eq!(orig.timestamp, dec.timestamp);
            assert_eq!(orig.value.to_bits(), dec.value.to_bits());
        }
    }

    #[test]
    fn test_extreme_timestamps() {
        let points = [
            Point::new(i64::MIN, 1.0),
            Point::new(-1, 2.0),
            Point::new(0, 3.0),
            Point::new(i64::MAX, 4.0),
        ];
        let decoded: Vec<Point> = GorillaDecompressor::new(&compress(&points))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(decoded, points);
    }

    #[test]
    fn test_truncated_block_is_malformed() {
        let points: Vec<Point> = (0..50).map(|i| Point::new(i * 1000, i as f64 * 1.1)).collect();
        let mut block = compress(&points);
        block.data = block.data.slice(..block.data.len() / 2);

        let mut decompressor = GorillaDecompressor::new(&block);
        let err = decompressor.decode_all().unwrap_err();
        assert!(err.is_corruption());
        assert!(decompressor.read_pair().unwrap().is_none());
    }

    #[test]
    fn test_empty_block() {
        let block = GorillaCompressor::new().finish();
        assert!(GorillaDecompressor::new(&block).read_pair().unwrap().is_none());
    }
}
