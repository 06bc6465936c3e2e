//! Gorilla compressor for time-series data

use super::bitstream::BitWriter;
use super::CompressedBlock;
use crate::types::Timestamp;
use crate::{Result, StoreError};

/// Largest leading-zero count the 5-bit header field can carry
const MAX_LEADING_ZEROS: u32 = 31;

/// Streaming Gorilla compressor.
///
/// Timestamps are delta-of-delta encoded, values XOR encoded against the
/// previous value. Points must arrive in non-decreasing timestamp order.
/// After [`close`](Self::close) the compressor only serves reads.
#[derive(Debug, Clone)]
pub struct GorillaCompressor {
    writer: BitWriter,
    count: usize,
    closed: bool,

    // Timestamp state
    first_timestamp: Timestamp,
    prev_timestamp: Timestamp,
    prev_timestamp_delta: i64,

    // Value state
    prev_value_bits: u64,
    prev_leading_zeros: u32,
    prev_trailing_zeros: u32,
}

impl GorillaCompressor {
    /// Create a new compressor
    pub fn new() -> Self {
        Self {
            writer: BitWriter::with_capacity(4096),
            count: 0,
            closed: false,
            first_timestamp: 0,
            prev_timestamp: 0,
            prev_timestamp_delta: 0,
            prev_value_bits: 0,
            prev_leading_zeros: 0,
            prev_trailing_zeros: 0,
        }
    }

    /// Append a point
    pub fn add_value(&mut self, timestamp: Timestamp, value: f64) -> Result<()> {
        if self.closed {
            return Err(StoreError::ClosedCompressor);
        }
        if self.count == 0 {
            self.encode_first(timestamp, value);
        } else {
            if timestamp < self.prev_timestamp {
                return Err(StoreError::OutOfOrderPoint {
                    timestamp,
                    newest: self.prev_timestamp,
                });
            }
            self.encode_timestamp(timestamp);
            self.encode_value(value);
        }
        self.count += 1;
        Ok(())
    }

    /// Seal the compressor; later writes fail with `ClosedCompressor`
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// True once sealed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of points written
    pub fn count(&self) -> usize {
        self.count
    }

    /// True before the first point
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// First timestamp, if any
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        (self.count > 0).then_some(self.first_timestamp)
    }

    /// Newest timestamp, if any
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        (self.count > 0).then_some(self.prev_timestamp)
    }

    /// Compressed size so far
    pub fn size_bytes(&self) -> usize {
        self.writer.len()
    }

    /// Readable copy of everything written so far; the compressor stays
    /// usable
    pub fn snapshot(&self) -> CompressedBlock {
        CompressedBlock {
            data: self.writer.snapshot(),
            count: self.count,
            first_timestamp: self.first_timestamp,
            last_timestamp: self.prev_timestamp,
        }
    }

    /// Finish compressing and return the block
    pub fn finish(self) -> CompressedBlock {
        CompressedBlock {
            count: self.count,
            first_timestamp: self.first_timestamp,
            last_timestamp: self.prev_timestamp,
            data: self.writer.finish(),
        }
    }

    fn encode_first(&mut self, timestamp: Timestamp, value: f64) {
        self.first_timestamp = timestamp;
        self.prev_timestamp = timestamp;

        self.writer.write_bits(timestamp as u64, 64);

        let value_bits = value.to_bits();
        self.writer.write_bits(value_bits, 64);
        self.prev_value_bits = value_bits;
    }

    fn encode_timestamp(&mut self, timestamp: Timestamp) {
        let delta = timestamp.wrapping_sub(self.prev_timestamp);
        let delta_of_delta = delta.wrapping_sub(self.prev_timestamp_delta);

        if delta_of_delta == 0 {
            // '0': same delta as before
            self.writer.write_bit(false);
        } else if (-63..=64).contains(&delta_of_delta) {
            // '10' + 7 bits
            self.writer.write_bits(0b10, 2);
            self.writer.write_bits((delta_of_delta + 63) as u64, 7);
        } else if (-255..=256).contains(&delta_of_delta) {
            // '110' + 9 bits
            self.writer.write_bits(0b110, 3);
            self.writer.write_bits((delta_of_delta + 255) as u64, 9);
        } else if (-2047..=2048).contains(&delta_of_delta) {
            // '1110' + 12 bits
            self.writer.write_bits(0b1110, 4);
            self.writer.write_bits((delta_of_delta + 2047) as u64, 12);
        } else {
            // '1111' + 64 bits
            self.writer.write_bits(0b1111, 4);
            self.writer.write_bits(delta_of_delta as u64, 64);
        }

        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;
    }

    fn encode_value(&mut self, value: f64) {
        let value_bits = value.to_bits();
        let xor = value_bits ^ self.prev_value_bits;

        if xor == 0 {
            // '0': identical value
            self.writer.write_bit(false);
        } else {
            self.writer.write_bit(true);

            let leading_zeros = xor.leading_zeros().min(MAX_LEADING_ZEROS);
            let trailing_zeros = xor.trailing_zeros();

            let fits_previous = self.prev_leading_zeros + self.prev_trailing_zeros > 0
                && leading_zeros >= self.prev_leading_zeros
                && trailing_zeros >= self.prev_trailing_zeros;

            if fits_previous {
                // '10': reuse the previous window
                self.writer.write_bit(false);
                let meaningful_bits = 64 - self.prev_leading_zeros - self.prev_trailing_zeros;
                self.writer
                    .write_bits(xor >> self.prev_trailing_zeros, meaningful_bits as usize);
            } else {
                // '11': new window, 5 bits leading zeros, 6 bits (length - 1)
                self.writer.write_bit(true);
                let meaningful_bits = 64 - leading_zeros - trailing_zeros;
                self.writer.write_bits(leading_zeros as u64, 5);
                self.writer.write_bits((meaningful_bits - 1) as u64, 6);
                self.writer
                    .write_bits(xor >> trailing_zeros, meaningful_bits as usize);

                self.prev_leading_zeros = leading_zeros;
                self.prev_trailing_zeros = trailing_zeros;
            }
        }

        self.prev_value_bits = value_bits;
    }
}

impl Default for GorillaCompressor {
    fn default() -> Self {
        Self::new()
    }
}
