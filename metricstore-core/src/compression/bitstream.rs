//! Bit-level I/O for Gorilla compression
//!
//! Bits are packed most significant first. Both sides move whole byte
//! chunks at a time rather than single bits.

use bytes::Bytes;

#[inline]
fn low_mask(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Append-only bit buffer; the last byte may be partially filled
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    /// Create a new BitWriter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with capacity hint in bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            bits: 0,
        }
    }

    /// Write a single bit
    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits(bit as u64, 1);
    }

    /// Write the low `num_bits` bits of `value`, most significant first
    pub fn write_bits(&mut self, value: u64, num_bits: usize) {
        debug_assert!(num_bits <= 64);

        let mut remaining = num_bits;
        while remaining > 0 {
            let used = self.bits % 8;
            if used == 0 {
                self.bytes.push(0);
            }
            let free = 8 - used;
            let take = free.min(remaining);
            let chunk = (value >> (remaining - take)) & low_mask(take);

            if let Some(last) = self.bytes.last_mut() {
                *last |= (chunk as u8) << (free - take);
            }
            self.bits += take;
            remaining -= take;
        }
    }

    /// Copy of the bytes written so far, trailing partial byte included.
    /// The writer stays open.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bytes)
    }

    /// Finish writing and return the buffer
    pub fn finish(self) -> Bytes {
        Bytes::from(self.bytes)
    }

    /// Size in bytes, counting a partial byte
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Number of bits written
    pub fn bit_len(&self) -> usize {
        self.bits
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

/// Bit reader over an owned buffer.
///
/// A read that would run past the buffer returns `None` and consumes
/// nothing.
#[derive(Debug, Clone)]
pub struct BitReader {
    data: Bytes,
    position: usize,
}

impl BitReader {
    /// Create a new BitReader
    pub fn new(data: Bytes) -> Self {
        Self { data, position: 0 }
    }

    /// Read a single bit
    #[inline]
    pub fn read_bit(&mut self) -> Option<bool> {
        self.read_bits(1).map(|b| b == 1)
    }

    /// Read `num_bits` bits as the low bits of a u64
    pub fn read_bits(&mut self, num_bits: usize) -> Option<u64> {
        debug_assert!(num_bits <= 64);
        if num_bits > self.remaining_bits() {
            return None;
        }

        let mut value = 0u64;
        let mut remaining = num_bits;
        while remaining > 0 {
            let byte = self.data[self.position / 8];
            let used = self.position % 8;
            let available = 8 - used;
            let take = available.min(remaining);

            let chunk = (byte >> (available - take)) as u64 & low_mask(take);
            value = (value << take) | chunk;
            self.position += take;
            remaining -= take;
        }
        Some(value)
    }

    /// Bits left in the buffer, padding included
    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.position
    }

    /// Current position in bits
    pub fn position(&self) -> usize {
        self.position
    }
}
