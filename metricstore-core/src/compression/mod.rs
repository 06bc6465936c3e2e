//! Gorilla compression for time-series data
//!
//! Implements the compression scheme from Facebook's paper:
//! "Gorilla: A Fast, Scalable, In-Memory Time Series Database"
//!
//! Regular series compress to a couple of bits per point (vs 16 bytes raw).

mod bitstream;
mod compressor;
mod decompressor;

pub use bitstream::{BitReader, BitWriter};
pub use compressor::GorillaCompressor;
pub use decompressor::GorillaDecompressor;

use crate::types::Timestamp;
use crate::{Result, StoreError};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Compressed block of time-series data
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedBlock {
    /// Compressed data
    pub data: Bytes,
    /// Number of data points
    pub count: usize,
    /// First timestamp in block
    pub first_timestamp: Timestamp,
    /// Last timestamp in block
    pub last_timestamp: Timestamp,
}

/// On-disk image of a block, framed by a CRC32 trailer
#[derive(Serialize, Deserialize)]
struct BlockImage {
    count: u64,
    first_timestamp: i64,
    last_timestamp: i64,
    data: Vec<u8>,
}

impl CompressedBlock {
    /// Get bytes per point
    pub fn bytes_per_point(&self) -> f64 {
        self.data.len() as f64 / self.count as f64
    }

    /// True when the block holds no points
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True when the block's time span intersects `[start, end]`
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        self.count > 0 && self.first_timestamp <= end && self.last_timestamp >= start
    }

    /// Decoder over this block
    pub fn decompressor(&self) -> GorillaDecompressor {
        GorillaDecompressor::new(self)
    }

    /// Serialize as bincode followed by a little-endian CRC32 of it
    pub fn to_bytes(&self) -> Result<Bytes> {
        let image = BlockImage {
            count: self.count as u64,
            first_timestamp: self.first_timestamp,
            last_timestamp: self.last_timestamp,
            data: self.data.to_vec(),
        };
        let encoded = bincode::serialize(&image)
            .map_err(|e| StoreError::InvalidFormat(format!("block serialization failed: {}", e)))?;

        let mut buf = BytesMut::with_capacity(encoded.len() + 4);
        buf.put_slice(&encoded);
        buf.put_u32_le(crc32fast::hash(&encoded));
        Ok(buf.freeze())
    }

    /// Parse bytes produced by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(StoreError::MalformedBlob("serialized block too short".into()));
        }
        let (encoded, trailer) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = crc32fast::hash(encoded);
        if stored != computed {
            return Err(StoreError::MalformedBlob(format!(
                "block checksum mismatch: stored {:08x}, computed {:08x}",
                stored, computed
            )));
        }

        let image: BlockImage = bincode::deserialize(encoded)
            .map_err(|e| StoreError::MalformedBlob(format!("block image: {}", e)))?;
        Ok(Self {
            data: Bytes::from(image.data),
            count: image.count as usize,
            first_timestamp: image.first_timestamp,
            last_timestamp: image.last_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompressedBlock {
        let mut compressor = GorillaCompressor::new();
        for i in 0..100 {
            compressor.add_value(1_000 + i * 1_000, (i % 7) as f64).unwrap();
        }
        compressor.finish()
    }

    #[test]
    fn test_block_bytes_roundtrip() {
        let block = sample();
        let restored = CompressedBlock::from_bytes(&block.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, block);
        assert_eq!(restored.decompressor().decode_all().unwrap().len(), 100);
    }

    #[test]
    fn test_block_bytes_detects_corruption() {
        let mut bytes = sample().to_bytes().unwrap().to_vec();
        bytes[10] ^= 0x40;
        assert!(CompressedBlock::from_bytes(&bytes).unwrap_err().is_corruption());
        assert!(CompressedBlock::from_bytes(&[1, 2]).is_err());
    }

    #[test]
    fn test_overlaps() {
        let block = sample();
        assert!(block.overlaps(0, 1_000));
        assert!(block.overlaps(100_000, 200_000));
        assert!(!block.overlaps(100_001, 200_000));
        assert!(!GorillaCompressor::new().finish().overlaps(i64::MIN, i64::MAX));
    }
}
