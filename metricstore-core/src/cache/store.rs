//! Compressed point store for one series

use crate::compression::{CompressedBlock, GorillaCompressor, GorillaDecompressor};
use crate::types::Timestamp;
use crate::{Result, StoreError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Open block plus the newest timestamp ever accepted
#[derive(Debug, Default)]
struct Current {
    compressor: Option<GorillaCompressor>,
    newest: Option<Timestamp>,
}

/// One series held as Gorilla blocks: a list of sealed (archived) blocks
/// and at most one open block receiving writes.
///
/// Lock order is always current, then archived. Readers take both briefly
/// to snapshot a consistent set of blocks, then decode without any lock.
#[derive(Debug)]
pub struct GorillaStore {
    current: Mutex<Current>,
    archived: RwLock<Vec<Arc<CompressedBlock>>>,
    max_points_per_block: usize,
}

impl GorillaStore {
    /// Store that archives the open block only when asked
    pub fn new() -> Self {
        Self::with_block_limit(0)
    }

    /// Store that also archives the open block once it holds
    /// `max_points_per_block` points; 0 disables the limit
    pub fn with_block_limit(max_points_per_block: usize) -> Self {
        Self {
            current: Mutex::new(Current::default()),
            archived: RwLock::new(Vec::new()),
            max_points_per_block,
        }
    }

    /// Append a point. Timestamps must not go backwards across the whole
    /// store; equal timestamps are accepted.
    pub fn add_value(&self, timestamp: Timestamp, value: f64) -> Result<()> {
        let mut current = self.current.lock();
        if let Some(newest) = current.newest {
            if timestamp < newest {
                return Err(StoreError::OutOfOrderPoint { timestamp, newest });
            }
        }

        let full = self.max_points_per_block > 0
            && current
                .compressor
                .as_ref()
                .map_or(false, |c| c.count() >= self.max_points_per_block);
        if full {
            self.seal(&mut current);
        }

        current
            .compressor
            .get_or_insert_with(GorillaCompressor::new)
            .add_value(timestamp, value)?;
        current.newest = Some(timestamp);
        Ok(())
    }

    /// Seal the open block and move it to the archive. Returns false when
    /// there was nothing to archive.
    pub fn archive_current(&self) -> bool {
        let mut current = self.current.lock();
        self.seal(&mut current)
    }

    fn seal(&self, current: &mut Current) -> bool {
        match current.compressor.take() {
            Some(mut compressor) if !compressor.is_empty() => {
                compressor.close();
                self.archived.write().push(Arc::new(compressor.finish()));
                true
            }
            _ => false,
        }
    }

    /// Decoders for every block whose span intersects `[start, end]`,
    /// oldest block first. The open block is included as a snapshot.
    pub fn get_decompressors(&self, start: Timestamp, end: Timestamp) -> Vec<GorillaDecompressor> {
        let current = self.current.lock();
        let archived = self.archived.read();

        let mut decompressors: Vec<GorillaDecompressor> = archived
            .iter()
            .filter(|block| block.overlaps(start, end))
            .map(|block| block.decompressor())
            .collect();
        drop(archived);

        if let Some(compressor) = current.compressor.as_ref() {
            let snapshot = compressor.snapshot();
            if snapshot.overlaps(start, end) {
                decompressors.push(GorillaDecompressor::new(&snapshot));
            }
        }
        decompressors
    }

    /// Drop archived blocks whose newest point is older than `now - ttl`.
    /// The open block is never aged off. Returns the number of blocks removed.
    pub fn age_off_archived(&self, now: Timestamp, ttl_millis: i64) -> usize {
        let cutoff = now.saturating_sub(ttl_millis);
        let mut archived = self.archived.write();
        let before = archived.len();
        archived.retain(|block| block.last_timestamp >= cutoff);
        before - archived.len()
    }

    /// Oldest timestamp still held
    pub fn oldest_timestamp(&self) -> Option<Timestamp> {
        let current = self.current.lock();
        let archived = self.archived.read();
        archived
            .iter()
            .filter(|b| !b.is_empty())
            .map(|b| b.first_timestamp)
            .chain(current.compressor.as_ref().and_then(|c| c.first_timestamp()))
            .min()
    }

    /// Newest timestamp ever accepted
    pub fn newest_timestamp(&self) -> Option<Timestamp> {
        self.current.lock().newest
    }

    /// Points held across all blocks
    pub fn num_points(&self) -> usize {
        let current = self.current.lock();
        let archived: usize = self.archived.read().iter().map(|b| b.count).sum();
        archived + current.compressor.as_ref().map_or(0, |c| c.count())
    }

    /// Number of archived blocks
    pub fn archived_blocks(&self) -> usize {
        self.archived.read().len()
    }

    /// Compressed bytes held
    pub fn size_bytes(&self) -> usize {
        let current = self.current.lock();
        let archived: usize = self.archived.read().iter().map(|b| b.data.len()).sum();
        archived + current.compressor.as_ref().map_or(0, |c| c.size_bytes())
    }

    /// True when no point is held
    pub fn is_empty(&self) -> bool {
        self.num_points() == 0
    }
}

impl Default for GorillaStore {
    fn default() -> Self {
        Self::new()
    }
}
