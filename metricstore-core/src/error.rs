//! Error types for MetricStore

use crate::Timestamp;
use thiserror::Error;

/// Result type alias for MetricStore operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// MetricStore error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupt packed-point blob or compressed buffer
    #[error("Malformed blob: {0}")]
    MalformedBlob(String),

    /// Write older than the newest point already held for the series
    #[error("Out of order point: timestamp {timestamp} is older than newest {newest}")]
    OutOfOrderPoint { timestamp: Timestamp, newest: Timestamp },

    /// Missing or invalid mandatory configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Compaction attempted across entries that cannot share one value
    #[error("Incompatible merge: {0}")]
    IncompatibleMerge(String),

    /// Write attempted after the compressor was sealed
    #[error("Compressor is closed")]
    ClosedCompressor,

    /// Invalid input format (line protocol, iterator options)
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),
}

impl StoreError {
    /// Check if error is retryable. The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::MalformedBlob(_))
    }
}
