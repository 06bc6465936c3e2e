//! MetricStore Core - scan-time iterators and an in-memory series cache
//!
//! A Rust time-series engine built around two halves:
//!
//! - **Scan-time iterators**: composable, pull-based transforms over a sorted
//!   key/value stream (expansion, compaction, age-off, downsampling, rate and
//!   sliding-window filters), usable during reads and store-side compaction.
//! - **Cache engine**: a bounded set of per-series Gorilla-compressed stores
//!   answering recent-data queries without touching the persistent store.
//!
//! # Architecture
//!
//! - **Codec**: row key, column and value layout of stored points
//! - **Iterators**: the `seek` / `has_top` / `top` / `next` contract and its filters
//! - **Compression**: Gorilla delta-of-delta / XOR block codec
//! - **Cache**: per-series stores, eviction, maintenance and queries
//! - **Table**: in-memory sorted table implementing the iterator contract

pub mod cache;
pub mod codec;
pub mod compression;
pub mod iterators;
pub mod protocol;
pub mod query;
pub mod table;

mod error;
mod types;

pub use error::{Result, StoreError};
pub use types::*;

/// MetricStore version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Distinct series held by the cache before eviction
    pub const MAX_SERIES: usize = 100_000;

    /// Default retention (1 day)
    pub const DEFAULT_AGE_OFF_MILLIS: i64 = 24 * 60 * 60 * 1000;

    /// Points per Gorilla block before the store seals it
    pub const MAX_POINTS_PER_BLOCK: usize = 4096;

    /// Tag sets per metric before the cache stops holding the metric
    pub const MAX_TAG_SETS_PER_METRIC: usize = 50_000;

    /// Maintenance period (1 minute)
    pub const MAINTENANCE_INTERVAL_MILLIS: u64 = 60 * 1000;

    /// Compaction window used by the table (1 hour)
    pub const DEFAULT_COMPACTION_WINDOW_MILLIS: i64 = 60 * 60 * 1000;
}
