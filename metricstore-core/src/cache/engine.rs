//! Cache engine: series admission, queries and maintenance

use super::{CacheConfig, EvictionPolicy, GorillaStore};
use crate::codec;
use crate::iterators::{
    drain, AgeOffConfig, BoxedIterator, DownsampleIterator, Key, Range, RateIterator,
    SortedKeyValueIterator, SortedMapIterator, Value,
};
use crate::query::{Aggregator, Downsample, QueryRequest, QueryResponse, SeriesResult, SubQuery};
use crate::types::{now_millis, Metric, Point, SeriesKey, Timestamp};
use crate::Result;
use parking_lot::{RwLock, RwLockWriteGuard};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One cached series
#[derive(Debug)]
struct SeriesEntry {
    store: GorillaStore,
    /// Admission order
    admitted: u64,
    /// Logical time of the last write or query
    last_access: AtomicU64,
}

/// Running counters
#[derive(Debug, Default)]
struct Counters {
    points_stored: AtomicU64,
    points_rejected: AtomicU64,
    points_uncached: AtomicU64,
    series_evicted: AtomicU64,
    series_expired: AtomicU64,
    blocks_aged_off: AtomicU64,
}

/// Cache counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub points_stored: u64,
    pub points_rejected: u64,
    /// Points of metrics the cache does not hold
    pub points_uncached: u64,
    pub series_evicted: u64,
    pub series_expired: u64,
    pub blocks_aged_off: u64,
}

/// Cache status, as served to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatus {
    /// Series currently held
    pub series: usize,
    /// Distinct metric names, sorted
    pub metrics: Vec<String>,
    /// Metrics no longer cached, sorted
    pub uncached_metrics: Vec<String>,
    /// Points held across all series
    pub points: usize,
    /// Sealed blocks held
    pub archived_blocks: usize,
    /// Compressed bytes held
    pub size_bytes: usize,
    /// Oldest point held
    pub oldest_timestamp: Option<Timestamp>,
    /// Newest point held
    pub newest_timestamp: Option<Timestamp>,
    pub stats: CacheStats,
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Open blocks sealed
    pub archived: usize,
    /// Archived blocks dropped by age-off
    pub aged_off: usize,
    /// Whole series removed (stale or emptied)
    pub expired: usize,
    /// Metrics dropped for having too many tag sets
    pub discontinued: usize,
}

/// Bounded in-memory cache of recent series
pub struct CacheEngine {
    config: CacheConfig,
    series: RwLock<HashMap<SeriesKey, Arc<SeriesEntry>>>,
    non_cached_patterns: Vec<Regex>,
    /// Metric names matched by a pattern or discontinued by maintenance
    uncached: RwLock<HashSet<String>>,
    /// Logical clock for admission order and recency
    clock: AtomicU64,
    counters: Counters,
}

impl CacheEngine {
    /// Create a cache engine
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let non_cached_patterns = config.non_cached_patterns()?;
        info!(
            "Cache engine starting: max_series={}, eviction={:?}, default age-off={}ms",
            config.max_series, config.eviction, config.age_off.default_ttl_millis
        );
        Ok(Self {
            config,
            series: RwLock::new(HashMap::new()),
            non_cached_patterns,
            uncached: RwLock::new(HashSet::new()),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Retention settings
    pub fn age_off(&self) -> &AgeOffConfig {
        &self.config.age_off
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store one point for a series, admitting the series if needed.
    ///
    /// Points of an uncached metric are counted and dropped; that is not an
    /// error.
    pub fn store(&self, key: &SeriesKey, point: Point) -> Result<()> {
        if !self.should_cache(&key.metric) {
            self.counters.points_uncached.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        // The map lock is held until the point is written, so neither
        // eviction nor maintenance can detach the series mid-write.
        {
            let series = self.series.read();
            if let Some(entry) = series.get(key) {
                return self.write_point(entry, point);
            }
        }

        let mut series = self.series.write();
        let entry = match series.get(key) {
            Some(entry) => Arc::clone(entry),
            // maintenance may have discontinued the metric since the check above
            None if self.uncached.read().contains(&key.metric) => {
                self.counters.points_uncached.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            None => self.admit(&mut series, key),
        };
        let _series = RwLockWriteGuard::downgrade(series);
        self.write_point(&entry, point)
    }

    /// Store a metric sample
    pub fn store_metric(&self, metric: &Metric) -> Result<()> {
        self.store(&metric.key, metric.point)
    }

    fn write_point(&self, entry: &SeriesEntry, point: Point) -> Result<()> {
        entry.last_access.store(self.tick(), Ordering::Relaxed);
        match entry.store.add_value(point.timestamp, point.value) {
            Ok(()) => {
                self.counters.points_stored.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.points_rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn should_cache(&self, metric: &str) -> bool {
        if self.uncached.read().contains(metric) {
            return false;
        }
        if self.non_cached_patterns.iter().any(|re| re.is_match(metric)) {
            debug!("Metric {} matches a non-cached pattern", metric);
            self.uncached.write().insert(metric.to_string());
            return false;
        }
        true
    }

    fn admit(
        &self,
        series: &mut HashMap<SeriesKey, Arc<SeriesEntry>>,
        key: &SeriesKey,
    ) -> Arc<SeriesEntry> {
        if self.config.max_series > 0 && series.len() >= self.config.max_series {
            self.evict_one(series);
        }

        let entry = Arc::new(SeriesEntry {
            store: GorillaStore::with_block_limit(self.config.max_points_per_block),
            admitted: self.tick(),
            last_access: AtomicU64::new(0),
        });
        series.insert(key.clone(), Arc::clone(&entry));
        debug!("Admitted series {}", key);
        entry
    }

    fn evict_one(&self, series: &mut HashMap<SeriesKey, Arc<SeriesEntry>>) {
        let victim = match self.config.eviction {
            EvictionPolicy::Oldest => series
                .iter()
                .min_by_key(|(_, e)| e.admitted)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::LeastRecentlyUsed => series
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone()),
        };
        if let Some(victim) = victim {
            series.remove(&victim);
            self.counters.series_evicted.fetch_add(1, Ordering::Relaxed);
            info!("Evicted series {} ({:?})", victim, self.config.eviction);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Answer a query against the wall clock
    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        self.query_at(request, now_millis())
    }

    /// Answer a query with age-off evaluated at `now`.
    ///
    /// A subquery or series that fails is left out of the result and its
    /// error is listed in [`QueryResponse::errors`].
    pub fn query_at(&self, request: &QueryRequest, now: Timestamp) -> Result<QueryResponse> {
        request.validate()?;

        let mut response = QueryResponse::default();
        for subquery in &request.subqueries {
            if let Err(e) = self.run_subquery(request, subquery, now, &mut response) {
                warn!("Subquery on {} failed: {}", subquery.metric, e);
                response.errors.push(format!("{}: {}", subquery.metric, e));
            }
        }
        Ok(response)
    }

    fn run_subquery(
        &self,
        request: &QueryRequest,
        subquery: &SubQuery,
        now: Timestamp,
        response: &mut QueryResponse,
    ) -> Result<()> {
        let filter = subquery.tag_filter()?;
        let downsample = subquery.parsed_downsample()?;

        let start = request
            .start
            .max(self.config.age_off.oldest_retained(&subquery.metric, now));
        if start > request.end {
            return Ok(());
        }
        let (scan_start, scan_end) = match downsample {
            Some(ds) => (ds.bucket_start(start), ds.bucket_end(request.end)),
            None => (start, request.end),
        };

        let mut matching: Vec<(SeriesKey, Arc<SeriesEntry>)> = {
            let series = self.series.read();
            series
                .iter()
                .filter(|(key, _)| key.metric == subquery.metric && filter.matches(&key.tags))
                .map(|(key, entry)| (key.clone(), Arc::clone(entry)))
                .collect()
        };
        // group members are merged in series key order
        matching.sort_by(|a, b| a.0.cmp(&b.0));

        let mut groups: BTreeMap<BTreeMap<String, String>, Vec<BTreeMap<Timestamp, f64>>> =
            BTreeMap::new();
        for (key, entry) in matching {
            entry.last_access.store(self.tick(), Ordering::Relaxed);
            match series_points(&key, &entry.store, subquery, downsample, scan_start, scan_end) {
                Ok(points) if points.is_empty() => {}
                Ok(points) => groups.entry(filter.group_key(&key.tags)).or_default().push(points),
                Err(e) => {
                    warn!("Leaving series {} out of query: {}", key, e);
                    response.errors.push(format!("{}: {}", key, e));
                }
            }
        }

        let divisor = request.timestamp_divisor();
        for (tags, members) in groups {
            response.series.push(SeriesResult {
                metric: subquery.metric.clone(),
                tags,
                dps: combine(members, subquery.aggregator, divisor),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Seal every open block, age off archived blocks and expire stale or
    /// emptied series
    pub fn run_maintenance(&self, now: Timestamp) -> MaintenanceReport {
        let snapshot: Vec<(SeriesKey, Arc<SeriesEntry>)> = self
            .series
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), Arc::clone(e)))
            .collect();

        let mut report = MaintenanceReport::default();
        let mut expired = Vec::new();
        for (key, entry) in snapshot {
            if entry.store.archive_current() {
                report.archived += 1;
            }
            report.aged_off += entry
                .store
                .age_off_archived(now, self.config.age_off.ttl(&key.metric));

            if self.is_expired(&entry, now) {
                expired.push((key, entry));
            }
        }

        {
            let mut series = self.series.write();
            for (key, entry) in expired {
                // Writers hold the map lock while writing, so the check is
                // repeated here: the series may have taken a point, or been
                // evicted and re-admitted, since the snapshot.
                let current = series
                    .get(&key)
                    .map_or(false, |e| Arc::ptr_eq(e, &entry) && self.is_expired(e, now));
                if current {
                    series.remove(&key);
                    report.expired += 1;
                }
            }
            report.discontinued = self.discontinue_wide_metrics(&mut series);
        }

        self.counters
            .blocks_aged_off
            .fetch_add(report.aged_off as u64, Ordering::Relaxed);
        self.counters
            .series_expired
            .fetch_add(report.expired as u64, Ordering::Relaxed);
        if report.aged_off > 0 || report.expired > 0 || report.discontinued > 0 {
            info!(
                "Maintenance: archived {} blocks, aged off {}, expired {} series, discontinued {} metrics",
                report.archived, report.aged_off, report.expired, report.discontinued
            );
        }
        report
    }

    fn is_expired(&self, entry: &SeriesEntry, now: Timestamp) -> bool {
        let stale = match (self.config.staleness_millis, entry.store.newest_timestamp()) {
            (Some(staleness), Some(newest)) => now.saturating_sub(newest) > staleness,
            _ => false,
        };
        stale || entry.store.is_empty()
    }

    /// Stop caching every metric with more tag sets than the configured
    /// limit, dropping its series. Returns the number of metrics dropped.
    fn discontinue_wide_metrics(&self, series: &mut HashMap<SeriesKey, Arc<SeriesEntry>>) -> usize {
        let limit = self.config.max_tag_sets_per_metric;
        if limit == 0 {
            return 0;
        }

        let mut tag_sets: HashMap<&str, usize> = HashMap::new();
        for key in series.keys() {
            *tag_sets.entry(key.metric.as_str()).or_default() += 1;
        }
        let wide: HashSet<String> = tag_sets
            .into_iter()
            .filter(|(_, count)| *count > limit)
            .map(|(metric, count)| {
                info!(
                    "Metric {} has {} tag sets, over the limit of {}; no longer caching it",
                    metric, count, limit
                );
                metric.to_string()
            })
            .collect();
        if wide.is_empty() {
            return 0;
        }

        series.retain(|key, _| !wide.contains(&key.metric));
        let count = wide.len();
        self.uncached.write().extend(wide);
        count
    }

    /// Run maintenance on the configured interval until the task is aborted
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = Duration::from_millis(self.config.maintenance_interval_millis);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                engine.run_maintenance(now_millis());
            }
        })
    }

    /// Seal every open block
    pub fn shutdown(&self) {
        let series = self.series.read();
        let archived = series
            .values()
            .filter(|entry| entry.store.archive_current())
            .count();
        info!("Cache shut down: sealed {} open blocks across {} series", archived, series.len());
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of series held
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// True when the series is held
    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.series.read().contains_key(key)
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            points_stored: self.counters.points_stored.load(Ordering::Relaxed),
            points_rejected: self.counters.points_rejected.load(Ordering::Relaxed),
            points_uncached: self.counters.points_uncached.load(Ordering::Relaxed),
            series_evicted: self.counters.series_evicted.load(Ordering::Relaxed),
            series_expired: self.counters.series_expired.load(Ordering::Relaxed),
            blocks_aged_off: self.counters.blocks_aged_off.load(Ordering::Relaxed),
        }
    }

    /// Current status
    pub fn status(&self) -> CacheStatus {
        let series = self.series.read();
        let metrics: BTreeSet<&str> = series.keys().map(|k| k.metric.as_str()).collect();
        let uncached: BTreeSet<String> = self.uncached.read().iter().cloned().collect();
        CacheStatus {
            series: series.len(),
            metrics: metrics.into_iter().map(String::from).collect(),
            uncached_metrics: uncached.into_iter().collect(),
            points: series.values().map(|e| e.store.num_points()).sum(),
            archived_blocks: series.values().map(|e| e.store.archived_blocks()).sum(),
            size_bytes: series.values().map(|e| e.store.size_bytes()).sum(),
            oldest_timestamp: series.values().filter_map(|e| e.store.oldest_timestamp()).min(),
            newest_timestamp: series.values().filter_map(|e| e.store.newest_timestamp()).max(),
            stats: self.stats(),
        }
    }
}

/// Decode one series within `[start, end]` and run it through the
/// subquery's iterator stack: rate first, then downsample
fn series_points(
    key: &SeriesKey,
    store: &GorillaStore,
    subquery: &SubQuery,
    downsample: Option<Downsample>,
    start: Timestamp,
    end: Timestamp,
) -> Result<BTreeMap<Timestamp, f64>> {
    let family = codec::join_tags(key.tags.iter());
    let visibility = key.visibility.clone().unwrap_or_default();

    let mut entries: Vec<(Key, Value)> = Vec::new();
    for decompressor in store.get_decompressors(start, end) {
        for point in decompressor {
            let point = point?;
            if point.timestamp < start || point.timestamp > end {
                continue;
            }
            let row = codec::encode_row_key(&key.metric, point.timestamp);
            entries.push((
                Key::new(row, family.clone(), "", visibility.clone(), point.timestamp),
                codec::encode_value(point.value),
            ));
        }
    }
    if entries.is_empty() {
        return Ok(BTreeMap::new());
    }

    let mut iter: BoxedIterator = Box::new(SortedMapIterator::new(entries));
    if subquery.rate {
        iter = Box::new(RateIterator::rate(iter, subquery.rate_options));
    }
    if let Some(ds) = downsample {
        iter = Box::new(DownsampleIterator::downsample(iter, ds)?);
    }
    iter.seek(&Range::all())?;

    drain(&mut iter)?
        .into_iter()
        .map(|(k, v)| Ok((k.timestamp, codec::decode_value(&v)?)))
        .collect()
}

/// Merge the series of one group and scale timestamps for the response.
///
/// Values sharing a timestamp are aggregated in member order, which is
/// series key order. `first` and `last` therefore pick the value of the
/// lowest or highest series key present at that timestamp.
fn combine(
    members: Vec<BTreeMap<Timestamp, f64>>,
    aggregator: Aggregator,
    divisor: i64,
) -> BTreeMap<Timestamp, f64> {
    let merged = if members.len() == 1 {
        members.into_iter().next().unwrap_or_default()
    } else {
        let mut samples: BTreeMap<Timestamp, Vec<(Timestamp, f64)>> = BTreeMap::new();
        for (index, member) in members.into_iter().enumerate() {
            for (ts, value) in member {
                // the member index stands in for time, giving first/last an order
                samples.entry(ts).or_default().push((index as Timestamp, value));
            }
        }
        samples
            .into_iter()
            .filter_map(|(ts, values)| aggregator.aggregate(values).map(|v| (ts, v)))
            .collect()
    };

    merged
        .into_iter()
        .map(|(ts, v)| (ts.div_euclid(divisor), v))
        .collect()
}
