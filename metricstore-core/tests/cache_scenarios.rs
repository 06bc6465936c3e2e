//! End-to-end cache scenarios: ingest through queries

use metricstore_core::cache::{CacheConfig, CacheEngine, EvictionPolicy, GorillaStore};
use metricstore_core::iterators::{AgeOffConfig, RateOptions};
use metricstore_core::protocol::{parse_lines, TimePrecision};
use metricstore_core::query::{Aggregator, QueryRequest, SubQuery};
use metricstore_core::{Point, SeriesKey, Timestamp};
use std::collections::HashMap;

/// Minute-aligned base time
const BASE: Timestamp = 1_700_000_040_000;

fn cache() -> CacheEngine {
    CacheEngine::new(CacheConfig::default()).unwrap()
}

fn host(name: &str) -> SeriesKey {
    SeriesKey::new("sys.cpu.user").with_tag("host", name)
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

fn load_one_second_points(cache: &CacheEngine, count: i64) {
    for h in ["r01n01", "r01n02"] {
        for i in 0..count {
            cache
                .store(&host(h), Point::new(BASE + i * 1_000, i as f64))
                .unwrap();
        }
    }
}

#[test]
fn test_downsample_bucket_count() {
    let cache = cache();
    load_one_second_points(&cache, 1_465);

    let request = QueryRequest::new(BASE, BASE + 1_440_000)
        .with_ms_resolution()
        .with_subquery(
            SubQuery::new("sys.cpu.user")
                .with_tag("host", ".*")
                .with_downsample("1m-avg"),
        );
    let response = cache.query_at(&request, BASE + 1_464_000).unwrap();
    assert!(response.errors.is_empty());
    assert_eq!(response.series.len(), 2);

    for series in &response.series {
        assert_eq!(series.dps.len(), 25);
        let (first_ts, first) = series.dps.iter().next().unwrap();
        let (last_ts, last) = series.dps.iter().next_back().unwrap();
        assert_eq!(*first_ts, BASE);
        assert_close(*first, 29.5);
        // the boundary bucket holds the single point at the window end
        assert_eq!(*last_ts, BASE + 1_440_000);
        assert_close(*last, 1_440.0);
    }

    let tags: HashMap<&str, &str> = [("host", "r01n02")].into_iter().collect();
    assert!(response.find("sys.cpu.user", &tags).is_some());
}

#[test]
fn test_series_merge_without_grouping_tag() {
    let cache = cache();
    load_one_second_points(&cache, 120);
    cache
        .store(&host("r01n02"), Point::new(BASE + 120_000, 1_000.0))
        .unwrap();

    let request = QueryRequest::new(BASE, BASE + 120_000).with_subquery(
        SubQuery::new("sys.cpu.user")
            .with_downsample("1m-sum")
            .with_aggregator(Aggregator::Sum),
    );
    let response = cache.query_at(&request, BASE + 120_000).unwrap();

    assert_eq!(response.series.len(), 1);
    let series = &response.series[0];
    assert!(series.tags.is_empty());
    // seconds in the response
    let first_bucket = BASE / 1_000;
    let sum_0_59: f64 = (0..60).map(|i| i as f64).sum();
    assert_close(series.dps[&first_bucket], 2.0 * sum_0_59);
    assert_close(series.dps[&(first_bucket + 120)], 1_000.0);
}

#[test]
fn test_counter_wraparound_through_cache() {
    let cache = cache();
    for (i, value) in [250.0, 252.0, 254.0, 2.0, 4.0].into_iter().enumerate() {
        cache
            .store(&host("a"), Point::new(BASE + i as i64 * 1_000, value))
            .unwrap();
    }

    let request = QueryRequest::new(BASE, BASE + 10_000)
        .with_ms_resolution()
        .with_subquery(SubQuery::new("sys.cpu.user").with_rate(RateOptions::counter(255.0)));
    let response = cache.query_at(&request, BASE + 10_000).unwrap();

    let rates: Vec<f64> = response.series[0].dps.values().copied().collect();
    assert_eq!(rates.len(), 4);
    for (actual, expected) in rates.into_iter().zip([2.0, 2.0, 3.0, 2.0]) {
        assert_close(actual, expected);
    }
}

#[test]
fn test_constant_slope_rate() {
    let cache = cache();
    for i in 0..50 {
        cache
            .store(&host("a"), Point::new(BASE + i * 10_000, 7.0 * i as f64))
            .unwrap();
    }
    let request = QueryRequest::new(BASE, BASE + 500_000).with_subquery(
        SubQuery::new("sys.cpu.user").with_rate(RateOptions {
            interval_millis: 10_000,
            ..RateOptions::default()
        }),
    );
    let response = cache.query_at(&request, BASE + 500_000).unwrap();

    let dps = &response.series[0].dps;
    assert_eq!(dps.len(), 49);
    dps.values().for_each(|v| assert_close(*v, 7.0));
}

#[test]
fn test_capacity_eviction_makes_series_unqueryable() {
    let cache = CacheEngine::new(CacheConfig {
        max_series: 3,
        eviction: EvictionPolicy::Oldest,
        ..CacheConfig::default()
    })
    .unwrap();
    for h in ["a", "b", "c", "d"] {
        cache.store(&host(h), Point::new(BASE, 1.0)).unwrap();
    }
    assert_eq!(cache.series_count(), 3);
    assert_eq!(cache.stats().series_evicted, 1);

    let request = QueryRequest::new(BASE, BASE).with_subquery(
        SubQuery::new("sys.cpu.user").with_tag("host", ".*"),
    );
    let response = cache.query_at(&request, BASE).unwrap();
    let mut hosts: Vec<&str> = response
        .series
        .iter()
        .map(|s| s.tags["host"].as_str())
        .collect();
    hosts.sort_unstable();
    assert_eq!(hosts, vec!["b", "c", "d"]);
}

#[test]
fn test_archival_age_off_boundary() {
    let store = GorillaStore::new();
    for i in 0..100 {
        store.add_value(BASE + i * 1_000, i as f64).unwrap();
        if i % 10 == 9 {
            store.archive_current();
        }
    }

    // retain roughly the last 49 points
    store.age_off_archived(BASE + 99_000, 49_000);
    assert_eq!(store.oldest_timestamp(), Some(BASE + 50_000));
}

#[test]
fn test_age_off_boundary_is_inclusive() {
    const DAY: i64 = 86_400_000;
    let cache = CacheEngine::new(CacheConfig {
        age_off: AgeOffConfig::new(DAY).with_override("sys.short", 1_000),
        ..CacheConfig::default()
    })
    .unwrap();
    let now = BASE + DAY;
    cache.store(&host("a"), Point::new(BASE - 1, 1.0)).unwrap();
    cache.store(&host("a"), Point::new(BASE, 2.0)).unwrap();

    let request = QueryRequest::new(0, now)
        .with_ms_resolution()
        .with_subquery(SubQuery::new("sys.cpu.user"));
    let response = cache.query_at(&request, now).unwrap();
    let stamps: Vec<_> = response.series[0].dps.keys().copied().collect();
    assert_eq!(stamps, vec![BASE]);
}

#[test]
fn test_ingest_lines_then_query() {
    let cache = cache();
    let body = format!(
        "put sys.cpu.user {} 1 host=a\nput sys.cpu.user {} 2 host=a viz=secret\nbad line\n",
        BASE / 1_000,
        BASE / 1_000 + 1
    );
    let (metrics, errors) = parse_lines(&body, TimePrecision::Seconds);
    assert_eq!(errors.len(), 1);
    for metric in &metrics {
        cache.store_metric(metric).unwrap();
    }
    // visibility makes a separate series
    assert_eq!(cache.series_count(), 2);

    let request = QueryRequest::new(BASE, BASE + 1_000).with_subquery(SubQuery::new("sys.cpu.user"));
    let response = cache.query_at(&request, BASE + 1_000).unwrap();
    assert_eq!(response.point_count(), 2);
}
