//! Time bucketing and merge-rule behaviour over realistic sample sets.

use chrono::{TimeZone, Utc};
use testpulse_core::extract::coverage::LINE_PCT;
use testpulse_core::extract::test_outcomes::TOTAL;
use testpulse_core::{
    aggregate, rebucket, BucketKey, ExtractorRegistry, Granularity, MetricCatalog, MetricSample,
    RevisionRef,
};

fn catalog() -> MetricCatalog {
    ExtractorRegistry::standard().catalog()
}

fn rev(id: &str, year: i32, month: u32, day: u32) -> RevisionRef {
    RevisionRef::new(
        id,
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap(),
        Some("main".into()),
    )
}

/// Jan/Feb of the first year and Jan/Mar of the second with line coverage
/// 80, 90, 70 and 95.
fn two_year_coverage() -> Vec<MetricSample> {
    vec![
        MetricSample::numeric(LINE_PCT, &rev("a", 2022, 1, 10), 80.0),
        MetricSample::numeric(LINE_PCT, &rev("b", 2022, 2, 10), 90.0),
        MetricSample::numeric(LINE_PCT, &rev("c", 2023, 1, 10), 70.0),
        MetricSample::numeric(LINE_PCT, &rev("d", 2023, 3, 10), 95.0),
    ]
}

#[test]
fn annual_means_match_worked_example() {
    let buckets = aggregate(&two_year_coverage(), Granularity::Annual, &catalog());
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].key, BucketKey::Year(2022));
    assert_eq!(buckets[0].numeric(LINE_PCT), Some(85.0));
    assert_eq!(buckets[1].key, BucketKey::Year(2023));
    assert_eq!(buckets[1].numeric(LINE_PCT), Some(82.5));
    assert_eq!(buckets[1].revisions.len(), 2);
}

#[test]
fn monthly_buckets_are_distinct_and_ascending() {
    let mut samples = two_year_coverage();
    samples.push(MetricSample::numeric(LINE_PCT, &rev("e", 2023, 3, 20), 97.0));
    let buckets = aggregate(&samples, Granularity::Monthly, &catalog());

    let keys: Vec<String> = buckets.iter().map(|b| b.key.to_string()).collect();
    assert_eq!(keys, vec!["2022-01", "2022-02", "2023-01", "2023-03"]);
    assert!(buckets.windows(2).all(|w| w[0].key < w[1].key));
    assert!(buckets
        .iter()
        .all(|b| b.revisions.iter().all(|r| b.key.contains(r.timestamp))));
    assert_eq!(buckets[3].numeric(LINE_PCT), Some(96.0));
}

#[test]
fn aggregation_is_order_independent_and_idempotent() {
    let catalog = catalog();
    let mut samples = two_year_coverage();
    samples.push(MetricSample::numeric(TOTAL, &rev("b", 2022, 2, 10), 12.0));
    samples.push(MetricSample::numeric(TOTAL, &rev("a", 2022, 1, 10), 10.0));

    let forward = aggregate(&samples, Granularity::Annual, &catalog);
    samples.reverse();
    let backward = aggregate(&samples, Granularity::Annual, &catalog);
    assert_eq!(forward, backward);
    assert_eq!(forward, aggregate(&samples, Granularity::Annual, &catalog));

    // tests.total merges by latest.
    assert_eq!(forward[0].numeric(TOTAL), Some(12.0));
}

#[test]
fn annual_equals_weighted_monthly() {
    let catalog = catalog();
    let mut samples = two_year_coverage();
    samples.push(MetricSample::numeric(LINE_PCT, &rev("e", 2022, 2, 20), 60.0));

    let annual = aggregate(&samples, Granularity::Annual, &catalog);
    let monthly = aggregate(&samples, Granularity::Monthly, &catalog);
    let recombined = rebucket(&monthly, &catalog);

    assert_eq!(annual.len(), recombined.len());
    for (a, r) in annual.iter().zip(&recombined) {
        assert_eq!(a.key, r.key);
        assert_eq!(a.revisions, r.revisions);
        let (x, y) = (a.numeric(LINE_PCT).unwrap(), r.numeric(LINE_PCT).unwrap());
        assert!((x - y).abs() < 1e-9, "{}: {x} != {y}", a.key);
    }
    // (80 + 90 + 60) / 3, not the mean of the monthly means.
    let first = annual[0].numeric(LINE_PCT).unwrap();
    assert!((first - 230.0 / 3.0).abs() < 1e-9);
}

#[test]
fn bucket_omits_metrics_without_samples() {
    let samples = vec![
        MetricSample::numeric(LINE_PCT, &rev("a", 2022, 1, 10), 80.0),
        MetricSample::numeric(TOTAL, &rev("b", 2023, 1, 10), 5.0),
    ];
    let buckets = aggregate(&samples, Granularity::Annual, &catalog());
    assert!(buckets[0].numeric(TOTAL).is_none());
    assert!(buckets[1].numeric(LINE_PCT).is_none());
    assert!(aggregate(&[], Granularity::Annual, &catalog()).is_empty());
}
