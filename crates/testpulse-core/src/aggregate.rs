//! Time bucketing and per-bucket metric aggregation.
//!
//! [`aggregate`] is a pure fold: samples are grouped by truncated timestamp
//! and each metric is merged by its [`MergeRule`]. Samples are sorted before
//! any floating-point folding, so the result is identical for every input
//! order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::{MetricSample, MetricValue, RevisionRef};
use crate::extract::{MergeRule, MetricCatalog};

/// Time-bucket width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Annual,
    Monthly,
}

/// A truncated timestamp. Serialized as `"2023"` or `"2023-01"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BucketKey {
    Year(i32),
    Month { year: i32, month: u32 },
}

impl BucketKey {
    pub fn for_timestamp(ts: DateTime<Utc>, granularity: Granularity) -> Self {
        match granularity {
            Granularity::Annual => Self::Year(ts.year()),
            Granularity::Monthly => Self::Month {
                year: ts.year(),
                month: ts.month(),
            },
        }
    }

    pub fn year(&self) -> i32 {
        match *self {
            Self::Year(year) | Self::Month { year, .. } => year,
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            Self::Year(_) => Granularity::Annual,
            Self::Month { .. } => Granularity::Monthly,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        Self::for_timestamp(ts, self.granularity()) == *self
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Year(year) => write!(f, "{year}"),
            Self::Month { year, month } => write!(f, "{year}-{month:02}"),
        }
    }
}

impl FromStr for BucketKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("invalid bucket key: {s}");
        match s.rsplit_once('-') {
            Some((year, month)) if !year.is_empty() => {
                let year = year.parse().map_err(|_| bad())?;
                let month: u32 = month.parse().map_err(|_| bad())?;
                if !(1..=12).contains(&month) {
                    return Err(bad());
                }
                Ok(Self::Month { year, month })
            }
            _ => s.parse().map(Self::Year).map_err(|_| bad()),
        }
    }
}

impl Serialize for BucketKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BucketKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A merged metric value and how many samples went into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedValue {
    pub value: MetricValue,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: BucketKey,
    /// Revisions that contributed samples, oldest first.
    pub revisions: Vec<RevisionRef>,
    /// Metrics with at least one sample in this bucket.
    pub metrics: BTreeMap<String, AggregatedValue>,
}

impl Bucket {
    pub fn numeric(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).and_then(|v| v.value.as_f64())
    }
}

/// Total order over samples of one metric: chronological, then by value.
fn sample_order(a: &MetricSample, b: &MetricSample) -> Ordering {
    a.revision
        .cmp(&b.revision)
        .then_with(|| value_order(&a.value, &b.value))
}

fn value_order(a: &MetricValue, b: &MetricValue) -> Ordering {
    match (a, b) {
        (MetricValue::Numeric(x), MetricValue::Numeric(y)) => x.total_cmp(y),
        (MetricValue::Numeric(_), MetricValue::Categorical(_)) => Ordering::Less,
        (MetricValue::Categorical(_), MetricValue::Numeric(_)) => Ordering::Greater,
        (MetricValue::Categorical(x), MetricValue::Categorical(y)) => x.cmp(y),
    }
}

/// Merge one metric's samples, given in [`sample_order`].
fn merge(sorted: &[&MetricSample], rule: MergeRule) -> Option<AggregatedValue> {
    let last = sorted.last()?;
    let numerics: Option<Vec<f64>> = sorted.iter().map(|s| s.value.as_f64()).collect();
    let value = match (numerics, rule) {
        // Categorical metrics merge by latest regardless of the rule.
        (None, _) | (Some(_), MergeRule::Latest) => last.value.clone(),
        (Some(values), MergeRule::Mean) => {
            MetricValue::Numeric(values.iter().sum::<f64>() / values.len() as f64)
        }
        (Some(values), MergeRule::Sum) => MetricValue::Numeric(values.iter().sum()),
    };
    Some(AggregatedValue {
        value,
        samples: sorted.len(),
    })
}

/// Group `samples` into ascending time buckets.
///
/// Per-test outcome samples are left to the flakiness detector and ignored
/// here. A bucket only lists metrics it has samples for.
pub fn aggregate(
    samples: &[MetricSample],
    granularity: Granularity,
    catalog: &MetricCatalog,
) -> Vec<Bucket> {
    let mut grouped: BTreeMap<BucketKey, BTreeMap<&str, Vec<&MetricSample>>> = BTreeMap::new();
    let mut revisions: BTreeMap<BucketKey, BTreeSet<&RevisionRef>> = BTreeMap::new();

    for sample in samples.iter().filter(|s| s.test_id.is_none()) {
        let key = BucketKey::for_timestamp(sample.revision.timestamp, granularity);
        grouped
            .entry(key)
            .or_default()
            .entry(sample.metric.as_str())
            .or_default()
            .push(sample);
        revisions.entry(key).or_default().insert(&sample.revision);
    }

    grouped
        .into_iter()
        .map(|(key, by_metric)| {
            let metrics = by_metric
                .into_iter()
                .filter_map(|(name, mut metric_samples)| {
                    metric_samples.sort_by(|a, b| sample_order(a, b));
                    merge(&metric_samples, catalog.merge_rule(name)).map(|v| (name.to_string(), v))
                })
                .collect();
            Bucket {
                key,
                revisions: revisions
                    .remove(&key)
                    .unwrap_or_default()
                    .into_iter()
                    .cloned()
                    .collect(),
                metrics,
            }
        })
        .collect()
}

/// Recombine buckets into annual ones.
///
/// Mean metrics are weighted by each bucket's sample count, sums are added,
/// and latest-merged or categorical metrics take the value of the latest
/// bucket carrying them.
pub fn rebucket(buckets: &[Bucket], catalog: &MetricCatalog) -> Vec<Bucket> {
    let mut by_year: BTreeMap<i32, Vec<&Bucket>> = BTreeMap::new();
    for bucket in buckets {
        by_year.entry(bucket.key.year()).or_default().push(bucket);
    }

    by_year
        .into_iter()
        .map(|(year, mut parts)| {
            parts.sort_by_key(|b| b.key);
            let revisions: BTreeSet<&RevisionRef> =
                parts.iter().flat_map(|b| b.revisions.iter()).collect();

            let mut per_metric: BTreeMap<&str, Vec<&AggregatedValue>> = BTreeMap::new();
            for part in &parts {
                for (name, value) in &part.metrics {
                    per_metric.entry(name.as_str()).or_default().push(value);
                }
            }

            let metrics = per_metric
                .into_iter()
                .filter_map(|(name, values)| {
                    combine(&values, catalog.merge_rule(name)).map(|v| (name.to_string(), v))
                })
                .collect();

            Bucket {
                key: BucketKey::Year(year),
                revisions: revisions.into_iter().cloned().collect(),
                metrics,
            }
        })
        .collect()
}

/// Combine already-merged values, given oldest bucket first.
fn combine(values: &[&AggregatedValue], rule: MergeRule) -> Option<AggregatedValue> {
    let last = values.last()?;
    let samples: usize = values.iter().map(|v| v.samples).sum();
    let numerics: Option<Vec<(f64, usize)>> = values
        .iter()
        .map(|v| v.value.as_f64().map(|x| (x, v.samples)))
        .collect();
    let value = match (numerics, rule) {
        (None, _) | (Some(_), MergeRule::Latest) => last.value.clone(),
        (Some(parts), MergeRule::Mean) => {
            let weighted: f64 = parts.iter().map(|(x, n)| x * *n as f64).sum();
            MetricValue::Numeric(weighted / samples.max(1) as f64)
        }
        (Some(parts), MergeRule::Sum) => MetricValue::Numeric(parts.iter().map(|(x, _)| x).sum()),
    };
    Some(AggregatedValue { value, samples })
}
