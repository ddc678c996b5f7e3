//! Metric samples and per-test outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::revision::RevisionRef;

/// Metric name carried by samples that wrap a [`TestOutcomeRecord`].
pub const TEST_OUTCOME_METRIC: &str = "tests.outcome";

/// A sampled value. Numbers are charted; categorical values are only kept in
/// bucket contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Numeric(f64),
    Categorical(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            Self::Categorical(_) => None,
        }
    }
}

/// Result of a single test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Pass,
    Fail,
    Error,
    Skip,
}

impl TestOutcome {
    /// `Fail` and `Error` both count as a failing observation.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "error" => Ok(Self::Error),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown test outcome: {other}")),
        }
    }
}

/// One test's outcome at one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcomeRecord {
    pub test_id: String,
    pub revision: RevisionRef,
    pub outcome: TestOutcome,
}

/// One measurement produced by one extractor for one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric: String,
    pub revision: RevisionRef,
    pub value: MetricValue,
    /// Set only for per-test outcome samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
}

impl MetricSample {
    pub fn numeric(metric: impl Into<String>, revision: &RevisionRef, value: f64) -> Self {
        Self {
            metric: metric.into(),
            revision: revision.clone(),
            value: MetricValue::Numeric(value),
            test_id: None,
        }
    }

    pub fn categorical(
        metric: impl Into<String>,
        revision: &RevisionRef,
        value: impl Into<String>,
    ) -> Self {
        Self {
            metric: metric.into(),
            revision: revision.clone(),
            value: MetricValue::Categorical(value.into()),
            test_id: None,
        }
    }

    /// Wrap a test outcome so it can travel with the other samples.
    pub fn outcome(record: TestOutcomeRecord) -> Self {
        Self {
            metric: TEST_OUTCOME_METRIC.to_string(),
            value: MetricValue::Categorical(record.outcome.as_str().to_string()),
            revision: record.revision,
            test_id: Some(record.test_id),
        }
    }

    /// Recover the outcome record from a sample built by [`MetricSample::outcome`].
    pub fn as_outcome(&self) -> Option<TestOutcomeRecord> {
        let test_id = self.test_id.as_ref()?;
        let MetricValue::Categorical(raw) = &self.value else {
            return None;
        };
        let outcome = raw.parse().ok()?;
        Some(TestOutcomeRecord {
            test_id: test_id.clone(),
            revision: self.revision.clone(),
            outcome,
        })
    }
}
