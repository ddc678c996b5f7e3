//! Flakiness classification over per-test outcome histories.
//!
//! Outcomes recorded for the same test at the same revision are reduced first
//! (order-independently); a revision that saw both a pass and a failure is
//! *mixed*. Skips carry no evidence either way.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{RevisionRef, TestOutcome, TestOutcomeRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Stable,
    Flaky,
    AlwaysFailing,
}

impl Classification {
    pub const ALL: [Classification; 3] = [Self::Stable, Self::Flaky, Self::AlwaysFailing];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Flaky => "flaky",
            Self::AlwaysFailing => "always-failing",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A test's reduced outcome at one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionOutcome {
    Pass,
    Fail,
    Error,
    Skip,
    /// Passed and failed within the same revision.
    Mixed,
}

impl RevisionOutcome {
    fn reduce(outcomes: &BTreeSet<TestOutcome>) -> Self {
        let passed = outcomes.contains(&TestOutcome::Pass);
        let failed = outcomes.contains(&TestOutcome::Fail);
        let errored = outcomes.contains(&TestOutcome::Error);
        match (passed, failed || errored) {
            (true, true) => Self::Mixed,
            (true, false) => Self::Pass,
            (false, true) if failed => Self::Fail,
            (false, true) => Self::Error,
            (false, false) => Self::Skip,
        }
    }

    fn is_observed(self) -> bool {
        self != Self::Skip
    }

    fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeObservation {
    pub revision_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: RevisionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlakinessVerdict {
    pub test_id: String,
    pub classification: Classification,
    /// Pass/fail flips between consecutive observed revisions.
    pub transitions: usize,
    /// Every revision the test appeared in, oldest first.
    pub history: Vec<OutcomeObservation>,
}

/// Verdict counts per classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlakinessSummary {
    pub stable: usize,
    pub flaky: usize,
    pub always_failing: usize,
}

impl FlakinessSummary {
    pub fn from_verdicts(verdicts: &[FlakinessVerdict]) -> Self {
        let mut summary = Self::default();
        for verdict in verdicts {
            match verdict.classification {
                Classification::Stable => summary.stable += 1,
                Classification::Flaky => summary.flaky += 1,
                Classification::AlwaysFailing => summary.always_failing += 1,
            }
        }
        summary
    }

    pub fn count(&self, classification: Classification) -> usize {
        match classification {
            Classification::Stable => self.stable,
            Classification::Flaky => self.flaky,
            Classification::AlwaysFailing => self.always_failing,
        }
    }
}

/// One verdict per distinct test id, sorted by test id.
pub fn classify(records: &[TestOutcomeRecord]) -> Vec<FlakinessVerdict> {
    let mut by_test: BTreeMap<&str, BTreeMap<&RevisionRef, BTreeSet<TestOutcome>>> =
        BTreeMap::new();
    for record in records {
        by_test
            .entry(record.test_id.as_str())
            .or_default()
            .entry(&record.revision)
            .or_default()
            .insert(record.outcome);
    }

    by_test
        .into_iter()
        .map(|(test_id, by_revision)| {
            let history: Vec<OutcomeObservation> = by_revision
                .into_iter()
                .map(|(revision, outcomes)| OutcomeObservation {
                    revision_id: revision.id.clone(),
                    timestamp: revision.timestamp,
                    outcome: RevisionOutcome::reduce(&outcomes),
                })
                .collect();
            let (classification, transitions) = classify_history(&history);
            FlakinessVerdict {
                test_id: test_id.to_string(),
                classification,
                transitions,
                history,
            }
        })
        .collect()
}

fn classify_history(history: &[OutcomeObservation]) -> (Classification, usize) {
    let observed: Vec<RevisionOutcome> = history
        .iter()
        .map(|o| o.outcome)
        .filter(|o| o.is_observed())
        .collect();

    let states: Vec<bool> = observed
        .iter()
        .filter(|o| **o != RevisionOutcome::Mixed)
        .map(|o| o.is_failure())
        .collect();
    let transitions = states.windows(2).filter(|w| w[0] != w[1]).count();

    let classification = if observed.is_empty() {
        Classification::Stable
    } else if observed.len() >= 2
        && (transitions >= 2 || observed.contains(&RevisionOutcome::Mixed))
    {
        Classification::Flaky
    } else if observed.iter().all(|o| o.is_failure()) {
        Classification::AlwaysFailing
    } else {
        Classification::Stable
    };
    (classification, transitions)
}
