//! Revision identity.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A discrete, timestamped snapshot of the analyzed codebase.
///
/// Ordering is chronological with the id as tie-break, so two refs sharing a
/// timestamp still sort the same way on every run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionRef {
    /// Commit hash, or a content token for a working tree without history.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Branch the revision was discovered on (`None` for bare snapshots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl RevisionRef {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>, branch: Option<String>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            branch,
        }
    }

    /// First 8 characters of the id, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

impl Ord for RevisionRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
            .then_with(|| self.branch.cmp(&other.branch))
    }
}

impl PartialOrd for RevisionRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
