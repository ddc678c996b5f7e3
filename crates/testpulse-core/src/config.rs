//! Run configuration.
//!
//! [`AnalyzerConfig::default`] reads the `TESTPULSE_*` environment variables;
//! the CLI overrides individual fields from its flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::Granularity;
use crate::domain::{PulseError, Result};
use crate::retry::RetryPolicy;

/// Default GitHub REST endpoint.
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Default branch analyzed for remote targets.
pub const DEFAULT_BRANCH: &str = "main";

/// Default number of revisions extracted concurrently.
pub const DEFAULT_JOBS: usize = 4;

/// Configuration for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub granularity: Granularity,
    /// Upper bound on concurrently extracted revisions.
    pub jobs: usize,
    /// Thin the history to at most this many evenly spaced revisions.
    pub max_revisions: Option<usize>,
    /// Ignore revisions older than this.
    pub since: Option<DateTime<Utc>>,
    pub retry: RetryPolicy,
    pub github_api_url: String,
    /// Fetch pull request and issue totals for GitHub targets.
    pub collect_repository_stats: bool,
    /// Abort the whole run after this many seconds.
    pub timeout_secs: Option<u64>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            granularity: Granularity::default(),
            jobs: env_parse("TESTPULSE_JOBS").unwrap_or(DEFAULT_JOBS),
            max_revisions: env_parse("TESTPULSE_MAX_REVISIONS"),
            since: None,
            retry: RetryPolicy::default(),
            github_api_url: std::env::var("TESTPULSE_GITHUB_API")
                .unwrap_or_else(|_| DEFAULT_GITHUB_API.to_string()),
            collect_repository_stats: true,
            timeout_secs: env_parse("TESTPULSE_TIMEOUT_SECS"),
        }
    }
}

impl AnalyzerConfig {
    /// Create a config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_max_revisions(mut self, max_revisions: usize) -> Self {
        self.max_revisions = Some(max_revisions);
        self
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(PulseError::InvalidConfig("jobs must be at least 1".into()));
        }
        if matches!(self.max_revisions, Some(n) if n < 2) {
            return Err(PulseError::InvalidConfig(
                "max_revisions must keep at least 2 revisions".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PulseError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(PulseError::InvalidConfig(
                "retry.base_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
