//! Error taxonomy for testpulse.
//!
//! Source and report errors are fatal to a run; extractor errors are caught by
//! the pipeline and demoted to skip records.

use std::time::Duration;

/// Errors produced while discovering or reading revisions.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("branch '{branch}' not found in {target}")]
    BranchNotFound { target: String, branch: String },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("rate limit exceeded: {detail}")]
    RateLimited {
        detail: String,
        retry_after: Option<Duration>,
    },

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("giving up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<SourceError>,
    },

    #[error("no revisions found in {0}")]
    NoRevisions(String),

    #[error("git error: {0}")]
    GitError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether the failure may clear up on its own and is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthRejected(_) | Self::RateLimited { .. } | Self::Transient(_)
        )
    }
}

/// Errors produced by a single extractor against a single revision.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("malformed {format} data in {path}: {reason}")]
    Malformed {
        format: &'static str,
        path: String,
        reason: String,
    },

    #[error("non-finite value for {metric}")]
    NonFinite { metric: String },

    #[error("tree access failed: {0}")]
    Tree(#[from] SourceError),

    #[error("{0}")]
    Other(String),
}

/// Errors produced while assembling the final report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("no metric samples or test outcomes were collected")]
    NoData,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Top-level run errors.
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("report error: {0}")]
    Report(#[from] ReportError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("extractor '{0}' is already registered")]
    DuplicateExtractor(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("run timed out after {0}s")]
    TimedOut(u64),

    #[error("extraction worker failed: {0}")]
    Worker(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for whole-run operations.
pub type Result<T> = std::result::Result<T, PulseError>;

/// Result type for revision source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Result type for extractor operations.
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

/// Result type for report assembly.
pub type ReportResult<T> = std::result::Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SourceError::Transient("reset by peer".into()).is_retryable());
        assert!(SourceError::AuthRejected("401".into()).is_retryable());
        assert!(SourceError::RateLimited {
            detail: "secondary limit".into(),
            retry_after: None,
        }
        .is_retryable());

        assert!(!SourceError::TargetNotFound("/nope".into()).is_retryable());
        assert!(!SourceError::BranchNotFound {
            target: "org/repo".into(),
            branch: "dev".into(),
        }
        .is_retryable());
        assert!(!SourceError::RetriesExhausted {
            attempts: 4,
            last: Box::new(SourceError::Transient("timeout".into())),
        }
        .is_retryable());
    }

    #[test]
    fn test_branch_not_found_display() {
        let err = SourceError::BranchNotFound {
            target: "https://github.com/org/repo".to_string(),
            branch: "release".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("release"));
        assert!(msg.contains("org/repo"));
    }

    #[test]
    fn test_retries_exhausted_carries_last_error() {
        let err = SourceError::RetriesExhausted {
            attempts: 3,
            last: Box::new(SourceError::RateLimited {
                detail: "0 requests remaining".into(),
                retry_after: None,
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("rate limit"));
    }

    #[test]
    fn test_pulse_error_wraps_source() {
        let err: PulseError = SourceError::NoRevisions("/tmp/empty".into()).into();
        assert!(err.to_string().contains("no revisions"));
    }
}
