//! Revision sources.
//!
//! A [`RevisionSource`] turns a [`TargetDescriptor`] into an ordered list of
//! [`RevisionRef`]s plus, per revision, a lazily materialized read-only
//! [`RevisionTree`].
//!
//! - [`local::LocalSource`]: local git history, or a single working-tree
//!   snapshot when the directory has no history
//! - [`remote::RemoteSource`]: a single branch cloned into run-scoped
//!   temporary storage

pub mod git;
pub mod github;
pub mod local;
pub mod remote;
pub mod tree;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{AnalyzerConfig, DEFAULT_BRANCH};
use crate::domain::{PulseError, Result, RevisionRef, SourceResult};
use crate::retry::RateLimitState;

pub use github::{GithubClient, RepositoryStats};
pub use local::LocalSource;
pub use remote::RemoteSource;
pub use tree::{FileHistory, FsTree, GitTree, MemoryTree};

/// Path -> time the path first appeared on the analyzed branch.
pub type FirstAdded = BTreeMap<String, DateTime<Utc>>;

/// Lines added and deleted for one path by a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub added: u64,
    pub deleted: u64,
}

/// Read-only view of one revision's files.
///
/// Paths are relative and `/`-separated. Implementations never modify the
/// underlying tree.
#[async_trait]
pub trait RevisionTree: Send + Sync {
    /// All file paths, sorted.
    async fn list_files(&self) -> SourceResult<Vec<String>>;

    /// File contents decoded as UTF-8 (lossy), `None` if the path is absent.
    async fn read_to_string(&self, path: &str) -> SourceResult<Option<String>>;

    /// Per-path line changes since the previous analyzed revision (the first
    /// parent when there is none), `None` when the tree has no history to
    /// diff against.
    async fn diff_stats(&self) -> SourceResult<Option<Vec<FileChange>>> {
        Ok(None)
    }

    /// When each path first appeared, `None` when the tree has no history.
    async fn first_added(&self) -> SourceResult<Option<Arc<FirstAdded>>> {
        Ok(None)
    }
}

/// Produces the revisions of one analysis target.
#[async_trait]
pub trait RevisionSource: Send + Sync {
    /// Human-readable target name for logs and the report.
    fn describe(&self) -> String;

    /// All revisions, oldest first.
    async fn revisions(&self) -> SourceResult<Vec<RevisionRef>>;

    /// Accessor for one revision's tree. Nothing is read until it is used.
    ///
    /// `previous` is the analyzed revision before `revision`; diff stats cover
    /// every change since it, including commits thinned out of the run.
    fn tree(
        &self,
        revision: &RevisionRef,
        previous: Option<&RevisionRef>,
    ) -> Arc<dyn RevisionTree>;

    /// Forge-level activity totals, when the source has a forge behind it.
    async fn repository_stats(&self) -> SourceResult<Option<RepositoryStats>> {
        Ok(None)
    }
}

/// What to analyze.
#[derive(Clone, PartialEq, Eq)]
pub enum TargetDescriptor {
    Local {
        path: PathBuf,
    },
    Remote {
        url: String,
        branch: String,
        /// Opaque bearer token.
        token: Option<String>,
    },
}

impl std::fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { path } => f.debug_struct("Local").field("path", path).finish(),
            Self::Remote { url, branch, token } => f
                .debug_struct("Remote")
                .field("url", &remote::redact_url(url))
                .field("branch", branch)
                .field("token", &token.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

impl TargetDescriptor {
    /// Build a descriptor from a CLI-style target string.
    ///
    /// URLs (`http(s)://`, `ssh://`, `git://`, `file://`, `git@host:`) are
    /// remote; anything else is a local path. A branch is only valid for
    /// remote targets.
    pub fn parse(target: &str, branch: Option<String>, token: Option<String>) -> Result<Self> {
        if is_remote_target(target) {
            Ok(Self::Remote {
                url: target.to_string(),
                branch: branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
                token,
            })
        } else if branch.is_some() {
            Err(PulseError::InvalidConfig(
                "a branch can only be selected for remote targets".into(),
            ))
        } else {
            Ok(Self::Local {
                path: PathBuf::from(target),
            })
        }
    }

    /// Name for diagnostics. Credentials embedded in a URL are removed.
    pub fn display_name(&self) -> String {
        match self {
            Self::Local { path } => path.display().to_string(),
            Self::Remote { url, branch, .. } => format!("{}#{branch}", remote::redact_url(url)),
        }
    }
}

/// Whether `target` names a remote repository rather than a local path.
pub fn is_remote_target(target: &str) -> bool {
    target.starts_with("http://")
        || target.starts_with("https://")
        || target.starts_with("ssh://")
        || target.starts_with("git://")
        || target.starts_with("file://")
        || (target.starts_with("git@") && target.contains(':'))
}

/// Open the source for `target`. Remote sources resolve the branch and fetch
/// the history before returning.
pub async fn open_source(
    target: &TargetDescriptor,
    config: &AnalyzerConfig,
    limiter: Arc<RateLimitState>,
) -> SourceResult<Box<dyn RevisionSource>> {
    match target {
        TargetDescriptor::Local { path } => {
            let source = LocalSource::open(path, config.since).await?;
            Ok(Box::new(source))
        }
        TargetDescriptor::Remote { url, branch, token } => {
            let source = RemoteSource::open(url, branch, token.clone(), config, limiter).await?;
            Ok(Box::new(source))
        }
    }
}

/// Keep at most `max` revisions, evenly spaced, always including the first
/// and last.
pub fn thin_revisions(revisions: Vec<RevisionRef>, max: usize) -> Vec<RevisionRef> {
    let n = revisions.len();
    if max < 2 || n <= max {
        return revisions;
    }
    let mut picked: Vec<usize> = (0..max).map(|i| i * (n - 1) / (max - 1)).collect();
    picked.dedup();
    let mut out = Vec::with_capacity(picked.len());
    let mut next = picked.into_iter().peekable();
    for (idx, rev) in revisions.into_iter().enumerate() {
        if next.peek() == Some(&idx) {
            out.push(rev);
            next.next();
        }
    }
    out
}
