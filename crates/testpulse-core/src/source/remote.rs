//! Remote repository targets.
//!
//! The selected branch is cloned bare into a run-scoped temporary directory.
//! The directory lives as long as the [`RemoteSource`] and is removed when it
//! is dropped, including on cancellation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use super::git::{classify_remote_failure, list_revisions};
use super::github::{parse_github_repo, GithubClient, RepositoryStats};
use super::tree::{FileHistory, GitTree};
use super::{RevisionSource, RevisionTree};
use crate::config::AnalyzerConfig;
use crate::domain::{RevisionRef, SourceError, SourceResult};
use crate::retry::{retry_with_backoff, RateLimitState, RetryPolicy};

struct GithubRepo {
    client: GithubClient,
    owner: String,
    repo: String,
}

/// One branch of a remote repository.
pub struct RemoteSource {
    display: String,
    branch: String,
    repo_dir: Arc<PathBuf>,
    history: Arc<FileHistory>,
    since: Option<DateTime<Utc>>,
    github: Option<GithubRepo>,
    collect_stats: bool,
    _storage: TempDir,
}

impl RemoteSource {
    /// Resolve `branch` and clone it. Fails with `BranchNotFound` before any
    /// history is fetched when the branch does not exist.
    pub async fn open(
        url: &str,
        branch: &str,
        token: Option<String>,
        config: &AnalyzerConfig,
        limiter: Arc<RateLimitState>,
    ) -> SourceResult<Self> {
        let display_url = redact_url(url);
        let auth = token.as_deref().map(auth_header);

        let github = match parse_github_repo(url) {
            Some((owner, repo)) => Some(GithubRepo {
                client: GithubClient::new(
                    &config.github_api_url,
                    token.clone(),
                    config.retry.clone(),
                    limiter.clone(),
                )?,
                owner,
                repo,
            }),
            None => None,
        };

        match &github {
            Some(gh) => gh.client.ensure_branch(&gh.owner, &gh.repo, branch).await?,
            None => {
                ls_remote_branch(
                    url,
                    &display_url,
                    branch,
                    auth.as_deref(),
                    &config.retry,
                    &limiter,
                )
                .await?
            }
        }

        let storage = tempfile::Builder::new().prefix("testpulse-").tempdir()?;
        let repo_dir = clone_branch(
            url,
            &display_url,
            branch,
            auth.as_deref(),
            storage.path(),
            &config.retry,
            &limiter,
        )
        .await?;
        info!(target_repo = %display_url, branch = %branch, "cloned remote branch");

        let repo_dir = Arc::new(repo_dir);
        let history = FileHistory::new(repo_dir.clone(), format!("refs/heads/{branch}"), "");
        Ok(Self {
            display: display_url,
            branch: branch.to_string(),
            history: Arc::new(history),
            repo_dir,
            since: config.since,
            github,
            collect_stats: config.collect_repository_stats,
            _storage: storage,
        })
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }
}

#[async_trait]
impl RevisionSource for RemoteSource {
    fn describe(&self) -> String {
        format!("{}#{}", self.display, self.branch)
    }

    async fn revisions(&self) -> SourceResult<Vec<RevisionRef>> {
        let rev = format!("refs/heads/{}", self.branch);
        list_revisions(&self.repo_dir, &rev, self.since, Some(&self.branch)).await
    }

    fn tree(
        &self,
        revision: &RevisionRef,
        previous: Option<&RevisionRef>,
    ) -> Arc<dyn RevisionTree> {
        Arc::new(
            GitTree::new(self.repo_dir.clone(), &revision.id)
                .since(previous.map(|p| p.id.clone()))
                .with_history(self.history.clone()),
        )
    }

    async fn repository_stats(&self) -> SourceResult<Option<RepositoryStats>> {
        match &self.github {
            Some(gh) if self.collect_stats => gh
                .client
                .repository_stats(&gh.owner, &gh.repo)
                .await
                .map(Some),
            _ => Ok(None),
        }
    }
}

/// `http.extraHeader` value sending the token as HTTP basic credentials. Keeps
/// the token out of the remote URL, and therefore out of error messages and
/// logs.
fn auth_header(token: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("x-access-token:{token}"));
    format!("Authorization: Basic {encoded}")
}

/// Strip any credentials embedded in a URL.
pub(crate) fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

/// `git <args>` for a remote operation. The auth header travels through the
/// `GIT_CONFIG_*` environment, never argv, so it stays out of process
/// listings.
fn remote_command(auth: Option<&str>, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(header) = auth {
        cmd.env("GIT_CONFIG_COUNT", "1")
            .env("GIT_CONFIG_KEY_0", "http.extraHeader")
            .env("GIT_CONFIG_VALUE_0", header);
    }
    cmd
}

async fn remote_git(
    auth: Option<&str>,
    args: &[&str],
    display: &str,
    branch: &str,
) -> SourceResult<String> {
    let output = remote_command(auth, args)
        .output()
        .await
        .map_err(|e| SourceError::GitError(format!("failed to run git: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(classify_remote_failure(display, branch, &stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn ls_remote_branch(
    url: &str,
    display: &str,
    branch: &str,
    auth: Option<&str>,
    policy: &RetryPolicy,
    limiter: &RateLimitState,
) -> SourceResult<()> {
    let refname = format!("refs/heads/{branch}");
    let args = ["ls-remote", "--heads", url, refname.as_str()];
    let out = retry_with_backoff("branch lookup", policy, limiter, |_| {
        remote_git(auth, &args, display, branch)
    })
    .await?;
    if out.trim().is_empty() {
        return Err(SourceError::BranchNotFound {
            target: display.to_string(),
            branch: branch.to_string(),
        });
    }
    Ok(())
}

async fn clone_branch(
    url: &str,
    display: &str,
    branch: &str,
    auth: Option<&str>,
    storage: &Path,
    policy: &RetryPolicy,
    limiter: &RateLimitState,
) -> SourceResult<PathBuf> {
    retry_with_backoff("clone", policy, limiter, |attempt| {
        let dest = storage.join(format!("attempt-{attempt}"));
        async move {
            debug!(attempt = attempt, "cloning remote branch");
            let dest_str = dest.to_string_lossy().into_owned();
            remote_git(
                auth,
                &[
                    "clone",
                    "--quiet",
                    "--bare",
                    "--single-branch",
                    "--branch",
                    branch,
                    url,
                    &dest_str,
                ],
                display,
                branch,
            )
            .await?;
            Ok(dest)
        }
    })
    .await
}
