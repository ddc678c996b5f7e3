//! Git command helpers.
//!
//! All history access shells out to the `git` binary. Child processes are
//! killed when their future is dropped, so cancelling a run never leaves a
//! stray `git` behind.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, TimeZone, Utc};
use tokio::process::Command;

use crate::domain::{RevisionRef, SourceError, SourceResult};

/// Check whether a directory is inside a git work tree (or is a bare repo).
pub async fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run `git <args>` in `dir` and return stdout.
pub async fn run_git(dir: &Path, args: &[&str]) -> SourceResult<Vec<u8>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SourceError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Name the subcommand, not a leading `-c key=value`.
        let subcommand = args
            .iter()
            .find(|a| !a.starts_with('-') && !a.contains('='))
            .copied()
            .unwrap_or_default();
        return Err(SourceError::GitError(format!(
            "git {subcommand} failed: {}",
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

/// Like [`run_git`] but decoded as trimmed UTF-8.
pub async fn run_git_text(dir: &Path, args: &[&str]) -> SourceResult<String> {
    let out = run_git(dir, args).await?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
}

/// Work-tree root of `dir` and the path of `dir` below it, `""` at the root
/// or `"pkg/"` for a subdirectory. `None` outside a work tree (bare
/// repositories, `.git` itself).
pub async fn work_tree_scope(dir: &Path) -> Option<(PathBuf, String)> {
    let top = run_git_text(dir, &["rev-parse", "--show-toplevel"]).await.ok()?;
    if top.is_empty() {
        return None;
    }
    let prefix = run_git_text(dir, &["rev-parse", "--show-prefix"]).await.ok()?;
    Some((PathBuf::from(top), prefix))
}

/// Name of the checked-out branch, `None` on a detached HEAD.
pub async fn current_branch(repo_dir: &Path) -> Option<String> {
    let name = run_git_text(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
        .await
        .ok()?;
    (!name.is_empty() && name != "HEAD").then_some(name)
}

/// First-parent history of `rev`, oldest first.
pub async fn list_revisions(
    repo_dir: &Path,
    rev: &str,
    since: Option<DateTime<Utc>>,
    branch: Option<&str>,
) -> SourceResult<Vec<RevisionRef>> {
    let since_arg = since.map(|s| format!("--since={}", s.to_rfc3339()));
    let mut args = vec!["log", "--first-parent", "--reverse", "--format=%H %ct"];
    if let Some(arg) = since_arg.as_deref() {
        args.push(arg);
    }
    args.push(rev);
    args.push("--");

    let out = match run_git_text(repo_dir, &args).await {
        Ok(out) => out,
        // An unborn branch has no history to walk.
        Err(SourceError::GitError(msg)) if msg.contains("does not have any commits") => {
            return Ok(Vec::new())
        }
        Err(e) => return Err(e),
    };

    parse_log(&out, branch)
}

/// Parse `%H %ct` lines.
pub(crate) fn parse_log(out: &str, branch: Option<&str>) -> SourceResult<Vec<RevisionRef>> {
    out.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (sha, ts) = line
                .trim()
                .split_once(' ')
                .ok_or_else(|| SourceError::GitError(format!("unexpected log line: {line}")))?;
            let secs: i64 = ts
                .parse()
                .map_err(|_| SourceError::GitError(format!("bad commit timestamp: {ts}")))?;
            let timestamp = Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| SourceError::GitError(format!("bad commit timestamp: {ts}")))?;
            Ok(RevisionRef::new(sha, timestamp, branch.map(str::to_string)))
        })
        .collect()
}

/// First parent of a commit, `None` for a root commit.
pub async fn first_parent(repo_dir: &Path, sha: &str) -> SourceResult<Option<String>> {
    let line = run_git_text(repo_dir, &["rev-list", "--parents", "-n", "1", sha]).await?;
    Ok(line.split_whitespace().nth(1).map(str::to_string))
}

/// Map a failed remote git command onto the source taxonomy.
pub(crate) fn classify_remote_failure(target: &str, branch: &str, stderr: &str) -> SourceError {
    let lower = stderr.to_lowercase();
    if lower.contains("remote branch") && lower.contains("not found") {
        SourceError::BranchNotFound {
            target: target.to_string(),
            branch: branch.to_string(),
        }
    } else if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("403")
        || lower.contains("401")
    {
        SourceError::AuthRejected(stderr.trim().to_string())
    } else if lower.contains("rate limit") || lower.contains("429") {
        SourceError::RateLimited {
            detail: stderr.trim().to_string(),
            retry_after: None,
        }
    } else if lower.contains("repository not found")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("404")
    {
        SourceError::TargetNotFound(target.to_string())
    } else if lower.contains("could not resolve host")
        || lower.contains("timed out")
        || lower.contains("connection reset")
        || lower.contains("early eof")
        || lower.contains("unable to access")
        || lower.contains("502")
        || lower.contains("503")
    {
        SourceError::Transient(stderr.trim().to_string())
    } else {
        SourceError::GitError(stderr.trim().to_string())
    }
}
