//! Local filesystem targets.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::git::{current_branch, is_git_repo, list_revisions, work_tree_scope};
use super::tree::{FileHistory, FsTree, GitTree};
use super::{RevisionSource, RevisionTree};
use crate::domain::{RevisionRef, SourceError, SourceResult};

enum LocalKind {
    /// First-parent history of `HEAD`, read from `repo_dir` and restricted
    /// to `prefix` when the target is a subdirectory of the work tree.
    History {
        branch: Option<String>,
        repo_dir: Arc<PathBuf>,
        prefix: String,
        history: Arc<FileHistory>,
    },
    /// A directory without history, analyzed as one snapshot.
    Snapshot,
}

/// A directory on the local machine. Never touches the network.
pub struct LocalSource {
    root: Arc<PathBuf>,
    kind: LocalKind,
    since: Option<DateTime<Utc>>,
}

impl LocalSource {
    /// Open `path`, detecting whether it carries git history.
    pub async fn open(path: &Path, since: Option<DateTime<Utc>>) -> SourceResult<Self> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::TargetNotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_dir() {
            return Err(SourceError::InvalidTarget(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let kind = if is_git_repo(path).await {
            let (repo_dir, prefix) = work_tree_scope(path)
                .await
                .unwrap_or_else(|| (path.to_path_buf(), String::new()));
            let repo_dir = Arc::new(repo_dir);
            LocalKind::History {
                branch: current_branch(path).await,
                history: Arc::new(FileHistory::new(repo_dir.clone(), "HEAD", prefix.clone())),
                repo_dir,
                prefix,
            }
        } else {
            LocalKind::Snapshot
        };

        Ok(Self {
            root: Arc::new(path.to_path_buf()),
            kind,
            since,
        })
    }

    pub fn has_history(&self) -> bool {
        matches!(self.kind, LocalKind::History { .. })
    }

    async fn snapshot_revision(&self) -> SourceResult<RevisionRef> {
        let root = self.root.clone();
        let id = tokio::task::spawn_blocking(move || snapshot_token(&root))
            .await
            .map_err(|e| SourceError::GitError(format!("snapshot task failed: {e}")))??;
        Ok(RevisionRef::new(id, Utc::now(), None))
    }
}

/// Content token for a working tree: hash of every relative path and size.
fn snapshot_token(root: &Path) -> SourceResult<String> {
    let mut hasher = Sha256::new();
    for rel in FsTree::walk(root)? {
        let size = std::fs::metadata(root.join(&rel))?.len();
        hasher.update(rel.as_bytes());
        hasher.update([0]);
        hasher.update(size.to_le_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

#[async_trait]
impl RevisionSource for LocalSource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn revisions(&self) -> SourceResult<Vec<RevisionRef>> {
        match &self.kind {
            LocalKind::History {
                branch, repo_dir, ..
            } => list_revisions(repo_dir, "HEAD", self.since, branch.as_deref()).await,
            LocalKind::Snapshot => Ok(vec![self.snapshot_revision().await?]),
        }
    }

    fn tree(
        &self,
        revision: &RevisionRef,
        previous: Option<&RevisionRef>,
    ) -> Arc<dyn RevisionTree> {
        match &self.kind {
            LocalKind::History {
                repo_dir,
                prefix,
                history,
                ..
            } => Arc::new(
                GitTree::new(repo_dir.clone(), &revision.id)
                    .scoped(prefix.as_str())
                    .since(previous.map(|p| p.id.clone()))
                    .with_history(history.clone()),
            ),
            LocalKind::Snapshot => Arc::new(FsTree::new(self.root.as_path())),
        }
    }
}
