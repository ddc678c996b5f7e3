//! Read-only tree accessors.
//!
//! - [`GitTree`]: a commit inside a git repository, read through `git`
//!   plumbing without checking anything out
//! - [`FsTree`]: a plain directory on disk
//! - [`MemoryTree`]: an in-memory tree for tests and synthetic sources
//! - [`FileHistory`]: first-appearance dates shared by a source's git trees

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::OnceCell;
use walkdir::WalkDir;

use super::git::{first_parent, run_git, run_git_text};
use super::{FileChange, FirstAdded, RevisionTree};
use crate::domain::{SourceError, SourceResult};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TreeEntry {
    path: String,
    blob: String,
}

/// A commit's tree, addressed by SHA.
///
/// With a non-empty `prefix` (`"pkg/"`) the tree is the subdirectory below
/// it: listed paths, reads and diff stats are all relative to that
/// directory. Blob contents are read once per blob and shared by every
/// extractor reading the same file.
pub struct GitTree {
    repo_dir: Arc<PathBuf>,
    sha: String,
    prefix: String,
    base: Option<String>,
    history: Option<Arc<FileHistory>>,
    entries: OnceCell<Vec<TreeEntry>>,
    blobs: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl GitTree {
    pub fn new(repo_dir: Arc<PathBuf>, sha: impl Into<String>) -> Self {
        Self {
            repo_dir,
            sha: sha.into(),
            prefix: String::new(),
            base: None,
            history: None,
            entries: OnceCell::new(),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Restrict the tree to the directory `prefix` (`""` or ending in `/`).
    pub fn scoped(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Diff against `base` instead of the first parent.
    pub fn since(mut self, base: Option<String>) -> Self {
        self.base = base;
        self
    }

    pub fn with_history(mut self, history: Arc<FileHistory>) -> Self {
        self.history = Some(history);
        self
    }

    fn pathspec(&self) -> Option<&str> {
        (!self.prefix.is_empty()).then_some(self.prefix.as_str())
    }

    async fn entries(&self) -> SourceResult<&Vec<TreeEntry>> {
        self.entries
            .get_or_try_init(|| async {
                let mut args = vec!["ls-tree", "-r", "-z", "--full-tree", self.sha.as_str()];
                if let Some(spec) = self.pathspec() {
                    args.extend(["--", spec]);
                }
                let out = run_git(&self.repo_dir, &args).await?;
                Ok::<_, SourceError>(parse_ls_tree(&out, &self.prefix))
            })
            .await
    }

    fn blob_cell(&self, blob: &str) -> Arc<OnceCell<String>> {
        // Plain map bookkeeping; a poisoned lock still holds valid cells.
        let mut blobs = self.blobs.lock().unwrap_or_else(|p| p.into_inner());
        blobs.entry(blob.to_string()).or_default().clone()
    }
}

/// Parse `git ls-tree -r -z` output into blob entries below `prefix`, with
/// the prefix stripped. Submodules and other non-blob entries are dropped.
fn parse_ls_tree(out: &[u8], prefix: &str) -> Vec<TreeEntry> {
    let mut entries: Vec<TreeEntry> = out
        .split(|b| *b == 0)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let record = String::from_utf8_lossy(record);
            let (meta, path) = record.split_once('\t')?;
            let mut fields = meta.split_whitespace();
            let (_mode, kind, blob) = (fields.next()?, fields.next()?, fields.next()?);
            if kind != "blob" {
                return None;
            }
            let path = path.strip_prefix(prefix)?;
            Some(TreeEntry {
                path: path.to_string(),
                blob: blob.to_string(),
            })
        })
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

#[async_trait]
impl RevisionTree for GitTree {
    async fn list_files(&self) -> SourceResult<Vec<String>> {
        Ok(self.entries().await?.iter().map(|e| e.path.clone()).collect())
    }

    async fn read_to_string(&self, path: &str) -> SourceResult<Option<String>> {
        let entries = self.entries().await?;
        let Ok(idx) = entries.binary_search_by(|e| e.path.as_str().cmp(path)) else {
            return Ok(None);
        };
        let blob = entries[idx].blob.as_str();
        let content = self
            .blob_cell(blob)
            .get_or_try_init(|| async {
                let bytes = run_git(&self.repo_dir, &["cat-file", "blob", blob]).await?;
                Ok::<_, SourceError>(String::from_utf8_lossy(&bytes).into_owned())
            })
            .await?
            .clone();
        Ok(Some(content))
    }

    async fn diff_stats(&self) -> SourceResult<Option<Vec<FileChange>>> {
        let base = match &self.base {
            Some(base) => Some(base.clone()),
            None => first_parent(&self.repo_dir, &self.sha).await?,
        };
        let mut args = match &base {
            Some(base) => vec![
                "diff",
                "--numstat",
                "--no-renames",
                base.as_str(),
                self.sha.as_str(),
            ],
            None => vec![
                "diff-tree",
                "-r",
                "--root",
                "--numstat",
                "--no-renames",
                "--no-commit-id",
                self.sha.as_str(),
            ],
        };
        if let Some(spec) = self.pathspec() {
            args.extend(["--", spec]);
        }
        let out = run_git_text(&self.repo_dir, &args).await?;
        let changes = parse_numstat(&out)
            .into_iter()
            .filter_map(|change| {
                let path = change.path.strip_prefix(self.prefix.as_str())?.to_string();
                Some(FileChange { path, ..change })
            })
            .collect();
        Ok(Some(changes))
    }

    async fn first_added(&self) -> SourceResult<Option<Arc<FirstAdded>>> {
        match &self.history {
            Some(history) => Ok(Some(history.first_added().await?)),
            None => Ok(None),
        }
    }
}

/// Parse `git diff --numstat` output. Binary files count as zero lines.
pub(crate) fn parse_numstat(out: &str) -> Vec<FileChange> {
    out.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?;
            let deleted = parts.next()?;
            let path = parts.next()?;
            Some(FileChange {
                path: path.to_string(),
                added: added.parse().unwrap_or(0),
                deleted: deleted.parse().unwrap_or(0),
            })
        })
        .collect()
}

/// When each path first appeared in the first-parent history of `tip`.
///
/// Built with one `git log` the first time any tree of the source asks, then
/// shared by all of them. A path present in a revision was first added at or
/// before that revision, so one index over the whole branch serves every tree.
pub struct FileHistory {
    repo_dir: Arc<PathBuf>,
    tip: String,
    prefix: String,
    first_added: OnceCell<Arc<FirstAdded>>,
}

impl FileHistory {
    pub fn new(repo_dir: Arc<PathBuf>, tip: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            repo_dir,
            tip: tip.into(),
            prefix: prefix.into(),
            first_added: OnceCell::new(),
        }
    }

    pub async fn first_added(&self) -> SourceResult<Arc<FirstAdded>> {
        self.first_added
            .get_or_try_init(|| async {
                let mut args = vec![
                    "-c",
                    "log.showRoot=true",
                    "-c",
                    "core.quotePath=false",
                    "log",
                    "--first-parent",
                    "--reverse",
                    "--no-renames",
                    "--diff-filter=A",
                    "--name-only",
                    "--format=@%ct",
                    self.tip.as_str(),
                    "--",
                ];
                if !self.prefix.is_empty() {
                    args.push(self.prefix.as_str());
                }
                let out = run_git_text(&self.repo_dir, &args).await?;
                Ok::<_, SourceError>(Arc::new(parse_first_added(&out, &self.prefix)))
            })
            .await
            .cloned()
    }
}

/// Parse `--format=@%ct --name-only` log output, oldest commit first.
pub(crate) fn parse_first_added(out: &str, prefix: &str) -> FirstAdded {
    let mut first = FirstAdded::new();
    let mut current: Option<DateTime<Utc>> = None;
    for line in out.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(secs) = line.strip_prefix('@') {
            current = secs.parse().ok().and_then(|s| Utc.timestamp_opt(s, 0).single());
            continue;
        }
        let (Some(ts), Some(path)) = (current, line.strip_prefix(prefix)) else {
            continue;
        };
        first.entry(path.to_string()).or_insert(ts);
    }
    first
}

/// A directory on disk. `.git` is never listed.
pub struct FsTree {
    root: PathBuf,
}

impl FsTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Sorted, `/`-separated paths relative to `root`.
    pub(crate) fn walk(root: &Path) -> SourceResult<Vec<String>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry.map_err(|e| SourceError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(root) {
                let parts: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(parts.join("/"));
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl RevisionTree for FsTree {
    async fn list_files(&self) -> SourceResult<Vec<String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::walk(&root))
            .await
            .map_err(|e| SourceError::GitError(format!("tree walk task failed: {e}")))?
    }

    async fn read_to_string(&self, path: &str) -> SourceResult<Option<String>> {
        if path.split('/').any(|c| c == ".." || c == ".git") {
            return Ok(None);
        }
        match tokio::fs::read(self.root.join(path)).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    files: BTreeMap<String, String>,
    changes: Option<Vec<FileChange>>,
    first_added: Option<Arc<FirstAdded>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn with_changes(mut self, changes: Vec<FileChange>) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn with_first_added(mut self, first_added: FirstAdded) -> Self {
        self.first_added = Some(Arc::new(first_added));
        self
    }
}

#[async_trait]
impl RevisionTree for MemoryTree {
    async fn list_files(&self) -> SourceResult<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    async fn read_to_string(&self, path: &str) -> SourceResult<Option<String>> {
        Ok(self.files.get(path).cloned())
    }

    async fn diff_stats(&self) -> SourceResult<Option<Vec<FileChange>>> {
        Ok(self.changes.clone())
    }

    async fn first_added(&self) -> SourceResult<Option<Arc<FirstAdded>>> {
        Ok(self.first_added.clone())
    }
}
