// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Atomic multi-file commits built from blob/tree/commit/ref primitives.
//!
//! # Commit sequence
//!
//! ```text
//! get_ref(branch) ──► head ──► get_commit(head) ──► base tree
//!        │
//!        ▼
//! create_blob × N ──► create_tree(base, entries) ──► tree
//!        │
//!        ├── tree == base ──► NoChanges (nothing written to the ref)
//!        ▼
//! get_ref(branch) again ──► parent = latest head (last writer wins)
//!        │
//!        ▼
//! create_commit(tree, [parent]) ──► update_ref(branch)
//! ```
//!
//! A failure in any primitive aborts before the ref moves. Orphaned blobs
//! and trees are harmless.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{ContentKind, EntryKind, GitDataApi, TreeEntry, FILE_MODE};
use crate::config::GitOpsConfig;
use crate::error::{GitOpsError, Result};

/// Directory holding application scaffolds.
pub const SCAFFOLDS_DIR: &str = "scaffolds";

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A commit was created and the branch now points at it.
    Committed {
        /// SHA of the new commit.
        sha: String,
    },
    /// The resulting tree matched the base tree; nothing was committed.
    NoChanges,
}

impl CommitOutcome {
    /// Whether a commit was created.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Head commit and root tree a change is built on.
struct Base {
    head: String,
    tree: String,
}

/// Commits file sets and directory operations to one branch.
#[derive(Clone)]
pub struct GitOpsCommitter {
    api: Arc<dyn GitDataApi>,
    config: GitOpsConfig,
}

impl GitOpsCommitter {
    /// Create a committer for the branch named in `config`.
    pub fn new(api: Arc<dyn GitDataApi>, config: GitOpsConfig) -> Self {
        Self { api, config }
    }

    /// Repository configuration in use.
    pub fn config(&self) -> &GitOpsConfig {
        &self.config
    }

    async fn resolve_base(&self) -> Result<Base> {
        let head = self.api.get_ref(&self.config.branch).await?;
        let tree = self.api.get_commit(&head).await?.tree_sha;
        Ok(Base { head, tree })
    }

    /// Commit `tree` on top of `base` unless it is unchanged.
    async fn finish(&self, base: Base, tree: String, message: &str) -> Result<CommitOutcome> {
        if tree == base.tree {
            info!(branch = %self.config.branch, "No changes to commit");
            return Ok(CommitOutcome::NoChanges);
        }

        let latest = self.api.get_ref(&self.config.branch).await?;
        let parent = if latest != base.head {
            warn!(
                branch = %self.config.branch,
                expected = %base.head,
                latest = %latest,
                "Branch moved during commit, using latest head as parent"
            );
            latest
        } else {
            base.head
        };

        let sha = self
            .api
            .create_commit(message, &tree, &[parent], &self.config.author())
            .await?;
        self.api.update_ref(&self.config.branch, &sha).await?;

        info!(branch = %self.config.branch, sha = %sha, message, "Committed to GitOps repository");
        Ok(CommitOutcome::Committed { sha })
    }

    /// Commit every file in `files` (path to content) as one commit.
    pub async fn commit_files(
        &self,
        files: &BTreeMap<String, Vec<u8>>,
        message: &str,
    ) -> Result<CommitOutcome> {
        if files.is_empty() {
            return Ok(CommitOutcome::NoChanges);
        }

        let base = self.resolve_base().await?;

        let mut entries = Vec::with_capacity(files.len());
        for (path, content) in files {
            let path = path.trim_matches('/');
            if path.is_empty() {
                return Err(GitOpsError::InvalidPath("empty file path".to_string()));
            }
            let sha = self.api.create_blob(content).await?;
            debug!(path, sha = %sha, "Created blob");
            entries.push(TreeEntry::file(path, sha));
        }

        let tree = self.api.create_tree(Some(&base.tree), &entries).await?;
        self.finish(base, tree, message).await
    }

    /// Commit every file with `extension` below `local_dir`, placed under `base_path`.
    pub async fn commit_directory(
        &self,
        local_dir: &Path,
        extension: &str,
        base_path: &str,
        message: &str,
    ) -> Result<CommitOutcome> {
        let mut files = BTreeMap::new();
        let mut pending = vec![local_dir.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // Engine caches such as `.terraform/` never belong in the repository.
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(local_dir) else {
                    continue;
                };
                let relative = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let repo_path = match base_path.trim_matches('/') {
                    "" => relative,
                    base => format!("{}/{}", base, relative),
                };
                files.insert(repo_path, tokio::fs::read(&path).await?);
            }
        }

        self.commit_files(&files, message).await
    }

    /// Copy every file under `src` to `dst` in one commit, reusing blob SHAs.
    pub async fn duplicate_directory(
        &self,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> Result<CommitOutcome> {
        let src = normalize_prefix(src);
        let dst = normalize_prefix(dst);
        if src.is_empty() || dst.is_empty() {
            return Err(GitOpsError::InvalidPath(
                "source and destination are required".to_string(),
            ));
        }

        let base = self.resolve_base().await?;
        let listing = self.api.get_tree_recursive(&base.tree).await?;

        let existing: HashSet<&str> = listing
            .iter()
            .filter(|e| e.kind != EntryKind::Tree)
            .map(|e| e.path.as_str())
            .collect();

        let mut copies = Vec::new();
        for entry in listing.iter().filter(|e| e.kind == EntryKind::Blob) {
            let Some(rest) = entry.path.strip_prefix(&src) else {
                continue;
            };
            let target = format!("{}{}", dst, rest);
            if !overwrite && existing.contains(target.as_str()) {
                return Err(GitOpsError::DestinationExists(target));
            }
            copies.push(TreeEntry {
                path: target,
                mode: FILE_MODE.to_string(),
                kind: EntryKind::Blob,
                sha: entry.sha.clone(),
            });
        }

        if copies.is_empty() {
            return Err(GitOpsError::NoFilesFound(src.trim_end_matches('/').to_string()));
        }

        let message = format!(
            "Copy {} -> {}",
            src.trim_end_matches('/'),
            dst.trim_end_matches('/')
        );
        let tree = self.api.create_tree(Some(&base.tree), &copies).await?;
        self.finish(base, tree, &message).await
    }

    /// Remove `path` and everything below it in one commit.
    pub async fn delete_directory(&self, path: &str, message: &str) -> Result<CommitOutcome> {
        let target = path.trim_matches('/');
        if target.is_empty() {
            return Err(GitOpsError::InvalidPath(
                "refusing to delete the repository root".to_string(),
            ));
        }

        let base = self.resolve_base().await?;
        let listing = self.api.get_tree_recursive(&base.tree).await?;

        let files: Vec<TreeEntry> = listing
            .into_iter()
            .filter(|e| e.kind != EntryKind::Tree)
            .collect();
        let total = files.len();
        let kept: Vec<TreeEntry> = files
            .into_iter()
            .filter(|e| !matches_path(&e.path, target))
            .collect();

        if kept.len() == total {
            debug!(path = target, "Nothing to delete");
            return Ok(CommitOutcome::NoChanges);
        }

        // No base tree: the new tree is exactly the kept entries.
        let tree = self.api.create_tree(None, &kept).await?;
        self.finish(base, tree, message).await
    }

    /// Names of the directories under `scaffolds/`.
    pub async fn list_scaffolds(&self) -> Result<Vec<String>> {
        let entries = self
            .api
            .get_contents(SCAFFOLDS_DIR, &self.config.branch)
            .await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.kind == ContentKind::Dir)
            .map(|e| e.name)
            .collect())
    }

    /// Read one file from the branch head.
    pub async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.api.get_file(path, &self.config.branch).await
    }

    /// List one directory of the branch head.
    pub async fn list_directory(&self, path: &str) -> Result<Vec<crate::api::ContentEntry>> {
        self.api.get_contents(path, &self.config.branch).await
    }
}

/// Normalize a directory prefix to `a/b/` form (empty stays empty).
pub fn normalize_prefix(path: &str) -> String {
    match path.trim_matches('/') {
        "" => String::new(),
        p => format!("{}/", p),
    }
}

/// Whether `path` is `target` itself or lies below it.
pub fn matches_path(path: &str, target: &str) -> bool {
    path == target
        || path
            .strip_prefix(target)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/templates/web/"), "templates/web/");
        assert_eq!(normalize_prefix("apps"), "apps/");
        assert_eq!(normalize_prefix("//"), "");
    }

    #[test]
    fn test_matches_path() {
        assert!(matches_path("namespaces/dev", "namespaces/dev"));
        assert!(matches_path("namespaces/dev/apps/.gitkeep", "namespaces/dev"));
        assert!(!matches_path("namespaces/dev2/apps/.gitkeep", "namespaces/dev"));
        assert!(!matches_path("namespaces", "namespaces/dev"));
    }
}
