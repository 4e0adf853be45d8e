// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Git data API abstraction.
//!
//! The commit layer never touches a working copy. Everything goes through
//! the content-addressed primitives below, which map one-to-one onto the
//! GitHub "Git database" REST endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Mode of a regular, non-executable file.
pub const FILE_MODE: &str = "100644";

/// Kind of object a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// File content.
    Blob,
    /// Sub-directory.
    Tree,
    /// Submodule pointer.
    Commit,
}

/// One entry of a (recursive) tree listing or of a tree being created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Path relative to the repository root.
    pub path: String,
    /// Git file mode.
    pub mode: String,
    /// Object kind.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Object SHA.
    pub sha: String,
}

impl TreeEntry {
    /// A regular file entry pointing at an existing blob.
    pub fn file(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FILE_MODE.to_string(),
            kind: EntryKind::Blob,
            sha: sha.into(),
        }
    }
}

/// The parts of a commit the commit layer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Commit SHA.
    pub sha: String,
    /// Root tree SHA.
    pub tree_sha: String,
    /// Parent commit SHAs.
    pub parents: Vec<String>,
}

/// Author and committer identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

/// Kind of an entry in a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Symlink,
    /// Submodule.
    Submodule,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    /// Base name.
    pub name: String,
    /// Path relative to the repository root.
    pub path: String,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: ContentKind,
    /// Object SHA.
    pub sha: String,
}

/// Low-level operations against a remote repository.
#[async_trait]
pub trait GitDataApi: Send + Sync {
    /// Resolve the head commit SHA of `branch`.
    async fn get_ref(&self, branch: &str) -> Result<String>;

    /// Fetch a commit.
    async fn get_commit(&self, sha: &str) -> Result<CommitInfo>;

    /// Store `content` as a blob and return its SHA.
    async fn create_blob(&self, content: &[u8]) -> Result<String>;

    /// Create a tree from `entries`, layered over `base_tree` when given.
    ///
    /// Paths not named in `entries` are kept from the base tree.
    async fn create_tree(&self, base_tree: Option<&str>, entries: &[TreeEntry]) -> Result<String>;

    /// Create a commit and return its SHA.
    async fn create_commit(
        &self,
        message: &str,
        tree_sha: &str,
        parents: &[String],
        author: &Author,
    ) -> Result<String>;

    /// Point `branch` at `sha`.
    async fn update_ref(&self, branch: &str, sha: &str) -> Result<()>;

    /// List every entry of a tree, descending into sub-trees.
    async fn get_tree_recursive(&self, tree_sha: &str) -> Result<Vec<TreeEntry>>;

    /// List a directory on `branch`. Missing directories yield an empty list.
    async fn get_contents(&self, path: &str, branch: &str) -> Result<Vec<ContentEntry>>;

    /// Read a file on `branch`, or `None` when it does not exist.
    async fn get_file(&self, path: &str, branch: &str) -> Result<Option<Vec<u8>>>;
}
