// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory repository for testing.
//!
//! Objects are content-addressed with SHA-256, so two trees holding the same
//! files always hash to the same id. Trees are stored flattened (full path to
//! entry); directory entries are synthesized on listing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::api::{
    Author, CommitInfo, ContentEntry, ContentKind, EntryKind, GitDataApi, TreeEntry,
};
use crate::error::{GitOpsError, Result};

#[derive(Debug, Clone)]
struct StoredCommit {
    tree: String,
    parents: Vec<String>,
    message: String,
    author: Author,
}

#[derive(Debug, Default)]
struct RepoState {
    blobs: HashMap<String, Vec<u8>>,
    trees: HashMap<String, BTreeMap<String, TreeEntry>>,
    commits: HashMap<String, StoredCommit>,
    refs: HashMap<String, String>,
    /// Foreign commit landed on the next `create_tree` call.
    concurrent_write: Option<(String, BTreeMap<String, Vec<u8>>)>,
    commit_seq: u64,
    blob_writes: usize,
}

fn hash(kind: &str, data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b" ");
    hasher.update(data.len().to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(data);
    hex::encode(hasher.finalize())
}

impl RepoState {
    fn put_blob(&mut self, content: &[u8]) -> String {
        let sha = hash("blob", content);
        self.blobs.entry(sha.clone()).or_insert_with(|| content.to_vec());
        self.blob_writes += 1;
        sha
    }

    fn put_tree(&mut self, entries: BTreeMap<String, TreeEntry>) -> String {
        let mut listing = String::new();
        for entry in entries.values() {
            listing.push_str(&format!(
                "{} {:?} {}\t{}\n",
                entry.mode, entry.kind, entry.sha, entry.path
            ));
        }
        let sha = hash("tree", listing.as_bytes());
        self.trees.entry(sha.clone()).or_insert(entries);
        sha
    }

    fn put_commit(&mut self, commit: StoredCommit) -> String {
        self.commit_seq += 1;
        let payload = format!(
            "tree {}\nparents {}\nauthor {} <{}>\nseq {}\n\n{}",
            commit.tree,
            commit.parents.join(" "),
            commit.author.name,
            commit.author.email,
            self.commit_seq,
            commit.message
        );
        let sha = hash("commit", payload.as_bytes());
        self.commits.insert(sha.clone(), commit);
        sha
    }

    fn head_tree(&self, branch: &str) -> Result<&BTreeMap<String, TreeEntry>> {
        let head = self
            .refs
            .get(branch)
            .ok_or_else(|| GitOpsError::NotFound(format!("ref heads/{}", branch)))?;
        let commit = self
            .commits
            .get(head)
            .ok_or_else(|| GitOpsError::NotFound(format!("commit {}", head)))?;
        self.trees
            .get(&commit.tree)
            .ok_or_else(|| GitOpsError::NotFound(format!("tree {}", commit.tree)))
    }

    /// Commit `files` on top of `branch` as if another writer pushed them.
    fn land_foreign_commit(&mut self, branch: &str, files: BTreeMap<String, Vec<u8>>) {
        let Some(head) = self.refs.get(branch).cloned() else {
            return;
        };
        let Some(base) = self
            .commits
            .get(&head)
            .and_then(|c| self.trees.get(&c.tree))
            .cloned()
        else {
            return;
        };
        let mut entries = base;
        for (path, content) in files {
            let sha = self.put_blob(&content);
            entries.insert(path.clone(), TreeEntry::file(path, sha));
        }
        let tree = self.put_tree(entries);
        let sha = self.put_commit(StoredCommit {
            tree,
            parents: vec![head],
            message: "Concurrent change".to_string(),
            author: Author {
                name: "someone-else".to_string(),
                email: "someone@example.com".to_string(),
            },
        });
        self.refs.insert(branch.to_string(), sha);
    }
}

/// Repository held entirely in memory.
pub struct InMemoryRepository {
    state: Mutex<RepoState>,
}

impl InMemoryRepository {
    /// Create a repository whose `branch` points at an empty initial commit.
    pub fn new(branch: &str) -> Self {
        Self::with_files(branch, BTreeMap::new())
    }

    /// Create a repository whose initial commit on `branch` holds `files`.
    pub fn with_files(branch: &str, files: BTreeMap<String, Vec<u8>>) -> Self {
        let mut state = RepoState::default();
        let mut entries = BTreeMap::new();
        for (path, content) in files {
            let sha = state.put_blob(&content);
            entries.insert(path.clone(), TreeEntry::file(path, sha));
        }
        let tree = state.put_tree(entries);
        let sha = state.put_commit(StoredCommit {
            tree,
            parents: Vec::new(),
            message: "Initial commit".to_string(),
            author: Author {
                name: "init".to_string(),
                email: "init@example.com".to_string(),
            },
        });
        state.refs.insert(branch.to_string(), sha);
        state.blob_writes = 0;
        Self {
            state: Mutex::new(state),
        }
    }

    /// Number of commits in the object store, including the initial one.
    pub async fn commit_count(&self) -> usize {
        self.state.lock().await.commits.len()
    }

    /// Number of `create_blob` calls served (seeding excluded).
    pub async fn blob_writes(&self) -> usize {
        self.state.lock().await.blob_writes
    }

    /// Current head of `branch`.
    pub async fn head(&self, branch: &str) -> Option<String> {
        self.state.lock().await.refs.get(branch).cloned()
    }

    /// Parents of a commit.
    pub async fn parents(&self, sha: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .commits
            .get(sha)
            .map(|c| c.parents.clone())
            .unwrap_or_default()
    }

    /// Message of a commit.
    pub async fn message(&self, sha: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .commits
            .get(sha)
            .map(|c| c.message.clone())
    }

    /// Author of a commit.
    pub async fn author(&self, sha: &str) -> Option<Author> {
        self.state
            .lock()
            .await
            .commits
            .get(sha)
            .map(|c| c.author.clone())
    }

    /// Content of `path` at the head of `branch`.
    pub async fn file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        let tree = state.head_tree(branch).ok()?;
        let entry = tree.get(path)?;
        state.blobs.get(&entry.sha).cloned()
    }

    /// Every file path at the head of `branch`.
    pub async fn paths(&self, branch: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .head_tree(branch)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make another writer commit `files` to `branch` right before the next tree is created.
    pub async fn simulate_concurrent_commit(&self, branch: &str, files: BTreeMap<String, Vec<u8>>) {
        self.state.lock().await.concurrent_write = Some((branch.to_string(), files));
    }
}

#[async_trait]
impl GitDataApi for InMemoryRepository {
    async fn get_ref(&self, branch: &str) -> Result<String> {
        self.state
            .lock()
            .await
            .refs
            .get(branch)
            .cloned()
            .ok_or_else(|| GitOpsError::NotFound(format!("ref heads/{}", branch)))
    }

    async fn get_commit(&self, sha: &str) -> Result<CommitInfo> {
        let state = self.state.lock().await;
        let commit = state
            .commits
            .get(sha)
            .ok_or_else(|| GitOpsError::NotFound(format!("commit {}", sha)))?;
        Ok(CommitInfo {
            sha: sha.to_string(),
            tree_sha: commit.tree.clone(),
            parents: commit.parents.clone(),
        })
    }

    async fn create_blob(&self, content: &[u8]) -> Result<String> {
        Ok(self.state.lock().await.put_blob(content))
    }

    async fn create_tree(&self, base_tree: Option<&str>, entries: &[TreeEntry]) -> Result<String> {
        let mut state = self.state.lock().await;

        if let Some((branch, files)) = state.concurrent_write.take() {
            state.land_foreign_commit(&branch, files);
        }

        let mut tree = match base_tree {
            Some(base) => state
                .trees
                .get(base)
                .cloned()
                .ok_or_else(|| GitOpsError::NotFound(format!("tree {}", base)))?,
            None => BTreeMap::new(),
        };

        for entry in entries {
            if entry.kind == EntryKind::Blob && !state.blobs.contains_key(&entry.sha) {
                return Err(GitOpsError::NotFound(format!("blob {}", entry.sha)));
            }
            if entry.kind == EntryKind::Tree {
                continue;
            }
            tree.insert(entry.path.clone(), entry.clone());
        }

        Ok(state.put_tree(tree))
    }

    async fn create_commit(
        &self,
        message: &str,
        tree_sha: &str,
        parents: &[String],
        author: &Author,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        if !state.trees.contains_key(tree_sha) {
            return Err(GitOpsError::NotFound(format!("tree {}", tree_sha)));
        }
        if let Some(missing) = parents.iter().find(|p| !state.commits.contains_key(*p)) {
            return Err(GitOpsError::NotFound(format!("commit {}", missing)));
        }
        Ok(state.put_commit(StoredCommit {
            tree: tree_sha.to_string(),
            parents: parents.to_vec(),
            message: message.to_string(),
            author: author.clone(),
        }))
    }

    async fn update_ref(&self, branch: &str, sha: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.commits.contains_key(sha) {
            return Err(GitOpsError::NotFound(format!("commit {}", sha)));
        }
        if !state.refs.contains_key(branch) {
            return Err(GitOpsError::NotFound(format!("ref heads/{}", branch)));
        }
        state.refs.insert(branch.to_string(), sha.to_string());
        Ok(())
    }

    async fn get_tree_recursive(&self, tree_sha: &str) -> Result<Vec<TreeEntry>> {
        let state = self.state.lock().await;
        let tree = state
            .trees
            .get(tree_sha)
            .ok_or_else(|| GitOpsError::NotFound(format!("tree {}", tree_sha)))?;

        let mut dirs = BTreeSet::new();
        for path in tree.keys() {
            let mut parts: Vec<&str> = path.split('/').collect();
            parts.pop();
            for i in 1..=parts.len() {
                dirs.insert(parts[..i].join("/"));
            }
        }

        let mut entries: Vec<TreeEntry> = dirs
            .into_iter()
            .map(|dir| TreeEntry {
                sha: hash("tree", dir.as_bytes()),
                path: dir,
                mode: "040000".to_string(),
                kind: EntryKind::Tree,
            })
            .collect();
        entries.extend(tree.values().cloned());
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn get_contents(&self, path: &str, branch: &str) -> Result<Vec<ContentEntry>> {
        let state = self.state.lock().await;
        let tree = state.head_tree(branch)?;
        let prefix = match path.trim_matches('/') {
            "" => String::new(),
            p => format!("{}/", p),
        };

        let mut listing: BTreeMap<String, ContentEntry> = BTreeMap::new();
        for (file_path, entry) in tree {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            let (name, kind) = match rest.split_once('/') {
                Some((dir, _)) => (dir, ContentKind::Dir),
                None => (rest, ContentKind::File),
            };
            listing.entry(name.to_string()).or_insert_with(|| ContentEntry {
                name: name.to_string(),
                path: format!("{}{}", prefix, name),
                kind,
                sha: if kind == ContentKind::File {
                    entry.sha.clone()
                } else {
                    hash("tree", format!("{}{}", prefix, name).as_bytes())
                },
            });
        }
        Ok(listing.into_values().collect())
    }

    async fn get_file(&self, path: &str, branch: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().await;
        let tree = state.head_tree(branch)?;
        Ok(tree
            .get(path.trim_matches('/'))
            .and_then(|entry| state.blobs.get(&entry.sha).cloned()))
    }
}
