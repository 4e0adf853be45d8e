// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stolos GitOps - commits without a working copy
//!
//! This crate writes to a GitOps repository using only the content-addressed
//! primitives of a hosting API (blob, tree, commit, ref). There is no local
//! clone: a commit of N files is N blob uploads, one tree, one commit and one
//! ref update.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      GitOpsCommitter                          │
//! │  commit_files · commit_directory · duplicate_directory        │
//! │  delete_directory · list_scaffolds · namespace manifests      │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ dyn GitDataApi
//!                ┌───────────────┴───────────────┐
//!                ▼                               ▼
//!       ┌─────────────────┐             ┌──────────────────┐
//!       │  GitHubClient   │             │ InMemoryRepository│
//!       │ (REST, App JWT) │             │     (tests)       │
//!       └─────────────────┘             └──────────────────┘
//! ```
//!
//! # Concurrent writers
//!
//! The branch head is resolved twice: once to pick the base tree and once
//! right before committing. If it moved in between, the newer head becomes
//! the parent. Paths touched by both writers end up with this commit's
//! content (last writer wins); no merge is attempted.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GITHUB_REPO_OWNER` | - | Repository owner |
//! | `GITHUB_REPO_NAME` | - | Repository name |
//! | `GITHUB_BRANCH` | `main` | Target branch |
//! | `GITOPS_WORKING_DIR` | `terraform` | Directory for infrastructure files |
//! | `GITOPS_USERNAME` | `Stolos Bot` | Commit author name |
//! | `GITOPS_EMAIL` | `bot@stolos.cloud` | Commit author email |
//! | `GITHUB_API_URL` | `https://api.github.com` | REST endpoint |
//! | `GITHUB_APP_ID` | - | GitHub App id |
//! | `GITHUB_INSTALLATION_ID` | - | GitHub App installation id |
//! | `GITHUB_APP_PRIVATE_KEY` | - | GitHub App private key (PEM) |
//! | `GITHUB_TOKEN` | - | Fallback static token |

#![deny(missing_docs)]

/// Git data API trait and object types.
pub mod api;
/// Multi-file commits and directory operations.
pub mod committer;
/// Repository coordinates and credentials.
pub mod config;
/// Error types.
pub mod error;
/// GitHub REST client.
pub mod github;
/// In-memory repository for tests.
pub mod memory;
/// Argo CD namespace manifests.
pub mod namespace;

pub use api::{Author, GitDataApi, TreeEntry};
pub use committer::{CommitOutcome, GitOpsCommitter};
pub use config::{GitHubAuth, GitHubSettings, GitOpsConfig};
pub use error::{GitOpsError, Result};
pub use github::GitHubClient;
pub use memory::InMemoryRepository;
