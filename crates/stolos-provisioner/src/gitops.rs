// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-operation access to the GitOps repository.
//!
//! Repository coordinates are resolved on every call: the persisted
//! `gitops_configs` row wins, the environment is the fallback.

use std::sync::Arc;

use async_trait::async_trait;
use stolos_gitops::{GitHubClient, GitHubSettings, GitOpsCommitter, GitOpsConfig};
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::Store;

/// Hands out a committer bound to the current repository configuration.
#[async_trait]
pub trait GitOpsSource: Send + Sync {
    /// Build a committer for one operation.
    async fn committer(&self) -> Result<GitOpsCommitter>;
}

/// Resolve repository coordinates: stored settings first, then environment.
pub async fn load_gitops_config(store: &dyn Store) -> Result<GitOpsConfig> {
    if let Some(settings) = store.get_gitops_config().await? {
        debug!(owner = %settings.owner, repo = %settings.repo, "Using stored GitOps configuration");
        return Ok(settings.into());
    }
    Ok(GitOpsConfig::from_env())
}

/// GitHub-backed source.
pub struct GitHubGitOps {
    store: Arc<dyn Store>,
    settings: Option<GitHubSettings>,
}

impl GitHubGitOps {
    /// Use `settings` for API access. `None` means credentials are absent
    /// and every operation fails with a configuration error.
    pub fn new(store: Arc<dyn Store>, settings: Option<GitHubSettings>) -> Self {
        Self { store, settings }
    }
}

#[async_trait]
impl GitOpsSource for GitHubGitOps {
    async fn committer(&self) -> Result<GitOpsCommitter> {
        let config = load_gitops_config(self.store.as_ref()).await?;
        if !config.is_configured() {
            return Err(Error::Configuration(
                "GitOps repository is not configured".to_string(),
            ));
        }
        let settings = self.settings.clone().ok_or_else(|| {
            Error::Configuration("GitHub credentials are not configured".to_string())
        })?;
        let client = GitHubClient::new(settings, &config.owner, &config.repo)?;
        Ok(GitOpsCommitter::new(Arc::new(client), config))
    }
}

/// Always returns the same committer. Used with an in-memory repository.
#[derive(Clone)]
pub struct StaticGitOps {
    committer: GitOpsCommitter,
}

impl StaticGitOps {
    /// Wrap a ready committer.
    pub fn new(committer: GitOpsCommitter) -> Self {
        Self { committer }
    }
}

#[async_trait]
impl GitOpsSource for StaticGitOps {
    async fn committer(&self) -> Result<GitOpsCommitter> {
        Ok(self.committer.clone())
    }
}
