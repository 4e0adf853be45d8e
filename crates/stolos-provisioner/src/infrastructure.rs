// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Base network infrastructure of a cloud provider.
//!
//! The provider's `main.tf` (state backend, network, firewall) lives in the
//! GitOps repository under `{working_dir}/{provider}` next to the shared node
//! module and one `node-*.tf` per provisioned node. Every operation here
//! rebuilds a scratch working directory from that layout.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use stolos_gitops::api::ContentKind;
use stolos_gitops::{CommitOutcome, GitOpsCommitter};
use stolos_terraform::{EngineFactory, TemplateRenderer, Workspace};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::gitops::GitOpsSource;
use crate::provider::{CloudProvider, NodeImage};

/// Templates making up the shared node module.
pub const NODE_MODULE_TEMPLATES: [&str; 4] = ["main", "variables", "outputs", "provider"];

/// Architecture of cloud nodes.
pub const NODE_ARCH: &str = "amd64";

/// Result of initializing the base infrastructure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeOutcome {
    /// Whether the engine had anything to apply.
    pub applied: bool,
    /// Commit of the rendered files.
    pub commit: CommitOutcome,
}

/// What the infrastructure of a provider looks like right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfrastructureStatus {
    /// `unconfigured`, `not_initialized` or `ready`
    pub status: String,
    /// Network name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc: Option<String>,
    /// Subnetwork name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    /// Provider region
    pub region: String,
}

/// Creates, inspects and tears down the base infrastructure of one provider.
pub struct InfrastructureService {
    provider: Arc<dyn CloudProvider>,
    gitops: Arc<dyn GitOpsSource>,
    engines: Arc<dyn EngineFactory>,
    renderer: TemplateRenderer,
    cluster_name: String,
}

impl InfrastructureService {
    /// Create a service for `provider`.
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        gitops: Arc<dyn GitOpsSource>,
        engines: Arc<dyn EngineFactory>,
        renderer: TemplateRenderer,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            gitops,
            engines,
            renderer,
            cluster_name: cluster_name.into(),
        }
    }

    /// Render the base infrastructure, apply it when the plan has changes,
    /// then commit it together with the node module.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<InitializeOutcome> {
        self.ensure_configured()?;
        let image = node_image(self.provider.as_ref())?;
        let committer = self.gitops.committer().await?;
        let name = self.provider.provider_name();

        let scratch = scratch_dir("stolos-infra-")?;
        let engine = self
            .engines
            .create(scratch.path(), &self.provider.engine_env());
        let workspace = Workspace::new(scratch.path(), self.renderer.clone(), engine.clone());

        let mut context = self.provider.template_context();
        context.insert("ClusterName".into(), Value::from(self.cluster_name.clone()));
        workspace.render_template_to_file(
            &format!("{}/infrastructure.tf.j2", name),
            &context,
            "main.tf",
        )?;

        engine.init(cancel).await?;
        let applied = engine.plan(cancel).await?;
        if applied {
            info!(provider = name, "Applying base infrastructure");
            engine.apply(cancel).await?;
        } else {
            info!(provider = name, "Base infrastructure is up to date");
        }

        render_node_module(&workspace, name, &self.cluster_name, &image)?;
        let path = committer.config().working_path(&[name]);
        let commit = committer
            .commit_directory(
                scratch.path(),
                "tf",
                &path,
                &format!("Initialize {} infrastructure", name),
            )
            .await?;

        info!(
            provider = name,
            applied,
            committed = commit.is_committed(),
            "Infrastructure initialized"
        );
        Ok(InitializeOutcome { applied, commit })
    }

    /// Destroy everything the engine manages for this provider and remove
    /// its directory from the repository.
    pub async fn destroy(&self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_configured()?;
        let image = node_image(self.provider.as_ref())?;
        let committer = self.gitops.committer().await?;
        let name = self.provider.provider_name();
        let path = committer.config().working_path(&[name]);

        let scratch = scratch_dir("stolos-infra-")?;
        let engine = self
            .engines
            .create(scratch.path(), &self.provider.engine_env());
        let workspace = Workspace::new(scratch.path(), self.renderer.clone(), engine.clone());
        fetch_provider_files(&committer, &path, &workspace, true).await?;
        render_node_module(&workspace, name, &self.cluster_name, &image)?;

        engine.init(cancel).await?;
        engine.destroy(cancel).await?;
        warn!(provider = name, "Infrastructure destroyed");

        committer
            .delete_directory(&path, &format!("Destroy {} infrastructure", name))
            .await?;
        Ok(())
    }

    /// Release a stuck state lock.
    pub async fn force_unlock(&self, lock_id: &str, cancel: &CancellationToken) -> Result<()> {
        if lock_id.trim().is_empty() {
            return Err(Error::InvalidRequest("lock id is required".to_string()));
        }
        self.ensure_configured()?;
        let committer = self.gitops.committer().await?;
        let path = committer
            .config()
            .working_path(&[self.provider.provider_name()]);

        let scratch = scratch_dir("stolos-infra-")?;
        let engine = self
            .engines
            .create(scratch.path(), &self.provider.engine_env());
        let workspace = Workspace::new(scratch.path(), self.renderer.clone(), engine.clone());
        fetch_provider_files(&committer, &path, &workspace, false).await?;

        engine.init(cancel).await?;
        engine.force_unlock(cancel, lock_id).await?;
        info!(lock_id, "State lock released");
        Ok(())
    }

    /// Report whether the base infrastructure exists.
    pub async fn status(&self, cancel: &CancellationToken) -> Result<InfrastructureStatus> {
        let region = self.provider.region().to_string();
        if !self.provider.is_configured() {
            return Ok(InfrastructureStatus {
                status: "unconfigured".to_string(),
                vpc: None,
                subnet: None,
                region,
            });
        }

        let committer = self.gitops.committer().await?;
        let path = committer
            .config()
            .working_path(&[self.provider.provider_name()]);
        let scratch = scratch_dir("stolos-infra-")?;
        let engine = self
            .engines
            .create(scratch.path(), &self.provider.engine_env());
        let workspace = Workspace::new(scratch.path(), self.renderer.clone(), engine.clone());

        match fetch_provider_files(&committer, &path, &workspace, false).await {
            Ok(_) => {}
            Err(Error::Configuration(_)) => {
                return Ok(InfrastructureStatus {
                    status: "not_initialized".to_string(),
                    vpc: None,
                    subnet: None,
                    region,
                });
            }
            Err(e) => return Err(e),
        }

        engine.init(cancel).await?;
        let outputs = engine.output(cancel).await?;
        let output = |key: &str| {
            outputs
                .get(key)
                .and_then(|o| o.value.as_str())
                .map(String::from)
        };
        Ok(InfrastructureStatus {
            status: "ready".to_string(),
            vpc: output("vpc_name"),
            subnet: output("subnet_name"),
            region,
        })
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.provider.is_configured() {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "{} provider is not configured",
                self.provider.provider_name()
            )))
        }
    }
}

pub(crate) fn scratch_dir(prefix: &str) -> Result<tempfile::TempDir> {
    Ok(tempfile::Builder::new().prefix(prefix).tempdir()?)
}

pub(crate) fn node_image(provider: &dyn CloudProvider) -> Result<NodeImage> {
    provider.node_image(NODE_ARCH).ok_or_else(|| {
        Error::Configuration(format!(
            "no {} node image configured for {}",
            NODE_ARCH,
            provider.provider_name()
        ))
    })
}

/// Render the shared node module into `modules/node`.
pub(crate) fn render_node_module(
    workspace: &Workspace,
    provider_name: &str,
    cluster_name: &str,
    image: &NodeImage,
) -> Result<()> {
    let context = json!({
        "ClusterName": cluster_name,
        "TalosImageProject": image.project,
        "TalosImageName": image.name,
    });
    for template in NODE_MODULE_TEMPLATES {
        workspace.render_template_to_file(
            &format!("{}/modules/node/{}.tf.j2", provider_name, template),
            &context,
            &format!("modules/node/{}.tf", template),
        )?;
    }
    Ok(())
}

/// Copy `main.tf` (and `node-*.tf` when `with_nodes`) from `dir` in the
/// repository into the workspace.
///
/// Fails with a configuration error when `main.tf` is missing.
pub(crate) async fn fetch_provider_files(
    committer: &GitOpsCommitter,
    dir: &str,
    workspace: &Workspace,
    with_nodes: bool,
) -> Result<Vec<String>> {
    let mut fetched = Vec::new();
    for entry in committer.list_directory(dir).await? {
        if entry.kind != ContentKind::File || !is_provider_file(&entry.name, with_nodes) {
            continue;
        }
        let Some(content) = committer.read_file(&entry.path).await? else {
            continue;
        };
        workspace.write_file(&entry.name, &content)?;
        fetched.push(entry.name);
    }

    if !fetched.iter().any(|name| name == "main.tf") {
        return Err(Error::Configuration(format!(
            "infrastructure is not initialized: {}/main.tf not found",
            dir
        )));
    }
    Ok(fetched)
}

fn is_provider_file(name: &str, with_nodes: bool) -> bool {
    name == "main.tf" || (with_nodes && name.starts_with("node-") && name.ends_with(".tf"))
}
