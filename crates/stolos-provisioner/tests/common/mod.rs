// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for stolos-provisioner integration tests.
//!
//! Provides a [`TestContext`] wiring the services to in-memory doubles: store,
//! infrastructure engine, GitOps repository, object storage and node control
//! plane.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stolos_gitops::{GitOpsCommitter, GitOpsConfig, InMemoryRepository};
use stolos_provisioner::config::GcpConfig;
use stolos_provisioner::controlplane::MockControlPlane;
use stolos_provisioner::eventsink::{EventSink, IgnoredNodes};
use stolos_provisioner::gitops::StaticGitOps;
use stolos_provisioner::infrastructure::InfrastructureService;
use stolos_provisioner::jobs::JobDeps;
use stolos_provisioner::models::{
    Cluster, GcpNodeProvisionRequest, NewNode, Node, NodeRole, NodeStatus, ProviderKind,
    UNKNOWN_ARCH,
};
use stolos_provisioner::nodes::NodeService;
use stolos_provisioner::provider::{GcpProvider, InMemoryObjectStore};
use stolos_provisioner::provisioning::ProvisioningService;
use stolos_provisioner::server::AppState;
use stolos_provisioner::session::{ClientEnd, SessionManager};
use stolos_provisioner::store::{InMemoryStore, Store};
use stolos_terraform::{MockEngine, MockEngineFactory, TemplateRenderer};
use tokio_util::sync::CancellationToken;

pub const CLUSTER_NAME: &str = "test-cluster";
pub const BRANCH: &str = "main";
/// Where the provider's files live in the repository.
pub const PROVIDER_DIR: &str = "terraform/gcp";
pub const MAIN_TF: &str = "# base infrastructure\n";
pub const WORKER_CONFIG: &str = "version: v1alpha1\nmachine:\n  type: worker\n  install:\n    \
                                 diskSelector:\n      size: '> 10GB'\n";
pub const CONTROLPLANE_CONFIG: &str = "version: v1alpha1\nmachine:\n  type: controlplane\n";

/// Directory holding the shipped infrastructure templates.
pub fn templates_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../terraform-templates")
}

pub fn gcp_config() -> GcpConfig {
    GcpConfig {
        project_id: "test-project".into(),
        region: "europe-west1".into(),
        service_account_json: Some("{}".into()),
        state_bucket: "test-state".into(),
        talos_image_project: "talos-images".into(),
        talos_image_amd64: "talos-v1-8-amd64".into(),
        talos_image_arm64: String::new(),
    }
}

pub fn worker_request(number: u32) -> GcpNodeProvisionRequest {
    GcpNodeProvisionRequest {
        name_prefix: "worker".into(),
        number,
        zone: "europe-west1-b".into(),
        machine_type: "e2-standard-4".into(),
        role: "worker".into(),
        labels: vec!["team=platform".into()],
        disk_size_gb: 50,
        disk_type: "pd-ssd".into(),
    }
}

/// Services wired to in-memory doubles.
pub struct TestContext {
    pub store: Arc<InMemoryStore>,
    pub engines: MockEngineFactory,
    pub repo: Arc<InMemoryRepository>,
    pub storage: Arc<InMemoryObjectStore>,
    pub controlplane: MockControlPlane,
    pub provider: Arc<GcpProvider>,
    pub gitops: Arc<StaticGitOps>,
    pub sessions: SessionManager,
    pub cluster: Cluster,
    pub provisioning: Arc<ProvisioningService>,
    pub infrastructure: Arc<InfrastructureService>,
    pub nodes: Arc<NodeService>,
    pub events: Arc<EventSink>,
    pub shutdown: CancellationToken,
}

impl TestContext {
    /// Context with an initialized provider directory in the repository and
    /// both base machine configurations stored.
    pub async fn new() -> Self {
        let mut files = BTreeMap::new();
        files.insert(format!("{}/main.tf", PROVIDER_DIR), MAIN_TF.as_bytes().to_vec());
        Self::with_repository(InMemoryRepository::with_files(BRANCH, files), gcp_config()).await
    }

    /// Context over `repo` and `gcp`.
    pub async fn with_repository(repo: InMemoryRepository, gcp: GcpConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let cluster = store.create_cluster(CLUSTER_NAME).await.unwrap();
        store
            .update_cluster_configs(cluster.id, Some(CONTROLPLANE_CONFIG), Some(WORKER_CONFIG))
            .await
            .unwrap();
        let cluster = store.get_cluster().await.unwrap().unwrap();

        let repo = Arc::new(repo);
        let committer = GitOpsCommitter::new(repo.clone(), GitOpsConfig::new("acme", "infra"));
        let gitops = Arc::new(StaticGitOps::new(committer));
        let engines = MockEngineFactory::new(MockEngine::new("/unused"));
        let storage = Arc::new(InMemoryObjectStore::new());
        let provider = Arc::new(GcpProvider::new(gcp, storage.clone()));
        let renderer = TemplateRenderer::new(templates_dir());
        let controlplane = MockControlPlane::new();
        let sessions = SessionManager::new();
        let store_dyn: Arc<dyn Store> = store.clone();

        let provisioning = ProvisioningService::new(
            store_dyn.clone(),
            provider.clone(),
            gitops.clone(),
            Arc::new(engines.clone()),
            renderer.clone(),
        );
        let infrastructure = InfrastructureService::new(
            provider.clone(),
            gitops.clone(),
            Arc::new(engines.clone()),
            renderer,
            CLUSTER_NAME,
        );
        let nodes = NodeService::new(store_dyn.clone(), Arc::new(controlplane.clone()));
        let events = EventSink::new(
            store_dyn,
            Arc::new(controlplane.clone()),
            sessions.clone(),
            Arc::new(IgnoredNodes::default()),
        );

        Self {
            store,
            engines,
            repo,
            storage,
            controlplane,
            provider,
            gitops,
            sessions,
            cluster,
            provisioning: Arc::new(provisioning),
            infrastructure: Arc::new(infrastructure),
            nodes: Arc::new(nodes),
            events: Arc::new(events),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn engine(&self) -> &MockEngine {
        self.engines.engine()
    }

    /// A provisioning service over the same doubles with another approval timeout.
    pub fn provisioning_with_timeout(&self, timeout: Duration) -> ProvisioningService {
        ProvisioningService::new(
            self.store.clone(),
            self.provider.clone(),
            self.gitops.clone(),
            Arc::new(self.engines.clone()),
            TemplateRenderer::new(templates_dir()),
        )
        .with_approval_timeout(timeout)
    }

    pub fn job_deps(&self) -> JobDeps {
        JobDeps {
            store: self.store.clone(),
            connector: Arc::new(self.controlplane.clone()),
            sessions: self.sessions.clone(),
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            sessions: self.sessions.clone(),
            provisioning: self.provisioning.clone(),
            infrastructure: self.infrastructure.clone(),
            nodes: self.nodes.clone(),
            events: self.events.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Content of `path` on the branch head.
    pub async fn repo_file(&self, path: &str) -> Option<String> {
        self.repo
            .file(BRANCH, path)
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Insert a node directly into the store. Active nodes get the worker role.
pub async fn add_node(
    ctx: &TestContext,
    name: &str,
    status: NodeStatus,
    provider: ProviderKind,
    ip: &str,
) -> Node {
    ctx.store
        .create_node(NewNode {
            name: name.into(),
            status,
            role: (status == NodeStatus::Active).then_some(NodeRole::Worker),
            labels: vec!["role=worker".into()],
            architecture: UNKNOWN_ARCH.into(),
            provider,
            ip_address: Some(ip.into()),
            mac_address: None,
            instance_id: None,
            cluster_id: Some(ctx.cluster.id),
        })
        .await
        .unwrap()
}

/// Read frames until one of type `kind` arrives; returns it and everything
/// seen before it.
pub async fn next_of_type(client: &mut ClientEnd, kind: &str) -> (Value, Vec<Value>) {
    let mut seen = Vec::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), client.next_json())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for '{}' frame", kind))
            .unwrap_or_else(|| panic!("connection closed before '{}' frame", kind));
        if frame["type"] == kind {
            return (frame, seen);
        }
        seen.push(frame);
    }
}

/// Frame types in arrival order.
pub fn types(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|f| f["type"].as_str().map(str::to_string))
        .collect()
}
