// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for stolos-provisioner.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stolos_provisioner::runtime::ProvisionerRuntime;
//!
//! let runtime = ProvisionerRuntime::builder()
//!     .store(store)
//!     .provider(provider)
//!     .gitops(gitops)
//!     .engines(Arc::new(TerraformCliFactory::new("terraform")))
//!     .bind_addr("0.0.0.0:8080".parse()?)
//!     .build()?
//!     .start()
//!     .await?;
//!
//! tokio::signal::ctrl_c().await?;
//! runtime.shutdown().await?;
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use stolos_terraform::{EngineFactory, TemplateRenderer};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cluster::{initialize_cluster, load_machine_configs};
use crate::config::{DEFAULT_APPROVAL_TIMEOUT, DEFAULT_CLUSTER_NAME};
use crate::controlplane::{ControlPlaneConnector, UnavailableConnector};
use crate::eventsink::{EventSink, IgnoredNodes};
use crate::gitops::GitOpsSource;
use crate::infrastructure::InfrastructureService;
use crate::jobs::{JobDeps, JobRegistry, JobScheduler, JobSchedulerConfig};
use crate::nodes::NodeService;
use crate::provider::CloudProvider;
use crate::provisioning::ProvisioningService;
use crate::server::{AppState, serve};
use crate::session::SessionManager;
use crate::store::Store;

/// Builder for creating a [`ProvisionerRuntime`].
pub struct ProvisionerRuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    provider: Option<Arc<dyn CloudProvider>>,
    gitops: Option<Arc<dyn GitOpsSource>>,
    engines: Option<Arc<dyn EngineFactory>>,
    connector: Arc<dyn ControlPlaneConnector>,
    bind_addr: SocketAddr,
    templates_dir: PathBuf,
    cluster_name: String,
    controlplane_config: Option<PathBuf>,
    worker_config: Option<PathBuf>,
    approval_timeout: Duration,
    jobs: JobRegistry,
    scheduler_config: JobSchedulerConfig,
    ignored_nodes: Arc<IgnoredNodes>,
}

impl Default for ProvisionerRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            provider: None,
            gitops: None,
            engines: None,
            connector: Arc::new(UnavailableConnector),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            templates_dir: PathBuf::from("terraform-templates"),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            controlplane_config: None,
            worker_config: None,
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            jobs: JobRegistry::with_defaults(),
            scheduler_config: JobSchedulerConfig::default(),
            ignored_nodes: Arc::new(IgnoredNodes::default()),
        }
    }
}

impl ProvisionerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence backend (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the cloud provider (required).
    pub fn provider(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the GitOps repository source (required).
    pub fn gitops(mut self, gitops: Arc<dyn GitOpsSource>) -> Self {
        self.gitops = Some(gitops);
        self
    }

    /// Set the infrastructure engine factory (required).
    pub fn engines(mut self, engines: Arc<dyn EngineFactory>) -> Self {
        self.engines = Some(engines);
        self
    }

    /// Set the node control-plane connector.
    ///
    /// Default: [`UnavailableConnector`]
    pub fn connector(mut self, connector: Arc<dyn ControlPlaneConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Set the HTTP/WebSocket bind address. Port 0 picks a free port.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the infrastructure template directory.
    ///
    /// Default: `terraform-templates`
    pub fn templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = dir.into();
        self
    }

    /// Set the name used when the cluster singleton is created.
    ///
    /// Default: `stolos-cluster`
    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    /// Load base machine configurations from YAML files at start.
    ///
    /// Default: none (stored configurations are kept)
    pub fn machine_configs(
        mut self,
        controlplane: Option<PathBuf>,
        worker: Option<PathBuf>,
    ) -> Self {
        self.controlplane_config = controlplane;
        self.worker_config = worker;
        self
    }

    /// Set how long provisioning waits for approval.
    ///
    /// Default: 30 minutes
    pub fn approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Replace the periodic jobs.
    ///
    /// Default: [`JobRegistry::with_defaults`]
    pub fn jobs(mut self, jobs: JobRegistry) -> Self {
        self.jobs = jobs;
        self
    }

    /// Set the job scheduler configuration.
    ///
    /// Default: [`JobSchedulerConfig::default`]
    pub fn scheduler_config(mut self, config: JobSchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    /// Share an unreachable-node cache with the caller.
    ///
    /// Default: 10 minute TTL, 1024 entries
    pub fn ignored_nodes(mut self, ignored: Arc<IgnoredNodes>) -> Self {
        self.ignored_nodes = ignored;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ProvisionerRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("provider is required"))?;
        let gitops = self
            .gitops
            .ok_or_else(|| anyhow::anyhow!("gitops is required"))?;
        let engines = self
            .engines
            .ok_or_else(|| anyhow::anyhow!("engines is required"))?;

        Ok(ProvisionerRuntimeConfig {
            store,
            provider,
            gitops,
            engines,
            connector: self.connector,
            bind_addr: self.bind_addr,
            templates_dir: self.templates_dir,
            cluster_name: self.cluster_name,
            controlplane_config: self.controlplane_config,
            worker_config: self.worker_config,
            approval_timeout: self.approval_timeout,
            jobs: self.jobs,
            scheduler_config: self.scheduler_config,
            ignored_nodes: self.ignored_nodes,
        })
    }
}

/// Configuration for a [`ProvisionerRuntime`].
pub struct ProvisionerRuntimeConfig {
    store: Arc<dyn Store>,
    provider: Arc<dyn CloudProvider>,
    gitops: Arc<dyn GitOpsSource>,
    engines: Arc<dyn EngineFactory>,
    connector: Arc<dyn ControlPlaneConnector>,
    bind_addr: SocketAddr,
    templates_dir: PathBuf,
    cluster_name: String,
    controlplane_config: Option<PathBuf>,
    worker_config: Option<PathBuf>,
    approval_timeout: Duration,
    jobs: JobRegistry,
    scheduler_config: JobSchedulerConfig,
    ignored_nodes: Arc<IgnoredNodes>,
}

impl ProvisionerRuntimeConfig {
    /// Create the cluster if needed, then start the HTTP server and the job
    /// scheduler.
    pub async fn start(self) -> Result<ProvisionerRuntime> {
        let cluster = initialize_cluster(self.store.as_ref(), &self.cluster_name).await?;
        let cluster = load_machine_configs(
            self.store.as_ref(),
            &cluster,
            self.controlplane_config.as_deref(),
            self.worker_config.as_deref(),
        )
        .await?;
        info!(cluster_id = %cluster.id, name = %cluster.name, "Using cluster");

        let sessions = SessionManager::new();
        let renderer = TemplateRenderer::new(&self.templates_dir);
        let workflows = CancellationToken::new();

        let provisioning = ProvisioningService::new(
            self.store.clone(),
            self.provider.clone(),
            self.gitops.clone(),
            self.engines.clone(),
            renderer.clone(),
        )
        .with_approval_timeout(self.approval_timeout);
        let infrastructure = InfrastructureService::new(
            self.provider.clone(),
            self.gitops.clone(),
            self.engines.clone(),
            renderer,
            cluster.name.clone(),
        );
        let state = AppState {
            store: self.store.clone(),
            sessions: sessions.clone(),
            provisioning: Arc::new(provisioning),
            infrastructure: Arc::new(infrastructure),
            nodes: Arc::new(NodeService::new(self.store.clone(), self.connector.clone())),
            events: Arc::new(EventSink::new(
                self.store.clone(),
                self.connector.clone(),
                sessions.clone(),
                self.ignored_nodes.clone(),
            )),
            shutdown: workflows.clone(),
        };

        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let server_shutdown = Arc::new(Notify::new());
        let server_handle = tokio::spawn(serve(listener, state, server_shutdown.clone()));

        let scheduler = JobScheduler::new(
            self.jobs,
            JobDeps {
                store: self.store.clone(),
                connector: self.connector.clone(),
                sessions: sessions.clone(),
            },
            self.scheduler_config,
        );
        let scheduler_shutdown = scheduler.shutdown_handle();
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        info!(
            bind_addr = %local_addr,
            provider = self.provider.provider_name(),
            provider_configured = self.provider.is_configured(),
            "ProvisionerRuntime started"
        );

        Ok(ProvisionerRuntime {
            server_handle,
            scheduler_handle,
            server_shutdown,
            scheduler_shutdown,
            workflows,
            sessions,
            local_addr,
        })
    }
}

/// A running provisioner: HTTP/WebSocket server plus periodic jobs.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ProvisionerRuntime {
    server_handle: JoinHandle<std::io::Result<()>>,
    scheduler_handle: JoinHandle<()>,
    server_shutdown: Arc<Notify>,
    scheduler_shutdown: Arc<Notify>,
    workflows: CancellationToken,
    sessions: SessionManager,
    local_addr: SocketAddr,
}

impl ProvisionerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ProvisionerRuntimeBuilder {
        ProvisionerRuntimeBuilder::new()
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connected client sessions.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished() && !self.scheduler_handle.is_finished()
    }

    /// Cancel running workflows, close every session, then stop the server
    /// and the scheduler and wait for them.
    pub async fn shutdown(self) -> Result<()> {
        info!("ProvisionerRuntime shutting down...");

        self.workflows.cancel();
        self.sessions.close_all();
        self.scheduler_shutdown.notify_one();
        self.server_shutdown.notify_one();

        if let Err(e) = self.scheduler_handle.await {
            error!("Job scheduler task panicked: {}", e);
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("ProvisionerRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("ProvisionerRuntime server error during shutdown: {}", e);
                Err(e.into())
            }
            Err(e) => {
                error!("ProvisionerRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }
}
