// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stolos Provisioner - node provisioning server
//!
//! An HTTP/WebSocket server responsible for:
//! - Approval-gated cloud node provisioning
//! - Base infrastructure lifecycle
//! - On-prem node registration and provisioning
//! - Periodic node lifecycle reconciliation

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use stolos_gitops::GitHubSettings;
use stolos_provisioner::config::Config;
use stolos_provisioner::gitops::GitHubGitOps;
use stolos_provisioner::provider::{
    GcpProvider, GcsAuth, GcsClient, InMemoryObjectStore, ObjectStore,
};
use stolos_provisioner::runtime::ProvisionerRuntime;
use stolos_provisioner::store::{PostgresStore, Store};
use stolos_terraform::{TerraformCliFactory, check_installed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stolos_provisioner=info,stolos_terraform=info,stolos_gitops=info".into()
            }),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        cluster = %config.cluster_name,
        templates_dir = %config.templates_dir.display(),
        "Starting Stolos Provisioner"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    sqlx::raw_sql(include_str!("../migrations/schema.sql"))
        .execute(&pool)
        .await?;

    info!("Database schema verified");

    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(pool));

    match check_installed(Path::new(&config.terraform_bin)).await {
        Ok(version) => info!(version = %version, "Infrastructure engine found"),
        Err(e) => warn!(error = %e, "Infrastructure engine not available"),
    }
    let engines = Arc::new(TerraformCliFactory::new(&config.terraform_bin));

    let storage: Arc<dyn ObjectStore> = match config.gcp.service_account_json.as_deref() {
        Some(json) => Arc::new(GcsClient::new(GcsAuth::from_service_account_json(json)?)?),
        None => {
            warn!("GCP_SERVICE_ACCOUNT_JSON not set, cloud provisioning is disabled");
            Arc::new(InMemoryObjectStore::new())
        }
    };
    let provider = Arc::new(GcpProvider::new(config.gcp.clone(), storage));

    let github = match GitHubSettings::from_env() {
        Ok(settings) => Some(settings),
        Err(e) => {
            warn!(error = %e, "GitHub credentials not configured, GitOps commits are disabled");
            None
        }
    };
    let gitops = Arc::new(GitHubGitOps::new(store.clone(), github));

    let runtime = ProvisionerRuntime::builder()
        .store(store)
        .provider(provider)
        .gitops(gitops)
        .engines(engines)
        .bind_addr(config.http_addr)
        .templates_dir(&config.templates_dir)
        .cluster_name(&config.cluster_name)
        .machine_configs(
            config.controlplane_config_path.clone(),
            config.worker_config_path.clone(),
        )
        .approval_timeout(config.approval_timeout)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Provisioner server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Stolos Provisioner shut down");

    Ok(())
}
