// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for stolos-provisioner.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default cluster name.
pub const DEFAULT_CLUSTER_NAME: &str = "stolos-cluster";
/// Default approval wait (30 minutes).
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Bind address for the HTTP/WebSocket surface
    pub http_addr: SocketAddr,
    /// Name of the cluster singleton
    pub cluster_name: String,
    /// Base directory of infrastructure templates
    pub templates_dir: PathBuf,
    /// Infrastructure engine binary
    pub terraform_bin: String,
    /// How long a provisioning run waits for a decision
    pub approval_timeout: Duration,
    /// Base control-plane machine configuration (YAML file)
    pub controlplane_config_path: Option<PathBuf>,
    /// Base worker machine configuration (YAML file)
    pub worker_config_path: Option<PathBuf>,
    /// Cloud provider inputs
    pub gcp: GcpConfig,
}

/// Google Cloud inputs. Everything but the region is optional; the provider
/// reports itself unconfigured until project and credentials are present.
#[derive(Debug, Clone, Default)]
pub struct GcpConfig {
    /// Project hosting the nodes
    pub project_id: String,
    /// Region for subnets and state
    pub region: String,
    /// Service account key (JSON document)
    pub service_account_json: Option<String>,
    /// Bucket holding remote state and machine configs
    pub state_bucket: String,
    /// Project the node OS images live in
    pub talos_image_project: String,
    /// Node OS image for amd64 machines
    pub talos_image_amd64: String,
    /// Node OS image for arm64 machines
    pub talos_image_arm64: String,
}

impl GcpConfig {
    /// Load from `GCP_*` variables.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let project_id = var("GCP_PROJECT_ID").unwrap_or_default();
        Self {
            region: var("GCP_REGION").unwrap_or_else(|| "us-central1".to_string()),
            service_account_json: var("GCP_SERVICE_ACCOUNT_JSON"),
            state_bucket: var("GCP_STATE_BUCKET")
                .unwrap_or_else(|| format!("{}-stolos-state", project_id)),
            talos_image_project: var("GCP_TALOS_IMAGE_PROJECT")
                .unwrap_or_else(|| project_id.clone()),
            talos_image_amd64: var("GCP_TALOS_IMAGE_AMD64").unwrap_or_default(),
            talos_image_arm64: var("GCP_TALOS_IMAGE_ARM64").unwrap_or_default(),
            project_id,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = match std::env::var("STOLOS_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
        {
            Ok(url) => url,
            Err(_) => database_url_from_parts()?,
        };

        let port: u16 = std::env::var("STOLOS_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let cluster_name =
            std::env::var("CLUSTER_NAME").unwrap_or_else(|_| DEFAULT_CLUSTER_NAME.to_string());

        let templates_dir = PathBuf::from(
            std::env::var("TERRAFORM_TEMPLATES_DIR")
                .unwrap_or_else(|_| "terraform-templates".to_string()),
        );

        let terraform_bin =
            std::env::var("TERRAFORM_BIN").unwrap_or_else(|_| "terraform".to_string());

        let approval_timeout = match std::env::var("APPROVAL_TIMEOUT_SECS") {
            Ok(v) => Duration::from_secs(
                v.parse()
                    .map_err(|_| ConfigError::InvalidNumber("APPROVAL_TIMEOUT_SECS"))?,
            ),
            Err(_) => DEFAULT_APPROVAL_TIMEOUT,
        };

        let path_var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };

        Ok(Self {
            database_url,
            http_addr,
            cluster_name,
            templates_dir,
            terraform_bin,
            approval_timeout,
            controlplane_config_path: path_var("CLUSTER_CONTROLPLANE_CONFIG"),
            worker_config_path: path_var("CLUSTER_WORKER_CONFIG"),
            gcp: GcpConfig::from_env(),
        })
    }
}

fn database_url_from_parts() -> Result<String, ConfigError> {
    let host = std::env::var("DB_HOST").map_err(|_| {
        ConfigError::MissingEnvVar("STOLOS_DATABASE_URL, DATABASE_URL or DB_HOST")
    })?;
    let port: u16 = std::env::var("DB_PORT")
        .unwrap_or_else(|_| "5432".to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidPort)?;
    let user = std::env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("DB_PASSWORD").unwrap_or_default();
    let name = std::env::var("DB_NAME").unwrap_or_else(|_| "stolos".to_string());

    Ok(format!(
        "postgres://{}:{}@{}:{}/{}",
        user, password, host, port, name
    ))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A numeric variable could not be parsed.
    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
}
