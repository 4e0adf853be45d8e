// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node control-plane protocol boundary.
//!
//! Nodes expose a management API on port 50000. The provisioner only needs
//! a handful of capabilities, every call bounded by [`CALL_TIMEOUT`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

mod mock;
mod net;

pub use mock::{MockControlPlane, MockNode, UnavailableConnector};
pub use net::{VIRTUAL_INTERFACE_PREFIXES, best_external_mac, detect_arch, endpoint, select_address};

/// Management API port.
pub const CONTROL_PLANE_PORT: u16 = 50000;

/// Upper bound for one remote call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Control-plane failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ControlPlaneError {
    /// The node could not be reached.
    #[error("node {0} unreachable")]
    Unreachable(String),
    /// The call did not finish in time.
    #[error("{0} timed out")]
    Timeout(String),
    /// The node answered with an error.
    #[error("{0}")]
    Call(String),
    /// The requested resource does not exist on the node.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for control-plane calls.
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

/// Machine lifecycle as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStatus {
    /// Stage name, e.g. `booting`, `running`, `maintenance`
    pub stage: String,
    /// Whether every readiness check passes
    pub ready: bool,
}

impl MachineStatus {
    /// Stage reported by a fully booted machine.
    pub const RUNNING: &'static str = "running";

    /// Running and ready.
    pub fn is_running_and_ready(&self) -> bool {
        self.stage.eq_ignore_ascii_case(Self::RUNNING) && self.ready
    }
}

/// A cluster member known to the discovery registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliate {
    /// Registry id
    pub id: String,
    /// Hostname, may be empty
    pub hostname: String,
    /// Kubernetes node name, may be empty
    pub nodename: String,
    /// Addresses the member advertises
    pub addresses: Vec<String>,
}

impl Affiliate {
    /// Stable key: hostname, else node name. Empty if neither is known.
    pub fn key(&self) -> &str {
        if self.hostname.is_empty() {
            &self.nodename
        } else {
            &self.hostname
        }
    }
}

/// One network link on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    /// Interface name
    pub name: String,
    /// Hardware address, may be empty
    pub hardware_addr: String,
    /// Carrier present
    pub link_up: bool,
    /// Operational state, e.g. `up`, `down`, `unknown`
    pub operational_state: String,
}

/// One health-check progress line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMessage {
    /// Check progress text
    pub message: String,
    /// Set on failure
    pub error: Option<String>,
}

/// Software identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// OS release tag
    pub tag: String,
    /// CPU architecture
    pub arch: String,
}

/// Capabilities of one connected node.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Address this client talks to.
    fn address(&self) -> &str;

    /// Machine stage and readiness.
    async fn machine_status(&self) -> Result<MachineStatus>;

    /// Members of the discovery registry.
    async fn list_affiliates(&self) -> Result<Vec<Affiliate>>;

    /// Network links of the node.
    async fn list_link_statuses(&self) -> Result<Vec<LinkStatus>>;

    /// Read a file from the node.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Stream cluster health-check progress until it completes.
    async fn health_check(&self) -> Result<BoxStream<'static, Result<HealthMessage>>>;

    /// Apply a machine configuration.
    async fn apply_configuration(&self, config: &[u8]) -> Result<()>;

    /// OS version and architecture.
    async fn version(&self) -> Result<VersionInfo>;
}

/// Opens clients to nodes.
#[async_trait]
pub trait ControlPlaneConnector: Send + Sync {
    /// Connect to `address` (`ip` or `ip:port`).
    async fn connect(&self, address: &str) -> Result<Arc<dyn ControlPlaneClient>>;
}

/// Run `call`, failing with [`ControlPlaneError::Timeout`] after [`CALL_TIMEOUT`].
pub async fn with_timeout<T, F>(what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(CALL_TIMEOUT, call).await {
        Ok(result) => result,
        Err(_) => Err(ControlPlaneError::Timeout(what.to_string())),
    }
}

/// Connect and query in one bounded step.
pub async fn connect_with_timeout(
    connector: &dyn ControlPlaneConnector,
    address: &str,
) -> Result<Arc<dyn ControlPlaneClient>> {
    with_timeout(&format!("connect to {}", address), connector.connect(address)).await
}
