// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process control plane for tests, and the connector used when none is configured.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::Mutex;

use crate::controlplane::{
    Affiliate, ControlPlaneClient, ControlPlaneConnector, ControlPlaneError, HealthMessage,
    LinkStatus, MachineStatus, Result, VersionInfo,
};

/// State of one simulated node.
#[derive(Debug, Clone)]
pub struct MockNode {
    /// Reported machine status
    pub status: MachineStatus,
    /// Reported registry members
    pub affiliates: Vec<Affiliate>,
    /// Reported network links
    pub links: Vec<LinkStatus>,
    /// Readable files
    pub files: HashMap<String, Vec<u8>>,
    /// Health-check lines
    pub health: Vec<HealthMessage>,
    /// Reported version
    pub version: VersionInfo,
}

impl Default for MockNode {
    fn default() -> Self {
        Self {
            status: MachineStatus {
                stage: MachineStatus::RUNNING.to_string(),
                ready: true,
            },
            affiliates: Vec::new(),
            links: Vec::new(),
            files: HashMap::new(),
            health: Vec::new(),
            version: VersionInfo {
                tag: "v1.8.0".to_string(),
                arch: "amd64".to_string(),
            },
        }
    }
}

impl MockNode {
    /// Node with one up `eth0` link and an x86_64 cpuinfo.
    pub fn with_mac(mac: &str) -> Self {
        let mut node = Self::default();
        node.links.push(LinkStatus {
            name: "eth0".to_string(),
            hardware_addr: mac.to_string(),
            link_up: true,
            operational_state: "up".to_string(),
        });
        node.files.insert(
            "/proc/cpuinfo".to_string(),
            b"processor : 0\nmodel name : x86_64".to_vec(),
        );
        node
    }
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, MockNode>,
    unreachable: HashSet<String>,
    hanging: HashSet<String>,
    connects: Vec<String>,
    applied: Vec<(String, Vec<u8>)>,
}

/// Simulated set of nodes keyed by IP.
#[derive(Clone, Default)]
pub struct MockControlPlane {
    state: Arc<Mutex<State>>,
}

fn host(address: &str) -> String {
    if let Ok(addr) = address.parse::<std::net::SocketAddr>() {
        return addr.ip().to_string();
    }
    address.to_string()
}

impl MockControlPlane {
    /// Empty control plane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the node at `ip`.
    pub async fn add_node(&self, ip: &str, node: MockNode) {
        self.state.lock().await.nodes.insert(ip.to_string(), node);
    }

    /// Refuse connections to `ip`.
    pub async fn set_unreachable(&self, ip: &str) {
        self.state.lock().await.unreachable.insert(ip.to_string());
    }

    /// Accept connections to `ip` but never answer calls.
    pub async fn set_hanging(&self, ip: &str) {
        self.state.lock().await.hanging.insert(ip.to_string());
    }

    /// Change the reported status of `ip`.
    pub async fn set_status(&self, ip: &str, stage: &str, ready: bool) {
        if let Some(node) = self.state.lock().await.nodes.get_mut(ip) {
            node.status = MachineStatus {
                stage: stage.to_string(),
                ready,
            };
        }
    }

    /// Every address a connection was attempted to.
    pub async fn connects(&self) -> Vec<String> {
        self.state.lock().await.connects.clone()
    }

    /// Configurations applied, with the address they were applied to.
    pub async fn applied(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().await.applied.clone()
    }
}

#[async_trait]
impl ControlPlaneConnector for MockControlPlane {
    async fn connect(&self, address: &str) -> Result<Arc<dyn ControlPlaneClient>> {
        let ip = host(address);
        let mut state = self.state.lock().await;
        state.connects.push(ip.clone());
        if state.unreachable.contains(&ip) || !state.nodes.contains_key(&ip) {
            return Err(ControlPlaneError::Unreachable(ip));
        }
        Ok(Arc::new(MockClient {
            ip,
            state: self.state.clone(),
        }))
    }
}

struct MockClient {
    ip: String,
    state: Arc<Mutex<State>>,
}

impl MockClient {
    async fn node(&self) -> Result<MockNode> {
        let hanging = {
            let state = self.state.lock().await;
            state.hanging.contains(&self.ip)
        };
        if hanging {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let state = self.state.lock().await;
        state
            .nodes
            .get(&self.ip)
            .cloned()
            .ok_or_else(|| ControlPlaneError::Unreachable(self.ip.clone()))
    }
}

#[async_trait]
impl ControlPlaneClient for MockClient {
    fn address(&self) -> &str {
        &self.ip
    }

    async fn machine_status(&self) -> Result<MachineStatus> {
        Ok(self.node().await?.status)
    }

    async fn list_affiliates(&self) -> Result<Vec<Affiliate>> {
        Ok(self.node().await?.affiliates)
    }

    async fn list_link_statuses(&self) -> Result<Vec<LinkStatus>> {
        Ok(self.node().await?.links)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.node()
            .await?
            .files
            .remove(path)
            .ok_or_else(|| ControlPlaneError::NotFound(path.to_string()))
    }

    async fn health_check(&self) -> Result<BoxStream<'static, Result<HealthMessage>>> {
        let lines = self.node().await?.health;
        Ok(stream::iter(lines.into_iter().map(Ok)).boxed())
    }

    async fn apply_configuration(&self, config: &[u8]) -> Result<()> {
        self.node().await?;
        self.state
            .lock()
            .await
            .applied
            .push((self.ip.clone(), config.to_vec()));
        Ok(())
    }

    async fn version(&self) -> Result<VersionInfo> {
        Ok(self.node().await?.version)
    }
}

/// Connector that refuses every connection.
#[derive(Debug, Default, Clone)]
pub struct UnavailableConnector;

#[async_trait]
impl ControlPlaneConnector for UnavailableConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn ControlPlaneClient>> {
        Err(ControlPlaneError::Unreachable(format!(
            "{} (no control-plane client configured)",
            address
        )))
    }
}
