// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store for tests and embedders without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Cluster, GitOpsSettings, NewNode, Node, NodeInfoUpdate, NodeRole, NodeStatus, ProviderKind,
    ProvisionRequest, ProvisionStatus, UNKNOWN_ARCH,
};
use crate::store::Store;

#[derive(Default)]
struct State {
    clusters: Vec<Cluster>,
    // Insertion order; newest last.
    nodes: Vec<Node>,
    requests: HashMap<Uuid, ProvisionRequest>,
    gitops: Option<GitOpsSettings>,
}

impl State {
    fn node_mut(&mut self, id: Uuid) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.nodes
            .iter()
            .any(|n| n.name == name && Some(n.id) != except)
    }
}

/// Store holding everything in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persisted GitOps settings.
    pub async fn set_gitops_config(&self, settings: GitOpsSettings) {
        self.state.write().await.gitops = Some(settings);
    }

    /// Every request, in no particular order.
    pub async fn provision_requests(&self) -> Vec<ProvisionRequest> {
        self.state.read().await.requests.values().cloned().collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_cluster(&self) -> Result<Option<Cluster>> {
        Ok(self.state.read().await.clusters.first().cloned())
    }

    async fn create_cluster(&self, name: &str) -> Result<Cluster> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.clusters.iter().find(|c| c.name == name) {
            return Ok(existing.clone());
        }
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: name.to_string(),
            controlplane_config: None,
            worker_config: None,
            created_at: Utc::now(),
        };
        state.clusters.push(cluster.clone());
        Ok(cluster)
    }

    async fn update_cluster_configs(
        &self,
        id: Uuid,
        controlplane_config: Option<&str>,
        worker_config: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(cluster) = state.clusters.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        cluster.controlplane_config = controlplane_config.map(str::to_string);
        cluster.worker_config = worker_config.map(str::to_string);
        Ok(true)
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>> {
        Ok(self.state.read().await.nodes.iter().find(|n| n.id == id).cloned())
    }

    async fn find_node_by_name(&self, name: &str) -> Result<Option<Node>> {
        Ok(self
            .state
            .read()
            .await
            .nodes
            .iter()
            .find(|n| n.name == name)
            .cloned())
    }

    async fn find_node_by_ip(&self, ip: &str, provider: ProviderKind) -> Result<Option<Node>> {
        Ok(self
            .state
            .read()
            .await
            .nodes
            .iter()
            .find(|n| n.provider == provider && n.ip_address.as_deref() == Some(ip))
            .cloned())
    }

    async fn list_nodes(
        &self,
        status: Option<NodeStatus>,
        offset: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        let mut nodes: Vec<Node> = state
            .nodes
            .iter()
            .rev()
            .filter(|n| status.is_none_or(|s| n.status == s))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let limit = limit
            .map(|l| usize::try_from(l.max(0)).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(nodes.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_nodes_with_role(&self, status: NodeStatus, role: NodeRole) -> Result<i64> {
        let count = self
            .state
            .read()
            .await
            .nodes
            .iter()
            .filter(|n| n.status == status && n.role == Some(role))
            .count();
        Ok(count as i64)
    }

    async fn create_node(&self, node: NewNode) -> Result<Node> {
        let mut state = self.state.write().await;
        if state.name_taken(&node.name, None) {
            return Err(Error::InvalidState(format!(
                "node name {} already exists",
                node.name
            )));
        }
        let now = Utc::now();
        let node = Node {
            id: Uuid::new_v4(),
            name: node.name,
            status: node.status,
            role: node.role,
            labels: node.labels,
            architecture: node.architecture,
            provider: node.provider,
            ip_address: node.ip_address,
            mac_address: node.mac_address,
            instance_id: node.instance_id,
            cluster_id: node.cluster_id,
            created_at: now,
            updated_at: now,
        };
        state.nodes.push(node.clone());
        Ok(node)
    }

    async fn update_node_status(
        &self,
        id: Uuid,
        to: NodeStatus,
        from: &[NodeStatus],
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.node_mut(id) {
            Some(node) if from.contains(&node.status) => {
                node.status = to;
                node.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_node_config(
        &self,
        id: Uuid,
        role: Option<NodeRole>,
        labels: &[String],
        required: NodeStatus,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.node_mut(id) {
            Some(node) if node.status == required => {
                if role.is_some() {
                    node.role = role;
                }
                node.labels = labels.to_vec();
                node.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_node_provisioning(
        &self,
        id: Uuid,
        name: &str,
        role: NodeRole,
        labels: &[String],
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.name_taken(name, Some(id)) {
            return Err(Error::InvalidState(format!("node name {} already exists", name)));
        }
        match state.node_mut(id) {
            Some(node) if node.status == NodeStatus::Pending => {
                node.name = name.to_string();
                node.role = Some(role);
                node.labels = labels.to_vec();
                node.status = NodeStatus::Provisioning;
                node.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reprovision_node(
        &self,
        id: Uuid,
        instance_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.node_mut(id) {
            Some(node) if node.status != NodeStatus::Active => {
                node.status = NodeStatus::Provisioning;
                if let Some(instance_id) = instance_id {
                    node.instance_id = Some(instance_id.to_string());
                }
                if let Some(ip) = ip_address {
                    node.ip_address = Some(ip.to_string());
                }
                node.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_node_info(
        &self,
        info: &NodeInfoUpdate,
        cluster_id: Option<Uuid>,
    ) -> Result<Node> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        if let Some(node) = state.nodes.iter_mut().find(|n| n.name == info.name) {
            if info.ip_address.is_some() {
                node.ip_address = info.ip_address.clone();
            }
            if info.mac_address.is_some() {
                node.mac_address = info.mac_address.clone();
            }
            if let Some(arch) = &info.architecture {
                node.architecture = arch.clone();
            }
            if node.cluster_id.is_none() {
                node.cluster_id = cluster_id;
            }
            node.updated_at = now;
            return Ok(node.clone());
        }

        let node = Node {
            id: Uuid::new_v4(),
            name: info.name.clone(),
            status: NodeStatus::Pending,
            role: None,
            labels: Vec::new(),
            architecture: info
                .architecture
                .clone()
                .unwrap_or_else(|| UNKNOWN_ARCH.to_string()),
            provider: ProviderKind::Onprem,
            ip_address: info.ip_address.clone(),
            mac_address: info.mac_address.clone(),
            instance_id: None,
            cluster_id,
            created_at: now,
            updated_at: now,
        };
        state.nodes.push(node.clone());
        Ok(node)
    }

    async fn create_provision_request(
        &self,
        provider: ProviderKind,
        request: &serde_json::Value,
    ) -> Result<ProvisionRequest> {
        let now = Utc::now();
        let req = ProvisionRequest {
            id: Uuid::new_v4(),
            status: ProvisionStatus::Planning,
            provider,
            request: request.clone(),
            plan_output: None,
            node_ids: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.requests.insert(req.id, req.clone());
        Ok(req)
    }

    async fn get_provision_request(&self, id: Uuid) -> Result<Option<ProvisionRequest>> {
        Ok(self.state.read().await.requests.get(&id).cloned())
    }

    async fn update_provision_status(
        &self,
        id: Uuid,
        to: ProvisionStatus,
        from: &[ProvisionStatus],
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.requests.get_mut(&id) {
            Some(req) if from.contains(&req.status) => {
                req.status = to;
                req.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_plan_output(&self, id: Uuid, plan: &str) -> Result<()> {
        if let Some(req) = self.state.write().await.requests.get_mut(&id) {
            req.plan_output = Some(plan.to_string());
            req.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete_provision_request(&self, id: Uuid, node_ids: &[Uuid]) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.requests.get_mut(&id) {
            Some(req) if req.status == ProvisionStatus::Applying => {
                req.status = ProvisionStatus::Completed;
                req.node_ids = node_ids.to_vec();
                req.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_provision_request(&self, id: Uuid, error: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.requests.get_mut(&id) {
            Some(req) if !req.status.is_terminal() => {
                req.status = ProvisionStatus::Failed;
                req.error = Some(error.to_string());
                req.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_gitops_config(&self) -> Result<Option<GitOpsSettings>> {
        Ok(self
            .state
            .read()
            .await
            .gitops
            .clone()
            .filter(|g| g.is_configured))
    }
}
