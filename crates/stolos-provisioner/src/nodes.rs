// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node queries, operator edits and on-prem provisioning.
//!
//! Role and label edits only touch `active` nodes; on-prem provisioning only
//! touches `pending` ones. Both are enforced by the store's guarded updates,
//! so a concurrent status change wins over a stale edit.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::controlplane::{ControlPlaneConnector, connect_with_timeout, endpoint, with_timeout};
use crate::error::{Error, Result};
use crate::machine_config::{DEFAULT_INSTALL_DISK, patch_machine_config};
use crate::models::{
    Cluster, Node, NodeProvisionResult, NodeRole, NodeStatus, OnPremNodeProvisionConfig,
    ProviderKind, labels_to_map, node_labels, parse_role,
};
use crate::store::Store;

/// New labels for one active node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeLabelsUpdate {
    /// Target node
    pub node_id: Uuid,
    /// Replacement label set (`key=value`)
    pub labels: Vec<String>,
}

/// Node operations outside the cloud provisioning workflow.
pub struct NodeService {
    store: Arc<dyn Store>,
    connector: Arc<dyn ControlPlaneConnector>,
}

impl NodeService {
    /// Create a service.
    pub fn new(store: Arc<dyn Store>, connector: Arc<dyn ControlPlaneConnector>) -> Self {
        Self { store, connector }
    }

    /// Get a node or fail with [`Error::NotFound`].
    pub async fn get(&self, id: Uuid) -> Result<Node> {
        self.store
            .get_node(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    /// List nodes newest first.
    pub async fn list(
        &self,
        status: Option<NodeStatus>,
        offset: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Node>> {
        self.store.list_nodes(status, offset.max(0), limit).await
    }

    /// Change role (when given) and labels of an active node.
    pub async fn update_active_node_config(
        &self,
        id: Uuid,
        role: Option<&str>,
        labels: &[String],
    ) -> Result<Node> {
        let role = role.map(parse_role).transpose()?;
        if !self
            .store
            .update_node_config(id, role, labels, NodeStatus::Active)
            .await?
        {
            let node = self.get(id).await?;
            return Err(Error::InvalidState(format!(
                "node {} is {}, only active nodes can be reconfigured",
                node.name, node.status
            )));
        }
        info!(node_id = %id, role = ?role, "Node configuration updated");
        self.get(id).await
    }

    /// Replace labels on every listed active node. Returns the ids that
    /// changed; nodes that are missing or not active are skipped.
    pub async fn update_active_nodes_labels(
        &self,
        updates: &[NodeLabelsUpdate],
    ) -> Result<Vec<Uuid>> {
        let mut changed = Vec::with_capacity(updates.len());
        for update in updates {
            if self
                .store
                .update_node_config(update.node_id, None, &update.labels, NodeStatus::Active)
                .await?
            {
                changed.push(update.node_id);
            } else {
                warn!(node_id = %update.node_id, "Skipping label update for inactive node");
            }
        }
        Ok(changed)
    }

    /// Configure pending on-prem nodes and move them to `provisioning`.
    ///
    /// Each node gets its own result; one failure never stops the batch.
    pub async fn provision_onprem_nodes(
        &self,
        configs: &[OnPremNodeProvisionConfig],
    ) -> Result<Vec<NodeProvisionResult>> {
        let cluster = self
            .store
            .get_cluster()
            .await?
            .ok_or_else(|| Error::NotFound("cluster is not initialized".to_string()))?;

        let mut assigned = HashSet::new();
        let mut results = Vec::with_capacity(configs.len());
        for config in configs {
            let result = match self.provision_onprem_node(&cluster, config, &mut assigned).await {
                Ok((name, role, labels)) => {
                    info!(
                        node_id = %config.node_id,
                        name = %name,
                        role = %role,
                        "On-prem node provisioning started"
                    );
                    NodeProvisionResult {
                        node_id: config.node_id,
                        name: Some(name),
                        role: role.to_string(),
                        labels,
                        succeeded: true,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(
                        node_id = %config.node_id,
                        error = %e,
                        "On-prem node provisioning failed"
                    );
                    NodeProvisionResult {
                        node_id: config.node_id,
                        name: None,
                        role: config.role.clone(),
                        labels: config.labels.clone(),
                        succeeded: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn provision_onprem_node(
        &self,
        cluster: &Cluster,
        config: &OnPremNodeProvisionConfig,
        assigned: &mut HashSet<String>,
    ) -> Result<(String, NodeRole, Vec<String>)> {
        let node = self.get(config.node_id).await?;
        if node.provider != ProviderKind::Onprem {
            return Err(Error::InvalidState(format!(
                "node {} is not an on-prem node",
                node.name
            )));
        }
        if node.status != NodeStatus::Pending {
            return Err(Error::InvalidState(format!(
                "node {} is {}, expected pending",
                node.name, node.status
            )));
        }
        let role = parse_role(&config.role)?;
        let address = node
            .ip_address
            .as_deref()
            .ok_or_else(|| Error::InvalidState(format!("node {} has no address", node.name)))?;
        let base = cluster.machine_config(role).ok_or_else(|| {
            Error::Configuration(format!("cluster has no {} machine configuration", role))
        })?;

        let labels = node_labels(ProviderKind::Onprem, role, &config.labels);
        let name = self.next_role_name(role, assigned).await?;
        let disk = match config.install_disk.trim() {
            "" => DEFAULT_INSTALL_DISK,
            disk => disk,
        };
        let machine_config = patch_machine_config(base, &name, disk, &labels_to_map(&labels))?;

        let client = connect_with_timeout(self.connector.as_ref(), &endpoint(address)).await?;
        with_timeout(
            "apply configuration",
            client.apply_configuration(machine_config.as_bytes()),
        )
        .await?;

        if !self
            .store
            .mark_node_provisioning(node.id, &name, role, &labels)
            .await?
        {
            return Err(Error::InvalidState(format!(
                "node {} left pending while being configured",
                node.name
            )));
        }
        assigned.insert(name.clone());
        Ok((name, role, labels))
    }

    /// `{role}-{index}` starting after the active nodes of that role:
    /// control planes count from 1, workers from 0.
    async fn next_role_name(&self, role: NodeRole, assigned: &HashSet<String>) -> Result<String> {
        let first = match role {
            NodeRole::ControlPlane => 1,
            NodeRole::Worker => 0,
        };
        let mut index = self
            .store
            .count_nodes_with_role(NodeStatus::Active, role)
            .await?
            + first;
        loop {
            let name = format!("{}-{}", role, index);
            if !assigned.contains(&name) && self.store.find_node_by_name(&name).await?.is_none() {
                return Ok(name);
            }
            index += 1;
        }
    }
}
