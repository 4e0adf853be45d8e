// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence of clusters, nodes, provision requests and GitOps settings.
//!
//! Every status-changing method is conditioned on the current status and
//! returns `true` only when it changed the row.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Cluster, GitOpsSettings, NewNode, Node, NodeInfoUpdate, NodeRole, NodeStatus, ProviderKind,
    ProvisionRequest, ProvisionStatus,
};

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Durable state used by the provisioner.
#[async_trait]
pub trait Store: Send + Sync {
    /// The cluster singleton, if created.
    async fn get_cluster(&self) -> Result<Option<Cluster>>;

    /// Create the cluster singleton.
    async fn create_cluster(&self, name: &str) -> Result<Cluster>;

    /// Replace a cluster's base machine configurations.
    async fn update_cluster_configs(
        &self,
        id: Uuid,
        controlplane_config: Option<&str>,
        worker_config: Option<&str>,
    ) -> Result<bool>;

    /// Get a node by id.
    async fn get_node(&self, id: Uuid) -> Result<Option<Node>>;

    /// Get a node by name.
    async fn find_node_by_name(&self, name: &str) -> Result<Option<Node>>;

    /// Get a node by address and provider.
    async fn find_node_by_ip(&self, ip: &str, provider: ProviderKind) -> Result<Option<Node>>;

    /// List nodes newest first. `limit = None` returns everything after `offset`.
    async fn list_nodes(
        &self,
        status: Option<NodeStatus>,
        offset: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Node>>;

    /// Count nodes with `status` and `role`.
    async fn count_nodes_with_role(&self, status: NodeStatus, role: NodeRole) -> Result<i64>;

    /// Insert a node.
    async fn create_node(&self, node: NewNode) -> Result<Node>;

    /// Move a node to `to` if its status is one of `from`.
    async fn update_node_status(&self, id: Uuid, to: NodeStatus, from: &[NodeStatus])
    -> Result<bool>;

    /// Replace role (when given) and labels if the node has `required` status.
    async fn update_node_config(
        &self,
        id: Uuid,
        role: Option<NodeRole>,
        labels: &[String],
        required: NodeStatus,
    ) -> Result<bool>;

    /// Rename a pending node and move it to provisioning.
    async fn mark_node_provisioning(
        &self,
        id: Uuid,
        name: &str,
        role: NodeRole,
        labels: &[String],
    ) -> Result<bool>;

    /// Move a non-active node back to provisioning with new instance details.
    async fn reprovision_node(
        &self,
        id: Uuid,
        instance_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<bool>;

    /// Insert or merge a discovered node by name.
    async fn upsert_node_info(&self, info: &NodeInfoUpdate, cluster_id: Option<Uuid>)
    -> Result<Node>;

    /// Insert a request in `planning`.
    async fn create_provision_request(
        &self,
        provider: ProviderKind,
        request: &serde_json::Value,
    ) -> Result<ProvisionRequest>;

    /// Get a request by id.
    async fn get_provision_request(&self, id: Uuid) -> Result<Option<ProvisionRequest>>;

    /// Move a request to `to` if its status is one of `from`.
    async fn update_provision_status(
        &self,
        id: Uuid,
        to: ProvisionStatus,
        from: &[ProvisionStatus],
    ) -> Result<bool>;

    /// Store the human-readable plan.
    async fn set_plan_output(&self, id: Uuid, plan: &str) -> Result<()>;

    /// Record nodes and complete an applying request.
    async fn complete_provision_request(&self, id: Uuid, node_ids: &[Uuid]) -> Result<bool>;

    /// Fail a non-terminal request.
    async fn fail_provision_request(&self, id: Uuid, error: &str) -> Result<bool>;

    /// Persisted GitOps settings, if configured.
    async fn get_gitops_config(&self) -> Result<Option<GitOpsSettings>>;
}
