// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{self, ClusterRow, NodeRow, ProvisionRequestRow};
use crate::error::Result;
use crate::models::{
    Cluster, GitOpsSettings, NewNode, Node, NodeInfoUpdate, NodeRole, NodeStatus, ProviderKind,
    ProvisionRequest, ProvisionStatus,
};
use crate::store::Store;

/// Store backed by the `clusters`, `nodes`, `provision_requests` and
/// `gitops_configs` tables.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn strings<T: ToString>(values: &[T]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

impl From<ClusterRow> for Cluster {
    fn from(row: ClusterRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            controlplane_config: row.controlplane_config,
            worker_config: row.worker_config,
            created_at: row.created_at,
        }
    }
}

impl TryFrom<NodeRow> for Node {
    type Error = crate::error::Error;

    fn try_from(row: NodeRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            status: row.status.parse()?,
            role: row.role.as_deref().map(str::parse).transpose()?,
            labels: row.labels,
            architecture: row.architecture,
            provider: row.provider.parse()?,
            ip_address: row.ip_address,
            mac_address: row.mac_address,
            instance_id: row.instance_id,
            cluster_id: row.cluster_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<ProvisionRequestRow> for ProvisionRequest {
    type Error = crate::error::Error;

    fn try_from(row: ProvisionRequestRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            status: row.status.parse()?,
            provider: row.provider.parse()?,
            request: row.request,
            plan_output: row.plan_output,
            node_ids: row.node_ids,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_cluster(&self) -> Result<Option<Cluster>> {
        Ok(db::get_cluster(&self.pool).await?.map(Cluster::from))
    }

    async fn create_cluster(&self, name: &str) -> Result<Cluster> {
        Ok(db::create_cluster(&self.pool, name).await?.into())
    }

    async fn update_cluster_configs(
        &self,
        id: Uuid,
        controlplane_config: Option<&str>,
        worker_config: Option<&str>,
    ) -> Result<bool> {
        Ok(db::update_cluster_configs(&self.pool, id, controlplane_config, worker_config).await?)
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>> {
        db::get_node(&self.pool, id).await?.map(Node::try_from).transpose()
    }

    async fn find_node_by_name(&self, name: &str) -> Result<Option<Node>> {
        db::find_node_by_name(&self.pool, name)
            .await?
            .map(Node::try_from)
            .transpose()
    }

    async fn find_node_by_ip(&self, ip: &str, provider: ProviderKind) -> Result<Option<Node>> {
        db::find_node_by_ip(&self.pool, ip, provider.as_str())
            .await?
            .map(Node::try_from)
            .transpose()
    }

    async fn list_nodes(
        &self,
        status: Option<NodeStatus>,
        offset: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Node>> {
        db::list_nodes(&self.pool, status.as_ref().map(NodeStatus::as_str), offset, limit)
            .await?
            .into_iter()
            .map(Node::try_from)
            .collect()
    }

    async fn count_nodes_with_role(&self, status: NodeStatus, role: NodeRole) -> Result<i64> {
        Ok(db::count_nodes_with_role(&self.pool, status.as_str(), role.as_str()).await?)
    }

    async fn create_node(&self, node: NewNode) -> Result<Node> {
        db::create_node(
            &self.pool,
            &node.name,
            node.status.as_str(),
            node.role.as_ref().map(NodeRole::as_str),
            &node.labels,
            &node.architecture,
            node.provider.as_str(),
            node.ip_address.as_deref(),
            node.mac_address.as_deref(),
            node.instance_id.as_deref(),
            node.cluster_id,
        )
        .await?
        .try_into()
    }

    async fn update_node_status(
        &self,
        id: Uuid,
        to: NodeStatus,
        from: &[NodeStatus],
    ) -> Result<bool> {
        Ok(db::update_node_status(&self.pool, id, to.as_str(), &strings(from)).await?)
    }

    async fn update_node_config(
        &self,
        id: Uuid,
        role: Option<NodeRole>,
        labels: &[String],
        required: NodeStatus,
    ) -> Result<bool> {
        Ok(db::update_node_config(
            &self.pool,
            id,
            role.as_ref().map(NodeRole::as_str),
            labels,
            required.as_str(),
        )
        .await?)
    }

    async fn mark_node_provisioning(
        &self,
        id: Uuid,
        name: &str,
        role: NodeRole,
        labels: &[String],
    ) -> Result<bool> {
        Ok(db::mark_node_provisioning(&self.pool, id, name, role.as_str(), labels).await?)
    }

    async fn reprovision_node(
        &self,
        id: Uuid,
        instance_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<bool> {
        Ok(db::reprovision_node(&self.pool, id, instance_id, ip_address).await?)
    }

    async fn upsert_node_info(
        &self,
        info: &NodeInfoUpdate,
        cluster_id: Option<Uuid>,
    ) -> Result<Node> {
        db::upsert_node_info(
            &self.pool,
            &info.name,
            info.ip_address.as_deref(),
            info.mac_address.as_deref(),
            info.architecture.as_deref(),
            cluster_id,
        )
        .await?
        .try_into()
    }

    async fn create_provision_request(
        &self,
        provider: ProviderKind,
        request: &serde_json::Value,
    ) -> Result<ProvisionRequest> {
        db::create_provision_request(&self.pool, provider.as_str(), request)
            .await?
            .try_into()
    }

    async fn get_provision_request(&self, id: Uuid) -> Result<Option<ProvisionRequest>> {
        db::get_provision_request(&self.pool, id)
            .await?
            .map(ProvisionRequest::try_from)
            .transpose()
    }

    async fn update_provision_status(
        &self,
        id: Uuid,
        to: ProvisionStatus,
        from: &[ProvisionStatus],
    ) -> Result<bool> {
        Ok(db::update_provision_status(&self.pool, id, to.as_str(), &strings(from)).await?)
    }

    async fn set_plan_output(&self, id: Uuid, plan: &str) -> Result<()> {
        Ok(db::set_plan_output(&self.pool, id, plan).await?)
    }

    async fn complete_provision_request(&self, id: Uuid, node_ids: &[Uuid]) -> Result<bool> {
        Ok(db::complete_provision_request(&self.pool, id, node_ids).await?)
    }

    async fn fail_provision_request(&self, id: Uuid, error: &str) -> Result<bool> {
        Ok(db::fail_provision_request(&self.pool, id, error).await?)
    }

    async fn get_gitops_config(&self) -> Result<Option<GitOpsSettings>> {
        Ok(db::get_gitops_config(&self.pool).await?.map(|row| GitOpsSettings {
            owner: row.owner,
            repo: row.repo,
            branch: row.branch,
            working_dir: row.working_dir,
            username: row.username,
            email: row.email,
            is_configured: row.is_configured,
        }))
    }
}
