// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database operations for stolos-provisioner.
//!
//! Status changes are single-row `UPDATE`s conditioned on the current status,
//! so a provisioning run and a reconciliation pass never overwrite each
//! other's transition. Each guarded update reports whether a row changed.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Cluster record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClusterRow {
    /// Unique identifier.
    pub id: Uuid,
    /// Cluster name.
    pub name: String,
    /// Base control-plane machine configuration.
    pub controlplane_config: Option<String>,
    /// Base worker machine configuration.
    pub worker_config: Option<String>,
    /// When the cluster was created.
    pub created_at: DateTime<Utc>,
}

/// Node record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NodeRow {
    /// Unique identifier.
    pub id: Uuid,
    /// Unique display name.
    pub name: String,
    /// Status (pending, provisioning, active, failed).
    pub status: String,
    /// Role (worker, control-plane), if assigned.
    pub role: Option<String>,
    /// `key=value` labels.
    pub labels: Vec<String>,
    /// CPU architecture.
    pub architecture: String,
    /// Provider tag (onprem, gcp).
    pub provider: String,
    /// Routable address.
    pub ip_address: Option<String>,
    /// Hardware address.
    pub mac_address: Option<String>,
    /// Cloud instance id.
    pub instance_id: Option<String>,
    /// Owning cluster.
    pub cluster_id: Option<Uuid>,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

/// Provision request record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProvisionRequestRow {
    /// Unique identifier.
    pub id: Uuid,
    /// Status (planning, awaiting_approval, applying, completed, failed).
    pub status: String,
    /// Provider tag.
    pub provider: String,
    /// Submitted parameters.
    pub request: serde_json::Value,
    /// Human-readable plan.
    pub plan_output: Option<String>,
    /// Nodes recorded on completion.
    pub node_ids: Vec<Uuid>,
    /// Failure reason.
    pub error: Option<String>,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

/// GitOps configuration record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GitOpsConfigRow {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Target branch.
    pub branch: String,
    /// Working directory inside the repository.
    pub working_dir: String,
    /// Commit author name.
    pub username: String,
    /// Commit author email.
    pub email: String,
    /// Whether the row is complete.
    pub is_configured: bool,
}

const NODE_COLUMNS: &str = "id, name, status, role, labels, architecture, provider, ip_address, \
     mac_address, instance_id, cluster_id, created_at, updated_at";

const REQUEST_COLUMNS: &str =
    "id, status, provider, request, plan_output, node_ids, error, created_at, updated_at";

// ============================================================================
// Clusters
// ============================================================================

/// Get the cluster singleton (oldest row).
pub async fn get_cluster(pool: &PgPool) -> Result<Option<ClusterRow>, sqlx::Error> {
    sqlx::query_as::<_, ClusterRow>(
        r#"
        SELECT id, name, controlplane_config, worker_config, created_at
        FROM clusters
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

/// Create a cluster. Returns the existing row when the name is taken.
pub async fn create_cluster(pool: &PgPool, name: &str) -> Result<ClusterRow, sqlx::Error> {
    sqlx::query_as::<_, ClusterRow>(
        r#"
        INSERT INTO clusters (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id, name, controlplane_config, worker_config, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await
}

/// Replace the base machine configurations of a cluster.
pub async fn update_cluster_configs(
    pool: &PgPool,
    id: Uuid,
    controlplane_config: Option<&str>,
    worker_config: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE clusters
        SET controlplane_config = $2, worker_config = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(controlplane_config)
    .bind(worker_config)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Nodes
// ============================================================================

/// Get a node by id.
pub async fn get_node(pool: &PgPool, id: Uuid) -> Result<Option<NodeRow>, sqlx::Error> {
    sqlx::query_as::<_, NodeRow>(&format!("SELECT {} FROM nodes WHERE id = $1", NODE_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Get a node by display name.
pub async fn find_node_by_name(pool: &PgPool, name: &str) -> Result<Option<NodeRow>, sqlx::Error> {
    sqlx::query_as::<_, NodeRow>(&format!(
        "SELECT {} FROM nodes WHERE name = $1",
        NODE_COLUMNS
    ))
    .bind(name)
    .fetch_optional(pool)
    .await
}

/// Get the first node with `ip` for a provider.
pub async fn find_node_by_ip(
    pool: &PgPool,
    ip: &str,
    provider: &str,
) -> Result<Option<NodeRow>, sqlx::Error> {
    sqlx::query_as::<_, NodeRow>(&format!(
        "SELECT {} FROM nodes WHERE ip_address = $1 AND provider = $2 \
         ORDER BY created_at ASC LIMIT 1",
        NODE_COLUMNS
    ))
    .bind(ip)
    .bind(provider)
    .fetch_optional(pool)
    .await
}

/// List nodes, newest first, optionally filtered by status.
pub async fn list_nodes(
    pool: &PgPool,
    status: Option<&str>,
    offset: i64,
    limit: Option<i64>,
) -> Result<Vec<NodeRow>, sqlx::Error> {
    sqlx::query_as::<_, NodeRow>(&format!(
        r#"
        SELECT {}
        FROM nodes
        WHERE ($1::TEXT IS NULL OR status = $1)
        ORDER BY created_at DESC, id ASC
        OFFSET $2
        LIMIT $3
        "#,
        NODE_COLUMNS
    ))
    .bind(status)
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Count nodes with a status and role.
pub async fn count_nodes_with_role(
    pool: &PgPool,
    status: &str,
    role: &str,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM nodes WHERE status = $1 AND role = $2")
            .bind(status)
            .bind(role)
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

/// Insert a node.
#[allow(clippy::too_many_arguments)]
pub async fn create_node(
    pool: &PgPool,
    name: &str,
    status: &str,
    role: Option<&str>,
    labels: &[String],
    architecture: &str,
    provider: &str,
    ip_address: Option<&str>,
    mac_address: Option<&str>,
    instance_id: Option<&str>,
    cluster_id: Option<Uuid>,
) -> Result<NodeRow, sqlx::Error> {
    sqlx::query_as::<_, NodeRow>(&format!(
        r#"
        INSERT INTO nodes (id, name, status, role, labels, architecture, provider,
                           ip_address, mac_address, instance_id, cluster_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {}
        "#,
        NODE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(status)
    .bind(role)
    .bind(labels)
    .bind(architecture)
    .bind(provider)
    .bind(ip_address)
    .bind(mac_address)
    .bind(instance_id)
    .bind(cluster_id)
    .fetch_one(pool)
    .await
}

/// Set a node's status if it is currently in one of `from`.
pub async fn update_node_status(
    pool: &PgPool,
    id: Uuid,
    to: &str,
    from: &[String],
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET status = $2, updated_at = NOW()
        WHERE id = $1 AND status = ANY($3)
        "#,
    )
    .bind(id)
    .bind(to)
    .bind(from)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Replace role and labels if the node has `required` status.
pub async fn update_node_config(
    pool: &PgPool,
    id: Uuid,
    role: Option<&str>,
    labels: &[String],
    required: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET role = COALESCE($2, role), labels = $3, updated_at = NOW()
        WHERE id = $1 AND status = $4
        "#,
    )
    .bind(id)
    .bind(role)
    .bind(labels)
    .bind(required)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Rename a pending node and move it to provisioning with its role and labels.
pub async fn mark_node_provisioning(
    pool: &PgPool,
    id: Uuid,
    name: &str,
    role: &str,
    labels: &[String],
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET name = $2, role = $3, labels = $4, status = 'provisioning', updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(role)
    .bind(labels)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Reset a non-active node to provisioning with fresh instance details.
pub async fn reprovision_node(
    pool: &PgPool,
    id: Uuid,
    instance_id: Option<&str>,
    ip_address: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET status = 'provisioning',
            instance_id = COALESCE($2, instance_id),
            ip_address = COALESCE($3, ip_address),
            updated_at = NOW()
        WHERE id = $1 AND status <> 'active'
        "#,
    )
    .bind(id)
    .bind(instance_id)
    .bind(ip_address)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert or merge a discovered node by name. `NULL` arguments keep the stored value.
pub async fn upsert_node_info(
    pool: &PgPool,
    name: &str,
    ip_address: Option<&str>,
    mac_address: Option<&str>,
    architecture: Option<&str>,
    cluster_id: Option<Uuid>,
) -> Result<NodeRow, sqlx::Error> {
    sqlx::query_as::<_, NodeRow>(&format!(
        r#"
        INSERT INTO nodes
            (id, name, status, architecture, provider, ip_address, mac_address, cluster_id)
        VALUES ($1, $2, 'pending', COALESCE($5, 'Unknown'), 'onprem', $3, $4, $6)
        ON CONFLICT (name) DO UPDATE
        SET ip_address = COALESCE($3, nodes.ip_address),
            mac_address = COALESCE($4, nodes.mac_address),
            architecture = COALESCE($5, nodes.architecture),
            cluster_id = COALESCE(nodes.cluster_id, $6),
            updated_at = NOW()
        RETURNING {}
        "#,
        NODE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(ip_address)
    .bind(mac_address)
    .bind(architecture)
    .bind(cluster_id)
    .fetch_one(pool)
    .await
}

// ============================================================================
// Provision requests
// ============================================================================

/// Insert a provision request in `planning`.
pub async fn create_provision_request(
    pool: &PgPool,
    provider: &str,
    request: &serde_json::Value,
) -> Result<ProvisionRequestRow, sqlx::Error> {
    sqlx::query_as::<_, ProvisionRequestRow>(&format!(
        r#"
        INSERT INTO provision_requests (id, status, provider, request)
        VALUES ($1, 'planning', $2, $3)
        RETURNING {}
        "#,
        REQUEST_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(provider)
    .bind(request)
    .fetch_one(pool)
    .await
}

/// Get a provision request by id.
pub async fn get_provision_request(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<ProvisionRequestRow>, sqlx::Error> {
    sqlx::query_as::<_, ProvisionRequestRow>(&format!(
        "SELECT {} FROM provision_requests WHERE id = $1",
        REQUEST_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Set a request's status if it is currently in one of `from`.
pub async fn update_provision_status(
    pool: &PgPool,
    id: Uuid,
    to: &str,
    from: &[String],
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE provision_requests
        SET status = $2, updated_at = NOW()
        WHERE id = $1 AND status = ANY($3)
        "#,
    )
    .bind(id)
    .bind(to)
    .bind(from)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Store the human-readable plan.
pub async fn set_plan_output(pool: &PgPool, id: Uuid, plan: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE provision_requests
        SET plan_output = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(plan)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the nodes and move an applying request to completed.
pub async fn complete_provision_request(
    pool: &PgPool,
    id: Uuid,
    node_ids: &[Uuid],
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE provision_requests
        SET status = 'completed', node_ids = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'applying'
        "#,
    )
    .bind(id)
    .bind(node_ids)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fail a request that has not reached a terminal status.
pub async fn fail_provision_request(
    pool: &PgPool,
    id: Uuid,
    error: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE provision_requests
        SET status = 'failed', error = $2, updated_at = NOW()
        WHERE id = $1 AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// GitOps configuration
// ============================================================================

/// Get the newest complete GitOps configuration.
pub async fn get_gitops_config(pool: &PgPool) -> Result<Option<GitOpsConfigRow>, sqlx::Error> {
    sqlx::query_as::<_, GitOpsConfigRow>(
        r#"
        SELECT owner, repo, branch, working_dir, username, email, is_configured
        FROM gitops_configs
        WHERE is_configured
        ORDER BY updated_at DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

/// Check database connectivity.
pub async fn health_check(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;
    Ok(row.0 == 1)
}
