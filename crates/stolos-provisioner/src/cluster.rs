// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster singleton bootstrap.

use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::models::Cluster;
use crate::store::Store;

/// Return the cluster, creating it as `name` on first run.
pub async fn initialize_cluster(store: &dyn Store, name: &str) -> Result<Cluster> {
    if let Some(cluster) = store.get_cluster().await? {
        return Ok(cluster);
    }
    let cluster = store.create_cluster(name).await?;
    info!(cluster_id = %cluster.id, name = %cluster.name, "Cluster created");
    Ok(cluster)
}

/// Replace the base machine configurations from YAML files. Roles without a
/// path keep their current configuration.
pub async fn load_machine_configs(
    store: &dyn Store,
    cluster: &Cluster,
    controlplane: Option<&Path>,
    worker: Option<&Path>,
) -> Result<Cluster> {
    if controlplane.is_none() && worker.is_none() {
        return Ok(cluster.clone());
    }
    let controlplane = controlplane.map(read_machine_config).transpose()?;
    let worker = worker.map(read_machine_config).transpose()?;
    let loaded = (controlplane.is_some(), worker.is_some());
    let controlplane = controlplane.or_else(|| cluster.controlplane_config.clone());
    let worker = worker.or_else(|| cluster.worker_config.clone());

    store
        .update_cluster_configs(cluster.id, controlplane.as_deref(), worker.as_deref())
        .await?;
    info!(
        cluster_id = %cluster.id,
        controlplane = loaded.0,
        worker = loaded.1,
        "Cluster machine configurations loaded"
    );
    store
        .get_cluster()
        .await?
        .ok_or_else(|| Error::NotFound("cluster".to_string()))
}

fn read_machine_config(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str::<serde_yaml::Value>(&content)?;
    Ok(content)
}
