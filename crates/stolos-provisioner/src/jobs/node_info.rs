// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node discovery from the cluster's affiliate registry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::controlplane::{
    Affiliate, best_external_mac, connect_with_timeout, detect_arch, endpoint, select_address,
    with_timeout,
};
use crate::error::Result;
use crate::jobs::{Job, JobDeps};
use crate::models::{Node, NodeInfoUpdate, NodeStatus};
use crate::session::{Message, SessionKind, event_name};

const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Upserts every affiliate the cluster knows about as a node.
///
/// This is the only path that creates nodes outside provisioning. Each
/// affiliate is handled on its own: an unreachable one is logged and
/// skipped for this pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeInfoJob;

#[async_trait]
impl Job for NodeInfoJob {
    fn name(&self) -> &'static str {
        "node_info"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(120)
    }

    fn exclusive(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(90))
    }

    async fn run(&self, deps: &JobDeps) -> Result<()> {
        let nodes = deps.store.list_nodes(None, 0, None).await?;
        let Some(affiliates) = registry(deps, &nodes).await else {
            debug!("No reachable node, skipping node info reconciliation");
            return Ok(());
        };

        let known: HashMap<&str, &Node> = nodes.iter().map(|n| (n.name.as_str(), n)).collect();
        let cluster_id = deps.store.get_cluster().await?.map(|c| c.id);
        let mut updated = 0;
        for affiliate in &affiliates {
            let existing = known.get(affiliate.key()).copied();
            match reconcile(deps, affiliate, existing, cluster_id).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        affiliate = %affiliate.key(),
                        error = %e,
                        "Failed to reconcile node info"
                    )
                }
            }
        }
        info!(affiliates = affiliates.len(), updated, "Node info reconciliation finished");

        if updated > 0 {
            let nodes = deps.store.list_nodes(None, 0, None).await?;
            deps.sessions.broadcast_to_kind(
                SessionKind::Event,
                &Message::event(event_name::NODE_INFO_UPDATED, serde_json::to_value(&nodes)?),
            );
        }
        Ok(())
    }
}

/// Affiliates as seen by the first node that answers. Active nodes are
/// asked first.
async fn registry(deps: &JobDeps, nodes: &[Node]) -> Option<Vec<Affiliate>> {
    let mut candidates: Vec<&Node> = nodes.iter().filter(|n| n.ip_address.is_some()).collect();
    candidates.sort_by_key(|n| (n.status != NodeStatus::Active, n.id));

    for node in candidates {
        let Some(address) = node.ip_address.as_deref() else {
            continue;
        };
        let affiliates = async {
            let client = connect_with_timeout(deps.connector.as_ref(), &endpoint(address)).await?;
            with_timeout("list affiliates", client.list_affiliates()).await
        };
        match affiliates.await {
            Ok(affiliates) => return Some(affiliates),
            Err(e) => warn!(node = %node.name, error = %e, "Could not list affiliates"),
        }
    }
    None
}

/// Upsert one affiliate. Returns whether anything was written.
async fn reconcile(
    deps: &JobDeps,
    affiliate: &Affiliate,
    existing: Option<&Node>,
    cluster_id: Option<Uuid>,
) -> Result<bool> {
    let name = affiliate.key();
    if name.is_empty() {
        debug!(id = %affiliate.id, "Affiliate has no hostname, skipping");
        return Ok(false);
    }
    let Some(address) = select_address(&affiliate.addresses) else {
        debug!(affiliate = %name, "Affiliate has no usable address, skipping");
        return Ok(false);
    };

    let address_changed = existing.and_then(|n| n.ip_address.as_deref()) != Some(address.as_str());
    let mac_unknown = existing.is_none_or(|n| n.mac_address.is_none());
    if !address_changed && !mac_unknown {
        return Ok(false);
    }

    let client = connect_with_timeout(deps.connector.as_ref(), &endpoint(&address)).await?;
    let links = with_timeout("list links", client.list_link_statuses()).await?;
    let cpuinfo = with_timeout("read cpuinfo", client.read_file(CPUINFO_PATH)).await?;

    let update = NodeInfoUpdate {
        name: name.to_string(),
        ip_address: Some(address),
        mac_address: best_external_mac(&links),
        architecture: Some(detect_arch(&String::from_utf8_lossy(&cpuinfo)).to_string()),
    };
    deps.store.upsert_node_info(&update, cluster_id).await?;
    debug!(affiliate = %name, "Node info updated");
    Ok(true)
}
