// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Live node status from the control plane.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::controlplane::{connect_with_timeout, endpoint, with_timeout};
use crate::error::Result;
use crate::jobs::{Job, JobDeps};
use crate::models::{Node, NodeStatus};
use crate::session::{Message, SessionKind, event_name};

/// Marks nodes `active` when running and ready, `failed` otherwise.
///
/// Pending nodes are left alone, and a provisioning node stays provisioning
/// until it first reports ready. The full node set is broadcast after every
/// pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusUpdateJob;

#[async_trait]
impl Job for StatusUpdateJob {
    fn name(&self) -> &'static str {
        "status_update"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn run(&self, deps: &JobDeps) -> Result<()> {
        let nodes = deps.store.list_nodes(None, 0, None).await?;
        let mut changed = 0;
        for node in nodes.iter().filter(|n| n.status != NodeStatus::Pending) {
            let live = live_status(deps, node).await;
            let Some(target) = next_status(node.status, live) else {
                continue;
            };
            match deps
                .store
                .update_node_status(node.id, target, &[node.status])
                .await
            {
                Ok(true) => {
                    info!(
                        node = %node.name,
                        from = %node.status,
                        to = %target,
                        "Node status changed"
                    );
                    changed += 1;
                }
                Ok(false) => debug!(node = %node.name, "Node status changed concurrently"),
                Err(e) => warn!(node = %node.name, error = %e, "Failed to update node status"),
            }
        }
        debug!(nodes = nodes.len(), changed, "Status pass finished");

        let nodes = deps.store.list_nodes(None, 0, None).await?;
        deps.sessions.broadcast_to_kind(
            SessionKind::Event,
            &Message::event(event_name::NODE_STATUS_UPDATED, serde_json::to_value(&nodes)?),
        );
        Ok(())
    }
}

/// Whether the node reported running and ready. `false` when it has no
/// address or cannot be queried.
async fn live_status(deps: &JobDeps, node: &Node) -> bool {
    let Some(address) = node.ip_address.as_deref() else {
        return false;
    };
    let status = async {
        let client = connect_with_timeout(deps.connector.as_ref(), &endpoint(address)).await?;
        with_timeout("machine status", client.machine_status()).await
    };
    match status.await {
        Ok(status) => status.is_running_and_ready(),
        Err(e) => {
            debug!(node = %node.name, error = %e, "Machine status unavailable");
            false
        }
    }
}

/// Status to persist, or `None` when nothing changes.
fn next_status(current: NodeStatus, ready: bool) -> Option<NodeStatus> {
    let target = match (current, ready) {
        (NodeStatus::Pending, _) => return None,
        (_, true) => NodeStatus::Active,
        (NodeStatus::Provisioning, false) => return None,
        (_, false) => NodeStatus::Failed,
    };
    (target != current).then_some(target)
}
