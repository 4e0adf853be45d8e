// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster health monitoring through one active node.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::controlplane::{connect_with_timeout, endpoint, with_timeout};
use crate::error::Result;
use crate::jobs::{Job, JobDeps};
use crate::models::{Node, NodeStatus};

/// Streams the cluster health check of the active node with the lowest id.
///
/// Log only: node status is never changed here.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthCheckJob;

#[async_trait]
impl Job for HealthCheckJob {
    fn name(&self) -> &'static str {
        "health_check"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn exclusive(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(20 * 60))
    }

    async fn run(&self, deps: &JobDeps) -> Result<()> {
        let nodes = deps
            .store
            .list_nodes(Some(NodeStatus::Active), 0, None)
            .await?;
        let Some((node, address)) = pick_node(&nodes) else {
            debug!("No active node with an address, skipping health check");
            return Ok(());
        };

        info!(node = %node.name, address, "Running cluster health check");
        let client = connect_with_timeout(deps.connector.as_ref(), &endpoint(address)).await?;
        let mut feed = with_timeout("health check", client.health_check()).await?;
        while let Some(message) = feed.next().await {
            match message {
                Ok(message) => match message.error {
                    Some(error) => warn!(node = %node.name, error = %error, "{}", message.message),
                    None => info!(node = %node.name, "{}", message.message),
                },
                Err(e) => {
                    warn!(node = %node.name, error = %e, "Health check stream failed");
                    break;
                }
            }
        }
        debug!(node = %node.name, "Health check finished");
        Ok(())
    }
}

/// Active node with an address and the lowest id.
fn pick_node(nodes: &[Node]) -> Option<(&Node, &str)> {
    nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Active)
        .filter_map(|n| n.ip_address.as_deref().map(|ip| (n, ip)))
        .min_by_key(|(n, _)| n.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProviderKind, UNKNOWN_ARCH};
    use chrono::Utc;
    use uuid::Uuid;

    fn node(id: u128, status: NodeStatus, ip: Option<&str>) -> Node {
        Node {
            id: Uuid::from_u128(id),
            name: format!("n{}", id),
            status,
            role: None,
            labels: vec![],
            architecture: UNKNOWN_ARCH.into(),
            provider: ProviderKind::Onprem,
            ip_address: ip.map(String::from),
            mac_address: None,
            instance_id: None,
            cluster_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_pick_lowest_id_with_address() {
        let nodes = vec![
            node(5, NodeStatus::Active, Some("10.0.0.5")),
            node(1, NodeStatus::Active, None),
            node(3, NodeStatus::Active, Some("10.0.0.3")),
            node(2, NodeStatus::Failed, Some("10.0.0.2")),
        ];
        let (picked, address) = pick_node(&nodes).unwrap();
        assert_eq!(picked.id, Uuid::from_u128(3));
        assert_eq!(address, "10.0.0.3");
        assert!(pick_node(&[]).is_none());
    }
}
