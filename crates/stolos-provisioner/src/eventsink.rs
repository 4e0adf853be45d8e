// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Auto-registration of on-prem nodes announced by the node event listener.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::controlplane::{
    ControlPlaneConnector, best_external_mac, connect_with_timeout, endpoint, with_timeout,
};
use crate::error::{Error, Result};
use crate::models::{NewNode, Node, NodeStatus, ProviderKind, UNKNOWN_ARCH};
use crate::session::{Message, SessionKind, SessionManager, event_name};
use crate::store::Store;

/// Addresses that recently failed a status query.
///
/// Bounded: when full, the oldest entry is evicted.
#[derive(Debug)]
pub struct IgnoredNodes {
    entries: DashMap<String, Instant>,
    ttl: Duration,
    capacity: usize,
}

impl IgnoredNodes {
    /// Keep entries for `ttl`, at most `capacity` of them.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Whether `ip` is ignored right now. Expired entries are dropped.
    pub fn contains(&self, ip: &str) -> bool {
        let expired = match self.entries.get(ip) {
            Some(added) => added.elapsed() >= self.ttl,
            None => return false,
        };
        if expired {
            self.entries.remove(ip);
        }
        !expired
    }

    /// Ignore `ip` for the configured TTL.
    pub fn insert(&self, ip: &str) {
        if !self.entries.contains_key(ip) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| *entry.value())
                .map(|entry| entry.key().clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(ip.to_string(), Instant::now());
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is ignored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IgnoredNodes {
    fn default() -> Self {
        Self::new(Duration::from_secs(600), 1024) // 10 minutes
    }
}

/// Turns node events into pending on-prem nodes.
pub struct EventSink {
    store: Arc<dyn Store>,
    connector: Arc<dyn ControlPlaneConnector>,
    sessions: SessionManager,
    ignored: Arc<IgnoredNodes>,
}

impl EventSink {
    /// Create a sink sharing `ignored` with its owner.
    pub fn new(
        store: Arc<dyn Store>,
        connector: Arc<dyn ControlPlaneConnector>,
        sessions: SessionManager,
        ignored: Arc<IgnoredNodes>,
    ) -> Self {
        Self {
            store,
            connector,
            sessions,
            ignored,
        }
    }

    /// Handle an event from `node` (`ip` or `ip:port`).
    ///
    /// Returns the node when a new pending node was registered.
    pub async fn handle_node_event(&self, node: &str) -> Result<Option<Node>> {
        let ip = host_of(node)?;
        if self.ignored.contains(&ip) {
            debug!(ip = %ip, "Ignoring event from unreachable node");
            return Ok(None);
        }
        if self
            .store
            .find_node_by_ip(&ip, ProviderKind::Onprem)
            .await?
            .is_some()
        {
            debug!(ip = %ip, "Event from known node");
            return Ok(None);
        }

        let client = match connect_with_timeout(self.connector.as_ref(), &endpoint(&ip)).await {
            Ok(client) => client,
            Err(e) => {
                warn!(ip = %ip, error = %e, "Node is unreachable, ignoring for a while");
                self.ignored.insert(&ip);
                return Ok(None);
            }
        };
        if let Err(e) = with_timeout("machine status", client.machine_status()).await {
            warn!(ip = %ip, error = %e, "Machine status query failed, ignoring for a while");
            self.ignored.insert(&ip);
            return Ok(None);
        }

        let mac_address = match with_timeout("list links", client.list_link_statuses()).await {
            Ok(links) => best_external_mac(&links),
            Err(e) => {
                warn!(ip = %ip, error = %e, "Could not read network links");
                None
            }
        };
        let cluster_id = self.store.get_cluster().await?.map(|c| c.id);

        let node = self
            .store
            .create_node(NewNode {
                name: format!("node-{}", ip.replace(['.', ':'], "-")),
                status: NodeStatus::Pending,
                role: None,
                labels: Vec::new(),
                architecture: UNKNOWN_ARCH.to_string(),
                provider: ProviderKind::Onprem,
                ip_address: Some(ip.clone()),
                mac_address,
                instance_id: None,
                cluster_id,
            })
            .await?;
        info!(ip = %ip, node = %node.name, "New pending node detected");

        self.sessions.broadcast_to_kind(
            SessionKind::Event,
            &Message::event(
                event_name::NEW_PENDING_NODE_DETECTED,
                serde_json::to_value(&node)?,
            ),
        );
        Ok(Some(node))
    }
}

/// Strip an optional port from `ip[:port]` (`[v6]:port` included).
fn host_of(address: &str) -> Result<String> {
    let address = address.trim();
    if let Ok(socket) = address.parse::<SocketAddr>() {
        return Ok(socket.ip().to_string());
    }
    address
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| Error::InvalidRequest(format!("invalid node address '{}'", address)))
}
