// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node event auto-registration tests.

mod common;

use common::*;
use stolos_provisioner::Error;
use stolos_provisioner::controlplane::MockNode;
use stolos_provisioner::models::{NodeStatus, ProviderKind};
use stolos_provisioner::session::{EventSession, channel_transport, event_name};
use stolos_provisioner::store::Store;

#[tokio::test]
async fn test_new_node_is_registered_as_pending() {
    let ctx = TestContext::new().await;
    ctx.controlplane
        .add_node("192.168.1.20", MockNode::with_mac("52:54:00:12:34:56"))
        .await;
    let (transport, mut client) = channel_transport();
    EventSession::register("ui-1", &ctx.sessions, transport);

    let node = ctx
        .events
        .handle_node_event("192.168.1.20:50001")
        .await
        .unwrap()
        .expect("node registered");

    assert_eq!(node.name, "node-192-168-1-20");
    assert_eq!(node.status, NodeStatus::Pending);
    assert_eq!(node.provider, ProviderKind::Onprem);
    assert_eq!(node.ip_address.as_deref(), Some("192.168.1.20"));
    assert_eq!(node.mac_address.as_deref(), Some("52:54:00:12:34:56"));
    assert_eq!(node.cluster_id, Some(ctx.cluster.id));
    assert!(node.role.is_none());

    let (frame, _) = next_of_type(&mut client, event_name::NEW_PENDING_NODE_DETECTED).await;
    assert_eq!(frame["payload"]["name"], "node-192-168-1-20");
    assert_eq!(frame["payload"]["status"], "pending");
}

#[tokio::test]
async fn test_known_node_is_not_registered_twice() {
    let ctx = TestContext::new().await;
    ctx.controlplane.add_node("192.168.1.21", MockNode::default()).await;

    assert!(ctx.events.handle_node_event("192.168.1.21").await.unwrap().is_some());
    assert!(ctx.events.handle_node_event("192.168.1.21").await.unwrap().is_none());

    assert_eq!(ctx.store.list_nodes(None, 0, None).await.unwrap().len(), 1);
    assert_eq!(ctx.controlplane.connects().await.len(), 1);
}

#[tokio::test]
async fn test_unreachable_node_is_ignored_for_a_while() {
    let ctx = TestContext::new().await;
    ctx.controlplane.set_unreachable("192.168.1.22").await;

    assert!(ctx.events.handle_node_event("192.168.1.22").await.unwrap().is_none());
    assert!(ctx.events.handle_node_event("192.168.1.22").await.unwrap().is_none());

    // The second event hits the ignore list before any connection attempt.
    assert_eq!(ctx.controlplane.connects().await, vec!["192.168.1.22".to_string()]);
    assert!(ctx.store.list_nodes(None, 0, None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_node_is_ignored() {
    let ctx = TestContext::new().await;
    ctx.controlplane.add_node("192.168.1.23", MockNode::default()).await;
    ctx.controlplane.set_hanging("192.168.1.23").await;

    assert!(ctx.events.handle_node_event("192.168.1.23").await.unwrap().is_none());
    assert!(ctx.store.list_nodes(None, 0, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_address_is_rejected() {
    let ctx = TestContext::new().await;
    assert!(matches!(
        ctx.events.handle_node_event("not-an-ip").await,
        Err(Error::InvalidRequest(_))
    ));
}
