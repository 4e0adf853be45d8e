// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle job tests against the simulated control plane.

mod common;

use common::*;
use stolos_provisioner::controlplane::{Affiliate, HealthMessage, MockNode};
use stolos_provisioner::jobs::{HealthCheckJob, Job, NodeInfoJob, StatusUpdateJob};
use stolos_provisioner::models::{NodeStatus, ProviderKind};
use stolos_provisioner::session::{EventSession, channel_transport, event_name};
use stolos_provisioner::store::Store;

fn affiliate(name: &str, address: &str) -> Affiliate {
    Affiliate {
        id: format!("id-{}", name),
        hostname: name.into(),
        nodename: String::new(),
        addresses: vec![format!("{}/24", address), "fe80::1".into()],
    }
}

#[tokio::test]
async fn test_node_info_upserts_reachable_affiliates() {
    let ctx = TestContext::new().await;
    let cp = add_node(
        &ctx,
        "control-plane-1",
        NodeStatus::Active,
        ProviderKind::Onprem,
        "10.0.0.1",
    )
    .await;

    let mut registry = MockNode::with_mac("AA:BB:CC:00:00:01");
    registry.affiliates = vec![
        affiliate("control-plane-1", "10.0.0.1"),
        affiliate("worker-5", "10.0.0.5"),
        affiliate("worker-6", "10.0.0.6"),
        Affiliate {
            id: "anonymous".into(),
            ..Default::default()
        },
    ];
    ctx.controlplane.add_node("10.0.0.1", registry).await;
    ctx.controlplane
        .add_node("10.0.0.5", MockNode::with_mac("aa:bb:cc:00:00:05"))
        .await;
    ctx.controlplane.set_unreachable("10.0.0.6").await;

    let (transport, mut client) = channel_transport();
    EventSession::register("events-1", &ctx.sessions, transport);

    NodeInfoJob.run(&ctx.job_deps()).await.unwrap();

    let cp = ctx.store.get_node(cp.id).await.unwrap().unwrap();
    assert_eq!(cp.mac_address.as_deref(), Some("aa:bb:cc:00:00:01"));
    assert_eq!(cp.architecture, "amd64");
    assert_eq!(cp.status, NodeStatus::Active);

    let discovered = ctx.store.find_node_by_name("worker-5").await.unwrap().unwrap();
    assert_eq!(discovered.status, NodeStatus::Pending);
    assert_eq!(discovered.provider, ProviderKind::Onprem);
    assert_eq!(discovered.ip_address.as_deref(), Some("10.0.0.5"));
    assert_eq!(discovered.mac_address.as_deref(), Some("aa:bb:cc:00:00:05"));
    assert_eq!(discovered.cluster_id, Some(ctx.cluster.id));

    assert!(ctx.store.find_node_by_name("worker-6").await.unwrap().is_none());

    let (frame, _) = next_of_type(&mut client, event_name::NODE_INFO_UPDATED).await;
    assert_eq!(frame["payload"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_node_info_skips_known_nodes() {
    let ctx = TestContext::new().await;
    add_node(&ctx, "control-plane-1", NodeStatus::Active, ProviderKind::Onprem, "10.0.0.1").await;
    ctx.store
        .upsert_node_info(
            &stolos_provisioner::models::NodeInfoUpdate {
                name: "control-plane-1".into(),
                ip_address: Some("10.0.0.1".into()),
                mac_address: Some("aa:bb:cc:00:00:01".into()),
                architecture: Some("amd64".into()),
            },
            None,
        )
        .await
        .unwrap();

    let mut registry = MockNode::with_mac("aa:bb:cc:00:00:01");
    registry.affiliates = vec![affiliate("control-plane-1", "10.0.0.1")];
    ctx.controlplane.add_node("10.0.0.1", registry).await;

    NodeInfoJob.run(&ctx.job_deps()).await.unwrap();

    // One connection for the registry, none for the unchanged node.
    assert_eq!(ctx.controlplane.connects().await, vec!["10.0.0.1".to_string()]);
}

#[tokio::test]
async fn test_node_info_without_reachable_nodes() {
    let ctx = TestContext::new().await;
    add_node(&ctx, "worker-1", NodeStatus::Active, ProviderKind::Gcp, "10.0.0.9").await;

    NodeInfoJob.run(&ctx.job_deps()).await.unwrap();

    assert_eq!(ctx.store.list_nodes(None, 0, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_status_update_transitions() {
    let ctx = TestContext::new().await;
    let booting = add_node(
        &ctx,
        "worker-1",
        NodeStatus::Provisioning,
        ProviderKind::Gcp,
        "10.0.1.1",
    )
    .await;
    let lost = add_node(&ctx, "worker-2", NodeStatus::Active, ProviderKind::Gcp, "10.0.1.2").await;
    let slow = add_node(
        &ctx,
        "worker-3",
        NodeStatus::Provisioning,
        ProviderKind::Gcp,
        "10.0.1.3",
    )
    .await;
    let pending = add_node(
        &ctx,
        "node-10-0-1-4",
        NodeStatus::Pending,
        ProviderKind::Onprem,
        "10.0.1.4",
    )
    .await;
    let back = add_node(&ctx, "worker-5", NodeStatus::Failed, ProviderKind::Gcp, "10.0.1.5").await;

    ctx.controlplane.add_node("10.0.1.1", MockNode::default()).await;
    ctx.controlplane.set_unreachable("10.0.1.2").await;
    ctx.controlplane.add_node("10.0.1.3", MockNode::default()).await;
    ctx.controlplane.set_status("10.0.1.3", "booting", false).await;
    ctx.controlplane.add_node("10.0.1.4", MockNode::default()).await;
    ctx.controlplane.add_node("10.0.1.5", MockNode::default()).await;

    let (transport, mut client) = channel_transport();
    EventSession::register("events-1", &ctx.sessions, transport);

    StatusUpdateJob.run(&ctx.job_deps()).await.unwrap();

    let status = |id| {
        let store = ctx.store.clone();
        async move { store.get_node(id).await.unwrap().unwrap().status }
    };
    assert_eq!(status(booting.id).await, NodeStatus::Active);
    assert_eq!(status(lost.id).await, NodeStatus::Failed);
    assert_eq!(status(slow.id).await, NodeStatus::Provisioning);
    assert_eq!(status(pending.id).await, NodeStatus::Pending);
    assert_eq!(status(back.id).await, NodeStatus::Active);

    // Pending nodes are never queried.
    assert!(!ctx.controlplane.connects().await.contains(&"10.0.1.4".to_string()));

    let (frame, _) = next_of_type(&mut client, event_name::NODE_STATUS_UPDATED).await;
    assert_eq!(frame["payload"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_health_check_uses_lowest_id_active_node() {
    let ctx = TestContext::new().await;
    let a = add_node(&ctx, "worker-1", NodeStatus::Active, ProviderKind::Gcp, "10.0.2.1").await;
    let b = add_node(&ctx, "worker-2", NodeStatus::Active, ProviderKind::Gcp, "10.0.2.2").await;
    let expected = if a.id < b.id { "10.0.2.1" } else { "10.0.2.2" };

    for ip in ["10.0.2.1", "10.0.2.2"] {
        let mut node = MockNode::default();
        node.health = vec![
            HealthMessage {
                message: "waiting for etcd".into(),
                error: None,
            },
            HealthMessage {
                message: "waiting for all nodes ready".into(),
                error: Some("node worker-9 not ready".into()),
            },
        ];
        ctx.controlplane.add_node(ip, node).await;
    }

    HealthCheckJob.run(&ctx.job_deps()).await.unwrap();

    assert_eq!(ctx.controlplane.connects().await, vec![expected.to_string()]);
    // Log only.
    assert_eq!(ctx.store.get_node(a.id).await.unwrap().unwrap().status, NodeStatus::Active);
}

#[tokio::test]
async fn test_health_check_without_active_nodes() {
    let ctx = TestContext::new().await;
    add_node(&ctx, "node-10-0-3-1", NodeStatus::Pending, ProviderKind::Onprem, "10.0.3.1").await;

    HealthCheckJob.run(&ctx.job_deps()).await.unwrap();

    assert!(ctx.controlplane.connects().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_health_check_times_out_on_hanging_node() {
    let ctx = TestContext::new().await;
    add_node(&ctx, "worker-1", NodeStatus::Active, ProviderKind::Gcp, "10.0.4.1").await;
    ctx.controlplane.add_node("10.0.4.1", MockNode::default()).await;
    ctx.controlplane.set_hanging("10.0.4.1").await;

    let err = HealthCheckJob.run(&ctx.job_deps()).await.unwrap_err();
    assert!(err.to_string().contains("health check"), "{}", err);
}
