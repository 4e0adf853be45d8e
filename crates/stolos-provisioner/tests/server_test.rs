// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface tests driven through the router without a listener.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::{Value, json};
use stolos_gitops::InMemoryRepository;
use stolos_provisioner::config::GcpConfig;
use stolos_provisioner::controlplane::MockNode;
use stolos_provisioner::models::{NodeStatus, ProviderKind};
use stolos_provisioner::server::router;
use tower::ServiceExt;
use uuid::Uuid;

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let ctx = TestContext::new().await;
    let app = router(ctx.app_state());

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_and_poll_provision_request() {
    let ctx = TestContext::new().await;
    let app = router(ctx.app_state());

    let (status, body) = send(
        &app,
        "POST",
        "/api/gcp/nodes/provision",
        Some(json!({
            "name_prefix": "worker",
            "number": 2,
            "zone": "europe-west1-b",
            "machine_type": "e2-standard-4",
            "role": "worker"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "planning");
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", &format!("/api/gcp/nodes/provision/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider"], "gcp");
    assert_eq!(body["request"]["disk_size_gb"], 50);
    assert_eq!(body["request"]["disk_type"], "pd-standard");

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/gcp/nodes/provision/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_provision_request_is_rejected() {
    let ctx = TestContext::new().await;
    let app = router(ctx.app_state());

    let (status, body) = send(
        &app,
        "POST",
        "/api/gcp/nodes/provision",
        Some(json!({
            "name_prefix": "worker",
            "number": 0,
            "zone": "europe-west1-b",
            "machine_type": "e2-standard-4",
            "role": "worker"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    assert!(ctx.store.provision_requests().await.is_empty());
}

#[tokio::test]
async fn test_node_routes() {
    let ctx = TestContext::new().await;
    let app = router(ctx.app_state());
    let active = add_node(
        &ctx,
        "worker-1",
        NodeStatus::Active,
        ProviderKind::Gcp,
        "10.0.0.1",
    )
    .await;
    let pending = add_node(
        &ctx,
        "node-10-0-0-2",
        NodeStatus::Pending,
        ProviderKind::Onprem,
        "10.0.0.2",
    )
    .await;

    let (status, body) = send(&app, "GET", "/api/nodes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "GET", "/api/nodes?status=pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "node-10-0-0-2");

    let (status, _) = send(&app, "GET", "/api/nodes?status=sleeping", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", &format!("/api/nodes/{}", active.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/nodes/{}/config", active.id),
        Some(json!({ "role": "control-plane", "labels": ["zone=b"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "control-plane");

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/nodes/{}/config", pending.id),
        Some(json!({ "labels": ["zone=b"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (status, body) = send(
        &app,
        "PUT",
        "/api/nodes/labels",
        Some(json!([
            { "node_id": active.id, "labels": ["tier=gold"] },
            { "node_id": pending.id, "labels": ["tier=gold"] }
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], json!([active.id]));
}

#[tokio::test]
async fn test_onprem_provision_route() {
    let ctx = TestContext::new().await;
    let app = router(ctx.app_state());
    let pending = add_node(
        &ctx,
        "node-10-0-0-7",
        NodeStatus::Pending,
        ProviderKind::Onprem,
        "10.0.0.7",
    )
    .await;
    ctx.controlplane.add_node("10.0.0.7", MockNode::default()).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/nodes/provision",
        Some(json!([{ "node_id": pending.id, "role": "worker" }])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["succeeded"], true);
    assert_eq!(body[0]["name"], "worker-0");
}

#[tokio::test]
async fn test_node_event_route() {
    let ctx = TestContext::new().await;
    let app = router(ctx.app_state());
    ctx.controlplane.add_node("10.0.5.5", MockNode::default()).await;

    let event = json!({ "node": "10.0.5.5" });
    let (status, body) = send(&app, "POST", "/api/talos/events", Some(event.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registered"], true);
    assert_eq!(body["node"]["name"], "node-10-0-5-5");

    let (status, body) = send(&app, "POST", "/api/talos/events", Some(event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registered"], false);

    let bad = json!({ "node": "nope" });
    let (status, _) = send(&app, "POST", "/api/talos/events", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_infrastructure_routes() {
    let ctx = TestContext::with_repository(InMemoryRepository::new(BRANCH), gcp_config()).await;
    let app = router(ctx.app_state());

    let (status, body) = send(&app, "GET", "/api/gcp/infrastructure/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "not_initialized");

    let (status, body) = send(&app, "POST", "/api/gcp/infrastructure/initialize", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(body["committed"], true);

    let (status, _) = send(
        &app,
        "POST",
        "/api/gcp/infrastructure/force-unlock",
        Some(json!({ "lock_id": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/api/gcp/infrastructure/destroy", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(ctx.repo_file("terraform/gcp/main.tf").await.is_none());
}

#[tokio::test]
async fn test_unconfigured_provider_is_unavailable() {
    let ctx = TestContext::with_repository(
        InMemoryRepository::new(BRANCH),
        GcpConfig {
            service_account_json: None,
            ..gcp_config()
        },
    )
    .await;
    let app = router(ctx.app_state());

    let (status, body) = send(&app, "POST", "/api/gcp/infrastructure/initialize", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "NOT_CONFIGURED");
}
