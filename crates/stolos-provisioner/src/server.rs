// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP and WebSocket surface.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `POST` | `/api/gcp/nodes/provision` | Create a Provision Request |
//! | `GET` | `/api/gcp/nodes/provision/{id}` | Poll a Provision Request |
//! | `GET` | `/api/gcp/nodes/provision/{id}/stream` | Run it over an approval WebSocket |
//! | `GET` | `/api/gcp/infrastructure/status` | Base infrastructure state |
//! | `POST` | `/api/gcp/infrastructure/initialize` | Create base infrastructure |
//! | `POST` | `/api/gcp/infrastructure/destroy` | Destroy base infrastructure |
//! | `POST` | `/api/gcp/infrastructure/force-unlock` | Release a state lock |
//! | `GET` | `/api/nodes` | List nodes |
//! | `GET` | `/api/nodes/{id}` | Get a node |
//! | `PUT` | `/api/nodes/{id}/config` | Change role/labels of an active node |
//! | `PUT` | `/api/nodes/labels` | Change labels of several active nodes |
//! | `POST` | `/api/nodes/provision` | Provision pending on-prem nodes |
//! | `GET` | `/api/events/stream` | Event WebSocket |
//! | `POST` | `/api/talos/events` | Node event from the listener |

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::eventsink::EventSink;
use crate::infrastructure::InfrastructureService;
use crate::models::{
    GcpNodeProvisionRequest, NodeStatus, OnPremNodeProvisionConfig, ProvisionStatus,
};
use crate::nodes::{NodeLabelsUpdate, NodeService};
use crate::provisioning::ProvisioningService;
use crate::session::{ApprovalSession, EventSession, SessionManager, websocket_transport};
use crate::store::Store;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Persistence
    pub store: Arc<dyn Store>,
    /// Connected clients
    pub sessions: SessionManager,
    /// Cloud provisioning workflow
    pub provisioning: Arc<ProvisioningService>,
    /// Base infrastructure
    pub infrastructure: Arc<InfrastructureService>,
    /// Node queries and on-prem provisioning
    pub nodes: Arc<NodeService>,
    /// Node auto-registration
    pub events: Arc<EventSink>,
    /// Cancelled on runtime shutdown; parent of every workflow token
    pub shutdown: CancellationToken,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/gcp/nodes/provision", post(create_provision))
        .route("/api/gcp/nodes/provision/{id}", get(get_provision))
        .route("/api/gcp/nodes/provision/{id}/stream", get(stream_provision))
        .route("/api/gcp/infrastructure/status", get(infrastructure_status))
        .route("/api/gcp/infrastructure/initialize", post(initialize_infrastructure))
        .route("/api/gcp/infrastructure/destroy", post(destroy_infrastructure))
        .route("/api/gcp/infrastructure/force-unlock", post(force_unlock))
        .route("/api/nodes", get(list_nodes))
        .route("/api/nodes/labels", put(update_nodes_labels))
        .route("/api/nodes/provision", post(provision_onprem_nodes))
        .route("/api/nodes/{id}", get(get_node))
        .route("/api/nodes/{id}/config", put(update_node_config))
        .route("/api/events/stream", get(event_stream))
        .route("/api/talos/events", post(node_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is notified.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    info!(address = ?listener.local_addr().ok(), "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Error::InvalidState(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Error::Configuration(_) | Error::Config(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "NOT_CONFIGURED")
            }
            Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string(), "code": code }))).into_response()
    }
}

async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

async fn create_provision(
    State(state): State<AppState>,
    Json(request): Json<GcpNodeProvisionRequest>,
) -> Result<Response> {
    let created = state.provisioning.create_request(&request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": created.id, "status": created.status })),
    )
        .into_response())
}

async fn get_provision(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response> {
    let request = state
        .store
        .get_provision_request(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("provision request {}", id)))?;
    Ok(Json(request).into_response())
}

async fn stream_provision(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let request = state
        .store
        .get_provision_request(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("provision request {}", id)))?;
    if request.status != ProvisionStatus::Planning {
        return Err(Error::InvalidState(format!(
            "provision request {} is {}",
            id, request.status
        )));
    }
    // Taken before the upgrade so a second stream gets 409 and never
    // replaces the live session.
    let claim = state.provisioning.claim(id)?;

    Ok(ws.on_upgrade(move |socket| async move {
        let session = ApprovalSession::register(
            &format!("provision-{}", id),
            &state.sessions,
            websocket_transport(socket),
        );
        // A dropped connection does not stop the run; shutdown does.
        let cancel = state.shutdown.child_token();
        match state
            .provisioning
            .run_claimed(claim, session.clone(), &cancel)
            .await
        {
            Ok(outcome) => {
                info!(request_id = %id, nodes = outcome.node_ids.len(), "Provision stream finished")
            }
            Err(e) => debug!(request_id = %id, error = %e, "Provision stream ended with error"),
        }
        session.handle().close();
    }))
}

async fn infrastructure_status(State(state): State<AppState>) -> Result<Response> {
    let cancel = state.shutdown.child_token();
    let status = state.infrastructure.status(&cancel).await?;
    Ok(Json(status).into_response())
}

async fn initialize_infrastructure(State(state): State<AppState>) -> Result<Response> {
    let cancel = state.shutdown.child_token();
    let outcome = state.infrastructure.initialize(&cancel).await?;
    Ok(Json(json!({
        "applied": outcome.applied,
        "committed": outcome.commit.is_committed(),
    }))
    .into_response())
}

async fn destroy_infrastructure(State(state): State<AppState>) -> Result<Response> {
    let cancel = state.shutdown.child_token();
    state.infrastructure.destroy(&cancel).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct ForceUnlockBody {
    lock_id: String,
}

async fn force_unlock(
    State(state): State<AppState>,
    Json(body): Json<ForceUnlockBody>,
) -> Result<Response> {
    let cancel = state.shutdown.child_token();
    state.infrastructure.force_unlock(&body.lock_id, &cancel).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct NodeListQuery {
    status: Option<String>,
    #[serde(default)]
    offset: i64,
    limit: Option<i64>,
}

async fn list_nodes(
    State(state): State<AppState>,
    Query(query): Query<NodeListQuery>,
) -> Result<Response> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<NodeStatus>)
        .transpose()?;
    let nodes = state.nodes.list(status, query.offset, query.limit).await?;
    Ok(Json(nodes).into_response())
}

async fn get_node(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response> {
    Ok(Json(state.nodes.get(id).await?).into_response())
}

#[derive(Debug, Deserialize)]
struct NodeConfigBody {
    role: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
}

async fn update_node_config(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<NodeConfigBody>,
) -> Result<Response> {
    let node = state
        .nodes
        .update_active_node_config(id, body.role.as_deref(), &body.labels)
        .await?;
    Ok(Json(node).into_response())
}

async fn update_nodes_labels(
    State(state): State<AppState>,
    Json(updates): Json<Vec<NodeLabelsUpdate>>,
) -> Result<Response> {
    let updated = state.nodes.update_active_nodes_labels(&updates).await?;
    Ok(Json(json!({ "updated": updated })).into_response())
}

async fn provision_onprem_nodes(
    State(state): State<AppState>,
    Json(configs): Json<Vec<OnPremNodeProvisionConfig>>,
) -> Result<Response> {
    let results = state.nodes.provision_onprem_nodes(&configs).await?;
    Ok(Json(results).into_response())
}

#[derive(Debug, Deserialize)]
struct EventStreamQuery {
    connection_id: Option<String>,
}

async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let id = query
        .connection_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| async move {
        EventSession::register(&id, &state.sessions, websocket_transport(socket));
    })
}

#[derive(Debug, Deserialize)]
struct NodeEventBody {
    node: String,
}

async fn node_event(
    State(state): State<AppState>,
    Json(body): Json<NodeEventBody>,
) -> Result<Response> {
    let node = state.events.handle_node_event(&body.node).await?;
    Ok(Json(json!({ "registered": node.is_some(), "node": node })).into_response())
}
