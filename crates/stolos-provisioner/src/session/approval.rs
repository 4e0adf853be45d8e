// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session that carries one approve/reject decision.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stolos_terraform::{ProgressSink, ResourceUpdate, WorkflowUpdate};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::session::manager::{SessionHandle, SessionManager};
use crate::session::transport::Transport;
use crate::session::{Message, MessageHandler, SessionKind};

/// The decision delivered to the waiting workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// Whether the plan was approved
    pub approved: bool,
    /// Approver's message or rejection reason
    pub message: String,
}

/// Progress session with a single-slot decision channel.
///
/// Only the first decision is kept; later ones are dropped. The decision
/// can be waited for once. Losing the connection does not cancel the wait,
/// the timeout or the workflow's cancellation token ends it.
pub struct ApprovalSession {
    handle: SessionHandle,
    tx: mpsc::Sender<ApprovalResponse>,
    rx: Mutex<Option<mpsc::Receiver<ApprovalResponse>>>,
}

impl ApprovalSession {
    /// Create a session for `id` without registering a transport.
    pub fn new(id: &str, manager: &SessionManager) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(1);
        Arc::new(Self {
            handle: manager.handle(id),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Create a session and register `transport` for it.
    pub fn register(id: &str, manager: &SessionManager, transport: Transport) -> Arc<Self> {
        let session = Self::new(id, manager);
        manager.register(id, transport, session.clone());
        session
    }

    /// Session id.
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// Sending side of the session.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Send a `log` line.
    pub fn send_log(&self, message: &str) {
        self.handle.send_log(message);
    }

    /// Send a `status` change.
    pub fn send_status(&self, status: &str) {
        self.handle.send_status(status);
    }

    /// Send the human-readable plan.
    pub fn send_plan(&self, plan: &str) {
        self.handle.send_plan(plan);
    }

    /// Ask for a decision.
    pub fn send_approval_request(&self, summary: &str) {
        self.handle.send_approval_request(summary);
    }

    /// Send the completion payload.
    pub fn send_complete(&self, data: Value) {
        self.handle.send_complete(data);
    }

    /// Send an error.
    pub fn send_error(&self, error: &str) {
        self.handle.send_error(error);
    }

    /// Offer a decision. Returns `false` if one is already pending or consumed.
    pub fn submit(&self, response: ApprovalResponse) -> bool {
        self.tx.try_send(response).is_ok()
    }

    /// Block until a decision arrives, `timeout` elapses or `cancel` fires.
    ///
    /// Timing out gives [`Error::Timeout`], cancellation gives
    /// [`Error::Cancelled`]. A second call gives [`Error::Session`].
    pub async fn wait_for_approval(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ApprovalResponse> {
        let taken = self.rx.lock().map(|mut rx| rx.take()).unwrap_or(None);
        let Some(mut rx) = taken else {
            return Err(Error::Session(format!(
                "approval for session {} was already consumed",
                self.id()
            )));
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled("approval wait cancelled".to_string())),
            received = tokio::time::timeout(timeout, rx.recv()) => match received {
                Ok(Some(response)) => Ok(response),
                Ok(None) => Err(Error::Session("approval channel closed".to_string())),
                Err(_) => Err(Error::Timeout(format!(
                    "no approval received within {}s",
                    timeout.as_secs()
                ))),
            },
        }
        // `rx` drops here, so later decisions fail to send and are ignored.
    }
}

fn field<'a>(message: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    message
        .get(key)
        .or_else(|| message.get("payload").and_then(|p| p.get(key)))
        .and_then(Value::as_str)
}

impl MessageHandler for ApprovalSession {
    fn kind(&self) -> SessionKind {
        SessionKind::Approval
    }

    fn handle_message(&self, message_type: &str, message: &Map<String, Value>) {
        let response = match field(message, "action") {
            Some("approve") => ApprovalResponse {
                approved: true,
                message: "Approved by user".to_string(),
            },
            Some("reject") => ApprovalResponse {
                approved: false,
                message: field(message, "reason")
                    .filter(|r| !r.is_empty())
                    .unwrap_or("Rejected by user")
                    .to_string(),
            },
            other => {
                debug!(session_id = %self.id(), message_type, action = ?other, "Ignoring message");
                return;
            }
        };

        let approved = response.approved;
        if self.submit(response) {
            info!(session_id = %self.id(), approved, "Approval decision received");
        } else {
            debug!(session_id = %self.id(), "Decision already received, ignoring");
        }
    }

    fn close(&self) {
        debug!(session_id = %self.id(), "Approval session connection closed");
    }
}

impl ProgressSink for ApprovalSession {
    fn resource_update(&self, update: &ResourceUpdate) {
        self.handle.send(Message::resource_update(update));
    }

    fn workflow_update(&self, update: &WorkflowUpdate) {
        self.handle.send(Message::workflow_update(update));
    }

    fn log(&self, message: &str) {
        self.handle.send_log(message);
    }
}
