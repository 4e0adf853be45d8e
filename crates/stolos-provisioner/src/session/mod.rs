// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client sessions over a duplex transport.
//!
//! Every connected client gets a bounded outbound queue drained by one
//! writer task, so messages reach a client in send order. A second task
//! reads inbound JSON and hands it to the session's [`MessageHandler`].
//!
//! ```text
//!   workflow ──send_message──► [queue: 256] ──writer task──► transport
//!                                  │ full
//!                                  ▼
//!                              unregister
//!
//!   transport ──reader task──► MessageHandler::handle_message
//! ```
//!
//! A full queue disconnects the client instead of blocking the sender.
//!
//! Outbound envelopes are `{"type": ..., "payload": ...}`; inbound messages
//! are `{"type": ..., "action": "approve" | "reject", "reason": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use stolos_terraform::{ResourceUpdate, WorkflowUpdate};

mod approval;
mod event;
mod manager;
mod transport;
mod ws;

pub use approval::{ApprovalResponse, ApprovalSession};
pub use event::{EventSession, GenericSession};
pub use manager::{SEND_QUEUE_CAPACITY, SessionHandle, SessionManager};
pub use transport::{
    ClientEnd, Transport, TransportError, TransportReader, TransportWriter, channel_transport,
};
pub use ws::websocket_transport;

/// Outbound message types.
pub mod message_type {
    /// Free-form progress line.
    pub const LOG: &str = "log";
    /// Workflow status change.
    pub const STATUS: &str = "status";
    /// Human-readable plan.
    pub const PLAN: &str = "plan";
    /// A decision is needed.
    pub const APPROVAL_REQUIRED: &str = "approval_required";
    /// Workflow finished.
    pub const COMPLETE: &str = "complete";
    /// Workflow failed.
    pub const ERROR: &str = "error";
    /// One resource changed.
    pub const RESOURCE_UPDATE: &str = "resource_update";
    /// Snapshot of every resource.
    pub const WORKFLOW_UPDATE: &str = "workflow_update";
}

/// Named events broadcast to event sessions.
pub mod event_name {
    /// Full node set after a status pass.
    pub const NODE_STATUS_UPDATED: &str = "NodeStatusUpdated";
    /// Full node set after an info reconciliation.
    pub const NODE_INFO_UPDATED: &str = "NodeInfoUpdated";
    /// A node announced itself and was recorded as pending.
    pub const NEW_PENDING_NODE_DETECTED: &str = "NewPendingNodeDetected";
}

/// Envelope sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message type
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload
    pub payload: Value,
}

impl Message {
    /// Message with an arbitrary type and payload.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// `log` with `{message}`.
    pub fn log(message: &str) -> Self {
        Self::new(message_type::LOG, json!({ "message": message }))
    }

    /// `status` with `{status}`.
    pub fn status(status: &str) -> Self {
        Self::new(message_type::STATUS, json!({ "status": status }))
    }

    /// `plan` with `{plan}`.
    pub fn plan(plan: &str) -> Self {
        Self::new(message_type::PLAN, json!({ "plan": plan }))
    }

    /// `approval_required` with `{summary}`.
    pub fn approval_required(summary: &str) -> Self {
        Self::new(message_type::APPROVAL_REQUIRED, json!({ "summary": summary }))
    }

    /// `complete` with caller data.
    pub fn complete(data: Value) -> Self {
        Self::new(message_type::COMPLETE, data)
    }

    /// `error` with `{error}`.
    pub fn error(error: &str) -> Self {
        Self::new(message_type::ERROR, json!({ "error": error }))
    }

    /// `resource_update` carrying one resource.
    pub fn resource_update(update: &ResourceUpdate) -> Self {
        Self::new(
            message_type::RESOURCE_UPDATE,
            serde_json::to_value(update).unwrap_or(Value::Null),
        )
    }

    /// `workflow_update` carrying a snapshot.
    pub fn workflow_update(update: &WorkflowUpdate) -> Self {
        Self::new(
            message_type::WORKFLOW_UPDATE,
            serde_json::to_value(update).unwrap_or(Value::Null),
        )
    }

    /// Named broadcast event.
    pub fn event(name: &str, payload: Value) -> Self {
        Self::new(name, payload)
    }
}

/// What a session is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Progress only; inbound messages ignored
    Generic,
    /// Progress plus one approve/reject decision
    Approval,
    /// Receives broadcast events
    Event,
}

/// Receives inbound messages for one session.
pub trait MessageHandler: Send + Sync {
    /// Session kind, used for broadcasts.
    fn kind(&self) -> SessionKind;

    /// Handle one inbound message. `message_type` is the `type` field.
    fn handle_message(&self, message_type: &str, message: &Map<String, Value>);

    /// The session was unregistered.
    fn close(&self);
}
