// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sessions without a decision channel.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::session::manager::{SessionHandle, SessionManager};
use crate::session::transport::Transport;
use crate::session::{MessageHandler, SessionKind};

/// Listener for broadcast node events.
#[derive(Debug, Default)]
pub struct EventSession;

impl EventSession {
    /// Register `transport` as an event listener and greet it with `connected`.
    pub fn register(id: &str, manager: &SessionManager, transport: Transport) -> SessionHandle {
        let handle = manager.register(id, transport, Arc::new(Self));
        handle.send_status("connected");
        handle
    }
}

impl MessageHandler for EventSession {
    fn kind(&self) -> SessionKind {
        SessionKind::Event
    }

    fn handle_message(&self, message_type: &str, _message: &Map<String, Value>) {
        debug!(message_type, "Ignoring inbound message on event session");
    }

    fn close(&self) {}
}

/// Progress-only session; inbound messages are ignored.
#[derive(Debug, Default)]
pub struct GenericSession;

impl MessageHandler for GenericSession {
    fn kind(&self) -> SessionKind {
        SessionKind::Generic
    }

    fn handle_message(&self, message_type: &str, _message: &Map<String, Value>) {
        debug!(message_type, "Ignoring inbound message");
    }

    fn close(&self) {}
}
