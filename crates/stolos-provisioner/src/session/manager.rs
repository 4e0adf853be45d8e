// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registry of connected clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::transport::{Transport, TransportReader, TransportWriter};
use crate::session::{Message, MessageHandler, SessionKind};

/// Outbound queue size per client.
pub const SEND_QUEUE_CAPACITY: usize = 256;

struct Client {
    tx: mpsc::Sender<Message>,
    handler: Arc<dyn MessageHandler>,
    kind: SessionKind,
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    clients: DashMap<String, Client>,
    generation: AtomicU64,
}

/// Connected clients keyed by session id. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client and start its reader and writer tasks.
    ///
    /// A client already registered under `id` is unregistered first.
    pub fn register(
        &self,
        id: &str,
        transport: Transport,
        handler: Arc<dyn MessageHandler>,
    ) -> SessionHandle {
        self.unregister(id);

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let kind = handler.kind();

        self.inner.clients.insert(
            id.to_string(),
            Client {
                tx,
                handler: handler.clone(),
                kind,
                generation,
                cancel: cancel.clone(),
            },
        );

        tokio::spawn(write_loop(
            self.clone(),
            id.to_string(),
            generation,
            transport.writer,
            rx,
        ));
        tokio::spawn(read_loop(
            self.clone(),
            id.to_string(),
            generation,
            transport.reader,
            handler,
            cancel,
        ));

        info!(session_id = %id, kind = ?kind, "Client registered");
        self.handle(id)
    }

    /// Handle for sending to `id`, whether or not it is registered.
    pub fn handle(&self, id: &str) -> SessionHandle {
        SessionHandle {
            id: id.to_string(),
            manager: self.clone(),
        }
    }

    /// Remove a client, close its queue and notify its handler.
    pub fn unregister(&self, id: &str) -> bool {
        match self.inner.clients.remove(id) {
            Some((_, client)) => {
                close_client(id, client);
                true
            }
            None => false,
        }
    }

    /// Remove `id` only if it is still the registration `generation`.
    fn unregister_generation(&self, id: &str, generation: u64) {
        if let Some((_, client)) = self
            .inner
            .clients
            .remove_if(id, |_, c| c.generation == generation)
        {
            close_client(id, client);
        }
    }

    /// Queue a message for `id` without waiting.
    ///
    /// Returns `false` when the client is unknown or was dropped because its
    /// queue is full or closed.
    pub fn send_message(&self, id: &str, message: Message) -> bool {
        let tx = match self.inner.clients.get(id) {
            Some(client) => client.tx.clone(),
            None => {
                debug!(session_id = %id, "Skipping message for unknown client");
                return false;
            }
        };

        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(session_id = %id, "Send queue full, disconnecting client");
                self.unregister(id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.unregister(id);
                false
            }
        }
    }

    /// Send `message` to every client of `kind`. Returns how many accepted it.
    pub fn broadcast_to_kind(&self, kind: SessionKind, message: &Message) -> usize {
        let ids: Vec<String> = self
            .inner
            .clients
            .iter()
            .filter(|entry| entry.value().kind == kind)
            .map(|entry| entry.key().clone())
            .collect();

        ids.iter()
            .filter(|id| self.send_message(id, message.clone()))
            .count()
    }

    /// Whether `id` is registered.
    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.clients.contains_key(id)
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// Unregister every client.
    pub fn close_all(&self) {
        let ids: Vec<String> = self
            .inner
            .clients
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.unregister(&id);
        }
    }
}

fn close_client(id: &str, client: Client) {
    client.cancel.cancel();
    client.handler.close();
    // Dropping the sender ends the write loop once the queue drains.
    drop(client.tx);
    info!(session_id = %id, "Client unregistered");
}

async fn write_loop(
    manager: SessionManager,
    id: String,
    generation: u64,
    mut writer: Box<dyn TransportWriter>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Failed to serialize message");
                continue;
            }
        };
        if let Err(e) = writer.send_text(text).await {
            debug!(session_id = %id, error = %e, "Write failed, closing client");
            break;
        }
    }
    writer.close().await;
    manager.unregister_generation(&id, generation);
}

async fn read_loop(
    manager: SessionManager,
    id: String,
    generation: u64,
    mut reader: Box<dyn TransportReader>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = reader.recv_text() => frame,
        };

        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                debug!(session_id = %id, error = %e, "Read failed, closing client");
                break;
            }
            None => break,
        };

        let message: Map<String, Value> = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Malformed message, closing client");
                break;
            }
        };
        let message_type = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        handler.handle_message(&message_type, &message);
    }
    manager.unregister_generation(&id, generation);
}

/// Sends to one session id through its manager.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    manager: SessionManager,
}

impl SessionHandle {
    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owning manager.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Queue any message.
    pub fn send(&self, message: Message) -> bool {
        self.manager.send_message(&self.id, message)
    }

    /// Send a `log` line.
    pub fn send_log(&self, message: &str) -> bool {
        self.send(Message::log(message))
    }

    /// Send a `status` change.
    pub fn send_status(&self, status: &str) -> bool {
        self.send(Message::status(status))
    }

    /// Send the human-readable plan.
    pub fn send_plan(&self, plan: &str) -> bool {
        self.send(Message::plan(plan))
    }

    /// Ask the client for a decision.
    pub fn send_approval_request(&self, summary: &str) -> bool {
        self.send(Message::approval_required(summary))
    }

    /// Send the completion payload.
    pub fn send_complete(&self, data: Value) -> bool {
        self.send(Message::complete(data))
    }

    /// Send an error.
    pub fn send_error(&self, error: &str) -> bool {
        self.send(Message::error(error))
    }

    /// Unregister the session.
    pub fn close(&self) -> bool {
        self.manager.unregister(&self.id)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{GenericSession, channel_transport};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    impl MessageHandler for Recorder {
        fn kind(&self) -> SessionKind {
            SessionKind::Generic
        }

        fn handle_message(&self, message_type: &str, _message: &Map<String, Value>) {
            self.seen.lock().unwrap().push(message_type.to_string());
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let manager = SessionManager::new();
        let (transport, mut client) = channel_transport();
        let handle = manager.register("s1", transport, Arc::new(GenericSession));

        for i in 0..10 {
            assert!(handle.send_log(&format!("line {}", i)));
        }
        for i in 0..10 {
            let msg = client.next_json().await.unwrap();
            assert_eq!(msg["type"], "log");
            assert_eq!(msg["payload"]["message"], format!("line {}", i));
        }
    }

    #[tokio::test]
    async fn test_unknown_client_is_skipped() {
        let manager = SessionManager::new();
        assert!(!manager.send_message("missing", Message::status("x")));
        assert_eq!(manager.client_count(), 0);
    }

    #[tokio::test]
    async fn test_inbound_dispatch_and_close_on_malformed() {
        let manager = SessionManager::new();
        let recorder = Arc::new(Recorder::default());
        let (transport, client) = channel_transport();
        manager.register("s1", transport, recorder.clone());

        client.send_json(&serde_json::json!({ "type": "ping" }));
        client.outgoing.send("{not json".to_string()).unwrap();

        eventually(|| !manager.is_registered("s1")).await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["ping".to_string()]);
        assert!(recorder.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_peer_disconnect_unregisters() {
        let manager = SessionManager::new();
        let (transport, client) = channel_transport();
        manager.register("s1", transport, Arc::new(GenericSession));
        drop(client);
        eventually(|| !manager.is_registered("s1")).await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_disconnects_instead_of_blocking() {
        let manager = SessionManager::new();
        let (transport, _client) = channel_transport();
        let recorder = Arc::new(Recorder::default());
        let handle = manager.register("slow", transport, recorder.clone());

        // The writer task cannot run until this test yields, so the queue fills.
        let mut accepted = 0;
        for _ in 0..(SEND_QUEUE_CAPACITY + 1) {
            if handle.send_status("tick") {
                accepted += 1;
            }
        }
        assert_eq!(accepted, SEND_QUEUE_CAPACITY);
        assert!(!manager.is_registered("slow"));
        assert!(recorder.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reregister_replaces_and_broadcast_by_kind() {
        let manager = SessionManager::new();
        let first = Arc::new(Recorder::default());
        let (t1, _c1) = channel_transport();
        manager.register("s1", t1, first.clone());
        let (t2, mut c2) = channel_transport();
        manager.register("s1", t2, Arc::new(GenericSession));
        assert!(first.closed.load(Ordering::SeqCst));
        assert_eq!(manager.client_count(), 1);

        let sent = manager.broadcast_to_kind(SessionKind::Generic, &Message::status("hello"));
        assert_eq!(sent, 1);
        assert_eq!(c2.next_json().await.unwrap()["payload"]["status"], "hello");
        assert_eq!(manager.broadcast_to_kind(SessionKind::Event, &Message::status("x")), 0);
    }
}
