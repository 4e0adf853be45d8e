// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Text transport halves and an in-process channel transport.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Transport failures. Any of these ends the connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer went away.
    #[error("connection closed")]
    Closed,
    /// The underlying connection failed.
    #[error("transport error: {0}")]
    Io(String),
}

/// Outbound half.
#[async_trait]
pub trait TransportWriter: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection.
    async fn close(&mut self);
}

/// Inbound half.
#[async_trait]
pub trait TransportReader: Send {
    /// Next text frame; `None` when the peer closed.
    async fn recv_text(&mut self) -> Option<Result<String, TransportError>>;
}

/// Both halves of one client connection.
pub struct Transport {
    /// Outbound half
    pub writer: Box<dyn TransportWriter>,
    /// Inbound half
    pub reader: Box<dyn TransportReader>,
}

impl Transport {
    /// Pair two halves.
    pub fn new(writer: Box<dyn TransportWriter>, reader: Box<dyn TransportReader>) -> Self {
        Self { writer, reader }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

struct ChannelWriter(Option<mpsc::UnboundedSender<String>>);

#[async_trait]
impl TransportWriter for ChannelWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        match &self.0 {
            Some(tx) => tx.send(text).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) {
        self.0 = None;
    }
}

struct ChannelReader(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl TransportReader for ChannelReader {
    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        self.0.recv().await.map(Ok)
    }
}

/// Client side of a [`channel_transport`].
#[derive(Debug)]
pub struct ClientEnd {
    /// Frames the server wrote
    pub incoming: mpsc::UnboundedReceiver<String>,
    /// Send frames to the server; dropping it closes the connection
    pub outgoing: mpsc::UnboundedSender<String>,
}

impl ClientEnd {
    /// Send a JSON value as one frame.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.outgoing.send(value.to_string()).is_ok()
    }

    /// Next frame the server wrote, parsed as JSON.
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        let text = self.incoming.recv().await?;
        serde_json::from_str(&text).ok()
    }
}

/// In-process transport. The server gets the [`Transport`], the test or
/// embedding code plays the client through [`ClientEnd`].
pub fn channel_transport() -> (Transport, ClientEnd) {
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let transport = Transport::new(
        Box::new(ChannelWriter(Some(server_tx))),
        Box::new(ChannelReader(server_rx)),
    );
    (
        transport,
        ClientEnd {
            incoming: client_rx,
            outgoing: client_tx,
        },
    )
}
