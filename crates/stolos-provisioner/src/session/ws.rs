// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WebSocket transport.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::session::transport::{Transport, TransportError, TransportReader, TransportWriter};

struct WsWriter(SplitSink<WebSocket, WsMessage>);

#[async_trait]
impl TransportWriter for WsWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.0
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.send(WsMessage::Close(None)).await;
        let _ = self.0.close().await;
    }
}

struct WsReader(SplitStream<WebSocket>);

#[async_trait]
impl TransportReader for WsReader {
    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.0.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.to_string())),
                Ok(WsMessage::Close(_)) => return None,
                // Ping/pong are answered by axum; binary frames carry nothing we read.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            }
        }
    }
}

/// Split an upgraded socket into a [`Transport`].
pub fn websocket_transport(socket: WebSocket) -> Transport {
    let (sink, stream) = socket.split();
    Transport::new(Box::new(WsWriter(sink)), Box::new(WsReader(stream)))
}
