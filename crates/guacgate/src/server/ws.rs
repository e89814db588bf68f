//! Browser-facing WebSocket endpoint.
//!
//! Performs the upgrade at `GET /tunnel` and hands the socket, its query
//! arguments, and a completion channel to the intake queue. Instructions
//! travel as text frames; the RFB-style binary framing some tunnels use is
//! not part of this protocol.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::server::intake::Intake;
use crate::server::transport::{ClientSink, ClientSource};

/// Shared state behind every upgrade handler.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub intake: Arc<Intake<WsSource, WsSink>>,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/tunnel", get(tunnel_upgrade))
        .with_state(state)
}

async fn tunnel_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<GatewayState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

async fn handle_socket(socket: WebSocket, query: HashMap<String, String>, state: GatewayState) {
    let (sink, stream) = socket.split();
    let (id, completion) = state.intake.enqueue(
        WsSource { stream },
        WsSink { sink },
        query,
    );
    // A dropped sender (abrupt shutdown) reads as failure
    let success = completion.await.unwrap_or(false);
    debug!("session {}: completion resolved (success: {})", id, success);
}

/// Receiving half of an upgraded WebSocket.
pub struct WsSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl ClientSource for WsSource {
    async fn receive_text(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) => return Ok(None),
                // Keepalives are answered by the library
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Binary(_))) => {
                    return Err(GatewayError::Framing(
                        "unexpected binary frame from client".to_string(),
                    ))
                }
                Some(Err(e)) => {
                    debug!("websocket receive error: {}", e);
                    return Err(GatewayError::PeerClosed);
                }
            }
        }
    }
}

/// Sending half of an upgraded WebSocket.
pub struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl ClientSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|_| GatewayError::PeerClosed)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        // The peer may already be gone; closing is best effort
        let _ = self.sink.send(Message::Close(Some(frame))).await;
        let _ = self.sink.close().await;
        Ok(())
    }
}
