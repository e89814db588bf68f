//! Client transport capabilities.
//!
//! The tunnel is polymorphic over the browser-facing connection: anything
//! that can produce text frames, accept text frames, and close with a status
//! code. The production implementation wraps the axum WebSocket halves; tests
//! plug in channel-backed mocks.

use async_trait::async_trait;

use crate::error::Result;

/// Receiving half of the client connection.
#[async_trait]
pub trait ClientSource: Send {
    /// Next text frame from the client; `Ok(None)` on orderly close.
    async fn receive_text(&mut self) -> Result<Option<String>>;
}

/// Sending half of the client connection.
#[async_trait]
pub trait ClientSink: Send {
    /// Deliver one instruction batch as a single text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Close the connection with the given status code. Best effort; errors
    /// from an already-gone peer are swallowed by implementations.
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}
