//! Error types for the gateway.

use thiserror::Error;

/// Main error type for the gateway.
///
/// Variants correspond to the session failure kinds; the WebSocket status
/// sent to the browser is derived via [`GatewayError::ws_close_code`].
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Token missing, undecryptable, or describing an unknown protocol
    #[error("bad token: {0}")]
    BadToken(String),

    /// Wire framing violation on either socket
    #[error("framing error: {0}")]
    Framing(String),

    /// guacd handshake failure
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Inactivity limit exceeded
    #[error("session inactive too long")]
    Timeout,

    /// The peer closed its end of the tunnel
    #[error("peer closed")]
    PeerClosed,

    /// Process shutdown reached the session
    #[error("cancelled by shutdown")]
    Cancelled,

    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

/// WebSocket close status codes (RFC 6455 §7.4.1).
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const INTERNAL_ERROR: u16 = 1011;
}

impl GatewayError {
    /// The WebSocket close status reported to the browser for this failure.
    pub fn ws_close_code(&self) -> u16 {
        match self {
            GatewayError::BadToken(_)
            | GatewayError::Handshake(_)
            | GatewayError::Internal(_)
            | GatewayError::Io(_)
            | GatewayError::Config(_) => close_code::INTERNAL_ERROR,
            GatewayError::Cancelled => close_code::GOING_AWAY,
            GatewayError::Framing(_) | GatewayError::Timeout | GatewayError::PeerClosed => {
                close_code::NORMAL
            }
        }
    }
}

impl From<guacgate_protocol::ParseError> for GatewayError {
    fn from(err: guacgate_protocol::ParseError) -> Self {
        GatewayError::Framing(err.to_string())
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}
