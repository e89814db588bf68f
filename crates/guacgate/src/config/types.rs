//! Configuration types

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure
///
/// # Example
///
/// ```yaml
/// websocket:
///   listen_port: 8080
///   max_inactivity_min: 10
///
/// guacd:
///   hostname: "127.0.0.1"
///   port: 4822
///
/// password: "${GUACGATE_PASSWORD}"
///
/// client:
///   default_arguments:
///     rdp:
///       security: "any"
///       ignore-cert: "true"
///   unencrypted_arguments:
///     rdp: [width, height, dpi]
/// ```
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Browser-facing WebSocket endpoint
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Downstream guacd endpoint
    #[serde(default)]
    pub guacd: GuacdConfig,

    /// Token decryption secret
    pub password: String,

    /// Per-protocol argument policy
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Listen address
    pub listen_address: String,
    /// Listen port
    pub listen_port: u16,
    /// Idle timeout in minutes; a session with no I/O in either direction
    /// for this long is closed
    pub max_inactivity_min: u64,
    /// Bound of the pending-session queue
    pub intake_capacity: usize,
    /// Number of session worker tasks
    pub workers: usize,
    /// Seconds allowed for sessions to unwind after shutdown is signalled
    pub shutdown_grace_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            listen_port: 8080,
            max_inactivity_min: 10,
            intake_capacity: 64,
            workers: 32,
            shutdown_grace_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GuacdConfig {
    pub hostname: String,
    pub port: u16,
    /// Handshake timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for GuacdConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: 4822,
            timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Screen geometry used when the descriptor does not carry one
    pub default_size: DefaultSize,

    /// Arguments applied where the descriptor omits a key, per protocol
    pub default_arguments: HashMap<String, HashMap<String, String>>,

    /// Keys the query string may override, per protocol
    pub unencrypted_arguments: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct DefaultSize {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

impl Default for DefaultSize {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            dpi: 96,
        }
    }
}

impl Config {
    pub fn max_inactivity(&self) -> Duration {
        Duration::from_secs(self.websocket.max_inactivity_min * 60)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.guacd.timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.password.is_empty() {
            return Err("password must not be empty".to_string());
        }
        if self.websocket.workers == 0 {
            return Err("websocket.workers must be at least 1".to_string());
        }
        if self.websocket.max_inactivity_min == 0 {
            return Err("websocket.max_inactivity_min must be at least 1".to_string());
        }
        for protocol in self
            .client
            .default_arguments
            .keys()
            .chain(self.client.unencrypted_arguments.keys())
        {
            if !crate::args::is_known_protocol(protocol) {
                return Err(format!(
                    "unknown protocol '{}' in client argument policy",
                    protocol
                ));
            }
        }
        Ok(())
    }
}
