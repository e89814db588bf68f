//! Argument resolution for new sessions.
//!
//! The final argument map a session presents to guacd is assembled from three
//! layers, in this order:
//!
//! 1. the decrypted descriptor's arguments,
//! 2. configured per-protocol defaults, filling keys the descriptor omits,
//! 3. query-string values for keys on the per-protocol allow-list, which
//!    override the descriptor.
//!
//! Keys outside both policy lists pass through from the descriptor untouched.

use std::collections::HashMap;

use crate::config::ClientConfig;
use crate::error::{GatewayError, Result};
use crate::token::ConnectionDescriptor;

/// Protocols guacd can drive.
pub const KNOWN_PROTOCOLS: &[&str] = &["rdp", "vnc", "ssh", "telnet", "kubernetes"];

pub fn is_known_protocol(protocol: &str) -> bool {
    KNOWN_PROTOCOLS.contains(&protocol)
}

/// Merge defaults and allow-listed query overrides into the descriptor's
/// argument map.
///
/// Fails with `BadToken` when the descriptor names a protocol guacd does not
/// speak, before any socket work happens.
pub fn merge_arguments(
    policy: &ClientConfig,
    descriptor: &ConnectionDescriptor,
    query: &HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    if !is_known_protocol(&descriptor.protocol) {
        return Err(GatewayError::BadToken(format!(
            "unknown protocol '{}'",
            descriptor.protocol
        )));
    }

    let mut merged = descriptor.arguments.clone();

    if let Some(defaults) = policy.default_arguments.get(&descriptor.protocol) {
        for (key, value) in defaults {
            merged
                .entry(key.to_ascii_lowercase())
                .or_insert_with(|| value.clone());
        }
    }

    if let Some(allowed) = policy.unencrypted_arguments.get(&descriptor.protocol) {
        for key in allowed {
            let key = key.to_ascii_lowercase();
            if let Some(value) = query.get(&key) {
                if !value.trim().is_empty() {
                    merged.insert(key, value.clone());
                }
            }
        }
    }

    Ok(merged)
}
