//! guacgate - WebSocket gateway for the Guacamole remote-desktop protocol
//!
//! Exposes the Guacamole protocol to browser clients over WebSocket and
//! proxies it to a guacd daemon over TCP:
//! - decrypts the signed session token describing the target host
//! - merges token, default, and allow-listed query arguments
//! - performs the select/args/size/audio/video/image/connect/ready handshake
//!   with guacd on the browser's behalf
//! - relays instructions bidirectionally until either side disconnects

#[macro_use]
mod logging;

pub mod args;
pub mod config;
pub mod error;
pub mod guacd;
pub mod server;
pub mod token;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use server::{GatewayState, Intake};
pub use token::ConnectionDescriptor;
