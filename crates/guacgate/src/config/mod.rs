//! Configuration loading and types

mod loader;
mod types;

pub use loader::{load_config, load_config_from_str};
pub use types::{ClientConfig, Config, DefaultSize, GuacdConfig, WebSocketConfig};
