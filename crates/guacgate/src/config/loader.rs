//! Configuration loader

use super::Config;
use crate::error::{GatewayError, Result};
use std::path::Path;

/// Load configuration from a YAML file
///
/// Also applies GUACGATE_* env var overrides after loading.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    load_config_from_str(&contents)
}

/// Load configuration from a YAML string (useful for testing)
///
/// Also applies GUACGATE_* env var overrides after loading.
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let mut config: Config = serde_yaml::from_str(yaml)?;
    config.password = resolve_env_var(&config.password);
    apply_env_overrides(&mut config);
    config.validate().map_err(GatewayError::Config)?;
    Ok(config)
}

/// Apply GUACGATE_* environment variable overrides to a config.
///
/// Supported env vars:
/// - `GUACGATE_LISTEN_ADDRESS` - Override WebSocket listen address
/// - `GUACGATE_LISTEN_PORT` - Override WebSocket listen port
/// - `GUACGATE_GUACD_HOSTNAME` - Override guacd hostname
/// - `GUACGATE_GUACD_PORT` - Override guacd port
/// - `GUACGATE_PASSWORD` - Override token decryption secret
fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("GUACGATE_LISTEN_ADDRESS") {
        debug!("Overriding listen_address from GUACGATE_LISTEN_ADDRESS");
        config.websocket.listen_address = val;
    }
    if let Ok(val) = std::env::var("GUACGATE_LISTEN_PORT") {
        if let Ok(port) = val.parse::<u16>() {
            debug!("Overriding listen_port from GUACGATE_LISTEN_PORT");
            config.websocket.listen_port = port;
        }
    }
    if let Ok(val) = std::env::var("GUACGATE_GUACD_HOSTNAME") {
        debug!("Overriding guacd hostname from GUACGATE_GUACD_HOSTNAME");
        config.guacd.hostname = val;
    }
    if let Ok(val) = std::env::var("GUACGATE_GUACD_PORT") {
        if let Ok(port) = val.parse::<u16>() {
            debug!("Overriding guacd port from GUACGATE_GUACD_PORT");
            config.guacd.port = port;
        }
    }
    if let Ok(val) = std::env::var("GUACGATE_PASSWORD") {
        debug!("Overriding password from GUACGATE_PASSWORD");
        config.password = val;
    }
}

/// Resolve an environment variable reference in a string value
///
/// Supports `${VAR_NAME}` and whole-value `$VAR_NAME` syntax. If the variable
/// is not set, the original value is preserved.
fn resolve_env_var(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        return std::env::var(var_name).unwrap_or_else(|_| value.to_string());
    }
    if value.starts_with('$') && !value.contains(' ') && value.len() > 1 {
        let var_name = &value[1..];
        return std::env::var(var_name).unwrap_or_else(|_| value.to_string());
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_minimal() {
        let yaml = r#"
password: secret
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.websocket.listen_address, "127.0.0.1"); // default
        assert_eq!(config.websocket.listen_port, 8080);
        assert_eq!(config.websocket.max_inactivity_min, 10);
        assert_eq!(config.guacd.hostname, "127.0.0.1");
        assert_eq!(config.guacd.port, 4822);
        assert_eq!(config.guacd.timeout_ms, 15_000);
        assert_eq!(config.client.default_size.width, 1024);
        assert_eq!(config.client.default_size.height, 768);
        assert_eq!(config.client.default_size.dpi, 96);
    }

    #[test]
    fn test_load_config_full() {
        let yaml = r#"
websocket:
  listen_address: "0.0.0.0"
  listen_port: 9443
  max_inactivity_min: 5
  intake_capacity: 16
  workers: 8
  shutdown_grace_secs: 2

guacd:
  hostname: guacd.internal
  port: 4823
  timeout_ms: 5000

password: secret

client:
  default_size: { width: 1920, height: 1080, dpi: 120 }
  default_arguments:
    rdp:
      security: any
      ignore-cert: "true"
  unencrypted_arguments:
    rdp: [width, height]
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.websocket.listen_address, "0.0.0.0");
        assert_eq!(config.websocket.listen_port, 9443);
        assert_eq!(config.websocket.workers, 8);
        assert_eq!(config.guacd.hostname, "guacd.internal");
        assert_eq!(config.client.default_size.width, 1920);
        assert_eq!(
            config.client.default_arguments["rdp"]["security"],
            "any".to_string()
        );
        assert_eq!(
            config.client.unencrypted_arguments["rdp"],
            vec!["width".to_string(), "height".to_string()]
        );
    }

    #[test]
    fn test_load_config_missing_password_rejected() {
        let yaml = r#"
password: ""
"#;
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_load_config_unknown_protocol_rejected() {
        let yaml = r#"
password: secret
client:
  default_arguments:
    mysql:
      hostname: localhost
"#;
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown protocol"));
    }

    #[test]
    fn test_password_env_var_resolution() {
        std::env::set_var("TEST_GUACGATE_SECRET", "from_env");

        let yaml = r#"
password: "${TEST_GUACGATE_SECRET}"
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.password, "from_env");

        std::env::remove_var("TEST_GUACGATE_SECRET");
    }

    #[test]
    fn test_env_var_not_set_keeps_original() {
        std::env::remove_var("GUACGATE_UNSET_VAR_12345");
        assert_eq!(
            resolve_env_var("${GUACGATE_UNSET_VAR_12345}"),
            "${GUACGATE_UNSET_VAR_12345}"
        );
        assert_eq!(resolve_env_var("plain_password"), "plain_password");
    }
}
