//! Client configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`--config`, or the default search paths)
//! - Environment variables (TIDAL_*), which take precedence over the file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tidal_core::SyncConfig;
use tidal_transport::WebSocketConfig;

/// Paths searched when no `--config` is given.
const CONFIG_PATHS: [&str; 3] = [
    "tidal.toml",
    "/etc/tidal/tidal.toml",
    "~/.config/tidal/tidal.toml",
];

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sync server URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Credentials.
    #[serde(default)]
    pub auth: AuthConfig,

    /// What to synchronize.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Connection tuning.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Local status endpoint.
    #[serde(default)]
    pub status: StatusConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Account email.
    #[serde(default)]
    pub email: Option<String>,

    /// Account password.
    #[serde(default)]
    pub password: Option<String>,

    /// Session token to resume instead of signing in.
    #[serde(default)]
    pub token: Option<String>,

    /// Create the account if signing in is not possible.
    #[serde(default)]
    pub sign_up: bool,
}

/// Connection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Request timeout in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Per-subscription event queue capacity.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Local status endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Serve `/health` and `/records`.
    #[serde(default)]
    pub enabled: bool,

    /// Host to bind to.
    #[serde(default = "default_status_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_status_port")]
    pub port: u16,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_event_buffer() -> usize {
    256
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MiB
}

fn default_status_host() -> String {
    "127.0.0.1".to_string()
}

fn default_status_port() -> u16 {
    8787
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: default_url(),
            auth: AuthConfig::default(),
            sync: SyncConfig::default(),
            connection: ConnectionConfig::default(),
            status: StatusConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            event_buffer: default_event_buffer(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_status_host(),
            port: default_status_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default path that
    /// exists, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::search()?,
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn search() -> Result<Self> {
        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Override fields from `TIDAL_URL`, `TIDAL_EMAIL`, `TIDAL_PASSWORD`
    /// and `TIDAL_TOKEN`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("TIDAL_URL") {
            self.url = url;
        }
        if let Some(email) = var("TIDAL_EMAIL") {
            self.auth.email = Some(email);
        }
        if let Some(password) = var("TIDAL_PASSWORD") {
            self.auth.password = Some(password);
        }
        if let Some(token) = var("TIDAL_TOKEN") {
            self.auth.token = Some(token);
        }
    }

    /// WebSocket transport settings.
    #[must_use]
    pub fn websocket(&self) -> WebSocketConfig {
        WebSocketConfig {
            url: self.url.clone(),
            token: self.auth.token.clone(),
            request_timeout: Duration::from_millis(self.connection.request_timeout_ms),
            event_buffer: self.connection.event_buffer,
            max_message_size: self.connection.max_message_size,
        }
    }

    /// Address of the status endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn status_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.status.host, self.status.port)
            .parse()
            .with_context(|| format!("Invalid status address {}:{}", self.status.host, self.status.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.url, "ws://127.0.0.1:8080/ws");
        assert!(config.metrics.enabled);
        assert!(!config.status.enabled);
        assert_eq!(config.sync.schema.owner_field, "from_email");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            url = "wss://sync.example.com/ws"

            [auth]
            email = "u@x.com"

            [sync]
            collection = "inbox"

            [sync.schema]
            order_field = "received_at"

            [status]
            enabled = true
            port = 9000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.url, "wss://sync.example.com/ws");
        assert_eq!(config.auth.email.as_deref(), Some("u@x.com"));
        assert_eq!(config.sync.collection, "inbox");
        assert_eq!(config.sync.schema.order_field, "received_at");
        assert_eq!(config.sync.schema.id_field, "id");
        assert_eq!(config.status_addr().unwrap().port(), 9000);
        assert_eq!(config.connection.event_buffer, 256);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config: Config = toml::from_str(r#"url = "ws://file/ws""#).unwrap();
        let env: HashMap<&str, &str> = [("TIDAL_URL", "ws://env/ws"), ("TIDAL_TOKEN", "t0k")]
            .into_iter()
            .collect();

        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.url, "ws://env/ws");
        assert_eq!(config.auth.token.as_deref(), Some("t0k"));
        assert!(config.auth.email.is_none());
    }

    #[test]
    fn test_websocket_settings() {
        let mut config = Config::default();
        config.connection.request_timeout_ms = 2_500;
        config.auth.token = Some("abc".to_string());

        let ws = config.websocket();
        assert_eq!(ws.request_timeout, Duration::from_millis(2_500));
        assert_eq!(ws.token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_invalid_status_addr() {
        let mut config = Config::default();
        config.status.host = "not a host".to_string();
        assert!(config.status_addr().is_err());
    }
}
