use serde::Deserialize;

use hs_protocol::{DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_IDLE_TIMEOUT_SECS, MAX_BODY_SIZE};

/// Top-level application configuration.
/// Loaded from environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Relay tuning
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP port (default: 3000)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed cross-origin source; `None` or `*` means any origin
    #[serde(default)]
    pub cors_origin: Option<String>,
    /// development | production
    #[serde(default)]
    pub mode: RunMode,
    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Take client scheme/address from X-Forwarded-* headers
    #[serde(default)]
    pub trust_proxy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Outbound frames buffered per listener before it is considered stale
    #[serde(default = "default_listener_buffer")]
    pub listener_buffer: usize,
    /// Largest webhook payload accepted
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Listeners silent for longer than this are dropped (0 = never)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl AppConfig {
    /// Load config from `HS_*` environment variables.
    ///
    /// `PORT` and `FRONTEND_ORIGIN` are honoured as overrides so the
    /// server drops into hosting platforms that set them.
    pub fn load() -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("HS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.port", std::env::var("PORT").ok())?
            .set_override_option("server.cors_origin", std::env::var("FRONTEND_ORIGIN").ok())?
            .build()?;

        cfg.try_deserialize()
    }

    /// Returns the configured CORS origin, or `None` for "any origin".
    pub fn cors_origin(&self) -> Option<&str> {
        self.server
            .cors_origin
            .as_deref()
            .filter(|origin| !origin.is_empty() && *origin != "*")
    }

    pub fn is_production(&self) -> bool {
        self.server.mode == RunMode::Production
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: None,
            mode: RunMode::default(),
            log_level: default_log_level(),
            trust_proxy: false,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listener_buffer: default_listener_buffer(),
            max_body_bytes: default_max_body_bytes(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_listener_buffer() -> usize {
    64
}
fn default_max_body_bytes() -> usize {
    MAX_BODY_SIZE
}
fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}
fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.mode, RunMode::Development);
        assert_eq!(config.relay.listener_buffer, 64);
        assert_eq!(config.relay.max_body_bytes, 10 * 1024 * 1024);
        assert!(config.cors_origin().is_none());
    }

    #[test]
    fn wildcard_origin_means_any() {
        let mut config = AppConfig::default();
        config.server.cors_origin = Some("*".into());
        assert!(config.cors_origin().is_none());
        config.server.cors_origin = Some("https://app.example.com".into());
        assert_eq!(config.cors_origin(), Some("https://app.example.com"));
    }

    #[test]
    fn deserializes_partial_tree() {
        let cfg = config::Config::builder()
            .set_override("server.mode", "production")
            .unwrap()
            .set_override("relay.listener_buffer", 8)
            .unwrap()
            .build()
            .unwrap();
        let config: AppConfig = cfg.try_deserialize().unwrap();
        assert!(config.is_production());
        assert_eq!(config.relay.listener_buffer, 8);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.relay.idle_timeout_secs, 60);
    }
}
