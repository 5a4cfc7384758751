// Configuration module
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub graphql: GraphqlSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            logging: LoggingSettings::default(),
            graphql: GraphqlSettings::default(),
        }
    }
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 0 means one worker per CPU
    #[serde(default)]
    pub workers: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: 0,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// GraphQL endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlSettings {
    /// Indent JSON responses
    #[serde(default)]
    pub pretty: bool,
    /// Serve the Playground IDE on the endpoint
    #[serde(default = "default_true")]
    pub playground: bool,
    /// Keep-alive period for legacy connections in milliseconds, 0 disables
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    /// Wait for connection_init in milliseconds before closing 4408
    #[serde(default = "default_init_timeout_ms")]
    pub connection_init_wait_timeout_ms: u64,
}

impl Default for GraphqlSettings {
    fn default() -> Self {
        Self {
            pretty: false,
            playground: true,
            keep_alive_ms: default_keep_alive_ms(),
            connection_init_wait_timeout_ms: default_init_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_ms() -> u64 {
    10_000
}

fn default_init_timeout_ms() -> u64 {
    3_000
}
