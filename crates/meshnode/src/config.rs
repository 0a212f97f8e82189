//! Configuration management for meshnode.

use anyhow::{Context, Result};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mesh_common::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_CONNECTION_PROTOCOL, DEFAULT_HASH_COST,
    DEFAULT_LISTEN_ADDR, DEFAULT_REDIS_URL, DEFAULT_REQUEST_TIMEOUT_SECS,
};

use crate::connection::ConnectorConfig;
use crate::envelope::EncryptorKind;
use crate::storage::StorageKind;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Datastore backend
    #[serde(default)]
    pub storage: StorageKind,

    /// Node identity and payload encoding
    #[serde(default)]
    pub node: NodeConfig,

    /// Unauthorized access logging
    #[serde(default)]
    pub logs: LogsConfig,

    /// Outbound peer connections
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// bcrypt hash of the operator password (admin routes are open if unset)
    #[serde(default)]
    pub admin_password_hash: Option<String>,

    /// Show the key id in the status view
    #[serde(default)]
    pub debug_key: bool,
}

/// Who this node is and how it encodes payloads
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Pre-shared key id; every node in one mesh must use the same value
    #[serde(default)]
    pub key_id: String,

    /// Public url of this node (scheme optional). Defaults to the listen address.
    #[serde(default)]
    pub url: String,

    /// Ip announced to peers
    #[serde(default)]
    pub ip: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Scheme prepended to peer urls for outbound connections
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// bcrypt cost for the id hash sent to peers
    #[serde(default = "default_hash_cost")]
    pub hash_cost: u32,

    #[serde(default)]
    pub encryptor: EncryptorKind,

    /// Send field values unencrypted
    #[serde(default)]
    pub raw: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            url: String::new(),
            ip: String::new(),
            version: default_version(),
            protocol: default_protocol(),
            hash_cost: default_hash_cost(),
            encryptor: EncryptorKind::default(),
            raw: false,
        }
    }
}

/// Where rejected requests are recorded
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsConfig {
    /// Append entries to this text file
    #[serde(default)]
    pub access_errors_file: Option<PathBuf>,

    /// Keep entries in the datastore
    #[serde(default)]
    pub access_errors_db: bool,
}

/// Outbound connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Forward accepted payloads to known peers not yet in the chain
    #[serde(default)]
    pub relay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            relay: false,
        }
    }
}

impl ConnectionConfig {
    pub fn connector(&self) -> ConnectorConfig {
        ConnectorConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_version() -> String { env!("CARGO_PKG_VERSION").to_string() }
fn default_protocol() -> String { DEFAULT_CONNECTION_PROTOCOL.to_string() }
fn default_hash_cost() -> u32 { DEFAULT_HASH_COST }
fn default_connect_timeout() -> u64 { DEFAULT_CONNECT_TIMEOUT_SECS }
fn default_request_timeout() -> u64 { DEFAULT_REQUEST_TIMEOUT_SECS }

fn generate_key_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(storage) = args.storage {
            config.storage = storage;
        }
        if let Some(ref url) = args.url {
            config.node.url = url.clone();
        }

        config.finish();
        Ok(config)
    }

    /// Fill values derived from other settings
    fn finish(&mut self) {
        if self.node.key_id.is_empty() {
            tracing::warn!("node.key_id not set, generated a random one (no peer will accept this node)");
            self.node.key_id = generate_key_id();
        }
        if self.node.url.is_empty() {
            self.node.url = format!("{}/", self.listen_addr);
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            listen_addr: default_listen_addr(),
            storage: StorageKind::default(),
            node: NodeConfig::default(),
            logs: LogsConfig::default(),
            connection: ConnectionConfig::default(),
            admin_password_hash: None,
            debug_key: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args() -> crate::Args {
        crate::Args {
            config: String::new(),
            redis_url: None,
            listen: None,
            log_level: "info".into(),
            json_logs: false,
            storage: None,
            url: None,
        }
    }

    #[test]
    fn test_defaults_fill_identity() {
        let config = AppConfig::load("does/not/exist.toml", &args()).unwrap();
        assert_eq!(config.node.key_id.len(), 32);
        assert_eq!(config.node.url, format!("{DEFAULT_LISTEN_ADDR}/"));
        assert_eq!(config.storage, StorageKind::Redis);
    }

    #[test]
    fn test_file_and_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
storage = "memory"
admin_password_hash = "$2b$04$x"

[node]
key_id = "shared"
url = "http://a.org/node"
encryptor = "plain"

[connection]
relay = true
"#
        )
        .unwrap();

        let mut overrides = args();
        overrides.listen = Some("0.0.0.0:9999".into());
        let path = file.path().to_string_lossy().to_string();
        let config = AppConfig::load(&path, &overrides).unwrap();

        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.node.key_id, "shared");
        assert_eq!(config.node.url, "http://a.org/node");
        assert_eq!(config.node.encryptor, EncryptorKind::Plain);
        assert!(config.connection.relay);
        assert_eq!(config.connection.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(config.listen_addr, "0.0.0.0:9999");
        assert_eq!(config.admin_password_hash.as_deref(), Some("$2b$04$x"));
    }
}
