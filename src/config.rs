//! Daemon configuration — loaded once at startup from a TOML document.
//!
//! Every section has field-level defaults so a minimal file (just
//! `node.name` and `filesystem.root_path`) is enough to boot; see
//! [`Config::load`].

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{DaemonError, DaemonResult};

fn default_node_name() -> String {
    "NODE-DEFAULT".to_string()
}

fn default_tcp_port() -> u16 {
    9000
}

fn default_discovery_port() -> u16 {
    9050
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_reconnect_timeout() -> u64 {
    30
}

fn default_root_path() -> String {
    "driftmesh_fs".to_string()
}

fn default_metadata_db() -> String {
    "metadata.db".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_chunk_size() -> usize {
    1_048_576
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_name")]
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    #[serde(default = "default_reconnect_timeout")]
    pub reconnect_timeout: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_port: default_tcp_port(),
            discovery_port: default_discovery_port(),
            bind_address: default_bind_address(),
            discovery_enabled: true,
            heartbeat_interval: default_heartbeat_interval(),
            reconnect_timeout: default_reconnect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_root_path")]
    pub root_path: String,
    #[serde(default = "default_metadata_db")]
    pub metadata_db: String,
    #[serde(default = "default_true")]
    pub sync_on_startup: bool,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            metadata_db: default_metadata_db(),
            sync_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub console_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console_output: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub filesystem: FilesystemConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from `path`. A missing file is not fatal — it
    /// falls back to [`Config::default`] so the daemon can boot with
    /// nothing but built-in defaults. A present-but-malformed file is
    /// fatal (§7 item 7): startup refuses rather than silently degrading.
    pub fn load(path: &Path) -> DaemonResult<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("reading {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| DaemonError::Config(format!("parsing {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/driftmesh/config.toml")).unwrap();
        assert_eq!(cfg.node.name, "NODE-DEFAULT");
        assert_eq!(cfg.network.tcp_port, 9000);
    }

    #[test]
    fn minimal_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[node]\nname = \"A\"\n\n[filesystem]\nroot_path = \"root\"\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.node.name, "A");
        assert_eq!(cfg.filesystem.root_path, "root");
        assert_eq!(cfg.network.discovery_port, 9050);
        assert_eq!(cfg.sync.chunk_size, 1_048_576);
    }

    #[test]
    fn malformed_toml_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not valid toml [[[").unwrap();

        assert!(Config::load(&path).is_err());
    }
}
