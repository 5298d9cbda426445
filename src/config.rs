//! FileMesh Configuration
//!
//! This module provides configuration structures for file-service nodes
//! and the discovery service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::network::MAX_FRAME_LIMIT;
use crate::types::NodeAddress;

/// Main FileMesh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeshConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Discovery service configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Peer synchronization configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Host other nodes and clients use to reach this node
    #[serde(default = "default_host")]
    pub host: String,

    /// Client-facing HTTP port
    #[serde(default = "default_client_port")]
    pub client_port: u16,

    /// Peer-facing wire protocol port
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,

    /// Interface the peer listener binds to
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// Directory holding replicated files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Discovery service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Address nodes send JOIN to
    #[serde(default = "default_discovery_address")]
    pub address: String,

    /// Address the discovery service binds to
    #[serde(default = "default_discovery_bind")]
    pub bind_address: String,

    /// Interval between membership pushes in milliseconds
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,

    /// Per-node heartbeat acknowledgment timeout in milliseconds
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Consecutive missed acknowledgments before eviction
    #[serde(default = "default_max_missed")]
    pub max_missed: u32,
}

/// Peer synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Deadline for a freshness round in milliseconds
    #[serde(default = "default_freshness_timeout_ms")]
    pub freshness_timeout_ms: u64,

    /// Timeout for a single file fetch in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// JOIN round-trip timeout in milliseconds
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Initial re-join backoff in milliseconds
    #[serde(default = "default_rejoin_min_ms")]
    pub rejoin_min_ms: u64,

    /// Maximum re-join backoff in milliseconds
    #[serde(default = "default_rejoin_max_ms")]
    pub rejoin_max_ms: u64,

    /// Push intervals without a membership push before re-joining
    #[serde(default = "default_stale_factor")]
    pub stale_factor: u32,

    /// Maximum frame size in megabytes
    #[serde(default = "default_max_frame_mb")]
    pub max_frame_mb: u64,

    /// Maximum concurrent inbound peer connections
    #[serde(default = "default_max_peer_connections")]
    pub max_peer_connections: usize,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address (defaults to listen_host:client_port)
    #[serde(default)]
    pub bind_address: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_client_port() -> u16 {
    8080
}

fn default_peer_port() -> u16 {
    7070
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/filemesh")
}

fn default_discovery_address() -> String {
    "127.0.0.1:6500".to_string()
}

fn default_discovery_bind() -> String {
    "0.0.0.0:6500".to_string()
}

fn default_push_interval_ms() -> u64 {
    10_000
}

fn default_ack_timeout_ms() -> u64 {
    1000
}

fn default_max_missed() -> u32 {
    3
}

fn default_freshness_timeout_ms() -> u64 {
    5000
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_join_timeout_ms() -> u64 {
    1000
}

fn default_rejoin_min_ms() -> u64 {
    1000
}

fn default_rejoin_max_ms() -> u64 {
    30_000
}

fn default_stale_factor() -> u32 {
    3
}

fn default_max_frame_mb() -> u64 {
    256
}

fn default_max_peer_connections() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            client_port: default_client_port(),
            peer_port: default_peer_port(),
            listen_host: default_listen_host(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            address: default_discovery_address(),
            bind_address: default_discovery_bind(),
            push_interval_ms: default_push_interval_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_missed: default_max_missed(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            freshness_timeout_ms: default_freshness_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            rejoin_min_ms: default_rejoin_min_ms(),
            rejoin_max_ms: default_rejoin_max_ms(),
            stale_factor: default_stale_factor(),
            max_frame_mb: default_max_frame_mb(),
            max_peer_connections: default_max_peer_connections(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for FileMeshConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            discovery: DiscoveryConfig::default(),
            sync: SyncConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FileMeshConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: FileMeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.host.is_empty() {
            return Err(crate::Error::Config("node.host cannot be empty".into()));
        }

        if self.node.client_port == self.node.peer_port && self.node.client_port != 0 {
            return Err(crate::Error::Config(
                "node.client_port and node.peer_port must differ".into(),
            ));
        }

        if self.discovery.address.is_empty() {
            return Err(crate::Error::Config("discovery.address cannot be empty".into()));
        }

        if self.discovery.push_interval_ms == 0 {
            return Err(crate::Error::Config(
                "discovery.push_interval_ms must be greater than 0".into(),
            ));
        }

        if self.discovery.max_missed == 0 {
            return Err(crate::Error::Config(
                "discovery.max_missed must be at least 1".into(),
            ));
        }

        if self.sync.rejoin_min_ms > self.sync.rejoin_max_ms {
            return Err(crate::Error::Config(
                "sync.rejoin_min_ms cannot exceed sync.rejoin_max_ms".into(),
            ));
        }

        if self.sync.max_peer_connections == 0 {
            return Err(crate::Error::Config(
                "sync.max_peer_connections must be at least 1".into(),
            ));
        }

        if self.sync.max_frame_mb == 0 {
            return Err(crate::Error::Config("sync.max_frame_mb must be at least 1".into()));
        }

        // Frame headers carry a u32 length
        if self.sync.max_frame_mb.saturating_mul(1024 * 1024) > MAX_FRAME_LIMIT as u64 {
            return Err(crate::Error::Config(format!(
                "sync.max_frame_mb must be below 4096 (got {})",
                self.sync.max_frame_mb
            )));
        }

        Ok(())
    }

    /// This node's advertised identity
    pub fn node_address(&self) -> NodeAddress {
        NodeAddress::new(
            self.node.host.clone(),
            self.node.client_port,
            self.node.peer_port,
        )
    }

    /// Address the peer listener binds to
    pub fn peer_bind_address(&self) -> String {
        format!("{}:{}", self.node.listen_host, self.node.peer_port)
    }

    /// Address the HTTP API binds to
    pub fn api_bind_address(&self) -> String {
        self.api
            .bind_address
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.node.listen_host, self.node.client_port))
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Get membership push interval as Duration
    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.push_interval_ms)
    }

    /// Get heartbeat ack timeout as Duration
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery.ack_timeout_ms)
    }

    /// Get freshness round deadline as Duration
    pub fn freshness_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.freshness_timeout_ms)
    }

    /// Get fetch timeout as Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.fetch_timeout_ms)
    }

    /// Get JOIN round-trip timeout as Duration
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.join_timeout_ms)
    }

    /// Maximum frame size in bytes
    pub fn max_frame_bytes(&self) -> usize {
        (self.sync.max_frame_mb as usize) * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
host = "10.0.0.5"
client_port = 8080
peer_port = 7070
data_dir = "/var/lib/filemesh"

[discovery]
address = "10.0.0.1:6500"
push_interval_ms = 2000

[sync]
freshness_timeout_ms = 3000
"#;

        let config = FileMeshConfig::from_str(toml).unwrap();
        assert_eq!(config.node_address(), NodeAddress::new("10.0.0.5", 8080, 7070));
        assert_eq!(config.discovery.address, "10.0.0.1:6500");
        assert_eq!(config.push_interval(), Duration::from_secs(2));
        assert_eq!(config.freshness_timeout(), Duration::from_secs(3));
        assert_eq!(config.peer_bind_address(), "0.0.0.0:7070");
        assert_eq!(config.api_bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_defaults() {
        let config = FileMeshConfig::from_str("").unwrap();
        assert_eq!(config.freshness_timeout(), Duration::from_secs(5));
        assert_eq!(config.join_timeout(), Duration::from_secs(1));
        assert_eq!(config.push_interval(), Duration::from_secs(10));
        assert_eq!(config.discovery.max_missed, 3);
        assert_eq!(config.sync.stale_factor, 3);
        assert_eq!(config.max_frame_bytes(), 256 * 1024 * 1024);
    }

    #[test]
    fn test_validation_bounds_frame_size() {
        let mut config = FileMeshConfig::default();
        config.sync.max_frame_mb = 4095;
        assert!(config.validate().is_ok());

        config.sync.max_frame_mb = 4096;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_shared_ports() {
        let toml = r#"
[node]
client_port = 7070
peer_port = 7070
"#;
        assert!(matches!(
            FileMeshConfig::from_str(toml),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let mut config = FileMeshConfig::default();
        config.sync.rejoin_min_ms = 10_000;
        config.sync.rejoin_max_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_output_parses_back() {
        let config = FileMeshConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed = FileMeshConfig::from_str(&rendered).unwrap();
        assert_eq!(parsed.node.peer_port, config.node.peer_port);
        assert_eq!(parsed.discovery.bind_address, config.discovery.bind_address);
    }
}
