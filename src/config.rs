//! WolfChat Configuration
//!
//! This module provides configuration structures for a WolfChat node.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::clock::ClockSyncConfig;
use crate::membership::MembershipConfig;
use crate::replication::{ReplicationConfig, ReplicationMode};
use crate::state::PersistenceConfig;

/// Main WolfChat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfChatConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Rank authority configuration
    #[serde(default)]
    pub authority: AuthorityConfig,

    /// Replication configuration
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// Physical clock synchronization
    #[serde(default)]
    pub clock_sync: ClockSyncSettings,

    /// Snapshot persistence
    #[serde(default)]
    pub persistence: PersistenceSettings,

    /// Publish-subscribe channel
    #[serde(default)]
    pub pubsub: PubSubConfig,

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
    /// Node name, also the host name peers use to reach this node
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Address to bind for client requests
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port of the replication endpoint (same on every node)
    #[serde(default = "default_replication_port")]
    pub replication_port: u16,

    /// Directory for snapshot documents
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Rank authority configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Authority address
    #[serde(default = "default_authority_address")]
    pub address: String,

    /// Heartbeat and list refresh interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Timeout of each authority request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// synchronous, quorum or async
    #[serde(default)]
    pub mode: ReplicationMode,

    /// Acknowledgements required in quorum mode
    #[serde(default = "default_min_acks")]
    pub min_acks: usize,

    /// Timeout of each backup request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

/// Physical clock synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockSyncSettings {
    /// Run Berkeley rounds while coordinator
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between timed rounds in milliseconds
    #[serde(default = "default_sync_interval_ms")]
    pub interval_ms: u64,

    /// Also sync after this many client requests (0 = never)
    #[serde(default = "default_every_requests")]
    pub every_requests: u64,

    /// Readings further than this from the median are ignored
    #[serde(default = "default_max_deviation_ms")]
    pub max_deviation_ms: i64,

    /// Timeout of each poll in milliseconds
    #[serde(default = "default_sync_timeout_ms")]
    pub timeout_ms: u64,
}

/// Snapshot persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Write snapshots
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Autosave interval in milliseconds
    #[serde(default = "default_autosave_interval_ms")]
    pub autosave_interval_ms: u64,

    /// Coalescing window for post-mutation writes in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Publish-subscribe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// Subscriber bind address
    #[serde(default = "default_pubsub_address")]
    pub bind_address: String,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_node_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("server_{}", suffix)
}

fn default_bind_address() -> String {
    "0.0.0.0:5555".to_string()
}

fn default_replication_port() -> u16 {
    5560
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfchat")
}

fn default_authority_address() -> String {
    "reference:5559".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_request_timeout_ms() -> u64 {
    2_000
}

fn default_min_acks() -> usize {
    1
}

fn default_sync_interval_ms() -> u64 {
    30_000
}

fn default_every_requests() -> u64 {
    10
}

fn default_max_deviation_ms() -> i64 {
    1_000
}

fn default_sync_timeout_ms() -> u64 {
    1_000
}

fn default_autosave_interval_ms() -> u64 {
    30_000
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_pubsub_address() -> String {
    "0.0.0.0:5557".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            bind_address: default_bind_address(),
            replication_port: default_replication_port(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            address: default_authority_address(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            mode: ReplicationMode::default(),
            min_acks: default_min_acks(),
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for ClockSyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_sync_interval_ms(),
            every_requests: default_every_requests(),
            max_deviation_ms: default_max_deviation_ms(),
            timeout_ms: default_sync_timeout_ms(),
        }
    }
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            autosave_interval_ms: default_autosave_interval_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            bind_address: default_pubsub_address(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for WolfChatConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            authority: AuthorityConfig::default(),
            replication: ReplicationSettings::default(),
            clock_sync: ClockSyncSettings::default(),
            persistence: PersistenceSettings::default(),
            pubsub: PubSubConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl WolfChatConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfChatConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.name.trim().is_empty() {
            return Err(crate::Error::Config("node.name cannot be empty".into()));
        }

        if self.node.name.contains(':') {
            return Err(crate::Error::Config("node.name must be a bare host name".into()));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        if self.node.replication_port == 0 {
            return Err(crate::Error::Config("node.replication_port cannot be 0".into()));
        }

        if self.authority.address.is_empty() {
            return Err(crate::Error::Config("authority.address cannot be empty".into()));
        }

        if self.authority.heartbeat_interval_ms == 0 {
            return Err(crate::Error::Config("authority.heartbeat_interval_ms must be positive".into()));
        }

        let timeouts = [
            ("authority.request_timeout_ms", self.authority.request_timeout_ms),
            ("replication.timeout_ms", self.replication.timeout_ms),
            ("clock_sync.timeout_ms", self.clock_sync.timeout_ms),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                return Err(crate::Error::Config(format!("{} must be positive", key)));
            }
        }

        if self.replication.mode == ReplicationMode::Quorum && self.replication.min_acks == 0 {
            return Err(crate::Error::Config("replication.min_acks must be at least 1 in quorum mode".into()));
        }

        if self.clock_sync.enabled && self.clock_sync.interval_ms == 0 {
            return Err(crate::Error::Config("clock_sync.interval_ms must be positive".into()));
        }

        if self.clock_sync.max_deviation_ms < 0 {
            return Err(crate::Error::Config("clock_sync.max_deviation_ms cannot be negative".into()));
        }

        if self.persistence.enabled && self.persistence.autosave_interval_ms == 0 {
            return Err(crate::Error::Config("persistence.autosave_interval_ms must be positive".into()));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(crate::Error::Config(format!(
                "logging.format must be pretty or json, got {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Bind address of the replication endpoint: the request bind host
    /// with the replication port
    pub fn replication_bind_address(&self) -> String {
        let host = self
            .node
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or("0.0.0.0");
        format!("{}:{}", host, self.node.replication_port)
    }

    /// Rank authority client settings
    pub fn membership(&self) -> MembershipConfig {
        MembershipConfig {
            authority_address: self.authority.address.clone(),
            heartbeat_interval: Duration::from_millis(self.authority.heartbeat_interval_ms),
            request_timeout: Duration::from_millis(self.authority.request_timeout_ms),
        }
    }

    /// Replication coordinator settings
    pub fn replication(&self) -> ReplicationConfig {
        ReplicationConfig {
            mode: self.replication.mode,
            min_acks: self.replication.min_acks,
            timeout: Duration::from_millis(self.replication.timeout_ms),
        }
    }

    /// Clock synchronizer settings
    pub fn clock_sync(&self) -> ClockSyncConfig {
        ClockSyncConfig {
            enabled: self.clock_sync.enabled,
            interval: Duration::from_millis(self.clock_sync.interval_ms),
            every_requests: self.clock_sync.every_requests,
            max_deviation_ms: self.clock_sync.max_deviation_ms,
            timeout: Duration::from_millis(self.clock_sync.timeout_ms),
        }
    }

    /// Persister settings
    pub fn persistence(&self) -> PersistenceConfig {
        PersistenceConfig {
            enabled: self.persistence.enabled,
            autosave_interval: Duration::from_millis(self.persistence.autosave_interval_ms),
            debounce: Duration::from_millis(self.persistence.debounce_ms),
        }
    }
}
