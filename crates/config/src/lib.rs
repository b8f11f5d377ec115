//! Configuration schema and loader for ringstore nodes.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Hard ceiling on hints in flight per coordinator.
pub const MAX_HINTS_IN_PROGRESS: usize = 128;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's listen address; also its endpoint identity on the ring.
    pub listen: SocketAddr,

    /// Datacenter this node belongs to.
    #[serde(default = "default_datacenter")]
    pub datacenter: String,

    /// Coordinator timeouts and read repair.
    #[serde(default)]
    pub proxy: ProxySection,

    /// Hinted handoff.
    #[serde(default)]
    pub hints: HintsSection,

    /// Batch log replay.
    #[serde(default)]
    pub batchlog: BatchlogSection,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageSection,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySection {
    /// Deadline for a write to collect its acknowledgments.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Deadline for a single-partition read.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Shared deadline for all sub-ranges of a range scan.
    #[serde(default = "default_range_timeout_ms")]
    pub range_timeout_ms: u64,

    /// Probability in `[0, 1]` that a read contacts every live replica and
    /// repairs all of them.
    #[serde(default = "default_read_repair_chance")]
    pub read_repair_chance: f64,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            range_timeout_ms: default_range_timeout_ms(),
            read_repair_chance: default_read_repair_chance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintsSection {
    /// Whether hinted handoff is enabled.
    #[serde(default = "default_true")]
    pub hinted_handoff: bool,

    /// Endpoints down for longer than this receive no new hints.
    #[serde(default = "default_max_hint_window_ms")]
    pub max_hint_window_ms: u64,

    /// Per-destination cap on hints in flight.
    #[serde(default = "default_max_hints_per_endpoint")]
    pub max_hints_per_endpoint: usize,

    /// Hint delivery check interval in seconds.
    #[serde(default = "default_hint_delivery_interval_secs")]
    pub hint_delivery_interval_secs: u64,

    /// Maximum hints to attempt delivery per cycle.
    #[serde(default = "default_max_hints_per_cycle")]
    pub max_hints_per_cycle: usize,
}

impl Default for HintsSection {
    fn default() -> Self {
        Self {
            hinted_handoff: true,
            max_hint_window_ms: default_max_hint_window_ms(),
            max_hints_per_endpoint: default_max_hints_per_endpoint(),
            hint_delivery_interval_secs: default_hint_delivery_interval_secs(),
            max_hints_per_cycle: default_max_hints_per_cycle(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchlogSection {
    /// How often the replay task scans the batch log.
    #[serde(default = "default_batchlog_replay_interval_secs")]
    pub batchlog_replay_interval_secs: u64,

    /// Entries older than this are assumed orphaned and replayed.
    #[serde(default = "default_batchlog_timeout_ms")]
    pub batchlog_timeout_ms: u64,
}

impl Default for BatchlogSection {
    fn default() -> Self {
        Self {
            batchlog_replay_interval_secs: default_batchlog_replay_interval_secs(),
            batchlog_timeout_ms: default_batchlog_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Directory for WAL and data files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fsync policy: "always", "batch", "none".
    #[serde(default = "default_fsync")]
    pub fsync: String,

    /// Under "batch", how often pending WAL entries are fsynced.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fsync: default_fsync(),
            sync_interval_ms: default_sync_interval_ms(),
        }
    }
}

// --- Defaults ---

fn default_datacenter() -> String {
    "dc1".to_string()
}
fn default_write_timeout_ms() -> u64 {
    2000
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_range_timeout_ms() -> u64 {
    10_000
}
fn default_read_repair_chance() -> f64 {
    0.1
}
fn default_true() -> bool {
    true
}
fn default_max_hint_window_ms() -> u64 {
    3 * 60 * 60 * 1000
}
fn default_max_hints_per_endpoint() -> usize {
    MAX_HINTS_IN_PROGRESS
}
fn default_hint_delivery_interval_secs() -> u64 {
    10
}
fn default_max_hints_per_cycle() -> usize {
    100
}
fn default_batchlog_replay_interval_secs() -> u64 {
    60
}
fn default_batchlog_timeout_ms() -> u64 {
    2 * default_write_timeout_ms()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_fsync() -> String {
    "batch".to_string()
}
fn default_sync_interval_ms() -> u64 {
    1000
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl NodeConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datacenter.is_empty() {
            return Err(ConfigError::Invalid("datacenter must not be empty".into()));
        }
        for (name, value) in [
            ("proxy.write_timeout_ms", self.proxy.write_timeout_ms),
            ("proxy.read_timeout_ms", self.proxy.read_timeout_ms),
            ("proxy.range_timeout_ms", self.proxy.range_timeout_ms),
            ("storage.sync_interval_ms", self.storage.sync_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
        }
        if !(0.0..=1.0).contains(&self.proxy.read_repair_chance) {
            return Err(ConfigError::Invalid(format!(
                "proxy.read_repair_chance ({}) must be within [0, 1]",
                self.proxy.read_repair_chance
            )));
        }
        if self.hints.max_hints_per_endpoint == 0
            || self.hints.max_hints_per_endpoint > MAX_HINTS_IN_PROGRESS
        {
            return Err(ConfigError::Invalid(format!(
                "hints.max_hints_per_endpoint ({}) must be within 1..={}",
                self.hints.max_hints_per_endpoint, MAX_HINTS_IN_PROGRESS
            )));
        }
        if self.hints.hint_delivery_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "hints.hint_delivery_interval_secs must be > 0".into(),
            ));
        }
        if self.batchlog.batchlog_replay_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "batchlog.batchlog_replay_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load a `NodeConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<NodeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `NodeConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    let config: NodeConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
