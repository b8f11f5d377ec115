//! Runtime configuration of a coordinator, derived from [`NodeConfig`].

use crate::hint_delivery::HintDeliveryConfig;
use crate::hints::HintConfig;
use ringstore_config::NodeConfig;
use ringstore_storage::FsyncPolicy;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    pub range_timeout: Duration,
    /// Probability that a read repairs every live replica.
    pub read_repair_chance: f64,
    pub hints: HintConfig,
    pub hint_delivery_interval: Duration,
    pub max_hints_per_cycle: usize,
    pub batchlog_replay_interval: Duration,
    /// Batch log entries older than this are replayed.
    pub batchlog_timeout: Duration,
    pub fsync: FsyncPolicy,
    /// Period of the WAL sync task under [`FsyncPolicy::Batch`].
    pub wal_sync_interval: Duration,
    /// Where to serve Prometheus metrics, if anywhere.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_millis(2000),
            read_timeout: Duration::from_millis(5000),
            range_timeout: Duration::from_millis(10_000),
            read_repair_chance: 0.1,
            hints: HintConfig::default(),
            hint_delivery_interval: Duration::from_secs(10),
            max_hints_per_cycle: 100,
            batchlog_replay_interval: Duration::from_secs(60),
            batchlog_timeout: Duration::from_millis(4000),
            fsync: FsyncPolicy::Batch,
            wal_sync_interval: Duration::from_millis(1000),
            metrics_addr: None,
        }
    }
}

impl From<&NodeConfig> for ProxyConfig {
    fn from(node: &NodeConfig) -> Self {
        Self {
            write_timeout: Duration::from_millis(node.proxy.write_timeout_ms),
            read_timeout: Duration::from_millis(node.proxy.read_timeout_ms),
            range_timeout: Duration::from_millis(node.proxy.range_timeout_ms),
            read_repair_chance: node.proxy.read_repair_chance,
            hints: HintConfig {
                enabled: node.hints.hinted_handoff,
                max_hint_window: Duration::from_millis(node.hints.max_hint_window_ms),
                max_hints_per_endpoint: node.hints.max_hints_per_endpoint,
            },
            hint_delivery_interval: Duration::from_secs(node.hints.hint_delivery_interval_secs),
            max_hints_per_cycle: node.hints.max_hints_per_cycle,
            batchlog_replay_interval: Duration::from_secs(
                node.batchlog.batchlog_replay_interval_secs,
            ),
            batchlog_timeout: Duration::from_millis(node.batchlog.batchlog_timeout_ms),
            fsync: FsyncPolicy::from_str_config(&node.storage.fsync),
            wal_sync_interval: Duration::from_millis(node.storage.sync_interval_ms),
            metrics_addr: node
                .metrics_port
                .map(|port| SocketAddr::new(node.listen.ip(), port)),
        }
    }
}

impl ProxyConfig {
    /// Hints are kept no longer than the hint window.
    pub fn hint_delivery(&self) -> HintDeliveryConfig {
        HintDeliveryConfig {
            check_interval: self.hint_delivery_interval,
            max_hints_per_cycle: self.max_hints_per_cycle,
            max_hint_age: self.hints.max_hint_window,
        }
    }
}
