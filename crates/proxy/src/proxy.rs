//! The storage proxy: entry point for coordinated reads and writes.
//!
//! A [`StorageProxy`] turns one logical operation into per-replica work,
//! enforces the caller's consistency level and degrades through hinted
//! handoff and timeouts. Write paths live in [`crate::write`], reads in
//! [`crate::read_executor`] and range scans in [`crate::range_query`].
//!
//! Generic over `M: Messaging` for testability: real deployments plug in a
//! network transport, tests an in-memory router.

use crate::batchlog::{Batchlog, LocalBatchlog};
use crate::batchlog_replay::spawn_batchlog_replay_task;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::hint_delivery::spawn_hint_delivery_task;
use crate::hint_store::HintStore;
use crate::hints::HintManager;
use crate::messaging::Messaging;
use crate::range_query::query_partition_key_range;
use crate::read_executor::{query_singular, ReadContext};
use crate::response_handler::ResponseHandlerRegistry;
use crate::stats::{ProxyStats, StatsSnapshot};
use crate::topology::Topology;
use crate::triggers::Trigger;
use futures::future::try_join_all;
use ringstore_config::NodeConfig;
use ringstore_common::{
    ConsistencyLevel, Endpoint, PartitionRange, QueryResult, ReadCommand, ReconcilableResult,
    Schema,
};
use ringstore_storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub struct StorageProxy<M: Messaging> {
    pub(crate) storage: Arc<RwLock<StorageEngine>>,
    pub(crate) topology: Arc<dyn Topology>,
    pub(crate) messaging: Arc<M>,
    pub(crate) batchlog: Arc<dyn Batchlog>,
    pub(crate) hints: Arc<HintManager>,
    pub(crate) registry: Arc<ResponseHandlerRegistry>,
    pub(crate) triggers: Vec<Arc<dyn Trigger>>,
    pub(crate) stats: Arc<ProxyStats>,
    pub(crate) config: ProxyConfig,
}

impl<M: Messaging> std::fmt::Debug for StorageProxy<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageProxy")
            .field("local", &self.topology.local_endpoint())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<M: Messaging> StorageProxy<M> {
    /// Build a coordinator over a local storage engine. Hints are kept in the
    /// same engine.
    pub fn new(
        storage: Arc<RwLock<StorageEngine>>,
        topology: Arc<dyn Topology>,
        messaging: Arc<M>,
        batchlog: Arc<dyn Batchlog>,
        config: ProxyConfig,
    ) -> Self {
        let hints = Arc::new(HintManager::new(
            HintStore::new(storage.clone()),
            topology.clone(),
            config.hints.clone(),
        ));
        Self {
            storage,
            topology,
            messaging,
            batchlog,
            hints,
            registry: Arc::new(ResponseHandlerRegistry::new()),
            triggers: Vec::new(),
            stats: Arc::new(ProxyStats::new()),
            config,
        }
    }

    /// Open the engine under `node.storage.data_dir` and build a coordinator
    /// configured from `node`, keeping the batch log in the same engine.
    /// `topology` must place the local node at `node.listen`.
    pub fn open(
        node: &NodeConfig,
        topology: Arc<dyn Topology>,
        messaging: Arc<M>,
    ) -> Result<Self, ProxyError> {
        let listen = Endpoint::new(node.listen);
        if topology.local_endpoint() != listen {
            return Err(ProxyError::InvalidRequest(format!(
                "topology is local to {}, config listens on {}",
                topology.local_endpoint(),
                listen
            )));
        }
        let config = ProxyConfig::from(node);
        let engine = StorageEngine::open(&node.storage.data_dir, config.fsync)?;
        let storage = Arc::new(RwLock::new(engine));
        let batchlog = Arc::new(LocalBatchlog::new(storage.clone()));
        Ok(Self::new(storage, topology, messaging, batchlog, config))
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn Trigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.topology.local_endpoint()
    }

    pub fn storage(&self) -> &Arc<RwLock<StorageEngine>> {
        &self.storage
    }

    pub fn topology(&self) -> &Arc<dyn Topology> {
        &self.topology
    }

    pub fn messaging(&self) -> &Arc<M> {
        &self.messaging
    }

    pub fn batchlog(&self) -> &Arc<dyn Batchlog> {
        &self.batchlog
    }

    pub fn hints(&self) -> &Arc<HintManager> {
        &self.hints
    }

    pub fn registry(&self) -> &Arc<ResponseHandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Timeout and unavailability counters of this coordinator.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The capabilities a read executor needs, and nothing else.
    pub fn read_context(&self) -> ReadContext<M> {
        ReadContext {
            local: self.topology.local_endpoint(),
            storage: self.storage.clone(),
            messaging: self.messaging.clone(),
            topology: self.topology.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            read_timeout: self.config.read_timeout,
            range_timeout: self.config.range_timeout,
            read_repair_chance: self.config.read_repair_chance,
        }
    }

    /// Read `ranges` at `cl` and merge the live rows in input order.
    pub async fn query(
        &self,
        schema: &Schema,
        cmd: &ReadCommand,
        ranges: Vec<PartitionRange>,
        cl: ConsistencyLevel,
    ) -> Result<QueryResult, ProxyError> {
        let _timer = ringstore_metrics::start_op_timer("read");
        ringstore_metrics::metrics()
            .reads
            .with_label_values(&[&cl.to_string()])
            .inc();

        let ctx = self.read_context();
        let parts = try_join_all(ranges.into_iter().map(|range| {
            let ctx = ctx.clone();
            async move {
                match range {
                    PartitionRange::Key(key) => {
                        let data = query_singular(&ctx, cmd, key, cl).await?;
                        Ok::<_, ProxyError>(data.to_query_result(cmd.row_limit))
                    }
                    PartitionRange::Tokens(tokens) => {
                        query_partition_key_range(&ctx, schema, cmd, tokens, cl).await
                    }
                }
            }
        }))
        .await?;

        let mut result = QueryResult::concat(parts);
        result.truncate(cmd.row_limit);
        Ok(result)
    }

    /// Read `ranges` from the local storage engine only.
    pub async fn query_local(&self, cmd: &ReadCommand, ranges: &[PartitionRange]) -> QueryResult {
        let storage = self.storage.read().await;
        let mut result = QueryResult::concat(
            ranges
                .iter()
                .map(|range| storage.read(cmd, range).to_query_result(cmd.row_limit)),
        );
        result.truncate(cmd.row_limit);
        result
    }

    /// Local data for `range`, tombstones and timestamps included.
    pub async fn query_mutations_locally(
        &self,
        cmd: &ReadCommand,
        range: &PartitionRange,
    ) -> ReconcilableResult {
        self.storage.read().await.read(cmd, range)
    }

    /// Start hint delivery, batch log replay, WAL syncing and, when
    /// configured, the metrics endpoint.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![
            spawn_hint_delivery_task(
                self.hints.clone(),
                self.topology.clone(),
                self.messaging.clone(),
                self.config.hint_delivery(),
            ),
            spawn_batchlog_replay_task(self.clone(), self.config.batchlog_replay_interval),
            spawn_wal_sync_task(self.storage.clone(), self.config.wal_sync_interval),
        ];
        if let Some(addr) = self.config.metrics_addr {
            tasks.push(tokio::spawn(async move {
                if let Err(e) = ringstore_metrics::serve_metrics(addr).await {
                    tracing::warn!("metrics server failed: {}", e);
                }
            }));
        }
        tasks
    }
}

/// Fsync WAL entries that the batch policy left pending, every `every`.
pub fn spawn_wal_sync_task(
    storage: Arc<RwLock<StorageEngine>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            match storage.write().await.sync_pending() {
                Ok(0) => {}
                Ok(n) => tracing::debug!("synced {} WAL entries", n),
                Err(e) => tracing::warn!("WAL sync failed: {}", e),
            }
        }
    })
}
