//! Shared fixtures for unit tests: remote replicas simulated behind
//! [`MockMessaging`] and a ready-made coordinator in [`TestNode`].

use crate::batchlog::{Batch, LocalBatchlog};
use crate::config::ProxyConfig;
use crate::messaging::{Messaging, MessagingError};
use crate::proxy::StorageProxy;
use crate::topology::{ReplicationStrategy, TokenRing};
use parking_lot::Mutex;
use ringstore_common::{
    Cell, DecoratedKey, Endpoint, FrozenMutation, Mutation, PartitionRange, ReadCommand,
    ReadDigest, ReconcilableResult, Token,
};
use ringstore_storage::{FsyncPolicy, StorageEngine};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::RwLock;
use uuid::Uuid;

pub(crate) fn put(key: &str, value: &str) -> Mutation {
    Mutation::new("ks", "t", DecoratedKey::new(key.as_bytes().to_vec()))
        .with_row(b"c".to_vec(), value.as_bytes().to_vec())
}

pub(crate) fn put_at(key: &str, value: &str, timestamp: i64) -> Mutation {
    Mutation::new("ks", "t", DecoratedKey::new(key.as_bytes().to_vec()))
        .with_cell(b"c".to_vec(), Cell::live(value.as_bytes().to_vec(), timestamp))
}

/// A row whose partition sits at exactly `token`.
pub(crate) fn put_token(token: u64, value: &str) -> Mutation {
    let key = DecoratedKey::with_token(Token(token), format!("k{token}"));
    Mutation::new("ks", "t", key).with_row(b"c".to_vec(), value.as_bytes().to_vec())
}

pub(crate) fn frozen(key: &str, value: &str) -> FrozenMutation {
    put(key, value).freeze().unwrap()
}

#[derive(Default)]
struct Counters {
    mutation_attempts: usize,
    mutations: HashMap<Endpoint, usize>,
    data_reads: HashMap<Endpoint, usize>,
    digest_reads: usize,
    batches_stored: usize,
    batches_removed: usize,
}

/// Every remote endpoint gets its own storage engine, created on first use.
pub(crate) struct MockMessaging {
    dir: TempDir,
    replicas: Mutex<HashMap<Endpoint, StorageEngine>>,
    failed: Mutex<HashSet<Endpoint>>,
    rejected: Mutex<HashSet<(Endpoint, Option<&'static str>)>>,
    delays: Mutex<HashMap<Endpoint, Duration>>,
    counters: Mutex<Counters>,
}

impl MockMessaging {
    pub(crate) fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            replicas: Mutex::new(HashMap::new()),
            failed: Mutex::new(HashSet::new()),
            rejected: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Every request to `endpoint` fails as unreachable.
    pub(crate) fn fail(&self, endpoint: Endpoint) {
        self.failed.lock().insert(endpoint);
    }

    /// Every request to `endpoint` is answered with an error.
    pub(crate) fn reject(&self, endpoint: Endpoint) {
        self.rejected.lock().insert((endpoint, None));
    }

    /// Requests of one verb to `endpoint` are answered with an error.
    pub(crate) fn reject_verb(&self, endpoint: Endpoint, verb: &'static str) {
        self.rejected.lock().insert((endpoint, Some(verb)));
    }

    pub(crate) fn delay(&self, endpoint: Endpoint, by: Duration) {
        self.delays.lock().insert(endpoint, by);
    }

    /// Seed `endpoint` with data without counting it as traffic.
    pub(crate) fn set_data(&self, endpoint: Endpoint, mutations: Vec<Mutation>) {
        self.with_replica(endpoint, |engine| {
            for m in &mutations {
                engine.apply(m).unwrap();
            }
        });
    }

    pub(crate) fn mutation_attempts(&self) -> usize {
        self.counters.lock().mutation_attempts
    }

    pub(crate) fn mutations_sent(&self) -> usize {
        self.counters.lock().mutations.values().sum()
    }

    pub(crate) fn mutations_sent_to(&self, endpoint: Endpoint) -> usize {
        self.counters
            .lock()
            .mutations
            .get(&endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn data_reads(&self) -> usize {
        self.counters.lock().data_reads.values().sum()
    }

    pub(crate) fn data_reads_to(&self, endpoint: Endpoint) -> usize {
        self.counters
            .lock()
            .data_reads
            .get(&endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn reads_sent(&self) -> usize {
        self.data_reads() + self.counters.lock().digest_reads
    }

    pub(crate) fn batches_stored(&self) -> usize {
        self.counters.lock().batches_stored
    }

    pub(crate) fn batches_removed(&self) -> usize {
        self.counters.lock().batches_removed
    }

    fn with_replica<T>(&self, endpoint: Endpoint, f: impl FnOnce(&mut StorageEngine) -> T) -> T {
        let mut replicas = self.replicas.lock();
        let engine = replicas.entry(endpoint).or_insert_with(|| {
            let path = self.dir.path().join(endpoint.addr().port().to_string());
            StorageEngine::open(&path, FsyncPolicy::None).unwrap()
        });
        f(engine)
    }

    async fn reach(&self, to: Endpoint, verb: &'static str) -> Result<(), MessagingError> {
        let delay = self.delays.lock().get(&to).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failed.lock().contains(&to) {
            return Err(MessagingError::Unreachable(to));
        }
        let rejected = self
            .rejected
            .lock()
            .iter()
            .any(|(ep, v)| *ep == to && v.map_or(true, |v| v == verb));
        if rejected {
            return Err(MessagingError::Remote {
                endpoint: to,
                message: format!("{verb} rejected"),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Messaging for MockMessaging {
    async fn send_mutation(
        &self,
        to: Endpoint,
        mutation: Arc<FrozenMutation>,
    ) -> Result<(), MessagingError> {
        self.counters.lock().mutation_attempts += 1;
        self.reach(to, "mutation").await?;
        let m = mutation.unfreeze().map_err(|e| MessagingError::Remote {
            endpoint: to,
            message: e.to_string(),
        })?;
        self.with_replica(to, |engine| engine.apply(&m))
            .map_err(|e| MessagingError::Remote {
                endpoint: to,
                message: e.to_string(),
            })?;
        *self.counters.lock().mutations.entry(to).or_insert(0) += 1;
        Ok(())
    }

    async fn read_data(
        &self,
        to: Endpoint,
        cmd: &ReadCommand,
        range: &PartitionRange,
    ) -> Result<ReconcilableResult, MessagingError> {
        *self.counters.lock().data_reads.entry(to).or_insert(0) += 1;
        self.reach(to, "read_data").await?;
        Ok(self.with_replica(to, |engine| engine.read(cmd, range)))
    }

    async fn read_digest(
        &self,
        to: Endpoint,
        cmd: &ReadCommand,
        range: &PartitionRange,
    ) -> Result<ReadDigest, MessagingError> {
        self.counters.lock().digest_reads += 1;
        self.reach(to, "read_digest").await?;
        Ok(self.with_replica(to, |engine| engine.digest(cmd, range)))
    }

    async fn store_batch(&self, to: Endpoint, _batch: Arc<Batch>) -> Result<(), MessagingError> {
        self.reach(to, "store_batch").await?;
        self.counters.lock().batches_stored += 1;
        Ok(())
    }

    async fn remove_batch(&self, to: Endpoint, _id: Uuid) -> Result<(), MessagingError> {
        self.reach(to, "remove_batch").await?;
        self.counters.lock().batches_removed += 1;
        Ok(())
    }
}

/// A coordinator at `127.0.0.1:1` with mocked peers.
pub(crate) struct TestNode {
    _dir: TempDir,
    pub(crate) ring: Arc<TokenRing>,
    pub(crate) messaging: Arc<MockMessaging>,
    pub(crate) batchlog: Arc<LocalBatchlog>,
    pub(crate) proxy: StorageProxy<MockMessaging>,
}

fn test_config() -> ProxyConfig {
    ProxyConfig {
        read_repair_chance: 0.0,
        fsync: FsyncPolicy::None,
        ..ProxyConfig::default()
    }
}

impl TestNode {
    fn build(ring: TokenRing, config: ProxyConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngine::open(dir.path(), config.fsync).unwrap();
        let storage = Arc::new(RwLock::new(engine));
        let ring = Arc::new(ring);
        let messaging = Arc::new(MockMessaging::new());
        let batchlog = Arc::new(LocalBatchlog::new(storage.clone()));
        let proxy = StorageProxy::new(
            storage,
            ring.clone(),
            messaging.clone(),
            batchlog.clone(),
            config,
        );
        Self {
            _dir: dir,
            ring,
            messaging,
            batchlog,
            proxy,
        }
    }

    fn ring_of(nodes: u16, rf: usize) -> TokenRing {
        let local = Endpoint::localhost(1);
        (1..=nodes)
            .fold(TokenRing::new(local, "dc1"), |ring, port| {
                ring.with_node(
                    Endpoint::localhost(port),
                    "dc1",
                    &[Token(u64::from(port) * 100)],
                )
            })
            .with_keyspace("ks", ReplicationStrategy::simple(rf))
    }

    /// Three nodes in one datacenter, keyspace `ks` at RF 3.
    pub(crate) fn three_replicas() -> Self {
        Self::build(Self::ring_of(3, 3), test_config())
    }

    pub(crate) fn three_replicas_with_timeout(timeout: Duration) -> Self {
        let config = ProxyConfig {
            write_timeout: timeout,
            read_timeout: timeout,
            ..test_config()
        };
        Self::build(Self::ring_of(3, 3), config)
    }

    pub(crate) fn three_replicas_with_hint_window(window: Duration) -> Self {
        let mut config = test_config();
        config.hints.max_hint_window = window;
        Self::build(Self::ring_of(3, 3), config)
    }

    pub(crate) fn three_replicas_with_repair_chance(chance: f64) -> Self {
        let config = ProxyConfig {
            read_repair_chance: chance,
            ..test_config()
        };
        Self::build(Self::ring_of(3, 3), config)
    }

    pub(crate) fn three_replicas_with_batchlog_timeout(timeout: Duration) -> Self {
        let config = ProxyConfig {
            batchlog_timeout: timeout,
            ..test_config()
        };
        Self::build(Self::ring_of(3, 3), config)
    }

    /// Four nodes at tokens 100..=400, keyspace `ks` at RF 1, so
    /// `[0, 400)` splits into one sub-range per node.
    pub(crate) fn four_ranges() -> Self {
        Self::build(Self::ring_of(4, 1), test_config())
    }

    pub(crate) fn four_ranges_with_range_timeout(timeout: Duration) -> Self {
        let config = ProxyConfig {
            range_timeout: timeout,
            ..test_config()
        };
        Self::build(Self::ring_of(4, 1), config)
    }
}

impl<M: Messaging> StorageProxy<M> {
    /// Value of row `c` in partition `key` of `ks.t`, read locally.
    pub(crate) async fn query_local_value(&self, key: &str) -> Option<Vec<u8>> {
        let key = DecoratedKey::new(key.as_bytes().to_vec());
        let result = self
            .query_local(&ReadCommand::new("ks", "t"), &[PartitionRange::Key(key.clone())])
            .await;
        result.value(&key, b"c").map(<[u8]>::to_vec)
    }
}
