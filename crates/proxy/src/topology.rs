//! Ring topology, replica placement and liveness.
//!
//! The coordinator consumes topology through the [`Topology`] trait. The
//! in-tree [`TokenRing`] is a static ring with per-datacenter placement,
//! pending endpoints for range movements, and a liveness table that tests
//! (or a failure detector) flip with [`TokenRing::mark_down`] /
//! [`TokenRing::mark_up`].
//!
//! Ownership: ring token `t` owns the half-open range `[previous_ring_token, t)`.
//! The primary replica for a token is therefore the endpoint of the first ring
//! token strictly greater than it, wrapping around the ring.

use parking_lot::RwLock;
use ringstore_config::NodeConfig;
use ringstore_common::{Endpoint, Token, TokenRange};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::time::{Duration, Instant};

/// How many replicas a keyspace keeps, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationStrategy {
    /// `replication_factor` distinct endpoints, walking the ring clockwise.
    Simple { replication_factor: usize },
    /// A replica count per datacenter.
    NetworkTopology { per_dc: BTreeMap<String, usize> },
}

impl ReplicationStrategy {
    pub fn simple(replication_factor: usize) -> Self {
        Self::Simple { replication_factor }
    }

    pub fn network_topology<'a>(per_dc: impl IntoIterator<Item = (&'a str, usize)>) -> Self {
        Self::NetworkTopology {
            per_dc: per_dc
                .into_iter()
                .map(|(dc, rf)| (dc.to_string(), rf))
                .collect(),
        }
    }

    /// Replicas across all datacenters.
    pub fn total_rf(&self) -> usize {
        match self {
            Self::Simple { replication_factor } => *replication_factor,
            Self::NetworkTopology { per_dc } => per_dc.values().sum(),
        }
    }

    /// Replicas in `dc`. A simple strategy does not know about datacenters
    /// and reports its whole factor.
    pub fn dc_rf(&self, dc: &str) -> usize {
        match self {
            Self::Simple { replication_factor } => *replication_factor,
            Self::NetworkTopology { per_dc } => per_dc.get(dc).copied().unwrap_or(0),
        }
    }

    /// Datacenters with a non-zero replica count, or `None` for a simple
    /// strategy.
    pub fn datacenters(&self) -> Option<Vec<&str>> {
        match self {
            Self::Simple { .. } => None,
            Self::NetworkTopology { per_dc } => Some(
                per_dc
                    .iter()
                    .filter(|(_, rf)| **rf > 0)
                    .map(|(dc, _)| dc.as_str())
                    .collect(),
            ),
        }
    }
}

/// What the coordinator needs to know about the cluster.
pub trait Topology: Send + Sync + 'static {
    fn local_endpoint(&self) -> Endpoint;

    fn local_datacenter(&self) -> String;

    fn datacenter_of(&self, endpoint: Endpoint) -> String;

    fn replication(&self, keyspace: &str) -> ReplicationStrategy;

    /// Replicas owning `token`, primary first.
    fn natural_endpoints(&self, keyspace: &str, token: Token) -> Vec<Endpoint>;

    /// Endpoints gaining ownership of `token` through a range movement.
    fn pending_endpoints(&self, keyspace: &str, token: Token) -> Vec<Endpoint>;

    /// Every ring token, ascending.
    fn ring_tokens(&self) -> Vec<Token>;

    /// Every endpoint owning tokens, in ring order.
    fn all_endpoints(&self) -> Vec<Endpoint>;

    fn is_alive(&self, endpoint: Endpoint) -> bool;

    /// How long `endpoint` has been down; zero if it is alive.
    fn downtime(&self, endpoint: Endpoint) -> Duration;

    /// Order endpoints nearest first: this node, then its datacenter, then
    /// everything else. Stable within each class.
    fn sort_by_proximity(&self, endpoints: &mut [Endpoint]) {
        let local = self.local_endpoint();
        let local_dc = self.local_datacenter();
        endpoints.sort_by_key(|ep| {
            if *ep == local {
                0u8
            } else if self.datacenter_of(*ep) == local_dc {
                1
            } else {
                2
            }
        });
    }
}

/// Static token ring.
#[derive(Debug)]
pub struct TokenRing {
    local: Endpoint,
    local_dc: String,
    ring: BTreeMap<Token, Endpoint>,
    datacenters: HashMap<Endpoint, String>,
    keyspaces: HashMap<String, ReplicationStrategy>,
    default_strategy: ReplicationStrategy,
    down_since: RwLock<HashMap<Endpoint, Instant>>,
    pending: RwLock<Vec<(TokenRange, Endpoint)>>,
}

impl TokenRing {
    /// An empty ring. The local node still has to be added with
    /// [`with_node`](Self::with_node) if it owns tokens.
    pub fn new(local: Endpoint, local_dc: impl Into<String>) -> Self {
        let local_dc = local_dc.into();
        let mut datacenters = HashMap::new();
        datacenters.insert(local, local_dc.clone());
        Self {
            local,
            local_dc,
            ring: BTreeMap::new(),
            datacenters,
            keyspaces: HashMap::new(),
            default_strategy: ReplicationStrategy::simple(1),
            down_since: RwLock::new(HashMap::new()),
            pending: RwLock::new(Vec::new()),
        }
    }

    /// An empty ring whose local node is `node.listen` in `node.datacenter`.
    pub fn for_node(node: &NodeConfig) -> Self {
        Self::new(Endpoint::new(node.listen), node.datacenter.clone())
    }

    pub fn with_node(mut self, endpoint: Endpoint, dc: impl Into<String>, tokens: &[Token]) -> Self {
        self.datacenters.insert(endpoint, dc.into());
        for token in tokens {
            self.ring.insert(*token, endpoint);
        }
        self
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>, strategy: ReplicationStrategy) -> Self {
        self.keyspaces.insert(keyspace.into(), strategy);
        self
    }

    /// Strategy for keyspaces without an explicit entry.
    pub fn with_default_strategy(mut self, strategy: ReplicationStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn mark_down(&self, endpoint: Endpoint) {
        self.down_since
            .write()
            .entry(endpoint)
            .or_insert_with(Instant::now);
    }

    /// Mark `endpoint` down as if it failed `ago`.
    pub fn mark_down_for(&self, endpoint: Endpoint, ago: Duration) {
        let now = Instant::now();
        let since = now.checked_sub(ago).unwrap_or(now);
        self.down_since.write().insert(endpoint, since);
    }

    pub fn mark_up(&self, endpoint: Endpoint) {
        self.down_since.write().remove(&endpoint);
    }

    /// Register `endpoint` as gaining `range`.
    pub fn add_pending(&self, range: TokenRange, endpoint: Endpoint) {
        self.pending.write().push((range, endpoint));
    }

    pub fn clear_pending(&self) {
        self.pending.write().clear();
    }

    /// Ring entries clockwise, starting after `token`.
    fn walk_from(&self, token: Token) -> impl Iterator<Item = &Endpoint> {
        self.ring
            .range((Bound::Excluded(token), Bound::Unbounded))
            .chain(self.ring.range(..=token))
            .map(|(_, ep)| ep)
    }
}

impl Topology for TokenRing {
    fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    fn local_datacenter(&self) -> String {
        self.local_dc.clone()
    }

    fn datacenter_of(&self, endpoint: Endpoint) -> String {
        self.datacenters
            .get(&endpoint)
            .cloned()
            .unwrap_or_else(|| self.local_dc.clone())
    }

    fn replication(&self, keyspace: &str) -> ReplicationStrategy {
        self.keyspaces
            .get(keyspace)
            .cloned()
            .unwrap_or_else(|| self.default_strategy.clone())
    }

    fn natural_endpoints(&self, keyspace: &str, token: Token) -> Vec<Endpoint> {
        let strategy = self.replication(keyspace);
        let mut seen = HashSet::new();
        let mut replicas = Vec::new();

        match &strategy {
            ReplicationStrategy::Simple { replication_factor } => {
                for ep in self.walk_from(token) {
                    if replicas.len() >= *replication_factor {
                        break;
                    }
                    if seen.insert(*ep) {
                        replicas.push(*ep);
                    }
                }
            }
            ReplicationStrategy::NetworkTopology { per_dc } => {
                let wanted: usize = per_dc.values().sum();
                let mut placed: HashMap<&str, usize> = HashMap::new();
                for ep in self.walk_from(token) {
                    if replicas.len() >= wanted {
                        break;
                    }
                    if !seen.insert(*ep) {
                        continue;
                    }
                    let Some(dc) = self.datacenters.get(ep) else {
                        continue;
                    };
                    let limit = per_dc.get(dc).copied().unwrap_or(0);
                    let count = placed.entry(dc.as_str()).or_insert(0);
                    if *count < limit {
                        *count += 1;
                        replicas.push(*ep);
                    }
                }
            }
        }
        replicas
    }

    fn pending_endpoints(&self, _keyspace: &str, token: Token) -> Vec<Endpoint> {
        let mut out: Vec<Endpoint> = Vec::new();
        for (range, ep) in self.pending.read().iter() {
            if range.contains(token) && !out.contains(ep) {
                out.push(*ep);
            }
        }
        out
    }

    fn ring_tokens(&self) -> Vec<Token> {
        self.ring.keys().copied().collect()
    }

    /// Endpoints in ring order of their first token.
    fn all_endpoints(&self) -> Vec<Endpoint> {
        let mut seen = HashSet::new();
        self.ring
            .values()
            .filter(|ep| seen.insert(**ep))
            .copied()
            .collect()
    }

    fn is_alive(&self, endpoint: Endpoint) -> bool {
        !self.down_since.read().contains_key(&endpoint)
    }

    fn downtime(&self, endpoint: Endpoint) -> Duration {
        self.down_since
            .read()
            .get(&endpoint)
            .map(|since| since.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}
