//! Read strategies and the digest / read repair protocol.
//!
//! A read picks one [`ReadExecutor`] per partition range. Single replica
//! reads ask the nearest live replica (this node, if it is one) for data.
//! Digest reads ask one replica for data and the rest for digests; on a
//! mismatch the disagreeing replicas are asked for full data, everything is
//! reconciled and the lagging replicas are repaired before the read returns.
//! A full-data read contacts every live replica and repairs all of them.

use crate::consistency::AckPolicy;
use crate::error::{ProxyError, WriteType};
use crate::messaging::{Messaging, MessagingError};
use crate::response_handler::{ResponseHandlerRegistry, WriteOutcome, WriteResponseHandler};
use crate::stats::ProxyStats;
use crate::topology::Topology;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use ringstore_common::{
    ConsistencyLevel, DecoratedKey, Endpoint, PartitionRange, ReadCommand, ReadDigest,
    ReconcilableResult, Token,
};
use ringstore_storage::StorageEngine;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// Non-owning view of the coordinator services a read needs.
pub struct ReadContext<M: Messaging> {
    pub(crate) local: Endpoint,
    pub(crate) storage: Arc<RwLock<StorageEngine>>,
    pub(crate) messaging: Arc<M>,
    pub(crate) topology: Arc<dyn Topology>,
    pub(crate) registry: Arc<ResponseHandlerRegistry>,
    pub(crate) stats: Arc<ProxyStats>,
    pub(crate) read_timeout: Duration,
    pub(crate) range_timeout: Duration,
    pub(crate) read_repair_chance: f64,
}

impl<M: Messaging> Clone for ReadContext<M> {
    fn clone(&self) -> Self {
        Self {
            local: self.local,
            storage: self.storage.clone(),
            messaging: self.messaging.clone(),
            topology: self.topology.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            read_timeout: self.read_timeout,
            range_timeout: self.range_timeout,
            read_repair_chance: self.read_repair_chance,
        }
    }
}

impl<M: Messaging> std::fmt::Debug for ReadContext<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadContext")
            .field("local", &self.local)
            .field("read_timeout", &self.read_timeout)
            .field("range_timeout", &self.range_timeout)
            .finish_non_exhaustive()
    }
}

/// Replicas a read contacts, nearest first. The first one serves data.
#[derive(Debug, Clone)]
pub struct ReadTargets {
    pub cl: ConsistencyLevel,
    pub policy: AckPolicy,
    pub contacted: Vec<(Endpoint, String)>,
}

#[derive(Debug, Clone)]
pub enum ReadExecutor {
    SingleReplica(ReadTargets),
    DigestReconciled(ReadTargets),
    /// Data from every live replica; chosen for a global read repair.
    FullData(ReadTargets),
}

/// Pick the strategy for a read of `token` in `keyspace` at `cl`.
/// Fails with `Unavailable` before any message is sent.
pub fn get_read_executor<M: Messaging>(
    ctx: &ReadContext<M>,
    cl: ConsistencyLevel,
    keyspace: &str,
    token: Token,
) -> Result<ReadExecutor, ProxyError> {
    if cl == ConsistencyLevel::Any {
        return Err(ProxyError::InvalidRequest(
            "ANY consistency is not supported for reads".to_string(),
        ));
    }
    let strategy = ctx.topology.replication(keyspace);
    let local_dc = ctx.topology.local_datacenter();

    let mut endpoints: Vec<Endpoint> = ctx
        .topology
        .natural_endpoints(keyspace, token)
        .into_iter()
        .filter(|ep| ctx.topology.is_alive(*ep))
        .collect();
    ctx.topology.sort_by_proximity(&mut endpoints);
    let live: Vec<(Endpoint, String)> = endpoints
        .into_iter()
        .map(|ep| (ep, ctx.topology.datacenter_of(ep)))
        .collect();

    let policy = AckPolicy::for_level(cl, &strategy, &local_dc, &[]);
    policy.assure_sufficient(cl, &live)?;
    let chosen = policy.filter_for_query(&live);

    let global_repair = live.len() > chosen.len()
        && ctx.read_repair_chance > 0.0
        && rand::random::<f64>() < ctx.read_repair_chance;
    if global_repair {
        return Ok(ReadExecutor::FullData(ReadTargets {
            cl,
            policy,
            contacted: live,
        }));
    }

    let contacted: Vec<(Endpoint, String)> = live
        .into_iter()
        .filter(|(ep, _)| chosen.contains(ep))
        .collect();
    let targets = ReadTargets {
        cl,
        policy,
        contacted,
    };
    if targets.contacted.len() == 1 {
        Ok(ReadExecutor::SingleReplica(targets))
    } else {
        Ok(ReadExecutor::DigestReconciled(targets))
    }
}

enum Reply {
    Data(ReconcilableResult),
    Digest(ReadDigest),
}

type Fetched = (Endpoint, Result<Reply, MessagingError>);
type Fetch = JoinHandle<Fetched>;

fn spawn_fetch<M: Messaging>(
    ctx: &ReadContext<M>,
    to: Endpoint,
    cmd: &ReadCommand,
    range: &PartitionRange,
    data: bool,
) -> Fetch {
    let ctx = ctx.clone();
    let cmd = cmd.clone();
    let range = range.clone();
    tokio::spawn(async move {
        if to == ctx.local {
            let storage = ctx.storage.read().await;
            let reply = if data {
                Reply::Data(storage.read(&cmd, &range))
            } else {
                Reply::Digest(storage.digest(&cmd, &range))
            };
            return (to, Ok(reply));
        }

        let verb = if data { "read_data" } else { "read_digest" };
        ringstore_metrics::metrics()
            .messages_sent
            .with_label_values(&[verb])
            .inc();
        let reply = if data {
            ctx.messaging
                .read_data(to, &cmd, &range)
                .await
                .map(Reply::Data)
        } else {
            ctx.messaging
                .read_digest(to, &cmd, &range)
                .await
                .map(Reply::Digest)
        };
        (to, reply)
    })
}

#[derive(Default)]
struct Replies {
    data: Vec<(Endpoint, ReconcilableResult)>,
    digests: Vec<(Endpoint, ReadDigest)>,
    failed: Vec<Endpoint>,
}

impl Replies {
    fn responded(&self) -> impl Iterator<Item = Endpoint> + '_ {
        self.data
            .iter()
            .map(|(ep, _)| *ep)
            .chain(self.digests.iter().map(|(ep, _)| *ep))
    }

    fn record(&mut self, joined: Result<Fetched, tokio::task::JoinError>) {
        match joined {
            Ok((ep, Ok(Reply::Data(data)))) => self.data.push((ep, data)),
            Ok((ep, Ok(Reply::Digest(digest)))) => self.digests.push((ep, digest)),
            // No answer is not a failure; the deadline decides.
            Ok((ep, Err(e))) if e.is_unreachable_or_timeout() => {
                tracing::debug!("no reply from {} for read: {}", ep, e);
            }
            Ok((ep, Err(e))) => {
                tracing::debug!("read from {} failed: {}", ep, e);
                self.failed.push(ep);
            }
            Err(e) => tracing::warn!("read task failed: {}", e),
        }
    }
}

impl ReadExecutor {
    pub fn targets(&self) -> &ReadTargets {
        match self {
            Self::SingleReplica(t) | Self::DigestReconciled(t) | Self::FullData(t) => t,
        }
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.targets().contacted.iter().map(|(ep, _)| *ep).collect()
    }

    fn is_data_endpoint(&self, index: usize) -> bool {
        matches!(self, Self::FullData(_)) || index == 0
    }

    /// Run the read against `range`, reconciling and repairing as needed.
    pub async fn execute<M: Messaging>(
        &self,
        ctx: &ReadContext<M>,
        cmd: &ReadCommand,
        range: &PartitionRange,
        deadline: Instant,
    ) -> Result<ReconcilableResult, ProxyError> {
        let targets = self.targets();
        let mut futs: FuturesUnordered<Fetch> = targets
            .contacted
            .iter()
            .enumerate()
            .map(|(i, (ep, _))| spawn_fetch(ctx, *ep, cmd, range, self.is_data_endpoint(i)))
            .collect();

        let replies = self.collect(ctx, &mut futs, deadline).await?;
        match self {
            Self::SingleReplica(_) => Ok(replies
                .data
                .into_iter()
                .next()
                .map(|(_, d)| d)
                .unwrap_or_default()),
            Self::DigestReconciled(_) => {
                resolve_digests(ctx, cmd, range, targets, replies, deadline).await
            }
            Self::FullData(_) => {
                let reconciled = ReconcilableResult::reconcile(
                    &replies.data.iter().map(|(_, d)| d.clone()).collect::<Vec<_>>(),
                );
                repair(ctx, cmd, &replies.data, &reconciled, deadline).await;
                Ok(reconciled)
            }
        }
    }

    /// Wait until the policy is met with data in hand, failing early once
    /// it no longer can be.
    async fn collect<M: Messaging>(
        &self,
        ctx: &ReadContext<M>,
        futs: &mut FuturesUnordered<Fetch>,
        deadline: Instant,
    ) -> Result<Replies, ProxyError> {
        let targets = self.targets();
        let mut replies = Replies::default();

        while let Some(joined) = tokio::time::timeout_at(deadline, futs.next())
            .await
            .ok()
            .flatten()
        {
            replies.record(joined);

            if self.is_complete(ctx, &replies) {
                // Take whatever else already arrived.
                while let Some(Some(joined)) = futs.next().now_or_never() {
                    replies.record(joined);
                }
                return Ok(replies);
            }
            if !self.can_complete(&replies) {
                return Err(ProxyError::ReadFailure {
                    cl: targets.cl,
                    received: self.received(ctx, &replies),
                    block_for: targets.policy.block_for(),
                    failures: replies.failed.len(),
                });
            }
        }

        Err(ProxyError::ReadTimeout {
            cl: targets.cl,
            received: self.received(ctx, &replies),
            block_for: targets.policy.block_for(),
            data_present: !replies.data.is_empty(),
        })
    }

    fn received<M: Messaging>(&self, ctx: &ReadContext<M>, replies: &Replies) -> usize {
        let targets = self.targets();
        replies
            .responded()
            .filter(|ep| targets.policy.counts(&ctx.topology.datacenter_of(*ep)))
            .count()
    }

    fn is_complete<M: Messaging>(&self, ctx: &ReadContext<M>, replies: &Replies) -> bool {
        if replies.data.is_empty() {
            return false;
        }
        let dcs: Vec<String> = replies
            .responded()
            .map(|ep| ctx.topology.datacenter_of(ep))
            .collect();
        self.targets()
            .policy
            .is_satisfied(dcs.iter().map(String::as_str))
    }

    fn can_complete(&self, replies: &Replies) -> bool {
        let targets = self.targets();
        let data_possible = targets
            .contacted
            .iter()
            .enumerate()
            .any(|(i, (ep, _))| self.is_data_endpoint(i) && !replies.failed.contains(ep));
        data_possible
            && targets.policy.is_satisfied(
                targets
                    .contacted
                    .iter()
                    .filter(|(ep, _)| !replies.failed.contains(ep))
                    .map(|(_, dc)| dc.as_str()),
            )
    }
}

async fn resolve_digests<M: Messaging>(
    ctx: &ReadContext<M>,
    cmd: &ReadCommand,
    range: &PartitionRange,
    targets: &ReadTargets,
    replies: Replies,
    deadline: Instant,
) -> Result<ReconcilableResult, ProxyError> {
    let Some((data_ep, data)) = replies.data.into_iter().next() else {
        return Ok(ReconcilableResult::default());
    };
    let expected = data.digest();
    let (matched, mismatched): (Vec<_>, Vec<_>) = replies
        .digests
        .iter()
        .partition(|(_, digest)| *digest == expected);
    if mismatched.is_empty() {
        return Ok(data);
    }

    let stale: Vec<Endpoint> = mismatched.iter().map(|(ep, _)| *ep).collect();
    tracing::debug!("digest mismatch reading {:?} from {:?}", range, stale);

    let mut versions: Vec<(Endpoint, ReconcilableResult)> = vec![(data_ep, data.clone())];
    versions.extend(matched.iter().map(|(ep, _)| (*ep, data.clone())));

    let mut futs: FuturesUnordered<Fetch> = stale
        .iter()
        .map(|ep| spawn_fetch(ctx, *ep, cmd, range, true))
        .collect();
    let mut refetched = Replies::default();
    while let Some(joined) = tokio::time::timeout_at(deadline, futs.next())
        .await
        .ok()
        .flatten()
    {
        refetched.record(joined);
    }
    if !refetched.failed.is_empty() {
        return Err(ProxyError::ReadFailure {
            cl: targets.cl,
            received: versions.len() + refetched.data.len(),
            block_for: targets.policy.block_for(),
            failures: refetched.failed.len(),
        });
    }
    if refetched.data.len() < stale.len() {
        return Err(ProxyError::ReadTimeout {
            cl: targets.cl,
            received: versions.len() + refetched.data.len(),
            block_for: targets.policy.block_for(),
            data_present: true,
        });
    }
    versions.extend(refetched.data);

    let reconciled = ReconcilableResult::reconcile(
        &versions.iter().map(|(_, d)| d.clone()).collect::<Vec<_>>(),
    );
    repair(ctx, cmd, &versions, &reconciled, deadline).await;
    Ok(reconciled)
}

/// Send each replica what it lacks from `reconciled` and wait for the
/// writes until `deadline`. Repair failures are logged only.
async fn repair<M: Messaging>(
    ctx: &ReadContext<M>,
    cmd: &ReadCommand,
    versions: &[(Endpoint, ReconcilableResult)],
    reconciled: &ReconcilableResult,
    deadline: Instant,
) {
    let mut pending = Vec::new();
    for (ep, version) in versions {
        for mutation in version.repair_mutations(reconciled, &cmd.keyspace, &cmd.table) {
            let frozen = match mutation.freeze() {
                Ok(frozen) => Arc::new(frozen),
                Err(e) => {
                    tracing::warn!("cannot serialize repair for {}: {}", ep, e);
                    continue;
                }
            };
            let ep = *ep;
            let handler = WriteResponseHandler::new(
                ConsistencyLevel::One,
                WriteType::Simple,
                vec![(ep, ctx.topology.datacenter_of(ep))],
                AckPolicy::total(1),
            )
            .with_mutation(frozen.clone());
            let waiter = ctx
                .registry
                .register(handler, deadline.saturating_duration_since(Instant::now()));
            let id = waiter.id();

            let ctx = ctx.clone();
            tokio::spawn(async move {
                let result = if ep == ctx.local {
                    match frozen.unfreeze() {
                        Ok(m) => ctx
                            .storage
                            .write()
                            .await
                            .apply(&m)
                            .map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    }
                } else {
                    ringstore_metrics::metrics()
                        .messages_sent
                        .with_label_values(&["read_repair"])
                        .inc();
                    ctx.messaging
                        .send_mutation(ep, frozen)
                        .await
                        .map_err(|e| e.to_string())
                };
                match result {
                    Ok(()) => ctx.registry.on_ack(id, ep),
                    Err(e) => ctx.registry.on_failure(id, ep, &e),
                }
            });
            pending.push((waiter, ep));
        }
    }
    if pending.is_empty() {
        return;
    }

    ringstore_metrics::metrics()
        .read_repairs
        .inc_by(pending.len() as u64);
    for (waiter, ep) in pending {
        let outcome = waiter.wait().await;
        if outcome != WriteOutcome::Success {
            tracing::warn!("read repair to {} did not complete: {:?}", ep, outcome);
        }
    }
}

/// Read one token range at `cl` under an existing deadline. Stats are left
/// to the caller.
pub(crate) async fn read_range<M: Messaging>(
    ctx: &ReadContext<M>,
    cmd: &ReadCommand,
    range: PartitionRange,
    cl: ConsistencyLevel,
    deadline: Instant,
) -> Result<ReconcilableResult, ProxyError> {
    let executor = get_read_executor(ctx, cl, &cmd.keyspace, range.start_token())?;
    executor.execute(ctx, cmd, &range, deadline).await
}

/// Read a single partition at `cl`.
pub async fn query_singular<M: Messaging>(
    ctx: &ReadContext<M>,
    cmd: &ReadCommand,
    key: DecoratedKey,
    cl: ConsistencyLevel,
) -> Result<ReconcilableResult, ProxyError> {
    let deadline = Instant::now() + ctx.read_timeout;
    let result = read_range(ctx, cmd, PartitionRange::Key(key), cl, deadline).await;
    match &result {
        Err(ProxyError::Unavailable { .. }) => {
            ctx.stats.record_read_unavailable();
            ringstore_metrics::metrics()
                .unavailables
                .with_label_values(&["read"])
                .inc();
        }
        Err(ProxyError::ReadTimeout { .. }) => {
            ctx.stats.record_read_timeout();
            ringstore_metrics::metrics()
                .timeouts
                .with_label_values(&["read"])
                .inc();
        }
        _ => {}
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{put, put_at, TestNode};

    fn ep(port: u16) -> Endpoint {
        Endpoint::localhost(port)
    }

    fn key(k: &str) -> DecoratedKey {
        DecoratedKey::new(k.as_bytes().to_vec())
    }

    fn cmd() -> ReadCommand {
        ReadCommand::new("ks", "t")
    }

    #[tokio::test]
    async fn test_executor_choice_follows_level() {
        let node = TestNode::three_replicas();
        let ctx = node.proxy.read_context();
        let token = key("k").token;

        let one = get_read_executor(&ctx, ConsistencyLevel::One, "ks", token).unwrap();
        assert!(matches!(one, ReadExecutor::SingleReplica(_)));
        assert_eq!(one.endpoints(), vec![ep(1)]);

        let quorum = get_read_executor(&ctx, ConsistencyLevel::Quorum, "ks", token).unwrap();
        assert!(matches!(quorum, ReadExecutor::DigestReconciled(_)));
        assert_eq!(quorum.endpoints().len(), 2);
        assert_eq!(quorum.endpoints()[0], ep(1));

        assert!(matches!(
            get_read_executor(&ctx, ConsistencyLevel::Any, "ks", token),
            Err(ProxyError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_read_repair_chance_one_reads_everyone() {
        let node = TestNode::three_replicas_with_repair_chance(1.0);
        let ctx = node.proxy.read_context();
        let executor =
            get_read_executor(&ctx, ConsistencyLevel::Quorum, "ks", key("k").token).unwrap();
        assert!(matches!(executor, ReadExecutor::FullData(_)));
        assert_eq!(executor.endpoints().len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_before_any_message() {
        let node = TestNode::three_replicas();
        node.ring.mark_down(ep(2));
        node.ring.mark_down(ep(3));
        let err = query_singular(
            &node.proxy.read_context(),
            &cmd(),
            key("k"),
            ConsistencyLevel::Quorum,
        )
        .await
        .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(node.messaging.reads_sent(), 0);
        assert_eq!(node.proxy.stats().read_unavailables, 1);
    }

    #[tokio::test]
    async fn test_single_replica_reads_locally() {
        let node = TestNode::three_replicas();
        node.proxy.mutate_locally(&put("k", "v")).await.unwrap();
        let result = query_singular(
            &node.proxy.read_context(),
            &cmd(),
            key("k"),
            ConsistencyLevel::One,
        )
        .await
        .unwrap();
        assert_eq!(result.live_row_count(), 1);
        assert_eq!(node.messaging.reads_sent(), 0);
    }

    #[tokio::test]
    async fn test_digest_mismatch_repairs_stale_replica() {
        let node = TestNode::three_replicas();
        node.proxy.mutate_locally(&put_at("k", "new", 20)).await.unwrap();
        for port in [2, 3] {
            node.messaging.set_data(ep(port), vec![put_at("k", "old", 10)]);
        }

        let result = query_singular(
            &node.proxy.read_context(),
            &cmd(),
            key("k"),
            ConsistencyLevel::Quorum,
        )
        .await
        .unwrap();

        let rows = result.to_query_result(usize::MAX);
        assert_eq!(rows.value(&key("k"), b"c"), Some(&b"new"[..]));
        // One peer served a digest, then data, then took the repair.
        assert_eq!(node.messaging.data_reads(), 1);
        assert_eq!(node.messaging.mutations_sent(), 1);
    }

    #[tokio::test]
    async fn test_local_replica_repaired_from_newer_peer() {
        let node = TestNode::three_replicas();
        node.proxy.mutate_locally(&put_at("k", "old", 10)).await.unwrap();
        for port in [2, 3] {
            node.messaging.set_data(ep(port), vec![put_at("k", "new", 20)]);
        }

        query_singular(&node.proxy.read_context(), &cmd(), key("k"), ConsistencyLevel::Quorum)
            .await
            .unwrap();
        assert_eq!(node.proxy.query_local_value("k").await, Some(b"new".to_vec()));
        assert_eq!(node.messaging.mutations_sent(), 0);
    }

    #[tokio::test]
    async fn test_agreeing_replicas_are_not_repaired() {
        let node = TestNode::three_replicas();
        node.proxy.mutate_locally(&put_at("k", "v", 10)).await.unwrap();
        for port in [2, 3] {
            node.messaging.set_data(ep(port), vec![put_at("k", "v", 10)]);
        }
        for _ in 0..2 {
            query_singular(&node.proxy.read_context(), &cmd(), key("k"), ConsistencyLevel::Quorum)
                .await
                .unwrap();
        }
        assert_eq!(node.messaging.mutations_sent(), 0);
        assert_eq!(node.messaging.data_reads(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_replicas_surface_read_timeout() {
        let node = TestNode::three_replicas_with_timeout(Duration::from_millis(100));
        node.messaging.fail(ep(2));
        node.messaging.fail(ep(3));
        let err = query_singular(
            &node.proxy.read_context(),
            &cmd(),
            key("k"),
            ConsistencyLevel::Quorum,
        )
        .await
        .unwrap_err();
        assert!(
            matches!(
                err,
                ProxyError::ReadTimeout {
                    received: 1,
                    block_for: 2,
                    data_present: true,
                    ..
                }
            ),
            "{err:?}"
        );
        assert_eq!(node.proxy.stats().read_timeouts, 1);
    }

    #[tokio::test]
    async fn test_error_reply_surfaces_read_failure() {
        let node = TestNode::three_replicas();
        node.messaging.reject(ep(2));
        node.messaging.reject(ep(3));
        let err = query_singular(
            &node.proxy.read_context(),
            &cmd(),
            key("k"),
            ConsistencyLevel::Quorum,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProxyError::ReadFailure { failures: 1, .. }), "{err:?}");
        assert_eq!(node.proxy.stats().read_timeouts, 0);
    }

    #[tokio::test]
    async fn test_rejected_data_refetch_surfaces_read_failure() {
        let node = TestNode::three_replicas();
        node.proxy.mutate_locally(&put_at("k", "new", 20)).await.unwrap();
        for port in [2, 3] {
            node.messaging.set_data(ep(port), vec![put_at("k", "old", 10)]);
            node.messaging.reject_verb(ep(port), "read_data");
        }
        let err = query_singular(
            &node.proxy.read_context(),
            &cmd(),
            key("k"),
            ConsistencyLevel::Quorum,
        )
        .await
        .unwrap_err();
        assert!(
            matches!(
                err,
                ProxyError::ReadFailure {
                    received: 1,
                    block_for: 2,
                    failures: 1,
                    ..
                }
            ),
            "{err:?}"
        );
        assert_eq!(node.proxy.stats().read_timeouts, 0);
        assert_eq!(node.messaging.mutations_sent(), 0);
    }

    #[tokio::test]
    async fn test_slow_replica_surfaces_read_timeout() {
        let node = TestNode::three_replicas_with_timeout(Duration::from_millis(50));
        node.messaging.delay(ep(2), Duration::from_millis(500));
        node.messaging.delay(ep(3), Duration::from_millis(500));
        let err = query_singular(
            &node.proxy.read_context(),
            &cmd(),
            key("k"),
            ConsistencyLevel::Quorum,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::ReadTimeout {
                received: 1,
                block_for: 2,
                data_present: true,
                ..
            }
        ));
        assert_eq!(node.proxy.stats().read_timeouts, 1);
    }
}
