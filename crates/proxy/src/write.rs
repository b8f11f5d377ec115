//! Write coordination: plain, trigger-expanded and atomic (batch-logged)
//! mutations, plus the local apply entry points.

use crate::batchlog::Batch;
use crate::consistency::{quorum_for, AckPolicy};
use crate::error::{ProxyError, WriteType};
use crate::hints::HintManager;
use crate::messaging::{Messaging, MessagingError};
use crate::proxy::StorageProxy;
use crate::response_handler::{
    PendingWrite, ResponseHandlerRegistry, ResponseId, WriteOutcome, WriteResponseHandler,
};
use crate::triggers;
use futures::future::join_all;
use ringstore_common::{ConsistencyLevel, Endpoint, FrozenMutation, Mutation};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Replica set for one mutation, split at planning time.
#[derive(Debug)]
pub(crate) struct WritePlan {
    pub(crate) mutation: Arc<FrozenMutation>,
    pub(crate) live: Vec<(Endpoint, String)>,
    pub(crate) dead: Vec<(Endpoint, String)>,
    pub(crate) policy: AckPolicy,
}

impl<M: Messaging> StorageProxy<M> {
    /// Resolve replicas for `mutation` and check that `cl` can be met.
    pub(crate) fn plan_write(
        &self,
        mutation: FrozenMutation,
        cl: ConsistencyLevel,
    ) -> Result<WritePlan, ProxyError> {
        let keyspace = mutation.keyspace.as_str();
        let token = mutation.key.token;
        let strategy = self.topology.replication(keyspace);
        let local_dc = self.topology.local_datacenter();

        let natural = self.topology.natural_endpoints(keyspace, token);
        let pending: Vec<(Endpoint, String)> = self
            .topology
            .pending_endpoints(keyspace, token)
            .into_iter()
            .filter(|ep| !natural.contains(ep))
            .map(|ep| (ep, self.topology.datacenter_of(ep)))
            .collect();
        let policy = AckPolicy::for_level(cl, &strategy, &local_dc, &pending);

        let mut live = Vec::new();
        let mut dead = Vec::new();
        for ep in natural.iter().copied().chain(pending.iter().map(|(ep, _)| *ep)) {
            let entry = (ep, self.topology.datacenter_of(ep));
            if self.topology.is_alive(ep) {
                live.push(entry);
            } else {
                dead.push(entry);
            }
        }

        let available = if cl == ConsistencyLevel::Any {
            // A stored hint is enough.
            if live.is_empty() && dead.iter().all(|(ep, _)| self.hints.cannot_hint(*ep)) {
                Err(ProxyError::Unavailable {
                    cl,
                    required: 1,
                    alive: 0,
                })
            } else {
                Ok(())
            }
        } else {
            policy.assure_sufficient(cl, &live)
        };
        if let Err(e) = available {
            self.stats.record_write_unavailable();
            ringstore_metrics::metrics()
                .unavailables
                .with_label_values(&["write"])
                .inc();
            return Err(e);
        }

        Ok(WritePlan {
            mutation: Arc::new(mutation),
            live,
            dead,
            policy,
        })
    }

    /// Register a handler for `plan`, send to live replicas and hint dead
    /// ones. Returns the handler and the spawned send/hint tasks.
    ///
    /// Only an explicit error reply fails a replica. One that cannot be
    /// reached or does not answer in time gets a hint and leaves the handler
    /// to its timer, except under `Any` where the hint itself is the ack.
    pub(crate) fn dispatch(
        &self,
        plan: &WritePlan,
        cl: ConsistencyLevel,
        write_type: WriteType,
    ) -> (PendingWrite, Vec<JoinHandle<()>>) {
        let mut targets = plan.live.clone();
        if cl == ConsistencyLevel::Any {
            targets.extend(plan.dead.iter().cloned());
        }
        let handler = WriteResponseHandler::new(cl, write_type, targets, plan.policy.clone())
            .with_mutation(plan.mutation.clone());
        let pending = self.registry.register(handler, self.config.write_timeout);
        let id = pending.id();

        let local = self.topology.local_endpoint();
        let mut tasks = Vec::with_capacity(plan.live.len() + plan.dead.len());

        for (ep, _) in &plan.live {
            let ep = *ep;
            let mutation = plan.mutation.clone();
            let registry = self.registry.clone();
            let hints = self.hints.clone();

            if ep == local {
                let storage = self.storage.clone();
                tasks.push(tokio::spawn(async move {
                    let applied = match mutation.unfreeze() {
                        Ok(m) => storage.write().await.apply(&m).map_err(ProxyError::from),
                        Err(e) => Err(ProxyError::from(e)),
                    };
                    match applied {
                        Ok(()) => registry.on_ack(id, ep),
                        Err(e) => registry.on_failure(id, ep, &e.to_string()),
                    }
                }));
                continue;
            }

            let messaging = self.messaging.clone();
            // Outlives the handler so a reply that misses the deadline still
            // gets hinted instead of racing the expiry.
            let timeout = self.config.write_timeout * 2;
            tasks.push(tokio::spawn(async move {
                ringstore_metrics::metrics()
                    .messages_sent
                    .with_label_values(&["mutation"])
                    .inc();
                let sent = match tokio::time::timeout(
                    timeout,
                    messaging.send_mutation(ep, mutation.clone()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(MessagingError::Timeout(ep)),
                };
                match sent {
                    Ok(()) => registry.on_ack(id, ep),
                    Err(e) if e.is_unreachable_or_timeout() => {
                        tracing::debug!("no reply from {} for write {}: {}", ep, id, e);
                        hint_target(&hints, &registry, id, cl, &mutation, ep).await;
                    }
                    Err(e) => registry.on_failure(id, ep, &e.to_string()),
                }
            }));
        }

        for (ep, _) in &plan.dead {
            let ep = *ep;
            let mutation = plan.mutation.clone();
            let registry = self.registry.clone();
            let hints = self.hints.clone();
            tasks.push(tokio::spawn(async move {
                hint_target(&hints, &registry, id, cl, &mutation, ep).await;
            }));
        }

        (pending, tasks)
    }

    /// Turn a handler outcome into the caller-facing result, updating stats.
    pub(crate) fn write_result(
        &self,
        outcome: WriteOutcome,
        cl: ConsistencyLevel,
        write_type: WriteType,
        block_for: usize,
    ) -> Result<(), ProxyError> {
        match outcome {
            WriteOutcome::Success => Ok(()),
            WriteOutcome::Timeout {
                received,
                block_for,
            } => {
                self.stats.record_write_timeout();
                ringstore_metrics::metrics()
                    .timeouts
                    .with_label_values(&["write"])
                    .inc();
                Err(ProxyError::WriteTimeout {
                    cl,
                    received,
                    block_for,
                    write_type,
                })
            }
            WriteOutcome::Failure {
                received,
                block_for,
                failures,
            } => Err(ProxyError::WriteFailure {
                cl,
                received,
                block_for,
                failures,
                write_type,
            }),
            WriteOutcome::Cancelled => Err(ProxyError::WriteFailure {
                cl,
                received: 0,
                block_for,
                failures: 0,
                write_type,
            }),
        }
    }

    /// Plan every mutation, then dispatch and wait. Nothing is sent unless
    /// all of them can meet `cl`.
    pub(crate) async fn mutate_frozen(
        &self,
        mutations: Vec<FrozenMutation>,
        cl: ConsistencyLevel,
        write_type: WriteType,
    ) -> Result<(), ProxyError> {
        let plans = mutations
            .into_iter()
            .map(|m| self.plan_write(m, cl))
            .collect::<Result<Vec<_>, _>>()?;
        let (waiters, _) = self.dispatch_all(&plans, cl, write_type);
        self.wait_all(&plans, waiters, cl, write_type).await
    }

    fn dispatch_all(
        &self,
        plans: &[WritePlan],
        cl: ConsistencyLevel,
        write_type: WriteType,
    ) -> (Vec<PendingWrite>, Vec<JoinHandle<()>>) {
        let mut waiters = Vec::with_capacity(plans.len());
        let mut tasks = Vec::new();
        for plan in plans {
            let (waiter, t) = self.dispatch(plan, cl, write_type);
            waiters.push(waiter);
            tasks.extend(t);
        }
        (waiters, tasks)
    }

    async fn wait_all(
        &self,
        plans: &[WritePlan],
        waiters: Vec<PendingWrite>,
        cl: ConsistencyLevel,
        write_type: WriteType,
    ) -> Result<(), ProxyError> {
        let outcomes = join_all(waiters.into_iter().map(PendingWrite::wait)).await;
        let mut first_err = None;
        for (outcome, plan) in outcomes.into_iter().zip(plans) {
            if let Err(e) = self.write_result(outcome, cl, write_type, plan.policy.block_for()) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Apply `mutations` at `cl`. Fails with `Unavailable` before sending
    /// anything if some mutation lacks live replicas; otherwise resolves once
    /// every mutation's handler has resolved. There is no rollback.
    pub async fn mutate(
        &self,
        mutations: Vec<Mutation>,
        cl: ConsistencyLevel,
    ) -> Result<(), ProxyError> {
        let _timer = ringstore_metrics::start_op_timer("write");
        ringstore_metrics::metrics()
            .writes
            .with_label_values(&[&cl.to_string()])
            .inc();

        let frozen = mutations
            .iter()
            .map(Mutation::freeze)
            .collect::<Result<Vec<_>, _>>()?;
        self.mutate_frozen(frozen, cl, WriteType::Simple).await
    }

    /// Run triggers, then write atomically if asked to or if triggers
    /// contributed mutations.
    pub async fn mutate_with_triggers(
        &self,
        mutations: Vec<Mutation>,
        cl: ConsistencyLevel,
        should_mutate_atomically: bool,
    ) -> Result<(), ProxyError> {
        let extra = triggers::expand(&self.triggers, &mutations)?;
        if should_mutate_atomically || !extra.is_empty() {
            let mut all = mutations;
            all.extend(extra);
            self.mutate_atomically(all, cl).await
        } else {
            self.mutate(mutations, cl).await
        }
    }

    /// Write through the batch log: stage the batch on a quorum of batch log
    /// endpoints, apply every mutation, then drop the batch log entry in the
    /// background once all dispatch and hint tasks are done.
    pub async fn mutate_atomically(
        &self,
        mutations: Vec<Mutation>,
        cl: ConsistencyLevel,
    ) -> Result<(), ProxyError> {
        let _timer = ringstore_metrics::start_op_timer("write_atomic");
        ringstore_metrics::metrics()
            .writes
            .with_label_values(&[&cl.to_string()])
            .inc();

        let frozen = mutations
            .iter()
            .map(Mutation::freeze)
            .collect::<Result<Vec<_>, _>>()?;
        let plans = frozen
            .iter()
            .map(|m| self.plan_write(m.clone(), cl))
            .collect::<Result<Vec<_>, _>>()?;

        let batch = Arc::new(Batch::new(frozen));
        let endpoints = self.batchlog_endpoints();
        self.write_batchlog(&batch, &endpoints).await?;

        let (waiters, tasks) = self.dispatch_all(&plans, cl, WriteType::Batch);
        let result = self.wait_all(&plans, waiters, cl, WriteType::Batch).await;
        if result.is_ok() {
            self.spawn_batchlog_removal(batch.id, endpoints, tasks);
        }
        result
    }

    /// Up to two live endpoints of the local datacenter other than this node,
    /// in ring order; this node alone if there are none.
    pub(crate) fn batchlog_endpoints(&self) -> Vec<Endpoint> {
        let local = self.topology.local_endpoint();
        let local_dc = self.topology.local_datacenter();
        let chosen: Vec<Endpoint> = self
            .topology
            .all_endpoints()
            .into_iter()
            .filter(|ep| {
                *ep != local
                    && self.topology.is_alive(*ep)
                    && self.topology.datacenter_of(*ep) == local_dc
            })
            .take(2)
            .collect();
        if chosen.is_empty() {
            vec![local]
        } else {
            chosen
        }
    }

    async fn write_batchlog(&self, batch: &Arc<Batch>, endpoints: &[Endpoint]) -> Result<(), ProxyError> {
        let cl = if endpoints.len() == 1 {
            ConsistencyLevel::One
        } else {
            ConsistencyLevel::Two
        };
        let policy = AckPolicy::total(quorum_for(endpoints.len()));
        let block_for = policy.block_for();
        let local_dc = self.topology.local_datacenter();
        let targets = endpoints.iter().map(|ep| (*ep, local_dc.clone())).collect();
        let handler = WriteResponseHandler::new(cl, WriteType::BatchLog, targets, policy);
        let pending = self.registry.register(handler, self.config.write_timeout);
        let id = pending.id();

        let local = self.topology.local_endpoint();
        for ep in endpoints.iter().copied() {
            let registry = self.registry.clone();
            let batch = batch.clone();
            if ep == local {
                let batchlog = self.batchlog.clone();
                tokio::spawn(async move {
                    match batchlog.store(&batch).await {
                        Ok(()) => registry.on_ack(id, ep),
                        Err(e) => registry.on_failure(id, ep, &e.to_string()),
                    }
                });
            } else {
                let messaging = self.messaging.clone();
                tokio::spawn(async move {
                    ringstore_metrics::metrics()
                        .messages_sent
                        .with_label_values(&["store_batch"])
                        .inc();
                    match messaging.store_batch(ep, batch).await {
                        Ok(()) => registry.on_ack(id, ep),
                        Err(e) if e.is_unreachable_or_timeout() => {
                            tracing::debug!("no reply from {} staging batch: {}", ep, e);
                        }
                        Err(e) => registry.on_failure(id, ep, &e.to_string()),
                    }
                });
            }
        }

        let outcome = pending.wait().await;
        self.write_result(outcome, cl, WriteType::BatchLog, block_for)?;
        ringstore_metrics::metrics().batchlog_writes.inc();
        Ok(())
    }

    fn spawn_batchlog_removal(&self, id: uuid::Uuid, endpoints: Vec<Endpoint>, tasks: Vec<JoinHandle<()>>) {
        let local = self.topology.local_endpoint();
        let batchlog = self.batchlog.clone();
        let messaging = self.messaging.clone();
        tokio::spawn(async move {
            join_all(tasks).await;
            for ep in endpoints {
                let removed = if ep == local {
                    batchlog.remove(id).await.map_err(|e| e.to_string())
                } else {
                    ringstore_metrics::metrics()
                        .messages_sent
                        .with_label_values(&["remove_batch"])
                        .inc();
                    messaging.remove_batch(ep, id).await.map_err(|e| e.to_string())
                };
                if let Err(e) = removed {
                    tracing::warn!("failed to remove batch {} from {}: {}", id, ep, e);
                }
            }
        });
    }

    /// Apply a mutation to the local storage engine only.
    pub async fn mutate_locally(&self, mutation: &Mutation) -> Result<(), ProxyError> {
        self.storage.write().await.apply(mutation)?;
        Ok(())
    }

    /// Apply a serialized mutation forwarded by another coordinator.
    pub async fn mutate_locally_frozen(&self, mutation: &FrozenMutation) -> Result<(), ProxyError> {
        let mutation = mutation.unfreeze()?;
        self.mutate_locally(&mutation).await
    }

    pub async fn mutate_locally_all(&self, mutations: &[Mutation]) -> Result<(), ProxyError> {
        let mut storage = self.storage.write().await;
        for mutation in mutations {
            storage.apply(mutation)?;
        }
        Ok(())
    }
}

/// Store a hint for `ep`. Under `Any` a stored hint acks the write and a
/// hint that could not be stored fails that target.
async fn hint_target(
    hints: &HintManager,
    registry: &ResponseHandlerRegistry,
    id: ResponseId,
    cl: ConsistencyLevel,
    mutation: &FrozenMutation,
    ep: Endpoint,
) {
    let stored = if !hints.should_hint(ep) {
        ringstore_metrics::metrics().hints_dropped.inc();
        tracing::warn!("dropping hint for {}: over budget or down too long", ep);
        false
    } else {
        match hints.submit(mutation, ep).await {
            Ok(true) => true,
            Ok(false) => {
                ringstore_metrics::metrics().hints_dropped.inc();
                tracing::warn!("dropping hint for {}: budget exhausted", ep);
                false
            }
            Err(e) => {
                tracing::warn!("failed to store hint for {}: {}", ep, e);
                false
            }
        }
    };
    if cl == ConsistencyLevel::Any {
        if stored {
            registry.on_ack(id, ep);
        } else {
            registry.on_failure(id, ep, "hint not stored");
        }
    }
}
