//! Outstanding writes awaiting acknowledgment.
//!
//! Every coordinated write registers a [`WriteResponseHandler`] under a fresh
//! [`ResponseId`]. Replica acks and failures are routed back by id; the
//! handler completes exactly once, when its [`AckPolicy`] is met, when it can
//! no longer be met, or when its expiry timer fires. Ids are never reused, so
//! a late reply for a retired id finds nothing and is dropped.

use crate::consistency::AckPolicy;
use crate::error::WriteType;
use parking_lot::Mutex;
use ringstore_common::{ConsistencyLevel, Endpoint, FrozenMutation};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Duration;

pub type ResponseId = u64;

/// How a write handler finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Success,
    Timeout { received: usize, block_for: usize },
    Failure {
        received: usize,
        block_for: usize,
        failures: usize,
    },
    /// The handler was removed before it completed.
    Cancelled,
}

/// Acknowledgment bookkeeping for one write.
#[derive(Debug)]
pub struct WriteResponseHandler {
    cl: ConsistencyLevel,
    write_type: WriteType,
    targets: Vec<(Endpoint, String)>,
    policy: AckPolicy,
    acked: HashSet<Endpoint>,
    failed: HashSet<Endpoint>,
    mutation: Option<Arc<FrozenMutation>>,
}

impl WriteResponseHandler {
    /// `targets` are the endpoints whose replies may count, with their
    /// datacenters.
    pub fn new(
        cl: ConsistencyLevel,
        write_type: WriteType,
        targets: Vec<(Endpoint, String)>,
        policy: AckPolicy,
    ) -> Self {
        Self {
            cl,
            write_type,
            targets,
            policy,
            acked: HashSet::new(),
            failed: HashSet::new(),
            mutation: None,
        }
    }

    pub fn with_mutation(mut self, mutation: Arc<FrozenMutation>) -> Self {
        self.mutation = Some(mutation);
        self
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.cl
    }

    pub fn write_type(&self) -> WriteType {
        self.write_type
    }

    fn is_target(&self, endpoint: Endpoint) -> bool {
        self.targets.iter().any(|(ep, _)| *ep == endpoint)
    }

    fn acked_dcs(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .filter(|(ep, _)| self.acked.contains(ep))
            .map(|(_, dc)| dc.as_str())
    }

    /// Acks that count towards the policy.
    pub fn received(&self) -> usize {
        self.acked_dcs().filter(|dc| self.policy.counts(dc)).count()
    }

    pub fn failures(&self) -> usize {
        self.failed.len()
    }

    pub fn block_for(&self) -> usize {
        self.policy.block_for()
    }

    pub fn is_satisfied(&self) -> bool {
        self.policy.is_satisfied(self.acked_dcs())
    }

    /// Whether the targets that have not failed could still meet the policy.
    pub fn can_succeed(&self) -> bool {
        self.policy.is_satisfied(
            self.targets
                .iter()
                .filter(|(ep, _)| !self.failed.contains(ep))
                .map(|(_, dc)| dc.as_str()),
        )
    }

    /// Record an ack. Returns whether the handler is now satisfied.
    /// Acks from non-targets and repeated acks are ignored.
    pub fn ack(&mut self, from: Endpoint) -> bool {
        if !self.is_target(from) || self.failed.contains(&from) {
            return false;
        }
        if !self.acked.insert(from) {
            return false;
        }
        self.is_satisfied()
    }

    /// Record an error reply. Returns whether success became impossible.
    pub fn fail(&mut self, from: Endpoint) -> bool {
        if !self.is_target(from) || self.acked.contains(&from) {
            return false;
        }
        if !self.failed.insert(from) {
            return false;
        }
        !self.can_succeed()
    }

    fn timeout_outcome(&self) -> WriteOutcome {
        WriteOutcome::Timeout {
            received: self.received(),
            block_for: self.block_for(),
        }
    }

    fn failure_outcome(&self) -> WriteOutcome {
        WriteOutcome::Failure {
            received: self.received(),
            block_for: self.block_for(),
            failures: self.failures(),
        }
    }
}

/// Point-in-time view of a registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSnapshot {
    pub received: usize,
    pub failures: usize,
    pub block_for: usize,
    pub targets: usize,
}

struct Entry {
    handler: WriteResponseHandler,
    done: Option<oneshot::Sender<WriteOutcome>>,
    timer: Option<AbortHandle>,
}

#[derive(Default)]
struct Inner {
    next_id: ResponseId,
    entries: HashMap<ResponseId, Entry>,
}

/// The caller's end of a registered handler. Dropping it abandons the
/// outcome; the handler itself still completes or expires.
#[derive(Debug)]
pub struct PendingWrite {
    id: ResponseId,
    rx: oneshot::Receiver<WriteOutcome>,
}

impl PendingWrite {
    pub fn id(&self) -> ResponseId {
        self.id
    }

    /// Suspend until the handler completes.
    pub async fn wait(self) -> WriteOutcome {
        self.rx.await.unwrap_or(WriteOutcome::Cancelled)
    }
}

impl Inner {
    fn complete(&mut self, id: ResponseId, outcome: WriteOutcome) {
        if let Some(mut entry) = self.entries.remove(&id) {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            if let Some(done) = entry.done.take() {
                let _ = done.send(outcome);
            }
        }
    }
}

/// Id-keyed table of outstanding write handlers, owned by one coordinator.
#[derive(Default)]
pub struct ResponseHandlerRegistry {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ResponseHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHandlerRegistry")
            .field("outstanding", &self.len())
            .finish()
    }
}

impl ResponseHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handler` and arm its expiry timer. Must be called inside a
    /// tokio runtime.
    pub fn register(
        self: &Arc<Self>,
        handler: WriteResponseHandler,
        timeout: Duration,
    ) -> PendingWrite {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;

            // Degenerate handlers resolve on the spot.
            let immediate = if handler.is_satisfied() {
                Some(WriteOutcome::Success)
            } else if !handler.can_succeed() {
                Some(handler.failure_outcome())
            } else {
                None
            };
            if let Some(outcome) = immediate {
                let _ = tx.send(outcome);
                return PendingWrite { id, rx };
            }

            inner.entries.insert(
                id,
                Entry {
                    handler,
                    done: Some(tx),
                    timer: None,
                },
            );
            id
        };

        let registry: Weak<Self> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire(id);
            }
        });

        let mut inner = self.inner.lock();
        match inner.entries.get_mut(&id) {
            Some(entry) => entry.timer = Some(timer.abort_handle()),
            None => timer.abort(),
        }
        PendingWrite { id, rx }
    }

    pub fn on_ack(&self, id: ResponseId, from: Endpoint) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return;
        };
        if entry.handler.ack(from) {
            inner.complete(id, WriteOutcome::Success);
        }
    }

    pub fn on_failure(&self, id: ResponseId, from: Endpoint, reason: &str) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return;
        };
        tracing::debug!("write {} failed on {}: {}", id, from, reason);
        if entry.handler.fail(from) {
            let outcome = entry.handler.failure_outcome();
            inner.complete(id, outcome);
        }
    }

    /// Fire the timeout for `id` if it is still outstanding.
    pub fn expire(&self, id: ResponseId) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get(&id) else {
            return;
        };
        let outcome = entry.handler.timeout_outcome();
        match &entry.handler.mutation {
            Some(m) => tracing::debug!(
                "write {} for {:?} timed out: {:?}",
                id,
                m.key,
                outcome
            ),
            None => tracing::debug!("write {} timed out: {:?}", id, outcome),
        }
        inner.complete(id, outcome);
    }

    /// Cancel the timer and drop the handler without completing it. The
    /// waiter sees [`WriteOutcome::Cancelled`].
    pub fn remove(&self, id: ResponseId) {
        let mut inner = self.inner.lock();
        if let Some(mut entry) = inner.entries.remove(&id) {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }

    pub fn snapshot(&self, id: ResponseId) -> Option<HandlerSnapshot> {
        let inner = self.inner.lock();
        inner.entries.get(&id).map(|e| HandlerSnapshot {
            received: e.handler.received(),
            failures: e.handler.failures(),
            block_for: e.handler.block_for(),
            targets: e.handler.targets.len(),
        })
    }

    /// Handlers still outstanding.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
