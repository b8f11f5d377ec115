//! Fault injection for replica traffic.
//!
//! [`ChaosMessaging`] wraps any `M: Messaging` and reproduces the ways a
//! coordinator's requests go wrong: a node that is down, a request of one
//! verb that is dropped on the floor, a replica that applies a write but
//! acknowledges it late, and random error replies.

use crate::batchlog::Batch;
use crate::messaging::{Messaging, MessagingError};
use parking_lot::Mutex;
use rand::Rng;
use ringstore_common::{
    Endpoint, FrozenMutation, PartitionRange, ReadCommand, ReadDigest, ReconcilableResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Duration;
use uuid::Uuid;

/// Kinds of request a coordinator sends to replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Mutation,
    ReadData,
    ReadDigest,
    StoreBatch,
    RemoveBatch,
}

#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Probability of an error reply \[0.0, 1.0\].
    pub failure_rate: f64,
    /// How long a dropped request hangs before the transport gives up.
    pub drop_timeout: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            drop_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    down: HashSet<Endpoint>,
    dropped: HashSet<(Endpoint, Verb)>,
    ack_delays: HashMap<Endpoint, Duration>,
}

pub struct ChaosMessaging<M: Messaging> {
    inner: Arc<M>,
    config: Mutex<ChaosConfig>,
    faults: Mutex<Faults>,
}

impl<M: Messaging> std::fmt::Debug for ChaosMessaging<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosMessaging")
            .field("config", &*self.config.lock())
            .field("faults", &*self.faults.lock())
            .finish_non_exhaustive()
    }
}

impl<M: Messaging> ChaosMessaging<M> {
    pub fn new(inner: Arc<M>, config: ChaosConfig) -> Self {
        Self {
            inner,
            config: Mutex::new(config),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn inner(&self) -> &Arc<M> {
        &self.inner
    }

    /// Every request to `endpoint` fails as unreachable until recovered.
    pub fn fail_node(&self, endpoint: Endpoint) {
        self.faults.lock().down.insert(endpoint);
    }

    pub fn recover_node(&self, endpoint: Endpoint) {
        self.faults.lock().down.remove(&endpoint);
    }

    /// Requests of `verb` to `endpoint` never reach it and time out.
    pub fn drop_verb(&self, endpoint: Endpoint, verb: Verb) {
        self.faults.lock().dropped.insert((endpoint, verb));
    }

    pub fn restore_verb(&self, endpoint: Endpoint, verb: Verb) {
        self.faults.lock().dropped.remove(&(endpoint, verb));
    }

    /// `endpoint` handles requests at once but replies after `by`.
    pub fn delay_acks(&self, endpoint: Endpoint, by: Duration) {
        self.faults.lock().ack_delays.insert(endpoint, by);
    }

    pub fn set_failure_rate(&self, rate: f64) {
        self.config.lock().failure_rate = rate;
    }

    /// Drop every injected fault.
    pub fn heal(&self) {
        *self.faults.lock() = Faults::default();
        self.config.lock().failure_rate = 0.0;
    }

    async fn before(&self, to: Endpoint, verb: Verb) -> Result<(), MessagingError> {
        let (down, dropped) = {
            let faults = self.faults.lock();
            (
                faults.down.contains(&to),
                faults.dropped.contains(&(to, verb)),
            )
        };
        if down {
            return Err(MessagingError::Unreachable(to));
        }
        if dropped {
            let wait = self.config.lock().drop_timeout;
            tokio::time::sleep(wait).await;
            return Err(MessagingError::Timeout(to));
        }

        let failure_rate = self.config.lock().failure_rate;
        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Err(MessagingError::Remote {
                endpoint: to,
                message: format!("injected {verb:?} failure"),
            });
        }
        Ok(())
    }

    async fn after<T>(
        &self,
        to: Endpoint,
        reply: Result<T, MessagingError>,
    ) -> Result<T, MessagingError> {
        let delay = self.faults.lock().ack_delays.get(&to).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}

#[async_trait::async_trait]
impl<M: Messaging> Messaging for ChaosMessaging<M> {
    async fn send_mutation(
        &self,
        to: Endpoint,
        mutation: Arc<FrozenMutation>,
    ) -> Result<(), MessagingError> {
        self.before(to, Verb::Mutation).await?;
        let reply = self.inner.send_mutation(to, mutation).await;
        self.after(to, reply).await
    }

    async fn read_data(
        &self,
        to: Endpoint,
        cmd: &ReadCommand,
        range: &PartitionRange,
    ) -> Result<ReconcilableResult, MessagingError> {
        self.before(to, Verb::ReadData).await?;
        let reply = self.inner.read_data(to, cmd, range).await;
        self.after(to, reply).await
    }

    async fn read_digest(
        &self,
        to: Endpoint,
        cmd: &ReadCommand,
        range: &PartitionRange,
    ) -> Result<ReadDigest, MessagingError> {
        self.before(to, Verb::ReadDigest).await?;
        let reply = self.inner.read_digest(to, cmd, range).await;
        self.after(to, reply).await
    }

    async fn store_batch(&self, to: Endpoint, batch: Arc<Batch>) -> Result<(), MessagingError> {
        self.before(to, Verb::StoreBatch).await?;
        let reply = self.inner.store_batch(to, batch).await;
        self.after(to, reply).await
    }

    async fn remove_batch(&self, to: Endpoint, id: Uuid) -> Result<(), MessagingError> {
        self.before(to, Verb::RemoveBatch).await?;
        let reply = self.inner.remove_batch(to, id).await;
        self.after(to, reply).await
    }
}
