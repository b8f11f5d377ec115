//! Abstraction over coordinator-to-replica messages.
//!
//! The coordinator never talks to the network directly; it goes through a
//! [`Messaging`] implementation. The transport (and its wire encoding) lives
//! outside this crate. Tests use in-memory routers, optionally wrapped in
//! [`ChaosMessaging`](crate::chaos::ChaosMessaging).

use crate::batchlog::Batch;
use ringstore_common::{
    Endpoint, FrozenMutation, PartitionRange, ReadCommand, ReadDigest, ReconcilableResult,
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MessagingError {
    #[error("endpoint {0} unreachable")]
    Unreachable(Endpoint),
    #[error("request to {0} timed out")]
    Timeout(Endpoint),
    #[error("{endpoint} replied with error: {message}")]
    Remote { endpoint: Endpoint, message: String },
}

impl MessagingError {
    /// Whether the peer may simply be down or slow, as opposed to having
    /// answered with an explicit error.
    pub fn is_unreachable_or_timeout(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

/// Transport for replica traffic.
///
/// Same pattern as the storage seam: a trait in the coordinator crate, with
/// concrete transports elsewhere.
#[async_trait::async_trait]
pub trait Messaging: Send + Sync + 'static {
    /// Apply a mutation on `to`. `Ok` means the replica acknowledged it.
    async fn send_mutation(
        &self,
        to: Endpoint,
        mutation: Arc<FrozenMutation>,
    ) -> Result<(), MessagingError>;

    /// Full reconcilable data for `range`.
    async fn read_data(
        &self,
        to: Endpoint,
        cmd: &ReadCommand,
        range: &PartitionRange,
    ) -> Result<ReconcilableResult, MessagingError>;

    /// Digest of the data `to` holds for `range`.
    async fn read_digest(
        &self,
        to: Endpoint,
        cmd: &ReadCommand,
        range: &PartitionRange,
    ) -> Result<ReadDigest, MessagingError>;

    /// Stage a batch in `to`'s batch log.
    async fn store_batch(&self, to: Endpoint, batch: Arc<Batch>) -> Result<(), MessagingError>;

    /// Drop a batch from `to`'s batch log.
    async fn remove_batch(&self, to: Endpoint, id: Uuid) -> Result<(), MessagingError>;
}
