//! Batch log: durable staging area for atomic batches.
//!
//! Before an atomic batch is applied anywhere, its mutations are written to
//! the batch log of a few nearby nodes. If the coordinator dies before the
//! batch is fully applied, those nodes replay it. The entry is removed once
//! every row mutation of the batch has been dispatched.

use ringstore_common::{
    now_micros, now_millis, Cell, DecoratedKey, FrozenMutation, Mutation, SYSTEM_KEYSPACE,
};
use ringstore_storage::{StorageEngine, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const BATCHLOG_TABLE: &str = "batchlog";

#[derive(Debug, thiserror::Error)]
pub enum BatchlogError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A set of mutations that must all eventually apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub written_at_ms: u64,
    pub mutations: Vec<FrozenMutation>,
}

impl Batch {
    pub fn new(mutations: Vec<FrozenMutation>) -> Self {
        Self {
            id: Uuid::new_v4(),
            written_at_ms: now_millis(),
            mutations,
        }
    }
}

/// Node-local batch log.
#[async_trait::async_trait]
pub trait Batchlog: Send + Sync + 'static {
    async fn store(&self, batch: &Batch) -> Result<(), BatchlogError>;

    async fn remove(&self, id: Uuid) -> Result<(), BatchlogError>;

    /// Batches written before `written_before_ms`, oldest first.
    async fn pending(&self, written_before_ms: u64) -> Result<Vec<Batch>, BatchlogError>;
}

/// Batch log kept in the `system.batchlog` table of the local storage
/// engine. One partition per batch, keyed by the batch id.
#[derive(Debug, Clone)]
pub struct LocalBatchlog {
    storage: Arc<RwLock<StorageEngine>>,
}

const BATCH_ROW: &[u8] = b"";

fn batch_key(id: Uuid) -> DecoratedKey {
    DecoratedKey::new(id.as_bytes().to_vec())
}

impl LocalBatchlog {
    pub fn new(storage: Arc<RwLock<StorageEngine>>) -> Self {
        Self { storage }
    }

    /// Batches currently held, in no particular order.
    pub async fn len(&self) -> usize {
        let storage = self.storage.read().await;
        storage
            .scan_table(SYSTEM_KEYSPACE, BATCHLOG_TABLE)
            .iter()
            .filter(|p| p.live_row_count() > 0)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl Batchlog for LocalBatchlog {
    async fn store(&self, batch: &Batch) -> Result<(), BatchlogError> {
        let row = Mutation::new(SYSTEM_KEYSPACE, BATCHLOG_TABLE, batch_key(batch.id))
            .with_cell(BATCH_ROW, Cell::live(serde_json::to_vec(batch)?, now_micros()));
        self.storage.write().await.apply_durable(&row)?;
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), BatchlogError> {
        self.storage.write().await.remove_row(
            SYSTEM_KEYSPACE,
            BATCHLOG_TABLE,
            &batch_key(id),
            BATCH_ROW,
        )?;
        Ok(())
    }

    async fn pending(&self, written_before_ms: u64) -> Result<Vec<Batch>, BatchlogError> {
        let partitions = self
            .storage
            .read()
            .await
            .scan_table(SYSTEM_KEYSPACE, BATCHLOG_TABLE);

        let mut batches = Vec::new();
        for row in partitions.iter().flat_map(|p| p.rows.iter()) {
            let Some(bytes) = row.cell.value.as_ref() else {
                continue;
            };
            let batch: Batch = serde_json::from_slice(bytes)?;
            if batch.written_at_ms < written_before_ms {
                batches.push(batch);
            }
        }
        batches.sort_by_key(|b| b.written_at_ms);
        Ok(batches)
    }
}
