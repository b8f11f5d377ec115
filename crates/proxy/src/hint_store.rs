//! Durable store for hinted-handoff hints.
//!
//! Each hint is a mutation that could not be delivered to one of its
//! replicas. Hints live in the `system.hints` table of the local storage
//! engine, so they share its WAL and survive restarts:
//!
//! - partition key: the target endpoint (`"ip:port"`)
//! - clustering: creation time (big-endian millis) then the hint id, so a
//!   partition reads back oldest first
//! - value: the JSON-encoded [`Hint`]

use ringstore_common::{
    now_micros, now_millis, Cell, DecoratedKey, Endpoint, FrozenMutation, Mutation,
    PartitionRange, ReadCommand, SYSTEM_KEYSPACE,
};
use ringstore_storage::{StorageEngine, StorageError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const HINTS_TABLE: &str = "hints";

#[derive(Debug, thiserror::Error)]
pub enum HintStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A write that still has to reach `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub id: Uuid,
    pub target: Endpoint,
    pub created_at_ms: u64,
    pub mutation: FrozenMutation,
}

impl Hint {
    fn partition_key(&self) -> DecoratedKey {
        target_key(self.target)
    }

    fn clustering(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 16);
        out.extend_from_slice(&self.created_at_ms.to_be_bytes());
        out.extend_from_slice(self.id.as_bytes());
        out
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }
}

fn target_key(target: Endpoint) -> DecoratedKey {
    DecoratedKey::new(target.to_string().into_bytes())
}

fn parse_target(key: &DecoratedKey) -> Option<Endpoint> {
    let s = std::str::from_utf8(&key.key).ok()?;
    s.parse::<SocketAddr>().ok().map(Endpoint::new)
}

/// Hint table handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HintStore {
    storage: Arc<RwLock<StorageEngine>>,
}

impl HintStore {
    pub fn new(storage: Arc<RwLock<StorageEngine>>) -> Self {
        Self { storage }
    }

    /// Persist a hint for `target`.
    pub async fn store(
        &self,
        target: Endpoint,
        mutation: &FrozenMutation,
    ) -> Result<Hint, HintStoreError> {
        let hint = Hint {
            id: Uuid::new_v4(),
            target,
            created_at_ms: now_millis(),
            mutation: mutation.clone(),
        };
        let row = Mutation::new(SYSTEM_KEYSPACE, HINTS_TABLE, hint.partition_key()).with_cell(
            hint.clustering(),
            Cell::live(serde_json::to_vec(&hint)?, now_micros()),
        );
        self.storage.write().await.apply_durable(&row)?;
        Ok(hint)
    }

    /// Pending hints for `target`, oldest first. Undecodable rows are
    /// skipped with a warning.
    pub async fn hints_for(&self, target: Endpoint) -> Vec<Hint> {
        let cmd = ReadCommand::new(SYSTEM_KEYSPACE, HINTS_TABLE);
        let range = PartitionRange::Key(target_key(target));
        let result = self.storage.read().await.read(&cmd, &range);

        result
            .partitions
            .iter()
            .flat_map(|p| p.rows.iter())
            .filter_map(|row| {
                let bytes = row.cell.value.as_ref()?;
                match serde_json::from_slice::<Hint>(bytes) {
                    Ok(hint) => Some(hint),
                    Err(e) => {
                        tracing::warn!("skipping undecodable hint for {}: {}", target, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Drop a delivered or expired hint. Returns whether it was present.
    pub async fn delete(&self, hint: &Hint) -> Result<bool, HintStoreError> {
        let removed = self.storage.write().await.remove_row(
            SYSTEM_KEYSPACE,
            HINTS_TABLE,
            &hint.partition_key(),
            &hint.clustering(),
        )?;
        Ok(removed)
    }

    /// Endpoints with at least one pending hint.
    pub async fn targets(&self) -> Vec<Endpoint> {
        let storage = self.storage.read().await;
        storage
            .scan_table(SYSTEM_KEYSPACE, HINTS_TABLE)
            .iter()
            .filter(|p| p.live_row_count() > 0)
            .filter_map(|p| parse_target(&p.key))
            .collect()
    }

    /// Total pending hints across all targets.
    pub async fn hint_count(&self) -> usize {
        let storage = self.storage.read().await;
        storage
            .scan_table(SYSTEM_KEYSPACE, HINTS_TABLE)
            .iter()
            .map(|p| p.live_row_count())
            .sum()
    }
}
