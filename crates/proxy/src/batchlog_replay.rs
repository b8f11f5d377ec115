//! Background replay of abandoned atomic batches.
//!
//! A batch that is still in the local batch log after `batchlog_timeout` was
//! never confirmed by its coordinator. Its mutations are written again at
//! consistency ONE and the entry is removed once that succeeds.

use crate::error::{ProxyError, WriteType};
use crate::messaging::Messaging;
use crate::proxy::StorageProxy;
use ringstore_common::{now_millis, ConsistencyLevel};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Replay every batch older than the batch log timeout. Returns how many
/// batches were replayed and removed.
pub async fn replay_batches<M: Messaging>(proxy: &StorageProxy<M>) -> Result<usize, ProxyError> {
    let timeout_ms = proxy.config.batchlog_timeout.as_millis() as u64;
    let cutoff = now_millis().saturating_sub(timeout_ms);
    let pending = proxy.batchlog.pending(cutoff).await?;
    if pending.is_empty() {
        return Ok(0);
    }
    tracing::info!("replaying {} batches", pending.len());

    let mut replayed = 0;
    for batch in pending {
        let result = proxy
            .mutate_frozen(batch.mutations.clone(), ConsistencyLevel::One, WriteType::Batch)
            .await;
        match result {
            Ok(()) => {
                proxy.batchlog.remove(batch.id).await?;
                ringstore_metrics::metrics().batchlog_replays.inc();
                replayed += 1;
            }
            Err(e) => tracing::warn!("replay of batch {} failed, will retry: {}", batch.id, e),
        }
    }
    Ok(replayed)
}

/// Spawn the periodic batch log replay task.
pub fn spawn_batchlog_replay_task<M: Messaging>(
    proxy: Arc<StorageProxy<M>>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(e) = replay_batches(&proxy).await {
                tracing::warn!("batch log replay failed: {}", e);
            }
        }
    })
}
