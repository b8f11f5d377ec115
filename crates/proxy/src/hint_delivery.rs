//! Background task for delivering hinted-handoff hints.
//!
//! Periodically walks the hint table and replays each hint to its target
//! once the topology reports it alive again. Delivered and expired hints are
//! deleted and their budget slots handed back to the [`HintManager`].

use crate::hints::HintManager;
use crate::messaging::Messaging;
use crate::topology::Topology;
use ringstore_common::now_millis;
use std::sync::Arc;
use tokio::time::{interval, Duration};

/// Configuration for the hint delivery background task.
#[derive(Debug, Clone)]
pub struct HintDeliveryConfig {
    /// How often to check for undelivered hints.
    pub check_interval: Duration,
    /// Maximum hints to attempt per delivery cycle.
    pub max_hints_per_cycle: usize,
    /// Hints older than this are dropped instead of delivered.
    pub max_hint_age: Duration,
}

impl Default for HintDeliveryConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            max_hints_per_cycle: 100,
            max_hint_age: Duration::from_secs(3 * 60 * 60),
        }
    }
}

/// What one delivery cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub expired: usize,
}

/// Spawn the background hint delivery task.
#[allow(clippy::needless_pass_by_value)] // config is moved into the spawned task
pub fn spawn_hint_delivery_task<M: Messaging>(
    hints: Arc<HintManager>,
    topology: Arc<dyn Topology>,
    messaging: Arc<M>,
    config: HintDeliveryConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(config.check_interval);
        loop {
            tick.tick().await;
            deliver_hints(&hints, topology.as_ref(), messaging.as_ref(), &config).await;
        }
    })
}

/// One cycle of hint delivery.
pub async fn deliver_hints<M: Messaging>(
    hints: &HintManager,
    topology: &dyn Topology,
    messaging: &M,
    config: &HintDeliveryConfig,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let targets = hints.store().targets().await;
    if targets.is_empty() {
        return report;
    }

    let max_age_ms = config.max_hint_age.as_millis() as u64;
    let local = topology.local_endpoint();

    for target in targets {
        let alive = target != local && topology.is_alive(target);
        let pending = hints.store().hints_for(target).await;
        let now = now_millis();

        for hint in pending {
            if hint.age_ms(now) > max_age_ms {
                match hints.drain(&hint).await {
                    Ok(()) => report.expired += 1,
                    Err(e) => tracing::warn!("failed to drop expired hint {}: {}", hint.id, e),
                }
                continue;
            }
            if !alive || report.delivered >= config.max_hints_per_cycle {
                continue;
            }

            ringstore_metrics::metrics()
                .messages_sent
                .with_label_values(&["hint"])
                .inc();
            match messaging
                .send_mutation(target, Arc::new(hint.mutation.clone()))
                .await
            {
                Ok(()) => {
                    if let Err(e) = hints.drain(&hint).await {
                        tracing::warn!("failed to delete delivered hint {}: {}", hint.id, e);
                    }
                    report.delivered += 1;
                    ringstore_metrics::metrics().hints_delivered.inc();
                    tracing::debug!("delivered hint {} to {}", hint.id, target);
                }
                Err(e) => {
                    tracing::debug!(
                        "hint delivery to {} failed: {}, will retry later",
                        target,
                        e
                    );
                    // Skip remaining hints for this target
                    break;
                }
            }
        }
    }

    if report.delivered > 0 || report.expired > 0 {
        tracing::info!(
            "hint delivery cycle: delivered {} hint(s), expired {}",
            report.delivered,
            report.expired
        );
    }
    report
}
