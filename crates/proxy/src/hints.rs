//! Hint admission and budgeting.
//!
//! The [`HintManager`] decides whether a dead or unresponsive replica gets a
//! hint and keeps the in-flight budget: a global count capped at
//! [`MAX_HINTS_IN_PROGRESS`] plus a per-destination count. A slot is taken
//! when a hint is stored and handed back through
//! [`on_hint_drained`](HintManager::on_hint_drained) once delivery deletes or
//! expires it.

use crate::hint_store::{Hint, HintStore, HintStoreError};
use crate::topology::Topology;
use parking_lot::Mutex;
use ringstore_common::{Endpoint, FrozenMutation};
pub use ringstore_config::MAX_HINTS_IN_PROGRESS;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HintConfig {
    pub enabled: bool,
    /// Endpoints down longer than this get no new hints.
    pub max_hint_window: Duration,
    pub max_hints_per_endpoint: usize,
}

impl Default for HintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_hint_window: Duration::from_secs(3 * 60 * 60),
            max_hints_per_endpoint: MAX_HINTS_IN_PROGRESS,
        }
    }
}

#[derive(Debug, Default)]
struct HintBudget {
    total: usize,
    per_endpoint: HashMap<Endpoint, usize>,
}

impl HintBudget {
    fn for_endpoint(&self, endpoint: Endpoint) -> usize {
        self.per_endpoint.get(&endpoint).copied().unwrap_or(0)
    }

    fn reserve(&mut self, endpoint: Endpoint) {
        self.total += 1;
        *self.per_endpoint.entry(endpoint).or_insert(0) += 1;
    }

    fn release(&mut self, endpoint: Endpoint) {
        let Some(count) = self.per_endpoint.get_mut(&endpoint) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.per_endpoint.remove(&endpoint);
        }
        self.total = self.total.saturating_sub(1);
    }
}

pub struct HintManager {
    store: HintStore,
    topology: Arc<dyn Topology>,
    config: HintConfig,
    budget: Mutex<HintBudget>,
}

impl std::fmt::Debug for HintManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HintManager")
            .field("config", &self.config)
            .field("in_progress", &self.hints_in_progress())
            .finish_non_exhaustive()
    }
}

impl HintManager {
    pub fn new(store: HintStore, topology: Arc<dyn Topology>, config: HintConfig) -> Self {
        Self {
            store,
            topology,
            config,
            budget: Mutex::new(HintBudget::default()),
        }
    }

    pub fn store(&self) -> &HintStore {
        &self.store
    }

    fn over_budget(&self, budget: &HintBudget, endpoint: Endpoint) -> bool {
        budget.total >= MAX_HINTS_IN_PROGRESS
            || budget.for_endpoint(endpoint) >= self.config.max_hints_per_endpoint
    }

    /// Cheap precondition: hinting disabled, or no budget left for `endpoint`.
    pub fn cannot_hint(&self, endpoint: Endpoint) -> bool {
        if !self.config.enabled {
            return true;
        }
        let budget = self.budget.lock();
        self.over_budget(&budget, endpoint)
    }

    /// Whether `endpoint` should receive a hint right now.
    pub fn should_hint(&self, endpoint: Endpoint) -> bool {
        if self.cannot_hint(endpoint) {
            return false;
        }
        let downtime = self.topology.downtime(endpoint);
        if downtime > self.config.max_hint_window {
            tracing::debug!(
                "not hinting {}: down for {:?}, window is {:?}",
                endpoint,
                downtime,
                self.config.max_hint_window
            );
            return false;
        }
        true
    }

    /// Persist `mutation` as a hint for `target`. Returns `Ok(false)` when
    /// the budget is exhausted and nothing was written.
    pub async fn submit(
        &self,
        mutation: &FrozenMutation,
        target: Endpoint,
    ) -> Result<bool, HintStoreError> {
        if !self.config.enabled {
            return Ok(false);
        }
        {
            let mut budget = self.budget.lock();
            if self.over_budget(&budget, target) {
                return Ok(false);
            }
            budget.reserve(target);
        }

        match self.store.store(target, mutation).await {
            Ok(hint) => {
                ringstore_metrics::metrics().hints_stored.inc();
                tracing::debug!("stored hint {} for {}", hint.id, target);
                Ok(true)
            }
            Err(e) => {
                self.budget.lock().release(target);
                Err(e)
            }
        }
    }

    /// A hint for `target` was delivered or expired.
    pub fn on_hint_drained(&self, target: Endpoint) {
        self.budget.lock().release(target);
    }

    /// Drop a hint from the store and return its budget slot.
    pub async fn drain(&self, hint: &Hint) -> Result<(), HintStoreError> {
        self.store.delete(hint).await?;
        self.on_hint_drained(hint.target);
        Ok(())
    }

    pub fn hints_in_progress(&self) -> usize {
        self.budget.lock().total
    }

    pub fn hints_in_progress_for(&self, endpoint: Endpoint) -> usize {
        self.budget.lock().for_endpoint(endpoint)
    }

    pub fn max_hint_window(&self) -> Duration {
        self.config.max_hint_window
    }
}
