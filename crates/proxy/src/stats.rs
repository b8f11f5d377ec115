//! Per-coordinator timeout and unavailability counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ProxyStats {
    read_timeouts: AtomicU64,
    read_unavailables: AtomicU64,
    range_slice_timeouts: AtomicU64,
    range_slice_unavailables: AtomicU64,
    write_timeouts: AtomicU64,
    write_unavailables: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub read_timeouts: u64,
    pub read_unavailables: u64,
    pub range_slice_timeouts: u64,
    pub range_slice_unavailables: u64,
    pub write_timeouts: u64,
    pub write_unavailables: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read_timeout(&self) {
        self.read_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_unavailable(&self) {
        self.read_unavailables.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_range_slice_timeout(&self) {
        self.range_slice_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_range_slice_unavailable(&self) {
        self.range_slice_unavailables.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_timeout(&self) {
        self.write_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_unavailable(&self) {
        self.write_unavailables.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            read_unavailables: self.read_unavailables.load(Ordering::Relaxed),
            range_slice_timeouts: self.range_slice_timeouts.load(Ordering::Relaxed),
            range_slice_unavailables: self.range_slice_unavailables.load(Ordering::Relaxed),
            write_timeouts: self.write_timeouts.load(Ordering::Relaxed),
            write_unavailables: self.write_unavailables.load(Ordering::Relaxed),
        }
    }
}
