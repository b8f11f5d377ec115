//! Replication coordinator for ringstore.
//!
//! Provides: consistency level arithmetic, write fan-out with hinted handoff
//! and batch-logged atomic batches, digest reads with read repair, and
//! adaptive token range scans, all behind [`StorageProxy`].

pub mod batchlog;
pub mod batchlog_replay;
pub mod chaos;
pub mod config;
pub mod consistency;
pub mod error;
pub mod hint_delivery;
pub mod hint_store;
pub mod hints;
pub mod messaging;
pub mod proxy;
pub mod range_query;
pub mod read_executor;
pub mod response_handler;
pub mod stats;
pub mod topology;
pub mod triggers;
mod write;

#[cfg(test)]
mod test_support;

pub use batchlog::{Batch, Batchlog, LocalBatchlog};
pub use config::ProxyConfig;
pub use error::{ProxyError, WriteType};
pub use hints::{HintManager, MAX_HINTS_IN_PROGRESS};
pub use messaging::{Messaging, MessagingError};
pub use proxy::StorageProxy;
pub use read_executor::{ReadContext, ReadExecutor};
pub use stats::StatsSnapshot;
pub use topology::{ReplicationStrategy, TokenRing, Topology};
