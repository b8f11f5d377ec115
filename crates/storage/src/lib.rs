//! Local storage engine for ringstore: WAL + in-memory partition table.
//!
//! Mutations are appended to a CRC-framed WAL and merged into a memtable
//! keyed by `(keyspace, table) -> DecoratedKey -> clustering`. Reads return
//! [`ReconcilableResult`](ringstore_common::ReconcilableResult)s with
//! tombstones and timestamps intact so the coordinator can reconcile replicas.

pub mod engine;
pub mod memtable;
pub mod record;
pub mod wal;

pub use engine::{StorageEngine, StorageError};
pub use record::WalRecord;
pub use wal::FsyncPolicy;
