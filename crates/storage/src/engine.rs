//! Storage engine: combines WAL + Memtable.
//!
//! All writes go through the WAL first (for durability), then into
//! the in-memory memtable (for fast reads).

use crate::memtable::Memtable;
use crate::record::WalRecord;
use crate::wal::{FsyncPolicy, Wal, WalError};
use ringstore_common::{
    DecoratedKey, Mutation, PartitionData, PartitionRange, ReadCommand, ReadDigest,
    ReconcilableResult,
};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The storage engine. All operations are synchronous (blocking I/O).
/// The async boundary is at the caller (the proxy).
#[derive(Debug)]
pub struct StorageEngine {
    memtable: Memtable,
    wal: Wal,
}

impl StorageEngine {
    /// Open or create a storage engine at the given directory.
    pub fn open(data_dir: &Path, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let wal_path = data_dir.join("wal.log");

        let records = Wal::replay(&wal_path)?;
        let replayed = records.len();
        let mut memtable = Memtable::new();
        for record in records {
            match record {
                WalRecord::Apply(m) => memtable.apply(&m),
                WalRecord::RemoveRow {
                    keyspace,
                    table,
                    key,
                    clustering,
                } => {
                    memtable.remove_row(&keyspace, &table, &key, &clustering);
                }
            }
        }

        let wal = Wal::open(&wal_path, fsync)?;

        tracing::info!(
            "storage engine opened: {} WAL entries replayed, {} rows at {:?}",
            replayed,
            memtable.row_count(),
            wal_path
        );

        Ok(Self { memtable, wal })
    }

    /// Apply a mutation: WAL first, then memtable.
    pub fn apply(&mut self, mutation: &Mutation) -> Result<(), StorageError> {
        self.wal.append(&WalRecord::Apply(mutation.clone()))?;
        self.memtable.apply(mutation);
        Ok(())
    }

    /// Read `range` of the table named by `cmd`, honouring its row limit.
    pub fn read(&self, cmd: &ReadCommand, range: &PartitionRange) -> ReconcilableResult {
        self.memtable
            .read(&cmd.keyspace, &cmd.table, range, cmd.row_limit)
    }

    /// Digest of what [`read`](Self::read) would return.
    pub fn digest(&self, cmd: &ReadCommand, range: &PartitionRange) -> ReadDigest {
        self.read(cmd, range).digest()
    }

    /// Drop a single row for good. Used by node-local system tables.
    pub fn remove_row(
        &mut self,
        keyspace: &str,
        table: &str,
        key: &DecoratedKey,
        clustering: &[u8],
    ) -> Result<bool, StorageError> {
        self.wal.append(&WalRecord::RemoveRow {
            keyspace: keyspace.to_string(),
            table: table.to_string(),
            key: key.clone(),
            clustering: clustering.to_vec(),
        })?;
        Ok(self.memtable.remove_row(keyspace, table, key, clustering))
    }

    /// Every partition of a table, in token order.
    pub fn scan_table(&self, keyspace: &str, table: &str) -> Vec<PartitionData> {
        self.memtable.scan(keyspace, table)
    }

    pub fn partition_count(&self, keyspace: &str, table: &str) -> usize {
        self.memtable.partition_count(keyspace, table)
    }

    /// Total rows held, tombstones included.
    pub fn row_count(&self) -> usize {
        self.memtable.row_count()
    }

    /// Sync the WAL to disk (for batch fsync mode).
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.wal.sync()?;
        Ok(())
    }

    /// Apply a mutation and fsync it before returning, unless fsync is
    /// disabled. For records that must survive a crash once acknowledged.
    pub fn apply_durable(&mut self, mutation: &Mutation) -> Result<(), StorageError> {
        self.apply(mutation)?;
        if self.wal.fsync_policy() == FsyncPolicy::Batch {
            self.wal.sync()?;
        }
        Ok(())
    }

    /// Sync only if something was written since the last sync. Returns the
    /// number of entries made durable.
    pub fn sync_pending(&mut self) -> Result<u64, StorageError> {
        let pending = self.wal.unsynced();
        if pending > 0 && self.wal.fsync_policy() != FsyncPolicy::None {
            self.wal.sync()?;
            return Ok(pending);
        }
        Ok(0)
    }

    /// WAL entries not yet fsynced.
    pub fn unsynced_entries(&self) -> u64 {
        self.wal.unsynced()
    }
}
