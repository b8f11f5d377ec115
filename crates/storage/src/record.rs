//! WAL record format.

use ringstore_common::{DecoratedKey, Mutation};
use serde::{Deserialize, Serialize};

/// One durable change, replayed in order on startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WalRecord {
    /// Merge a mutation into the partition table.
    Apply(Mutation),
    /// Physically drop one row (used by node-local system tables once an
    /// entry has been consumed).
    RemoveRow {
        keyspace: String,
        table: String,
        key: DecoratedKey,
        clustering: Vec<u8>,
    },
}
