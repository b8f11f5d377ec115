//! The read model: commands, reconcilable replica results, digests and the
//! live rows handed back to callers.

use crate::mutation::{Cell, Mutation, Row};
use crate::token::DecoratedKey;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;

/// Which table to read and how many live rows to return at most.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCommand {
    pub keyspace: String,
    pub table: String,
    pub row_limit: usize,
}

impl ReadCommand {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            row_limit: usize::MAX,
        }
    }

    pub fn with_limit(mut self, row_limit: usize) -> Self {
        self.row_limit = row_limit;
        self
    }
}

/// Cardinality hints for a table, used to size range-scan concurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub keyspace: String,
    pub table: String,
    /// Estimated number of partitions held by the whole cluster.
    pub estimated_partitions: u64,
    pub mean_rows_per_partition: f64,
}

impl Schema {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            estimated_partitions: 0,
            mean_rows_per_partition: 1.0,
        }
    }

    pub fn with_estimates(mut self, partitions: u64, mean_rows: f64) -> Self {
        self.estimated_partitions = partitions;
        self.mean_rows_per_partition = mean_rows;
        self
    }
}

// ---------------------------------------------------------------------------
// Reconcilable results
// ---------------------------------------------------------------------------

/// One partition as a replica stores it, tombstones and timestamps included.
/// Rows are sorted by clustering key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionData {
    pub key: DecoratedKey,
    pub rows: Vec<Row>,
}

impl PartitionData {
    pub fn live_row_count(&self) -> usize {
        self.rows.iter().filter(|r| r.cell.is_live()).count()
    }
}

/// What a replica returns for a data read: partitions in token order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilableResult {
    pub partitions: Vec<PartitionData>,
}

impl ReconcilableResult {
    pub fn new(partitions: Vec<PartitionData>) -> Self {
        Self { partitions }
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn live_row_count(&self) -> usize {
        self.partitions.iter().map(PartitionData::live_row_count).sum()
    }

    /// SHA-1 over a canonical, length-prefixed encoding of every row.
    pub fn digest(&self) -> ReadDigest {
        let mut hasher = Sha1::new();
        for p in &self.partitions {
            hasher.update(p.key.token.value().to_be_bytes());
            hasher.update((p.key.key.len() as u64).to_be_bytes());
            hasher.update(&p.key.key);
            hasher.update((p.rows.len() as u64).to_be_bytes());
            for row in &p.rows {
                hasher.update((row.clustering.len() as u64).to_be_bytes());
                hasher.update(&row.clustering);
                hasher.update(row.cell.timestamp.to_be_bytes());
                match &row.cell.value {
                    Some(v) => {
                        hasher.update([1u8]);
                        hasher.update((v.len() as u64).to_be_bytes());
                        hasher.update(v);
                    }
                    None => hasher.update([0u8]),
                }
            }
        }
        let hash = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash);
        ReadDigest(bytes)
    }

    /// Merge replica answers cell by cell; the winning version of every row
    /// survives.
    pub fn reconcile(results: &[ReconcilableResult]) -> ReconcilableResult {
        let mut merged: BTreeMap<DecoratedKey, BTreeMap<Vec<u8>, Cell>> = BTreeMap::new();
        for result in results {
            for p in &result.partitions {
                let rows = merged.entry(p.key.clone()).or_default();
                for row in &p.rows {
                    match rows.remove(&row.clustering) {
                        Some(existing) => {
                            rows.insert(row.clustering.clone(), existing.reconcile(row.cell.clone()))
                        }
                        None => rows.insert(row.clustering.clone(), row.cell.clone()),
                    };
                }
            }
        }
        ReconcilableResult {
            partitions: merged
                .into_iter()
                .map(|(key, rows)| PartitionData {
                    key,
                    rows: rows
                        .into_iter()
                        .map(|(clustering, cell)| Row { clustering, cell })
                        .collect(),
                })
                .collect(),
        }
    }

    /// Mutations that bring a replica holding `self` up to `reconciled`.
    /// Empty when the replica already agrees.
    pub fn repair_mutations(
        &self,
        reconciled: &ReconcilableResult,
        keyspace: &str,
        table: &str,
    ) -> Vec<Mutation> {
        let mine: BTreeMap<&DecoratedKey, BTreeMap<&[u8], &Cell>> = self
            .partitions
            .iter()
            .map(|p| {
                let rows = p
                    .rows
                    .iter()
                    .map(|r| (r.clustering.as_slice(), &r.cell))
                    .collect();
                (&p.key, rows)
            })
            .collect();

        let mut out = Vec::new();
        for p in &reconciled.partitions {
            let have = mine.get(&p.key);
            let missing: Vec<Row> = p
                .rows
                .iter()
                .filter(|row| {
                    have.and_then(|rows| rows.get(row.clustering.as_slice()))
                        .map_or(true, |cell| *cell != &row.cell)
                })
                .cloned()
                .collect();
            if !missing.is_empty() {
                out.push(Mutation {
                    keyspace: keyspace.to_string(),
                    table: table.to_string(),
                    key: p.key.clone(),
                    rows: missing,
                });
            }
        }
        out
    }

    /// Live rows only, stopping after `limit` rows.
    pub fn to_query_result(&self, limit: usize) -> QueryResult {
        let mut remaining = limit;
        let mut partitions = Vec::new();
        for p in &self.partitions {
            if remaining == 0 {
                break;
            }
            let rows: Vec<ResultRow> = p
                .rows
                .iter()
                .filter_map(|r| {
                    r.cell.value.as_ref().map(|v| ResultRow {
                        clustering: r.clustering.clone(),
                        value: v.clone(),
                    })
                })
                .take(remaining)
                .collect();
            if rows.is_empty() {
                continue;
            }
            remaining -= rows.len();
            partitions.push(ResultPartition {
                key: p.key.clone(),
                rows,
            });
        }
        QueryResult { partitions }
    }
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// 20-byte fingerprint of a [`ReconcilableResult`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadDigest(pub [u8; 20]);

impl fmt::Display for ReadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ReadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadDigest({})", hex::encode(&self.0[..6]))
    }
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub clustering: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPartition {
    pub key: DecoratedKey,
    pub rows: Vec<ResultRow>,
}

/// Live rows returned to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub partitions: Vec<ResultPartition>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.partitions.iter().map(|p| p.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Concatenate results in the given order.
    pub fn concat(results: impl IntoIterator<Item = QueryResult>) -> QueryResult {
        QueryResult {
            partitions: results.into_iter().flat_map(|r| r.partitions).collect(),
        }
    }

    /// Keep at most `limit` rows, dropping partitions left empty.
    pub fn truncate(&mut self, limit: usize) {
        let mut remaining = limit;
        self.partitions.retain_mut(|p| {
            if remaining == 0 {
                return false;
            }
            p.rows.truncate(remaining);
            remaining -= p.rows.len();
            !p.rows.is_empty()
        });
    }

    /// Value stored under `clustering` in partition `key`, if live.
    pub fn value(&self, key: &DecoratedKey, clustering: &[u8]) -> Option<&[u8]> {
        self.partitions
            .iter()
            .find(|p| &p.key == key)?
            .rows
            .iter()
            .find(|r| r.clustering == clustering)
            .map(|r| r.value.as_slice())
    }
}
