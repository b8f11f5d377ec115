//! In-memory partition table.
//!
//! Every `(keyspace, table)` maps decorated keys to their clustering rows, so
//! partitions iterate in token order and rows in clustering order. Writes
//! merge cell by cell using timestamp reconciliation.

use ringstore_common::{
    Cell, DecoratedKey, Mutation, PartitionData, PartitionRange, ReconcilableResult, Row,
};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

type Partition = BTreeMap<Vec<u8>, Cell>;
type Table = BTreeMap<DecoratedKey, Partition>;

#[derive(Debug, Default)]
pub struct Memtable {
    tables: HashMap<(String, String), Table>,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every row of `mutation`; the winning cell survives.
    pub fn apply(&mut self, mutation: &Mutation) {
        if mutation.is_empty() {
            return;
        }
        let table = self
            .tables
            .entry((mutation.keyspace.clone(), mutation.table.clone()))
            .or_default();
        let partition = table.entry(mutation.key.clone()).or_default();
        for row in &mutation.rows {
            match partition.remove(&row.clustering) {
                Some(existing) => {
                    partition.insert(row.clustering.clone(), existing.reconcile(row.cell.clone()));
                }
                None => {
                    partition.insert(row.clustering.clone(), row.cell.clone());
                }
            }
        }
    }

    /// Physically drop a row, and its partition once empty.
    pub fn remove_row(
        &mut self,
        keyspace: &str,
        table: &str,
        key: &DecoratedKey,
        clustering: &[u8],
    ) -> bool {
        let Some(t) = self.tables.get_mut(&(keyspace.to_string(), table.to_string())) else {
            return false;
        };
        let Some(partition) = t.get_mut(key) else {
            return false;
        };
        let removed = partition.remove(clustering).is_some();
        if partition.is_empty() {
            t.remove(key);
        }
        removed
    }

    /// Read partitions in `range`, stopping once `row_limit` live rows have
    /// been collected. Tombstones are returned but do not count.
    pub fn read(
        &self,
        keyspace: &str,
        table: &str,
        range: &PartitionRange,
        row_limit: usize,
    ) -> ReconcilableResult {
        let Some(t) = self.tables.get(&(keyspace.to_string(), table.to_string())) else {
            return ReconcilableResult::default();
        };

        let partitions: Box<dyn Iterator<Item = (&DecoratedKey, &Partition)>> = match range {
            PartitionRange::Key(key) => Box::new(t.get_key_value(key).into_iter()),
            PartitionRange::Tokens(tr) if tr.is_empty() => return ReconcilableResult::default(),
            PartitionRange::Tokens(tr) => {
                let lower = Bound::Included(DecoratedKey::min_at(tr.start));
                let upper = match tr.end {
                    Some(end) => Bound::Excluded(DecoratedKey::min_at(end)),
                    None => Bound::Unbounded,
                };
                Box::new(t.range((lower, upper)))
            }
        };

        let mut remaining = row_limit;
        let mut out = Vec::new();
        for (key, rows) in partitions {
            if remaining == 0 {
                break;
            }
            let mut taken = Vec::new();
            for (clustering, cell) in rows {
                if remaining == 0 {
                    break;
                }
                if cell.is_live() {
                    remaining -= 1;
                }
                taken.push(Row {
                    clustering: clustering.clone(),
                    cell: cell.clone(),
                });
            }
            out.push(PartitionData {
                key: key.clone(),
                rows: taken,
            });
        }
        ReconcilableResult::new(out)
    }

    /// Every partition of a table in token order.
    pub fn scan(&self, keyspace: &str, table: &str) -> Vec<PartitionData> {
        self.tables
            .get(&(keyspace.to_string(), table.to_string()))
            .map(|t| {
                t.iter()
                    .map(|(key, rows)| PartitionData {
                        key: key.clone(),
                        rows: rows
                            .iter()
                            .map(|(c, cell)| Row {
                                clustering: c.clone(),
                                cell: cell.clone(),
                            })
                            .collect(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn partition_count(&self, keyspace: &str, table: &str) -> usize {
        self.tables
            .get(&(keyspace.to_string(), table.to_string()))
            .map_or(0, BTreeMap::len)
    }

    /// Total rows (live and tombstoned) across all tables.
    pub fn row_count(&self) -> usize {
        self.tables
            .values()
            .flat_map(|t| t.values())
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }
}
