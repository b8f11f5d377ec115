//! The write model: cells, rows, mutations and their frozen form.

use crate::token::DecoratedKey;
use crate::{now_micros, CommonError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single value (or tombstone) with its write timestamp in microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub value: Option<Vec<u8>>,
    pub timestamp: i64,
}

impl Cell {
    pub fn live(value: impl Into<Vec<u8>>, timestamp: i64) -> Self {
        Self {
            value: Some(value.into()),
            timestamp,
        }
    }

    pub fn tombstone(timestamp: i64) -> Self {
        Self {
            value: None,
            timestamp,
        }
    }

    pub fn is_live(&self) -> bool {
        self.value.is_some()
    }

    /// Order cells by reconciliation precedence: higher timestamp first,
    /// then tombstone over value, then the greater value.
    pub fn precedence(&self, other: &Cell) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| match (&self.value, &other.value) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }

    /// Return whichever of the two cells wins reconciliation.
    pub fn reconcile(self, other: Cell) -> Cell {
        if other.precedence(&self) == Ordering::Greater {
            other
        } else {
            self
        }
    }
}

/// One clustering row inside a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row {
    pub clustering: Vec<u8>,
    pub cell: Cell,
}

/// A change to a single partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub keyspace: String,
    pub table: String,
    pub key: DecoratedKey,
    pub rows: Vec<Row>,
}

impl Mutation {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>, key: DecoratedKey) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            key,
            rows: Vec::new(),
        }
    }

    /// Add a live row written at the current time.
    pub fn with_row(self, clustering: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        let ts = now_micros();
        self.with_cell(clustering, Cell::live(value, ts))
    }

    /// Add a row deletion written at the current time.
    pub fn with_deletion(self, clustering: impl Into<Vec<u8>>) -> Self {
        let ts = now_micros();
        self.with_cell(clustering, Cell::tombstone(ts))
    }

    pub fn with_cell(mut self, clustering: impl Into<Vec<u8>>, cell: Cell) -> Self {
        self.rows.push(Row {
            clustering: clustering.into(),
            cell,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialize once for transport and durable storage.
    pub fn freeze(&self) -> Result<FrozenMutation, CommonError> {
        let bytes = serde_json::to_vec(self).map_err(CommonError::Freeze)?;
        Ok(FrozenMutation {
            keyspace: self.keyspace.clone(),
            key: self.key.clone(),
            bytes: Bytes::from(bytes),
        })
    }
}

/// Serialized mutation. Carries its keyspace and key so the coordinator can
/// route it without deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenMutation {
    pub keyspace: String,
    pub key: DecoratedKey,
    pub bytes: Bytes,
}

impl FrozenMutation {
    pub fn unfreeze(&self) -> Result<Mutation, CommonError> {
        serde_json::from_slice(&self.bytes).map_err(CommonError::Unfreeze)
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}
