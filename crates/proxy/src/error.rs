//! Coordinator error taxonomy.

use crate::batchlog::BatchlogError;
use crate::hint_store::HintStoreError;
use crate::triggers::TriggerError;
use ringstore_common::{CommonError, ConsistencyLevel};
use ringstore_storage::StorageError;
use std::fmt;

/// Which kind of write a timeout or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteType {
    /// A plain `mutate`.
    Simple,
    /// A row mutation dispatched as part of an atomic batch.
    Batch,
    /// The batch-log write that precedes an atomic batch.
    BatchLog,
}

impl fmt::Display for WriteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Simple => "SIMPLE",
            Self::Batch => "BATCH",
            Self::BatchLog => "BATCH_LOG",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("cannot achieve consistency level {cl}: {required} replica(s) required, {alive} alive")]
    Unavailable {
        cl: ConsistencyLevel,
        required: usize,
        alive: usize,
    },

    #[error("{write_type} write timed out at {cl}: {received} of {block_for} acknowledgments")]
    WriteTimeout {
        cl: ConsistencyLevel,
        received: usize,
        block_for: usize,
        write_type: WriteType,
    },

    #[error(
        "{write_type} write failed at {cl}: {received} of {block_for} acknowledgments, {failures} failure(s)"
    )]
    WriteFailure {
        cl: ConsistencyLevel,
        received: usize,
        block_for: usize,
        failures: usize,
        write_type: WriteType,
    },

    #[error("read timed out at {cl}: {received} of {block_for} responses (data present: {data_present})")]
    ReadTimeout {
        cl: ConsistencyLevel,
        received: usize,
        block_for: usize,
        data_present: bool,
    },

    #[error("read failed at {cl}: {received} of {block_for} responses, {failures} failure(s)")]
    ReadFailure {
        cl: ConsistencyLevel,
        received: usize,
        block_for: usize,
        failures: usize,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("hint store error: {0}")]
    HintStore(#[from] HintStoreError),

    #[error("batch log error: {0}")]
    Batchlog(#[from] BatchlogError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),
}

impl ProxyError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WriteTimeout { .. } | Self::ReadTimeout { .. })
    }
}
