//! ringstore-common: shared types for the ringstore replication coordinator.
//!
//! Provides the token space (`Token`, `TokenRange`, `PartitionRange`),
//! the write model (`Mutation`, `FrozenMutation`), the read model
//! (`ReadCommand`, `ReconcilableResult`, `QueryResult`, `ReadDigest`),
//! plus `Endpoint` and `ConsistencyLevel`.

pub mod mutation;
pub mod query;
pub mod token;

pub use mutation::{Cell, FrozenMutation, Mutation, Row};
pub use query::{
    PartitionData, QueryResult, ReadCommand, ReadDigest, ReconcilableResult, ResultPartition,
    ResultRow, Schema,
};
pub use token::{DecoratedKey, PartitionRange, Token, TokenRange};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Keyspace holding node-local system tables (hints, batch log).
pub const SYSTEM_KEYSPACE: &str = "system";

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Address of a replica node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    /// Loopback endpoint on the given port. Handy for tests and local clusters.
    pub fn localhost(port: u16) -> Self {
        Self(SocketAddr::from(([127, 0, 0, 1], port)))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ConsistencyLevel
// ---------------------------------------------------------------------------

/// How many replicas must acknowledge an operation before it succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyLevel {
    /// A write succeeds once any replica acks or a hint is stored.
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalOne,
    LocalQuorum,
    EachQuorum,
}

impl ConsistencyLevel {
    /// Every variant, in declaration order.
    pub const ALL_LEVELS: [ConsistencyLevel; 9] = [
        Self::Any,
        Self::One,
        Self::Two,
        Self::Three,
        Self::Quorum,
        Self::All,
        Self::LocalOne,
        Self::LocalQuorum,
        Self::EachQuorum,
    ];

    /// Whether only replicas of the coordinator's datacenter count.
    pub fn is_datacenter_local(&self) -> bool {
        matches!(self, Self::LocalOne | Self::LocalQuorum)
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "ANY",
            Self::One => "ONE",
            Self::Two => "TWO",
            Self::Three => "THREE",
            Self::Quorum => "QUORUM",
            Self::All => "ALL",
            Self::LocalOne => "LOCAL_ONE",
            Self::LocalQuorum => "LOCAL_QUORUM",
            Self::EachQuorum => "EACH_QUORUM",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("failed to serialize mutation: {0}")]
    Freeze(#[source] serde_json::Error),
    #[error("failed to deserialize frozen mutation: {0}")]
    Unfreeze(#[source] serde_json::Error),
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Wall-clock microseconds since the Unix epoch, the default write timestamp.
pub fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let ep = Endpoint::localhost(7000);
        assert_eq!(ep.to_string(), "127.0.0.1:7000");
        assert_eq!(ep.addr().port(), 7000);
    }

    #[test]
    fn test_endpoint_ordering() {
        assert!(Endpoint::localhost(7000) < Endpoint::localhost(7001));
    }

    #[test]
    fn test_consistency_level_display() {
        assert_eq!(ConsistencyLevel::LocalQuorum.to_string(), "LOCAL_QUORUM");
        assert_eq!(ConsistencyLevel::Any.to_string(), "ANY");
    }

    #[test]
    fn test_consistency_level_serde_names() {
        let json = serde_json::to_string(&ConsistencyLevel::EachQuorum).unwrap();
        assert_eq!(json, "\"EACH_QUORUM\"");
        let cl: ConsistencyLevel = serde_json::from_str("\"LOCAL_ONE\"").unwrap();
        assert_eq!(cl, ConsistencyLevel::LocalOne);
    }

    #[test]
    fn test_datacenter_local_levels() {
        let local: Vec<_> = ConsistencyLevel::ALL_LEVELS
            .iter()
            .filter(|cl| cl.is_datacenter_local())
            .collect();
        assert_eq!(
            local,
            vec![&ConsistencyLevel::LocalOne, &ConsistencyLevel::LocalQuorum]
        );
    }
}
