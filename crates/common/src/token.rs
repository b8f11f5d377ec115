//! The token space: tokens, decorated keys and partition ranges.
//!
//! Partition keys hash onto a 64-bit ring. A ring token `t` owns the
//! half-open range `[previous_ring_token, t)`, so a [`TokenRange`] split at
//! ring tokens maps every piece to exactly one replica set.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::cmp::Ordering;
use std::fmt;

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// A position on the ring.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token(pub u64);

impl Token {
    /// The smallest token; the ring starts here.
    pub const MIN: Self = Self(0);

    /// Hash a partition key onto the ring (first 8 bytes of its SHA-1).
    pub fn from_key(key: &[u8]) -> Self {
        let hash = Sha1::digest(key);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash[..8]);
        Self(u64::from_be_bytes(bytes))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:#018x})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DecoratedKey
// ---------------------------------------------------------------------------

/// A partition key together with its token. Ordered by token, then key bytes.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecoratedKey {
    pub token: Token,
    pub key: Vec<u8>,
}

impl DecoratedKey {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        Self {
            token: Token::from_key(&key),
            key,
        }
    }

    /// Build a key with an explicit token (tests, system tables).
    pub fn with_token(token: Token, key: impl Into<Vec<u8>>) -> Self {
        Self {
            token,
            key: key.into(),
        }
    }

    /// The smallest decorated key at `token`, used as a scan lower bound.
    pub fn min_at(token: Token) -> Self {
        Self {
            token,
            key: Vec::new(),
        }
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecoratedKey({:?}, {})", self.token, hex::encode(&self.key))
    }
}

// ---------------------------------------------------------------------------
// TokenRange
// ---------------------------------------------------------------------------

/// Half-open interval `[start, end)` over the ring. `end = None` runs to the
/// end of the ring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRange {
    pub start: Token,
    pub end: Option<Token>,
}

impl TokenRange {
    pub fn new(start: Token, end: Token) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// `[start, end of ring)`.
    pub fn starting_at(start: Token) -> Self {
        Self { start, end: None }
    }

    /// The whole ring.
    pub fn full() -> Self {
        Self::starting_at(Token::MIN)
    }

    pub fn contains(&self, token: Token) -> bool {
        token >= self.start && self.end.map_or(true, |end| token < end)
    }

    pub fn is_empty(&self) -> bool {
        self.end.map_or(false, |end| end <= self.start)
    }

    /// Split into `[start, at)` and `[at, end)` if `at` lies strictly inside.
    pub fn split_at(&self, at: Token) -> Option<(TokenRange, TokenRange)> {
        if at <= self.start || !self.contains(at) {
            return None;
        }
        Some((
            TokenRange::new(self.start, at),
            TokenRange {
                start: at,
                end: self.end,
            },
        ))
    }

    /// Whether `next` begins exactly where this range ends.
    pub fn abuts(&self, next: &TokenRange) -> bool {
        self.end == Some(next.start)
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, end)", self.start),
        }
    }
}

// ---------------------------------------------------------------------------
// PartitionRange
// ---------------------------------------------------------------------------

/// What a read targets: one partition, or every partition in a token range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionRange {
    Key(DecoratedKey),
    Tokens(TokenRange),
}

impl PartitionRange {
    pub fn key(key: impl Into<Vec<u8>>) -> Self {
        Self::Key(DecoratedKey::new(key))
    }

    pub fn is_singular(&self) -> bool {
        matches!(self, Self::Key(_))
    }

    /// The token used to pick the replica set for this range.
    pub fn start_token(&self) -> Token {
        match self {
            Self::Key(key) => key.token,
            Self::Tokens(range) => range.start,
        }
    }

    pub fn contains(&self, key: &DecoratedKey) -> bool {
        match self {
            Self::Key(k) => k == key,
            Self::Tokens(range) => range.contains(key.token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_key_deterministic() {
        assert_eq!(Token::from_key(b"hello"), Token::from_key(b"hello"));
        assert_ne!(Token::from_key(b"key-a"), Token::from_key(b"key-b"));
    }

    #[test]
    fn test_decorated_key_orders_by_token_first() {
        let a = DecoratedKey::with_token(Token(1), b"zzz".to_vec());
        let b = DecoratedKey::with_token(Token(2), b"aaa".to_vec());
        assert!(a < b);

        let c = DecoratedKey::with_token(Token(2), b"bbb".to_vec());
        assert!(b < c);
        assert!(DecoratedKey::min_at(Token(2)) < b);
    }

    #[test]
    fn test_range_contains_half_open() {
        let r = TokenRange::new(Token(10), Token(20));
        assert!(r.contains(Token(10)));
        assert!(r.contains(Token(19)));
        assert!(!r.contains(Token(20)));
        assert!(!r.contains(Token(9)));

        let open = TokenRange::starting_at(Token(10));
        assert!(open.contains(Token(u64::MAX)));
    }

    #[test]
    fn test_range_split_at() {
        let r = TokenRange::new(Token(10), Token(20));
        let (left, right) = r.split_at(Token(15)).unwrap();
        assert_eq!(left, TokenRange::new(Token(10), Token(15)));
        assert_eq!(right, TokenRange::new(Token(15), Token(20)));
        assert!(left.abuts(&right));

        // Boundaries and outside points do not split.
        assert!(r.split_at(Token(10)).is_none());
        assert!(r.split_at(Token(20)).is_none());
        assert!(r.split_at(Token(25)).is_none());
    }

    #[test]
    fn test_range_empty() {
        assert!(TokenRange::new(Token(5), Token(5)).is_empty());
        assert!(!TokenRange::full().is_empty());
    }

    #[test]
    fn test_partition_range_start_token() {
        let pr = PartitionRange::key(b"k1".to_vec());
        assert!(pr.is_singular());
        assert_eq!(pr.start_token(), Token::from_key(b"k1"));

        let tr = PartitionRange::Tokens(TokenRange::new(Token(3), Token(9)));
        assert!(!tr.is_singular());
        assert_eq!(tr.start_token(), Token(3));
        assert!(tr.contains(&DecoratedKey::with_token(Token(4), b"x".to_vec())));
    }
}
