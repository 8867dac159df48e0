//! Canonical block record and chain identifiers.
//!
//! Every origin payload is normalized into these types before it is cached,
//! packed into a chunk, or returned to a client. Ranges are inclusive on
//! both ends everywhere in the system.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::constants::BLOCK_PROTO_VERSION;
use crate::error::{CodecError, QueryError};

/// A 32-byte digest identifying a block or transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Used as the parent of the first block.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Build a hash from a slice that must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidHash(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(CodecError::InvalidHash("hash must be 64 hex characters".into()));
        }
        let bytes = hex::decode(s).map_err(|_| CodecError::InvalidHash("invalid hex in hash".into()))?;
        Self::from_slice(&bytes)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A spent-output marker. Opaque to this system.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Spend {
    pub nullifier: Vec<u8>,
}

/// An emitted output note. Opaque to this system.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Output {
    pub note: Vec<u8>,
}

/// The light view of a transaction: only what scanners need.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Position of the transaction within its block.
    pub index: u32,
    /// Transaction hash.
    pub hash: Hash256,
    /// Nullifiers revealed by the transaction, in order.
    pub spends: Vec<Spend>,
    /// Notes created by the transaction, in order.
    pub outputs: Vec<Output>,
}

/// The canonical block record.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Record version, [`BLOCK_PROTO_VERSION`] for everything this build writes.
    pub proto_version: u32,
    /// Position on the canonical chain, starting at 1.
    pub sequence: u64,
    /// Block hash.
    pub hash: Hash256,
    /// Hash of the parent block at `sequence - 1`.
    pub previous_hash: Hash256,
    /// Block timestamp (Unix milliseconds).
    pub timestamp: u64,
    /// Transactions in block order.
    pub transactions: Vec<Transaction>,
    /// Running total of outputs emitted through this block.
    pub cumulative_note_count: u64,
}

impl Block {
    /// Create a block at the current record version.
    pub fn new(
        sequence: u64,
        hash: Hash256,
        previous_hash: Hash256,
        timestamp: u64,
        transactions: Vec<Transaction>,
        cumulative_note_count: u64,
    ) -> Self {
        Self {
            proto_version: BLOCK_PROTO_VERSION,
            sequence,
            hash,
            previous_hash,
            timestamp,
            transactions,
            cumulative_note_count,
        }
    }

    /// The `(sequence, hash)` pair identifying this block.
    pub fn id(&self) -> BlockId {
        BlockId {
            sequence: self.sequence,
            hash: self.hash,
        }
    }

    /// True if `self` directly extends `parent`.
    pub fn extends(&self, parent: &Block) -> bool {
        self.previous_hash == parent.hash && self.sequence == parent.sequence + 1
    }

    /// Number of outputs created in this block.
    pub fn output_count(&self) -> usize {
        self.transactions.iter().map(|tx| tx.outputs.len()).sum()
    }
}

/// A `(sequence, hash)` pair.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub sequence: u64,
    pub hash: Hash256,
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sequence, self.hash)
    }
}

/// How a single block is addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSelector {
    Hash(Hash256),
    Sequence(u64),
}

impl BlockSelector {
    /// Build a selector from the optional request fields.
    ///
    /// Hash wins when both are present; neither is an invalid argument.
    pub fn from_parts(hash: Option<Hash256>, sequence: Option<u64>) -> Result<Self, QueryError> {
        match (hash, sequence) {
            (Some(hash), _) => Ok(Self::Hash(hash)),
            (None, Some(sequence)) => Ok(Self::Sequence(sequence)),
            (None, None) => Err(QueryError::InvalidArgument(
                "either hash or sequence must be provided".into(),
            )),
        }
    }
}

impl fmt::Display for BlockSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash(hash) => write!(f, "hash {hash}"),
            Self::Sequence(seq) => write!(f, "sequence {seq}"),
        }
    }
}

/// An inclusive run of sequences `[start, end]`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    /// Create a range. `end` must not be below `start`.
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Number of sequences covered, saturating at `u64::MAX`.
    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }

    /// Ranges are never empty; provided for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, sequence: u64) -> bool {
        (self.start..=self.end).contains(&sequence)
    }

    pub fn iter(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// One event from the origin's follow stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    /// A block was appended to the origin's canonical chain.
    Connected(Block),
    /// The origin retracted its current tip.
    Disconnected(Block),
}

impl ChainEvent {
    pub fn block(&self) -> &Block {
        match self {
            Self::Connected(block) | Self::Disconnected(block) => block,
        }
    }
}

/// Outcome of a transaction broadcast.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BroadcastResult {
    pub accepted: bool,
    pub hash: Hash256,
}

/// Status fields reported by the origin node.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NodeStatus {
    /// Node health string, e.g. "started".
    pub status: String,
    /// Software version of the origin node.
    pub version: String,
    /// Network the origin is attached to.
    pub network_id: u64,
    /// The origin's chain head.
    pub head: BlockId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(sequence: u64, hash: u8, prev: u8) -> Block {
        Block::new(sequence, Hash256([hash; 32]), Hash256([prev; 32]), 1_000, vec![], 0)
    }

    #[test]
    fn hash_display_and_parse() {
        let hash = Hash256([0xAB; 32]);
        let text = hash.to_string();
        assert_eq!(text, "ab".repeat(32));
        assert_eq!(text.parse::<Hash256>().unwrap(), hash);
    }

    #[test]
    fn hash_parse_rejects_bad_input() {
        assert!("abcd".parse::<Hash256>().is_err());
        assert!("zz".repeat(32).parse::<Hash256>().is_err());
    }

    #[test]
    fn hash_from_slice_checks_length() {
        assert!(Hash256::from_slice(&[1u8; 31]).is_err());
        assert_eq!(Hash256::from_slice(&[1u8; 32]).unwrap(), Hash256([1; 32]));
    }

    #[test]
    fn extends_checks_hash_and_sequence() {
        let parent = block(1, 1, 0);
        let child = block(2, 2, 1);
        let orphan = block(3, 3, 1);
        assert!(child.extends(&parent));
        assert!(!orphan.extends(&parent));
    }

    #[test]
    fn selector_prefers_hash() {
        let hash = Hash256([7; 32]);
        assert_eq!(
            BlockSelector::from_parts(Some(hash), Some(9)).unwrap(),
            BlockSelector::Hash(hash)
        );
        assert_eq!(
            BlockSelector::from_parts(None, Some(9)).unwrap(),
            BlockSelector::Sequence(9)
        );
    }

    #[test]
    fn selector_requires_one_field() {
        let err = BlockSelector::from_parts(None, None).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn range_is_inclusive() {
        let range = BlockRange::new(3, 5).unwrap();
        assert_eq!(range.len(), 3);
        assert!(range.contains(3) && range.contains(5));
        assert!(!range.contains(6));
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert!(BlockRange::new(5, 4).is_none());
    }

    #[test]
    fn full_width_range_len_saturates() {
        assert_eq!(BlockRange::new(0, u64::MAX).unwrap().len(), u64::MAX);
        assert_eq!(BlockRange::new(1, u64::MAX).unwrap().len(), u64::MAX);
        assert_eq!(BlockRange::new(7, 7).unwrap().len(), 1);
    }

    #[test]
    fn output_count_sums_transactions() {
        let mut b = block(1, 1, 0);
        b.transactions = vec![
            Transaction {
                index: 0,
                hash: Hash256([9; 32]),
                spends: vec![],
                outputs: vec![Output { note: vec![1] }, Output { note: vec![2] }],
            },
            Transaction {
                index: 1,
                hash: Hash256([8; 32]),
                spends: vec![Spend { nullifier: vec![3] }],
                outputs: vec![Output { note: vec![4] }],
            },
        ];
        assert_eq!(b.output_count(), 3);
    }
}
