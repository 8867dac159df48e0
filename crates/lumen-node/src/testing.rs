//! Test-only helpers: deterministic block fixtures and a scripted [`Origin`].

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use lumen_core::error::OriginError;
use lumen_core::traits::{EventStream, Origin};
use lumen_core::types::{
    Block, BlockId, BlockSelector, BroadcastResult, ChainEvent, Hash256, NodeStatus, Output,
    Spend, Transaction,
};

/// Deterministic hash for `(salt, sequence)`. Different salts give different forks.
pub fn block_hash(salt: u8, sequence: u64) -> Hash256 {
    let mut bytes = [salt; 32];
    bytes[24..].copy_from_slice(&sequence.to_be_bytes());
    Hash256(bytes)
}

/// A block with one transaction carrying one spend and one note.
pub fn make_block(sequence: u64, previous_hash: Hash256, salt: u8) -> Block {
    let hash = block_hash(salt, sequence);
    Block::new(
        sequence,
        hash,
        previous_hash,
        1_700_000_000_000 + sequence * 60_000,
        vec![Transaction {
            index: 0,
            hash: block_hash(salt ^ 0xFF, sequence),
            spends: vec![Spend { nullifier: sequence.to_be_bytes().to_vec() }],
            outputs: vec![Output { note: vec![salt; 16] }],
        }],
        sequence,
    )
}

/// A linked chain `1..=len` starting from the zero hash.
pub fn make_chain(len: u64, salt: u8) -> Vec<Block> {
    let mut chain: Vec<Block> = Vec::with_capacity(len as usize);
    for sequence in 1..=len {
        let prev = chain.last().map(|b| b.hash).unwrap_or(Hash256::ZERO);
        chain.push(make_block(sequence, prev, salt));
    }
    chain
}

/// `len` blocks extending `parent` with a different salt.
pub fn make_fork(parent: &Block, len: u64, salt: u8) -> Vec<Block> {
    let mut fork: Vec<Block> = Vec::with_capacity(len as usize);
    for offset in 1..=len {
        let prev = fork.last().map(|b| b.hash).unwrap_or(parent.hash);
        fork.push(make_block(parent.sequence + offset, prev, salt));
    }
    fork
}

#[derive(Default)]
struct MockState {
    canonical: Vec<Block>,
    pending: VecDeque<Result<ChainEvent, OriginError>>,
    follow_calls: Vec<Option<Hash256>>,
    broadcasts: Vec<Vec<u8>>,
    reject_reason: Option<String>,
    unavailable: bool,
}

/// In-memory origin driven by a canonical chain plus queued events.
///
/// `follow(None)` replays the whole canonical chain. `follow(Some(h))`
/// replays everything after `h` when `h` is canonical. A non-canonical `h`
/// is accepted only while scripted events are queued, in which case only
/// those events are delivered; otherwise it is an unknown head.
#[derive(Default)]
pub struct MockOrigin {
    state: Mutex<MockState>,
}

impl MockOrigin {
    pub fn new(chain: Vec<Block>) -> Self {
        let origin = Self::default();
        origin.set_chain(chain);
        origin
    }

    /// Replace the canonical chain.
    pub fn set_chain(&self, chain: Vec<Block>) {
        self.state.lock().canonical = chain;
    }

    /// Queue an event for the next follow stream.
    pub fn push_event(&self, event: ChainEvent) {
        self.state.lock().pending.push_back(Ok(event));
    }

    /// Queue a mid-stream failure for the next follow stream.
    pub fn push_error(&self, error: OriginError) {
        self.state.lock().pending.push_back(Err(error));
    }

    /// Make every call fail with [`OriginError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Reject subsequent broadcasts with `reason`.
    pub fn reject_broadcasts(&self, reason: &str) {
        self.state.lock().reject_reason = Some(reason.to_string());
    }

    /// Resumption points passed to `follow`, oldest first.
    pub fn follow_calls(&self) -> Vec<Option<Hash256>> {
        self.state.lock().follow_calls.clone()
    }

    /// Payloads passed to `broadcast_transaction`.
    pub fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.state.lock().broadcasts.clone()
    }

    fn check_available(state: &MockState) -> Result<(), OriginError> {
        if state.unavailable {
            return Err(OriginError::Unavailable("mock origin offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Origin for MockOrigin {
    async fn follow(&self, resume_from: Option<Hash256>) -> Result<EventStream, OriginError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        state.follow_calls.push(resume_from);

        let start = match resume_from {
            None => 0,
            Some(hash) => match state.canonical.iter().position(|b| b.hash == hash) {
                Some(index) => index + 1,
                None if !state.pending.is_empty() => state.canonical.len(),
                None => return Err(OriginError::UnknownHead(hash.to_string())),
            },
        };

        let mut events: Vec<Result<ChainEvent, OriginError>> = state.canonical[start..]
            .iter()
            .cloned()
            .map(|b| Ok(ChainEvent::Connected(b)))
            .collect();
        events.extend(state.pending.drain(..));
        Ok(stream::iter(events).boxed())
    }

    async fn get_block(&self, selector: BlockSelector) -> Result<Option<Block>, OriginError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        Ok(state
            .canonical
            .iter()
            .find(|b| match selector {
                BlockSelector::Hash(hash) => b.hash == hash,
                BlockSelector::Sequence(seq) => b.sequence == seq,
            })
            .cloned())
    }

    async fn chain_head(&self) -> Result<BlockId, OriginError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        state
            .canonical
            .last()
            .map(Block::id)
            .ok_or_else(|| OriginError::Unavailable("mock origin has no blocks".into()))
    }

    async fn broadcast_transaction(&self, payload: &[u8]) -> Result<BroadcastResult, OriginError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        state.broadcasts.push(payload.to_vec());
        if let Some(reason) = &state.reject_reason {
            return Err(OriginError::Rejected(reason.clone()));
        }
        Ok(BroadcastResult {
            accepted: true,
            hash: block_hash(0xFE, payload.len() as u64),
        })
    }

    async fn node_status(&self) -> Result<NodeStatus, OriginError> {
        let head = self.chain_head().await?;
        Ok(NodeStatus {
            status: "started".into(),
            version: "0.0.0-mock".into(),
            network_id: 0,
            head,
        })
    }
}
