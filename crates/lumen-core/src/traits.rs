//! Trait interfaces for Lumen's external collaborators.
//!
//! - [`Origin`]: the upstream chain node (lumen-node provides an HTTP client)
//! - [`BlobStore`]: where published chunks and the manifest live

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::{LumenError, OriginError};
use crate::types::{Block, BlockId, BlockSelector, BroadcastResult, ChainEvent, Hash256, NodeStatus};

/// Pull-based stream of follow events from the origin.
pub type EventStream = BoxStream<'static, Result<ChainEvent, OriginError>>;

/// The chain node whose canonical block stream is mirrored.
///
/// All payloads are normalized into the canonical [`Block`] before they leave
/// the implementation.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Open a live event stream resuming after `resume_from` (or from
    /// genesis when `None`).
    ///
    /// Fails with [`OriginError::UnknownHead`] when the origin no longer
    /// knows the resumption hash.
    async fn follow(&self, resume_from: Option<Hash256>) -> Result<EventStream, OriginError>;

    /// Look up one block. `Ok(None)` when the origin does not have it.
    async fn get_block(&self, selector: BlockSelector) -> Result<Option<Block>, OriginError>;

    /// The origin's live chain head.
    async fn chain_head(&self) -> Result<BlockId, OriginError>;

    /// Submit a serialized transaction for broadcast.
    async fn broadcast_transaction(&self, payload: &[u8]) -> Result<BroadcastResult, OriginError>;

    /// Node status fields.
    async fn node_status(&self) -> Result<NodeStatus, OriginError>;
}

/// Key/value object storage for published artifacts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object. `Ok(None)` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, LumenError>;

    /// Create or overwrite an object.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), LumenError>;

    /// Remove an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), LumenError>;
}
