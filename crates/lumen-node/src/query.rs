//! Cache-first block queries shared by the JSON-RPC and HTTP surfaces.
//!
//! Reads go to the [`ChainCache`] first and fall back to the origin on a
//! miss. Nothing here writes to the cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use lumen_core::constants::{DEFAULT_MAX_RANGE_BLOCKS, SERVER_INFO_VERSION};
use lumen_core::error::{LumenError, QueryError};
use lumen_core::traits::Origin;
use lumen_core::types::{Block, BlockId, BlockRange, BlockSelector, BroadcastResult, Hash256};

use crate::cache::ChainCache;
use crate::supervisor::{ComponentHealth, HealthRegistry};

/// Server identity and origin status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub version: String,
    pub vendor: String,
    pub network_id: u64,
    pub node_version: String,
    pub node_status: String,
    pub block_height: u64,
    pub block_hash: String,
}

/// Health report for `getHealth` and `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub head_sequence: u64,
    pub finalized_sequence: Option<u64>,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Clone)]
pub struct QueryService {
    cache: Arc<ChainCache>,
    origin: Arc<dyn Origin>,
    health: Arc<HealthRegistry>,
    vendor: String,
    max_range_blocks: u64,
}

impl QueryService {
    pub fn new(
        cache: Arc<ChainCache>,
        origin: Arc<dyn Origin>,
        health: Arc<HealthRegistry>,
        vendor: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            origin,
            health,
            vendor: vendor.into(),
            max_range_blocks: DEFAULT_MAX_RANGE_BLOCKS,
        }
    }

    /// Cap the span of buffered range requests.
    pub fn with_max_range_blocks(mut self, max_range_blocks: u64) -> Self {
        self.max_range_blocks = max_range_blocks;
        self
    }

    /// The origin's live chain head.
    pub async fn latest_block(&self) -> Result<BlockId, LumenError> {
        Ok(self.origin.chain_head().await?)
    }

    /// Look up one block by hash or sequence. Hash wins if both are given.
    pub async fn get_block(
        &self,
        hash: Option<Hash256>,
        sequence: Option<u64>,
    ) -> Result<Block, LumenError> {
        let selector = BlockSelector::from_parts(hash, sequence)?;
        self.resolve(selector).await
    }

    /// Cache, then origin. `NotFound` if neither has the block.
    pub async fn resolve(&self, selector: BlockSelector) -> Result<Block, LumenError> {
        let cached = match selector {
            BlockSelector::Hash(hash) => self.cache.get_block_by_hash(&hash)?,
            BlockSelector::Sequence(seq) => self.cache.get_block_by_sequence(seq)?,
        };
        if let Some(block) = cached {
            return Ok(block);
        }

        debug!(%selector, "cache miss, asking origin");
        self.origin
            .get_block(selector)
            .await?
            .ok_or_else(|| QueryError::NotFound(format!("block with {selector}")).into())
    }

    /// Check a requested range. Sequences start at 1 and `end` must be
    /// strictly greater than `start`.
    pub fn validate_range(start: u64, end: u64) -> Result<BlockRange, QueryError> {
        if start == 0 {
            return Err(QueryError::InvalidArgument("start sequence must be at least 1".into()));
        }
        if end <= start {
            return Err(QueryError::InvalidArgument(
                "end sequence must be greater than start sequence".into(),
            ));
        }
        BlockRange::new(start, end)
            .ok_or_else(|| QueryError::InvalidArgument(format!("invalid range {start}..={end}")))
    }

    /// Resolve every sequence of `range` in order.
    ///
    /// The stream ends after the first failure, including a sequence that
    /// neither the cache nor the origin has.
    pub fn block_range(&self, range: BlockRange) -> BoxStream<'static, Result<Block, LumenError>> {
        let service = self.clone();
        stream::iter(range.iter())
            .then(move |seq| {
                let service = service.clone();
                async move { service.resolve(BlockSelector::Sequence(seq)).await }
            })
            .scan(false, |failed, item| {
                if *failed {
                    return futures::future::ready(None);
                }
                *failed = item.is_err();
                futures::future::ready(Some(item))
            })
            .boxed()
    }

    /// Buffered variant of [`block_range`](Self::block_range): sequences
    /// that resolve nowhere are skipped, other failures abort. `NotFound`
    /// if nothing in the range resolves. Ranges longer than the configured
    /// maximum are rejected up front.
    pub async fn collect_range(&self, range: BlockRange) -> Result<Vec<Block>, LumenError> {
        if range.len() > self.max_range_blocks {
            return Err(QueryError::InvalidArgument(format!(
                "range {range} spans more than {} blocks",
                self.max_range_blocks
            ))
            .into());
        }
        let mut blocks = Vec::with_capacity(range.len().min(1024) as usize);
        for seq in range.iter() {
            match self.resolve(BlockSelector::Sequence(seq)).await {
                Ok(block) => blocks.push(block),
                Err(LumenError::Query(QueryError::NotFound(_))) => {
                    debug!(sequence = seq, "skipping unresolved sequence");
                }
                Err(e) => return Err(e),
            }
        }
        if blocks.is_empty() {
            return Err(QueryError::NotFound(format!("no blocks in range {range}")).into());
        }
        Ok(blocks)
    }

    /// Forward a serialized transaction to the origin.
    pub async fn broadcast_transaction(&self, payload: &[u8]) -> Result<BroadcastResult, LumenError> {
        if payload.is_empty() {
            return Err(QueryError::InvalidArgument("transaction payload is empty".into()).into());
        }
        Ok(self.origin.broadcast_transaction(payload).await?)
    }

    pub async fn server_info(&self) -> Result<ServerInfo, LumenError> {
        let status = self.origin.node_status().await?;
        Ok(ServerInfo {
            version: SERVER_INFO_VERSION.to_string(),
            vendor: self.vendor.clone(),
            network_id: status.network_id,
            node_version: status.version,
            node_status: status.status,
            block_height: status.head.sequence,
            block_hash: status.head.hash.to_string(),
        })
    }

    pub fn health(&self) -> Result<HealthReport, LumenError> {
        let head_sequence = self.cache.head_sequence()?;
        let finalized_sequence = self
            .cache
            .is_final(1)?
            .then(|| self.cache.finalized_sequence())
            .transpose()?;
        Ok(HealthReport {
            head_sequence,
            finalized_sequence,
            components: self.health.snapshot(),
        })
    }
}
