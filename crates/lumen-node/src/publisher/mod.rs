//! Packs finalized cached blocks into gzip chunks and publishes them, with a
//! manifest, to a [`BlobStore`].
//!
//! A cycle resumes from the manifest, packs consecutive available blocks
//! until the chunk reaches the size threshold (finalized) or the lag
//! deadline passes with a non-empty chunk (open), uploads the blob and its
//! byte-range index, then rewrites the manifest.

pub mod blob;
pub mod chunk;
pub mod manifest;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lumen_core::constants::{
    DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_MAX_LAG_SECS, DEFAULT_POLL_INTERVAL_SECS, MANIFEST_KEY,
};
use lumen_core::error::LumenError;
use lumen_core::traits::BlobStore;
use lumen_core::types::Block;

use crate::cache::ChainCache;
use crate::supervisor::{spawn_supervised, HealthRegistry};
use chunk::{ChunkBuilder, PackedChunk};
use manifest::{ChunkEntry, Manifest};

/// Health registry key of the publisher.
pub const COMPONENT: &str = "publisher";

const GZIP_CONTENT_TYPE: &str = "application/gzip";
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Uncompressed blob size at which a chunk is finalized.
    pub chunk_size_bytes: u64,
    /// Publish an open chunk once this long has passed since the last publish.
    pub max_lag: Duration,
    /// Wait between availability checks.
    pub poll_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            max_lag: Duration::from_secs(DEFAULT_MAX_LAG_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

/// Background chunk publisher. Reads the cache, never writes it.
pub struct ChunkPublisher {
    cache: Arc<ChainCache>,
    store: Arc<dyn BlobStore>,
    health: Arc<HealthRegistry>,
    config: PublisherConfig,
    last_publish: Mutex<Instant>,
}

impl ChunkPublisher {
    pub fn new(
        cache: Arc<ChainCache>,
        store: Arc<dyn BlobStore>,
        health: Arc<HealthRegistry>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            cache,
            store,
            health,
            config,
            last_publish: Mutex::new(Instant::now()),
        }
    }

    /// Run publish cycles forever, retrying failed cycles after `retry_delay`.
    pub fn spawn(self: Arc<Self>, retry_delay: Duration) -> JoinHandle<()> {
        let health = self.health.clone();
        spawn_supervised(COMPONENT, health, retry_delay, move || {
            let publisher = self.clone();
            async move { publisher.run().await }
        })
    }

    /// Publish chunks until a cycle fails.
    pub async fn run(&self) -> Result<(), LumenError> {
        loop {
            self.publish_once().await?;
            // A zero lag republishes the open chunk back to back.
            tokio::task::yield_now().await;
        }
    }

    /// The published manifest, or an empty one if none exists yet.
    pub async fn load_manifest(&self) -> Result<Manifest, LumenError> {
        match self.store.get(MANIFEST_KEY).await? {
            Some(bytes) => Ok(Manifest::from_json(&bytes)?),
            None => Ok(Manifest::default()),
        }
    }

    /// One publish cycle. Returns the entry written to the manifest.
    pub async fn publish_once(&self) -> Result<ChunkEntry, LumenError> {
        let mut manifest = self.load_manifest().await?;
        let start = manifest.next_start();
        if let Some(open) = manifest.open_chunk() {
            debug!(start, end = open.range.end, "rebuilding open chunk");
        }

        let packed = self.create_chunk(start).await?;
        self.set_state("uploading");
        self.upload(&packed).await?;

        let entry = packed.entry.clone();
        let superseded = manifest.record(packed.entry)?;
        let json = manifest.to_json()?;
        self.store
            .put(MANIFEST_KEY, Bytes::from(json), JSON_CONTENT_TYPE)
            .await?;
        *self.last_publish.lock() = Instant::now();

        info!(
            start = entry.range.start,
            end = entry.range.end,
            finalized = entry.finalized,
            compressed = packed.blob_gz.len(),
            uncompressed = packed.raw_len,
            "published chunk"
        );

        if let Some(old) = superseded {
            self.remove_superseded(&old, &entry).await;
        }
        Ok(entry)
    }

    /// Pack blocks from `start` until the chunk is full, or until the lag
    /// deadline passes with at least one block packed.
    pub async fn create_chunk(&self, start: u64) -> Result<PackedChunk, LumenError> {
        self.set_state("packing");
        let mut builder = ChunkBuilder::new(start, self.config.chunk_size_bytes);

        loop {
            if builder.is_full() {
                return builder.finish(Utc::now(), true);
            }
            let sequence = builder.next_sequence();
            if let Some(block) = self.available_block(sequence)? {
                builder.push(&block)?;
                continue;
            }
            if !builder.is_empty() && self.lag_elapsed() {
                debug!(
                    start,
                    end = sequence - 1,
                    bytes = builder.blob_len(),
                    "lag deadline reached, closing open chunk"
                );
                return builder.finish(Utc::now(), false);
            }
            self.set_state("waiting");
            tokio::time::sleep(self.config.poll_interval).await;
            self.set_state("packing");
        }
    }

    /// The cached block at `sequence` if it is final.
    pub fn available_block(&self, sequence: u64) -> Result<Option<Block>, LumenError> {
        if !self.cache.is_final(sequence)? {
            return Ok(None);
        }
        self.cache.get_block_by_sequence(sequence)
    }

    fn lag_elapsed(&self) -> bool {
        self.last_publish.lock().elapsed() >= self.config.max_lag
    }

    async fn upload(&self, packed: &PackedChunk) -> Result<(), LumenError> {
        self.store
            .put(
                &packed.entry.blob_key,
                Bytes::from(packed.blob_gz.clone()),
                GZIP_CONTENT_TYPE,
            )
            .await?;
        self.store
            .put(
                &packed.entry.byte_range_index_key,
                Bytes::from(packed.index_gz.clone()),
                GZIP_CONTENT_TYPE,
            )
            .await
    }

    async fn remove_superseded(&self, old: &ChunkEntry, live: &ChunkEntry) {
        let live_keys = [&live.blob_key, &live.byte_range_index_key];
        for key in [&old.blob_key, &old.byte_range_index_key] {
            if live_keys.contains(&key) {
                continue;
            }
            if let Err(e) = self.store.delete(key).await {
                warn!(key = %key, error = %e, "failed to delete superseded object");
            }
        }
    }

    fn set_state(&self, state: &str) {
        self.health.set_state(COMPONENT, state);
    }
}
