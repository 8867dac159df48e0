//! Node composition.
//!
//! [`Node`] opens the block cache, builds the origin client and blob store
//! from [`NodeConfig`], and owns the shared pieces the background loops and
//! the query surfaces run on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use lumen_core::error::LumenError;
use lumen_core::traits::{BlobStore, Origin};

use crate::cache::ChainCache;
use crate::config::{BlobStoreConfig, NodeConfig};
use crate::follower::ChainFollower;
use crate::origin::HttpOrigin;
use crate::publisher::blob::{FsBlobStore, MemoryBlobStore, S3BlobStore};
use crate::publisher::ChunkPublisher;
use crate::query::QueryService;
use crate::supervisor::HealthRegistry;

/// A running Lumen node.
pub struct Node {
    config: NodeConfig,
    cache: Arc<ChainCache>,
    origin: Arc<dyn Origin>,
    store: Arc<dyn BlobStore>,
    health: Arc<HealthRegistry>,
    query: QueryService,
}

impl Node {
    /// Validate `config` and build the node with an HTTP origin and the
    /// configured blob store.
    pub fn new(config: NodeConfig) -> Result<Self, LumenError> {
        config.validate()?;
        let origin = HttpOrigin::new(
            &config.origin.base_url(),
            config.origin.auth_token.clone(),
            config.origin.request_timeout(),
        )?;
        let store = build_blob_store(&config)?;
        Self::with_parts(config, Arc::new(origin), store)
    }

    /// Build the node around an existing origin and blob store.
    pub fn with_parts(
        config: NodeConfig,
        origin: Arc<dyn Origin>,
        store: Arc<dyn BlobStore>,
    ) -> Result<Self, LumenError> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| LumenError::Storage(format!("create {}: {e}", config.data_dir.display())))?;
        let cache = Arc::new(ChainCache::open(config.db_path(), config.finality_depth)?);
        let health = Arc::new(HealthRegistry::new());
        let query = QueryService::new(
            cache.clone(),
            origin.clone(),
            health.clone(),
            config.vendor.clone(),
        )
        .with_max_range_blocks(config.max_range_blocks);

        info!(
            db = %config.db_path().display(),
            head_sequence = cache.head_sequence()?,
            finality_depth = config.finality_depth,
            "block cache opened"
        );

        Ok(Self {
            config,
            cache,
            origin,
            store,
            health,
            query,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ChainCache> {
        &self.cache
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Query service shared by the RPC and HTTP surfaces.
    pub fn query(&self) -> QueryService {
        self.query.clone()
    }

    /// Start the enabled background loops under supervision.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.config.follower.enabled {
            let follower = Arc::new(ChainFollower::new(
                self.cache.clone(),
                self.origin.clone(),
                self.health.clone(),
                self.config.follower.progress_interval,
            ));
            let retry = Duration::from_secs(self.config.follower.retry_interval_secs);
            handles.push(follower.spawn(retry));
            info!("chain follower started");
        }

        if self.config.publisher.enabled {
            let settings = &self.config.publisher;
            let publisher = Arc::new(ChunkPublisher::new(
                self.cache.clone(),
                self.store.clone(),
                self.health.clone(),
                settings.publisher_config(),
            ));
            handles.push(publisher.spawn(Duration::from_secs(settings.retry_interval_secs)));
            info!(
                chunk_size_bytes = settings.chunk_size_bytes,
                max_lag_secs = settings.max_lag_secs,
                "chunk publisher started"
            );
        }

        handles
    }

    /// Flush the cache to disk.
    pub fn shutdown(&self) -> Result<(), LumenError> {
        self.cache.flush()
    }
}

/// Build the configured blob store.
pub fn build_blob_store(config: &NodeConfig) -> Result<Arc<dyn BlobStore>, LumenError> {
    let store: Arc<dyn BlobStore> = match &config.publisher.blob_store {
        BlobStoreConfig::Fs { .. } => Arc::new(FsBlobStore::new(config.chunk_dir())),
        BlobStoreConfig::S3 {
            endpoint,
            bucket,
            region,
            access_key_id,
            secret_access_key,
        } => Arc::new(S3BlobStore::new(
            endpoint,
            bucket,
            region,
            access_key_id,
            secret_access_key,
            config.origin.request_timeout(),
        )?),
        BlobStoreConfig::Memory => Arc::new(MemoryBlobStore::new()),
    };
    Ok(store)
}
