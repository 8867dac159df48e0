//! Node configuration for Lumen.
//!
//! [`NodeConfig::load`] layers compiled defaults, an optional TOML file and
//! `LUMEN_*` environment variables (`__` separates nested keys, e.g.
//! `LUMEN_ORIGIN__HOST`). The binary applies CLI flags on top.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use lumen_core::constants::{
    DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_FINALITY_DEPTH, DEFAULT_FOLLOW_RETRY_SECS, DEFAULT_HTTP_PORT,
    DEFAULT_MAX_LAG_SECS, DEFAULT_MAX_RANGE_BLOCKS, DEFAULT_ORIGIN_PORT, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_PROGRESS_INTERVAL, DEFAULT_PUBLISH_RETRY_SECS, DEFAULT_RPC_PORT,
};
use lumen_core::error::LumenError;

use crate::publisher::PublisherConfig;

/// Connection settings for the origin node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    pub host: String,
    pub port: u16,
    /// Sent verbatim in the `authorization` header.
    pub auth_token: Option<String>,
    pub use_tls: bool,
    pub request_timeout_secs: u64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_ORIGIN_PORT,
            auth_token: None,
            use_tls: false,
            request_timeout_secs: 30,
        }
    }
}

impl OriginConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowerConfig {
    pub enabled: bool,
    pub retry_interval_secs: u64,
    /// Log a progress line every this many connected blocks.
    pub progress_interval: u64,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_interval_secs: DEFAULT_FOLLOW_RETRY_SECS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Where published chunks go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BlobStoreConfig {
    /// A local directory; defaults to `{data_dir}/chunks`.
    Fs {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// A bucket on an S3-compatible object store, addressed path-style.
    S3 {
        #[serde(default)]
        endpoint: String,
        #[serde(default)]
        bucket: String,
        /// Signing region. R2 and most S3-compatible stores accept "auto".
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        access_key_id: String,
        #[serde(default)]
        secret_access_key: String,
    },
    /// Keep everything in memory (dry runs).
    Memory,
}

fn default_region() -> String {
    "auto".to_string()
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self::Fs { path: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    pub enabled: bool,
    pub chunk_size_bytes: u64,
    pub max_lag_secs: u64,
    pub poll_interval_secs: u64,
    pub retry_interval_secs: u64,
    pub blob_store: BlobStoreConfig,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            max_lag_secs: DEFAULT_MAX_LAG_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            retry_interval_secs: DEFAULT_PUBLISH_RETRY_SECS,
            blob_store: BlobStoreConfig::default(),
        }
    }
}

impl PublisherSettings {
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            chunk_size_bytes: self.chunk_size_bytes,
            max_lag: Duration::from_secs(self.max_lag_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

/// Configuration for a Lumen node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Blocks behind the head before a block counts as final.
    pub finality_depth: u64,
    pub rpc_bind: String,
    pub rpc_port: u16,
    pub http_bind: String,
    pub http_port: u16,
    /// Reported by `getServerInfo`.
    pub vendor: String,
    /// Most blocks a buffered `/block-range` request may span.
    pub max_range_blocks: u64,
    pub origin: OriginConfig,
    pub follower: FollowerConfig,
    pub publisher: PublisherSettings,
    /// Log level filter string (e.g. "info", "lumen_node_lib=debug").
    pub log_level: String,
    /// Log output format ("text" or "json").
    pub log_format: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lumen");

        Self {
            data_dir,
            finality_depth: DEFAULT_FINALITY_DEPTH,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            http_bind: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            vendor: "Lumen".to_string(),
            max_range_blocks: DEFAULT_MAX_RANGE_BLOCKS,
            origin: OriginConfig::default(),
            follower: FollowerConfig::default(),
            publisher: PublisherSettings::default(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl NodeConfig {
    /// Defaults, then `path` (if given and present), then `LUMEN_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, LumenError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("LUMEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LumenError::Config(e.to_string()))?;
        config
            .try_deserialize()
            .map_err(|e| LumenError::Config(e.to_string()))
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> Result<(), LumenError> {
        if self.finality_depth == 0 {
            return Err(LumenError::Config("finality_depth must be at least 1".into()));
        }
        if self.max_range_blocks == 0 {
            return Err(LumenError::Config("max_range_blocks must be at least 1".into()));
        }
        if !self.publisher.enabled {
            return Ok(());
        }
        if self.publisher.chunk_size_bytes == 0 {
            return Err(LumenError::Config("publisher.chunk_size_bytes must be at least 1".into()));
        }
        if let BlobStoreConfig::S3 {
            endpoint,
            bucket,
            access_key_id,
            secret_access_key,
            ..
        } = &self.publisher.blob_store
        {
            let missing: Vec<&str> = [
                ("endpoint", endpoint),
                ("bucket", bucket),
                ("access_key_id", access_key_id),
                ("secret_access_key", secret_access_key),
            ]
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name)
            .collect();
            if !missing.is_empty() {
                return Err(LumenError::Config(format!(
                    "s3 blob store is missing: {}",
                    missing.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Path to the RocksDB block cache.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaincache")
    }

    /// Directory for the filesystem blob store.
    pub fn chunk_dir(&self) -> PathBuf {
        match &self.publisher.blob_store {
            BlobStoreConfig::Fs { path: Some(path) } => path.clone(),
            _ => self.data_dir.join("chunks"),
        }
    }

    pub fn rpc_addr(&self) -> Result<SocketAddr, LumenError> {
        parse_addr(&self.rpc_bind, self.rpc_port)
    }

    pub fn http_addr(&self) -> Result<SocketAddr, LumenError> {
        parse_addr(&self.http_bind, self.http_port)
    }
}

fn parse_addr(bind: &str, port: u16) -> Result<SocketAddr, LumenError> {
    format!("{bind}:{port}")
        .parse()
        .map_err(|e| LumenError::Config(format!("invalid bind address {bind}:{port}: {e}")))
}
