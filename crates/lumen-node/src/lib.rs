//! # lumen-node: block cache, ingestion, publishing and query surfaces.
//!
//! Composes the Lumen components into a running service:
//! - [`cache::ChainCache`]: RocksDB-backed block cache with head and finality pointers
//! - [`follower::ChainFollower`]: mirrors the origin's event stream into the cache
//! - [`publisher::ChunkPublisher`]: packs finalized blocks into gzip chunks plus a manifest
//! - [`query::QueryService`]: cache-first lookups shared by [`rpc`] and [`http`]
//! - [`origin::HttpOrigin`]: client for the origin node's HTTP RPC
//! - [`supervisor`]: restart policy and health registry for background loops
//! - [`config::NodeConfig`]: layered configuration
//! - [`node::Node`]: composition root

pub mod cache;
pub mod config;
pub mod follower;
pub mod http;
pub mod node;
pub mod origin;
pub mod publisher;
pub mod query;
pub mod rpc;
pub mod supervisor;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::ChainCache;
pub use config::NodeConfig;
pub use node::Node;
pub use rpc::start_rpc_server;
