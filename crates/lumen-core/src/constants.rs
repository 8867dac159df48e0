//! Protocol and operational defaults.

/// Version tag carried by every serialized [`Block`](crate::types::Block).
pub const BLOCK_PROTO_VERSION: u32 = 1;

/// Version tag of the published chunk manifest document.
pub const MANIFEST_VERSION: u32 = 1;

/// Fixed blob-store key of the chunk manifest.
pub const MANIFEST_KEY: &str = "manifest.json";

/// Width of the big-endian length prefix in front of every block in a chunk blob.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Number of trailing blocks still considered reversible.
pub const DEFAULT_FINALITY_DEPTH: u64 = 100;

/// The follower logs a progress line every this many connected blocks.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1_000;

/// Seconds the follower sleeps before restarting after a failure.
pub const DEFAULT_FOLLOW_RETRY_SECS: u64 = 5;

/// Uncompressed blob size at which a chunk is finalized (8 MiB).
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 8 * 1024 * 1024;

/// Seconds an open chunk may lag behind the cache before it is published unfinalized.
pub const DEFAULT_MAX_LAG_SECS: u64 = 3_600;

/// Seconds between polls while the publisher waits for new finalized blocks.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Seconds the publisher waits before retrying a failed cycle.
pub const DEFAULT_PUBLISH_RETRY_SECS: u64 = 30;

/// Most blocks one buffered range request may ask for.
pub const DEFAULT_MAX_RANGE_BLOCKS: u64 = 1_000;

/// Default JSON-RPC listen port.
pub const DEFAULT_RPC_PORT: u16 = 50_051;

/// Default HTTP API listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8_080;

/// Default port of the origin node's HTTP RPC adapter.
pub const DEFAULT_ORIGIN_PORT: u16 = 8_021;

/// Protocol version reported by `getServerInfo`.
pub const SERVER_INFO_VERSION: u32 = 0;
