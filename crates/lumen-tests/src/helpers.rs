//! Shared helpers for the end-to-end tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lumen_core::types::Block;
use lumen_node_lib::config::{BlobStoreConfig, NodeConfig};
use lumen_node_lib::node::Node;
use lumen_node_lib::publisher::blob::MemoryBlobStore;
use lumen_node_lib::testing::MockOrigin;

/// A node over a mock origin and an in-memory blob store.
pub struct TestNode {
    pub node: Node,
    pub origin: Arc<MockOrigin>,
    pub store: Arc<MemoryBlobStore>,
    pub dir: tempfile::TempDir,
}

/// Config tuned for fast tests: no retry delays, tiny chunks.
pub fn fast_config(data_dir: &std::path::Path, finality_depth: u64) -> NodeConfig {
    let mut config = NodeConfig {
        data_dir: data_dir.to_path_buf(),
        finality_depth,
        vendor: "Lumen Test".to_string(),
        ..NodeConfig::default()
    };
    config.follower.retry_interval_secs = 0;
    config.publisher.chunk_size_bytes = 1;
    config.publisher.poll_interval_secs = 0;
    config.publisher.retry_interval_secs = 0;
    config.publisher.blob_store = BlobStoreConfig::Memory;
    config
}

/// Build a node whose origin serves `chain`. `configure` adjusts the config.
pub fn test_node(chain: Vec<Block>, configure: impl FnOnce(&mut NodeConfig)) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(dir.path(), 2);
    configure(&mut config);
    let origin = Arc::new(MockOrigin::new(chain));
    let store = Arc::new(MemoryBlobStore::new());
    let node = Node::with_parts(config, origin.clone(), store.clone()).unwrap();
    TestNode { node, origin, store, dir }
}

/// Poll `check` every 5ms until it returns true or two seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
