//! JSON-RPC server for Lumen.
//!
//! Uses jsonrpsee 0.24 to expose block lookups, a streaming block-range
//! subscription, transaction broadcast and server status over HTTP and
//! WebSocket.

use std::net::SocketAddr;

use futures::StreamExt;
use jsonrpsee::core::{async_trait, SubscriptionResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::error::{INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::{PendingSubscriptionSink, SubscriptionMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lumen_core::error::{LumenError, QueryError};
use lumen_core::types::{Block, BlockId, BroadcastResult, Hash256, Transaction};

use crate::query::{HealthReport, QueryService, ServerInfo};

/// Application error code for lookups that resolve nowhere.
pub const NOT_FOUND_CODE: i32 = -32001;

/// JSON representation of a transaction. Byte fields are hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionJson {
    pub index: u32,
    pub hash: String,
    /// Spend nullifiers.
    pub spends: Vec<String>,
    /// Serialized output notes.
    pub outputs: Vec<String>,
}

/// JSON representation of a block. Byte fields are hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockJson {
    pub proto_version: u32,
    pub sequence: u64,
    pub hash: String,
    pub previous_hash: String,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub transactions: Vec<TransactionJson>,
    pub cumulative_note_count: u64,
}

impl From<&Transaction> for TransactionJson {
    fn from(tx: &Transaction) -> Self {
        Self {
            index: tx.index,
            hash: tx.hash.to_string(),
            spends: tx.spends.iter().map(|s| hex::encode(&s.nullifier)).collect(),
            outputs: tx.outputs.iter().map(|o| hex::encode(&o.note)).collect(),
        }
    }
}

impl From<&Block> for BlockJson {
    fn from(block: &Block) -> Self {
        Self {
            proto_version: block.proto_version,
            sequence: block.sequence,
            hash: block.hash.to_string(),
            previous_hash: block.previous_hash.to_string(),
            timestamp: block.timestamp,
            transactions: block.transactions.iter().map(TransactionJson::from).collect(),
            cumulative_note_count: block.cumulative_note_count,
        }
    }
}

/// JSON representation of a `(sequence, hash)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIdJson {
    pub sequence: u64,
    pub hash: String,
}

impl From<BlockId> for BlockIdJson {
    fn from(id: BlockId) -> Self {
        Self {
            sequence: id.sequence,
            hash: id.hash.to_string(),
        }
    }
}

/// JSON representation of a broadcast outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastJson {
    pub accepted: bool,
    pub hash: String,
}

impl From<BroadcastResult> for BroadcastJson {
    fn from(result: BroadcastResult) -> Self {
        Self {
            accepted: result.accepted,
            hash: result.hash.to_string(),
        }
    }
}

/// Block lookup parameters. Hash wins when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockQuery {
    pub hash: Option<String>,
    pub sequence: Option<u64>,
}

impl BlockQuery {
    /// Decode the hash field, if present.
    pub fn parsed_hash(&self) -> Result<Option<Hash256>, QueryError> {
        self.hash
            .as_deref()
            .map(|h| {
                h.parse::<Hash256>()
                    .map_err(|e| QueryError::InvalidArgument(e.to_string()))
            })
            .transpose()
    }
}

/// Create a JSON-RPC error.
fn rpc_error(code: i32, msg: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.into(), None::<()>)
}

/// Map a service error onto a JSON-RPC error object.
pub fn to_rpc_error(err: LumenError) -> ErrorObjectOwned {
    match err {
        LumenError::Query(QueryError::InvalidArgument(msg)) => rpc_error(INVALID_PARAMS_CODE, msg),
        LumenError::Query(QueryError::NotFound(msg)) => rpc_error(NOT_FOUND_CODE, msg),
        other => rpc_error(INTERNAL_ERROR_CODE, other.to_string()),
    }
}

fn query_error(err: QueryError) -> ErrorObjectOwned {
    to_rpc_error(err.into())
}

/// The Lumen JSON-RPC interface.
#[rpc(server)]
pub trait LumenRpc {
    /// Returns the origin's chain head.
    #[method(name = "getLatestBlock")]
    async fn get_latest_block(&self) -> Result<BlockIdJson, ErrorObjectOwned>;

    /// Returns one block by hash or sequence.
    #[method(name = "getBlock")]
    async fn get_block(&self, query: BlockQuery) -> Result<BlockJson, ErrorObjectOwned>;

    /// Streams every block in `[start, end]`, then closes.
    #[subscription(name = "subscribeBlockRange" => "blockRange", unsubscribe = "unsubscribeBlockRange", item = BlockJson)]
    async fn subscribe_block_range(&self, start: u64, end: u64) -> SubscriptionResult;

    /// Broadcasts a hex-encoded serialized transaction.
    #[method(name = "sendTransaction")]
    async fn send_transaction(&self, hex_data: String) -> Result<BroadcastJson, ErrorObjectOwned>;

    /// Returns server identity and origin status.
    #[method(name = "getServerInfo")]
    async fn get_server_info(&self) -> Result<ServerInfo, ErrorObjectOwned>;

    /// Returns background task health.
    #[method(name = "getHealth")]
    async fn get_health(&self) -> Result<HealthReport, ErrorObjectOwned>;
}

/// Implementation of the Lumen JSON-RPC server.
pub struct RpcServerImpl {
    query: QueryService,
}

impl RpcServerImpl {
    pub fn new(query: QueryService) -> Self {
        Self { query }
    }
}

#[async_trait]
impl LumenRpcServer for RpcServerImpl {
    async fn get_latest_block(&self) -> Result<BlockIdJson, ErrorObjectOwned> {
        let id = self.query.latest_block().await.map_err(to_rpc_error)?;
        Ok(id.into())
    }

    async fn get_block(&self, query: BlockQuery) -> Result<BlockJson, ErrorObjectOwned> {
        let hash = query.parsed_hash().map_err(query_error)?;
        let block = self
            .query
            .get_block(hash, query.sequence)
            .await
            .map_err(to_rpc_error)?;
        Ok(BlockJson::from(&block))
    }

    async fn subscribe_block_range(
        &self,
        pending: PendingSubscriptionSink,
        start: u64,
        end: u64,
    ) -> SubscriptionResult {
        let range = match QueryService::validate_range(start, end) {
            Ok(range) => range,
            Err(e) => {
                pending.reject(query_error(e)).await;
                return Ok(());
            }
        };

        let sink = pending.accept().await?;
        debug!(%range, "streaming block range");
        let mut blocks = self.query.block_range(range);
        while let Some(item) = blocks.next().await {
            let block = item.map_err(|e| e.to_string())?;
            let msg = SubscriptionMessage::from_json(&BlockJson::from(&block))?;
            if sink.send(msg).await.is_err() {
                // Client went away.
                return Ok(());
            }
        }
        Ok(())
    }

    async fn send_transaction(&self, hex_data: String) -> Result<BroadcastJson, ErrorObjectOwned> {
        let raw = hex::decode(hex_data.trim())
            .map_err(|_| rpc_error(INVALID_PARAMS_CODE, "invalid hex encoding"))?;
        let result = self
            .query
            .broadcast_transaction(&raw)
            .await
            .map_err(to_rpc_error)?;
        Ok(result.into())
    }

    async fn get_server_info(&self) -> Result<ServerInfo, ErrorObjectOwned> {
        self.query.server_info().await.map_err(to_rpc_error)
    }

    async fn get_health(&self) -> Result<HealthReport, ErrorObjectOwned> {
        self.query.health().map_err(to_rpc_error)
    }
}

/// Start the JSON-RPC server on the given address.
///
/// Returns the bound address and a [`ServerHandle`] that stops the server.
pub async fn start_rpc_server(
    addr: SocketAddr,
    query: QueryService,
) -> Result<(SocketAddr, ServerHandle), LumenError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| LumenError::Config(format!("RPC server error: {e}")))?;
    let local_addr = server
        .local_addr()
        .map_err(|e| LumenError::Config(format!("RPC server error: {e}")))?;

    let rpc_impl = RpcServerImpl::new(query);
    let handle = server.start(rpc_impl.into_rpc());
    info!(%local_addr, "JSON-RPC server listening");

    Ok((local_addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use jsonrpsee::core::client::{ClientT, SubscriptionClientT};
    use jsonrpsee::rpc_params;
    use jsonrpsee::ws_client::WsClientBuilder;

    use crate::cache::ChainCache;
    use crate::supervisor::HealthRegistry;
    use crate::testing::{make_chain, MockOrigin};

    fn service(origin: Arc<MockOrigin>) -> (QueryService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ChainCache::open(dir.path().join("chaincache"), 2).unwrap());
        let query = QueryService::new(cache, origin, Arc::new(HealthRegistry::new()), "Lumen Labs");
        (query, dir)
    }

    // ------------------------------------------------------------------------
    // JSON shapes and error mapping
    // ------------------------------------------------------------------------

    #[test]
    fn block_json_uses_hex_and_camel_case() {
        let block = make_chain(1, 7).remove(0);
        let json = serde_json::to_value(BlockJson::from(&block)).unwrap();
        assert_eq!(json["sequence"], 1);
        assert_eq!(json["previousHash"], block.previous_hash.to_string());
        assert_eq!(json["cumulativeNoteCount"], block.cumulative_note_count);
        assert_eq!(json["transactions"][0]["index"], 0);
    }

    #[test]
    fn block_query_rejects_bad_hash() {
        let query = BlockQuery { hash: Some("xyz".into()), sequence: None };
        assert!(matches!(query.parsed_hash(), Err(QueryError::InvalidArgument(_))));
        let query = BlockQuery { hash: Some("ab".repeat(32)), sequence: None };
        assert_eq!(query.parsed_hash().unwrap(), Some(Hash256([0xAB; 32])));
    }

    #[test]
    fn errors_map_to_codes() {
        let invalid = to_rpc_error(QueryError::InvalidArgument("x".into()).into());
        assert_eq!(invalid.code(), INVALID_PARAMS_CODE);
        let missing = to_rpc_error(QueryError::NotFound("x".into()).into());
        assert_eq!(missing.code(), NOT_FOUND_CODE);
        let storage = to_rpc_error(LumenError::Storage("disk".into()));
        assert_eq!(storage.code(), INTERNAL_ERROR_CODE);
    }

    // ------------------------------------------------------------------------
    // Methods
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn get_block_without_selector_is_invalid_params() {
        let (query, _dir) = service(Arc::new(MockOrigin::new(make_chain(3, 1))));
        let rpc = RpcServerImpl::new(query);
        let err = LumenRpcServer::get_block(&rpc, BlockQuery::default()).await.unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS_CODE);
    }

    #[tokio::test]
    async fn get_block_falls_back_to_origin() {
        let chain = make_chain(3, 1);
        let (query, _dir) = service(Arc::new(MockOrigin::new(chain.clone())));
        let rpc = RpcServerImpl::new(query);
        let block = LumenRpcServer::get_block(&rpc, BlockQuery { hash: None, sequence: Some(2) })
            .await
            .unwrap();
        assert_eq!(block.hash, chain[1].hash.to_string());

        let err = LumenRpcServer::get_block(&rpc, BlockQuery { hash: None, sequence: Some(9) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), NOT_FOUND_CODE);
    }

    #[tokio::test]
    async fn send_transaction_decodes_hex() {
        let origin = Arc::new(MockOrigin::new(make_chain(1, 1)));
        let (query, _dir) = service(origin.clone());
        let rpc = RpcServerImpl::new(query);

        let sent = rpc.send_transaction("0a0b".into()).await.unwrap();
        assert!(sent.accepted);
        assert_eq!(origin.broadcasts(), vec![vec![0x0a, 0x0b]]);

        let err = rpc.send_transaction("zz".into()).await.unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS_CODE);
    }

    // ------------------------------------------------------------------------
    // Over the wire
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn block_range_subscription_streams_blocks() {
        let chain = make_chain(5, 1);
        let (query, _dir) = service(Arc::new(MockOrigin::new(chain.clone())));
        let (addr, handle) = start_rpc_server("127.0.0.1:0".parse().unwrap(), query)
            .await
            .unwrap();
        let client = WsClientBuilder::default()
            .build(format!("ws://{addr}"))
            .await
            .unwrap();

        let mut sub = client
            .subscribe::<BlockJson, _>("subscribeBlockRange", rpc_params![2, 4], "unsubscribeBlockRange")
            .await
            .unwrap();
        let mut sequences = Vec::new();
        for _ in 0..3 {
            sequences.push(sub.next().await.unwrap().unwrap().sequence);
        }
        assert_eq!(sequences, vec![2, 3, 4]);

        let rejected = client
            .subscribe::<BlockJson, _>("subscribeBlockRange", rpc_params![4, 4], "unsubscribeBlockRange")
            .await;
        assert!(rejected.is_err());

        let latest: BlockIdJson = client.request("getLatestBlock", rpc_params![]).await.unwrap();
        assert_eq!(latest.sequence, 5);

        handle.stop().unwrap();
    }
}
