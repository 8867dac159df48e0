//! [`Origin`] client for the chain node's HTTP RPC.
//!
//! Every call is `POST {base}/{namespace}/{method}` with a JSON body. Replies
//! may be wrapped in a `{"data": ...}` envelope; error replies carry
//! `{code, message}`. The follow stream is a long-lived response whose body
//! is a sequence of JSON frames separated by `\n` or `\x0c`.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use lumen_core::error::OriginError;
use lumen_core::traits::{EventStream, Origin};
use lumen_core::types::{
    Block, BlockId, BlockSelector, BroadcastResult, ChainEvent, Hash256, NodeStatus, Output, Spend,
    Transaction,
};

const FRAME_DELIMITERS: [u8; 2] = [b'\n', 0x0c];
const NOT_FOUND_CODE: &str = "not-found";

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    hash: String,
    sequence: u64,
    #[serde(alias = "previous")]
    previous_block_hash: String,
    timestamp: u64,
    note_size: Option<u64>,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    hash: String,
    #[serde(default)]
    notes: Vec<RpcNote>,
    #[serde(default)]
    spends: Vec<RpcSpend>,
}

#[derive(Debug, Deserialize)]
struct RpcNote {
    serialized: String,
}

#[derive(Debug, Deserialize)]
struct RpcSpend {
    nullifier: String,
}

#[derive(Debug, Deserialize)]
struct FollowFrame {
    #[serde(rename = "type")]
    kind: String,
    block: RpcBlock,
}

#[derive(Debug, Deserialize)]
struct BlockReply {
    block: RpcBlock,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainInfoReply {
    current_block_identifier: RpcBlockIdentifier,
}

#[derive(Debug, Deserialize)]
struct RpcBlockIdentifier {
    index: String,
    hash: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastReply {
    accepted: bool,
    hash: String,
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    node: RpcNodeInfo,
    blockchain: RpcChainInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcNodeInfo {
    status: String,
    version: String,
    network_id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcChainInfo {
    head: RpcHead,
}

#[derive(Debug, Deserialize)]
struct RpcHead {
    hash: String,
    sequence: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

fn malformed(e: impl ToString) -> OriginError {
    OriginError::Malformed(e.to_string())
}

fn parse_hash(hex_str: &str) -> Result<Hash256, OriginError> {
    hex_str.parse::<Hash256>().map_err(malformed)
}

fn parse_bytes(hex_str: &str) -> Result<Vec<u8>, OriginError> {
    hex::decode(hex_str).map_err(malformed)
}

impl TryFrom<RpcBlock> for Block {
    type Error = OriginError;

    fn try_from(rpc: RpcBlock) -> Result<Self, Self::Error> {
        let note_size = rpc
            .note_size
            .ok_or_else(|| malformed("block is missing noteSize"))?;

        let transactions = rpc
            .transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| -> Result<Transaction, OriginError> {
                Ok(Transaction {
                    index: u32::try_from(index).map_err(malformed)?,
                    hash: parse_hash(&tx.hash)?,
                    spends: tx
                        .spends
                        .iter()
                        .map(|s| Ok(Spend { nullifier: parse_bytes(&s.nullifier)? }))
                        .collect::<Result<Vec<Spend>, OriginError>>()?,
                    outputs: tx
                        .notes
                        .iter()
                        .map(|n| Ok(Output { note: parse_bytes(&n.serialized)? }))
                        .collect::<Result<Vec<Output>, OriginError>>()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Block::new(
            rpc.sequence,
            parse_hash(&rpc.hash)?,
            parse_hash(&rpc.previous_block_hash)?,
            rpc.timestamp,
            transactions,
            note_size,
        ))
    }
}

/// Strip a `{"data": ...}` envelope if present.
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn decode_reply<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, OriginError> {
    let value: Value = serde_json::from_slice(bytes).map_err(malformed)?;
    serde_json::from_value(unwrap_envelope(value)).map_err(malformed)
}

/// Parse one follow-stream frame. `Ok(None)` for blank frames and event
/// types the follower does not consume.
pub(crate) fn parse_follow_frame(frame: &[u8]) -> Result<Option<ChainEvent>, OriginError> {
    if frame.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value = unwrap_envelope(serde_json::from_slice(frame).map_err(malformed)?);
    if value.get("code").is_some() && value.get("block").is_none() {
        let body: ErrorBody = serde_json::from_value(value).map_err(malformed)?;
        return Err(OriginError::Unavailable(
            body.message.or(body.code).unwrap_or_default(),
        ));
    }

    let frame: FollowFrame = serde_json::from_value(value).map_err(malformed)?;
    match frame.kind.as_str() {
        "connected" => Ok(Some(ChainEvent::Connected(frame.block.try_into()?))),
        "disconnected" => Ok(Some(ChainEvent::Disconnected(frame.block.try_into()?))),
        "fork" => Ok(None),
        other => Err(malformed(format!("unknown follow event type {other:?}"))),
    }
}

// ── Request errors ────────────────────────────────────────────────────────────

/// A failed call, with "not found" kept apart so each method can give it
/// its own meaning.
enum CallError {
    NotFound(String),
    Origin(OriginError),
}

impl From<CallError> for OriginError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::NotFound(msg) => OriginError::Rejected(msg),
            CallError::Origin(e) => e,
        }
    }
}

async fn error_from_response(resp: Response) -> CallError {
    let status = resp.status();
    let body = resp.bytes().await.unwrap_or_default();
    let parsed: Option<ErrorBody> = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| serde_json::from_value(unwrap_envelope(v)).ok());
    let (code, message) = match parsed {
        Some(ErrorBody { code, message }) => (code, message),
        None => (None, None),
    };
    let message = message.unwrap_or_else(|| format!("HTTP {status}"));

    if status == StatusCode::NOT_FOUND || code.as_deref() == Some(NOT_FOUND_CODE) {
        CallError::NotFound(message)
    } else if status.is_client_error() {
        CallError::Origin(OriginError::Rejected(message))
    } else {
        CallError::Origin(OriginError::Unavailable(message))
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// HTTP client for the origin node.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl HttpOrigin {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, OriginError> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| OriginError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            auth_token,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route)
    }

    /// Send a request; non-success statuses become a [`CallError`].
    /// `streaming` requests have no overall timeout.
    async fn send(&self, route: &str, body: Value, streaming: bool) -> Result<Response, CallError> {
        let mut req = self.client.post(self.endpoint(route)).json(&body);
        if let Some(token) = &self.auth_token {
            req = req.header(reqwest::header::AUTHORIZATION, token);
        }
        if !streaming {
            req = req.timeout(self.request_timeout);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| CallError::Origin(OriginError::Unavailable(e.to_string())))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(error_from_response(resp).await)
        }
    }

    async fn call<T: DeserializeOwned>(&self, route: &str, body: Value) -> Result<T, CallError> {
        let resp = self.send(route, body, false).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CallError::Origin(OriginError::Unavailable(e.to_string())))?;
        decode_reply(&bytes).map_err(CallError::Origin)
    }
}

/// Reader state for the follow stream.
struct FrameReader {
    response: Option<Response>,
    buf: Vec<u8>,
}

fn frame_stream(response: Response) -> EventStream {
    let reader = FrameReader {
        response: Some(response),
        buf: Vec::new(),
    };
    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(pos) = reader.buf.iter().position(|b| FRAME_DELIMITERS.contains(b)) {
                let frame: Vec<u8> = reader.buf.drain(..=pos).collect();
                match parse_follow_frame(&frame[..pos]) {
                    Ok(Some(event)) => return Some((Ok(event), reader)),
                    Ok(None) => continue,
                    Err(e) => {
                        reader.response = None;
                        reader.buf.clear();
                        return Some((Err(e), reader));
                    }
                }
            }

            let response = reader.response.as_mut()?;
            match response.chunk().await {
                Ok(Some(bytes)) => reader.buf.extend_from_slice(&bytes),
                Ok(None) => {
                    reader.response = None;
                    if reader.buf.iter().all(u8::is_ascii_whitespace) {
                        return None;
                    }
                    // Final frame without a trailing delimiter.
                    reader.buf.push(b'\n');
                }
                Err(e) => {
                    reader.response = None;
                    return Some((Err(OriginError::Unavailable(e.to_string())), reader));
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn follow(&self, resume_from: Option<Hash256>) -> Result<EventStream, OriginError> {
        let body = match resume_from {
            Some(hash) => json!({ "head": hash.to_string(), "serialized": true }),
            None => json!({ "serialized": true }),
        };
        debug!(head = ?resume_from.map(|h| h.to_string()), "requesting follow stream");
        match self.send("chain/followChainStream", body, true).await {
            Ok(resp) => Ok(frame_stream(resp)),
            Err(CallError::NotFound(msg)) => Err(OriginError::UnknownHead(msg)),
            Err(CallError::Origin(e)) => Err(e),
        }
    }

    async fn get_block(&self, selector: BlockSelector) -> Result<Option<Block>, OriginError> {
        let body = match selector {
            BlockSelector::Hash(hash) => json!({ "hash": hash.to_string(), "serialized": true }),
            BlockSelector::Sequence(seq) => json!({ "sequence": seq, "serialized": true }),
        };
        match self.call::<BlockReply>("chain/getBlock", body).await {
            Ok(reply) => Ok(Some(reply.block.try_into()?)),
            Err(CallError::NotFound(_)) => Ok(None),
            Err(CallError::Origin(e)) => Err(e),
        }
    }

    async fn chain_head(&self) -> Result<BlockId, OriginError> {
        let reply: ChainInfoReply = self.call("chain/getChainInfo", json!({})).await?;
        let id = reply.current_block_identifier;
        Ok(BlockId {
            sequence: id.index.parse().map_err(malformed)?,
            hash: parse_hash(&id.hash)?,
        })
    }

    async fn broadcast_transaction(&self, payload: &[u8]) -> Result<BroadcastResult, OriginError> {
        let body = json!({ "transaction": hex::encode(payload) });
        let reply: BroadcastReply = self.call("chain/broadcastTransaction", body).await?;
        Ok(BroadcastResult {
            accepted: reply.accepted,
            hash: parse_hash(&reply.hash)?,
        })
    }

    async fn node_status(&self) -> Result<NodeStatus, OriginError> {
        let reply: StatusReply = self.call("node/getStatus", json!({})).await?;
        Ok(NodeStatus {
            status: reply.node.status,
            version: reply.node.version,
            network_id: reply.node.network_id,
            head: BlockId {
                sequence: reply.blockchain.head.sequence,
                hash: parse_hash(&reply.blockchain.head.hash)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex32(byte: u8) -> String {
        hex::encode([byte; 32])
    }

    fn block_json(sequence: u64) -> Value {
        json!({
            "hash": hex32(sequence as u8),
            "sequence": sequence,
            "previousBlockHash": hex32(sequence as u8 - 1),
            "timestamp": 1_700_000_000_000u64,
            "noteSize": 42,
            "transactions": [{
                "hash": hex32(0xEE),
                "notes": [{ "serialized": "0a0b" }, { "serialized": "0c" }],
                "spends": [{ "nullifier": "ff" }],
            }],
        })
    }

    #[test]
    fn rpc_block_converts_to_block() {
        let rpc: RpcBlock = serde_json::from_value(block_json(7)).unwrap();
        let block = Block::try_from(rpc).unwrap();
        assert_eq!(block.sequence, 7);
        assert_eq!(block.hash, Hash256([7; 32]));
        assert_eq!(block.previous_hash, Hash256([6; 32]));
        assert_eq!(block.cumulative_note_count, 42);
        assert_eq!(block.transactions.len(), 1);
        let tx = &block.transactions[0];
        assert_eq!(tx.index, 0);
        assert_eq!(tx.outputs[0].note, vec![0x0a, 0x0b]);
        assert_eq!(tx.spends[0].nullifier, vec![0xff]);
    }

    #[test]
    fn previous_alias_is_accepted() {
        let mut value = block_json(3);
        let prev = value["previousBlockHash"].take();
        value.as_object_mut().unwrap().remove("previousBlockHash");
        value["previous"] = prev;
        let rpc: RpcBlock = serde_json::from_value(value).unwrap();
        assert_eq!(Block::try_from(rpc).unwrap().previous_hash, Hash256([2; 32]));
    }

    #[test]
    fn missing_note_size_is_malformed() {
        let mut value = block_json(3);
        value.as_object_mut().unwrap().remove("noteSize");
        let rpc: RpcBlock = serde_json::from_value(value).unwrap();
        let err = Block::try_from(rpc).unwrap_err();
        assert_eq!(err, OriginError::Malformed("block is missing noteSize".into()));
    }

    #[test]
    fn follow_frames_parse_with_and_without_envelope() {
        let plain = json!({ "type": "connected", "block": block_json(5) }).to_string();
        let event = parse_follow_frame(plain.as_bytes()).unwrap().unwrap();
        assert!(matches!(event, ChainEvent::Connected(ref b) if b.sequence == 5));

        let wrapped = json!({ "data": { "type": "disconnected", "block": block_json(5) } }).to_string();
        let event = parse_follow_frame(wrapped.as_bytes()).unwrap().unwrap();
        assert!(matches!(event, ChainEvent::Disconnected(_)));
    }

    #[test]
    fn fork_and_blank_frames_are_skipped() {
        let fork = json!({ "type": "fork", "block": block_json(5) }).to_string();
        assert!(parse_follow_frame(fork.as_bytes()).unwrap().is_none());
        assert!(parse_follow_frame(b"  \r").unwrap().is_none());
    }

    #[test]
    fn bad_frames_are_errors() {
        assert!(matches!(parse_follow_frame(b"{oops"), Err(OriginError::Malformed(_))));
        let unknown = json!({ "type": "mystery", "block": block_json(5) }).to_string();
        assert!(matches!(parse_follow_frame(unknown.as_bytes()), Err(OriginError::Malformed(_))));
        let error = json!({ "code": "internal", "message": "node shutting down" }).to_string();
        assert_eq!(
            parse_follow_frame(error.as_bytes()).unwrap_err(),
            OriginError::Unavailable("node shutting down".into())
        );
    }

    #[test]
    fn envelope_only_unwraps_single_data_key() {
        assert_eq!(unwrap_envelope(json!({ "data": 1 })), json!(1));
        assert_eq!(
            unwrap_envelope(json!({ "data": 1, "other": 2 })),
            json!({ "data": 1, "other": 2 })
        );
    }

    #[test]
    fn chain_info_reply_decodes() {
        let bytes = json!({
            "data": { "currentBlockIdentifier": { "index": "12", "hash": hex32(12) } }
        })
        .to_string();
        let reply: ChainInfoReply = decode_reply(bytes.as_bytes()).unwrap();
        assert_eq!(reply.current_block_identifier.index, "12");
    }

    #[test]
    fn endpoint_joins_route() {
        let origin = HttpOrigin::new("http://127.0.0.1:8021/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(origin.endpoint("chain/getBlock"), "http://127.0.0.1:8021/chain/getBlock");
    }
}
