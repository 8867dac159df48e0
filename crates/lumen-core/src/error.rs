//! Error types for Lumen.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode: {0}")] Encode(String),
    #[error("decode: {0}")] Decode(String),
    #[error("{0} trailing bytes after block")] TrailingBytes(usize),
    #[error("unsupported block version: {0}")] UnsupportedVersion(u32),
    #[error("frame too large: {0} bytes")] FrameTooLarge(usize),
    #[error("truncated frame at offset {0}")] Truncated(usize),
    #[error("invalid hash: {0}")] InvalidHash(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OriginError {
    #[error("resumption point unknown: {0}")] UnknownHead(String),
    #[error("origin unavailable: {0}")] Unavailable(String),
    #[error("origin rejected request: {0}")] Rejected(String),
    #[error("malformed origin payload: {0}")] Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid argument: {0}")] InvalidArgument(String),
    #[error("not found: {0}")] NotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("malformed manifest: {0}")] Malformed(String),
    #[error("unsupported manifest version: {0}")] UnsupportedVersion(u32),
    #[error("open chunk {start}..={end} is not the last entry")] OpenChunkNotLast { start: u64, end: u64 },
    #[error("chunk starting at {start} does not follow {prev_end}")] NotContiguous { start: u64, prev_end: u64 },
    #[error("inverted chunk range {start}..={end}")] InvertedRange { start: u64, end: u64 },
    #[error("invalid chunk name: {0}")] InvalidName(String),
    #[error("malformed byte-range index: {0}")] MalformedIndex(String),
}

#[derive(Error, Debug)]
pub enum LumenError {
    #[error(transparent)] Codec(#[from] CodecError),
    #[error(transparent)] Origin(#[from] OriginError),
    #[error(transparent)] Query(#[from] QueryError),
    #[error(transparent)] Manifest(#[from] ManifestError),
    #[error("no cached ancestor below sequence {from} is resumable")] DivergenceExhausted { from: u64 },
    #[error("storage: {0}")] Storage(String),
    #[error("blob store: {0}")] BlobStore(String),
    #[error("config: {0}")] Config(String),
}
