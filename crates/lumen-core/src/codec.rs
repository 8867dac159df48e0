//! Canonical binary encoding of [`Block`] and the length-prefixed framing
//! used inside chunk blobs.
//!
//! Blocks are bincode-encoded with the standard configuration. A chunk blob
//! is a plain concatenation of frames: a 4-byte big-endian length followed by
//! that many bytes of encoded block.

use crate::constants::{BLOCK_PROTO_VERSION, LENGTH_PREFIX_BYTES};
use crate::error::CodecError;
use crate::types::Block;

/// Encode a block into its canonical bytes.
pub fn encode_block(block: &Block) -> Result<Vec<u8>, CodecError> {
    bincode::encode_to_vec(block, bincode::config::standard())
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode canonical bytes into a block.
///
/// The whole slice must be consumed, so re-encoding the result reproduces
/// the input exactly.
pub fn decode_block(bytes: &[u8]) -> Result<Block, CodecError> {
    let (block, read): (Block, usize) =
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CodecError::Decode(e.to_string()))?;
    if read != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - read));
    }
    if block.proto_version != BLOCK_PROTO_VERSION {
        return Err(CodecError::UnsupportedVersion(block.proto_version));
    }
    Ok(block)
}

/// Append one length-prefixed frame to `out`.
///
/// Returns the inclusive `(start, end)` byte offsets of the frame, prefix included.
pub fn write_frame(out: &mut Vec<u8>, payload: &[u8]) -> Result<(u64, u64), CodecError> {
    let len = u32::try_from(payload.len()).map_err(|_| CodecError::FrameTooLarge(payload.len()))?;
    let start = out.len() as u64;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    let end = out.len() as u64 - 1;
    Ok((start, end))
}

/// A frame located inside a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Offset of the length prefix.
    pub start: u64,
    /// Offset of the last payload byte.
    pub end: u64,
    pub payload: &'a [u8],
}

/// Iterator over the frames of a blob. Yields an error and stops on a
/// truncated frame.
pub struct Frames<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

/// Walk the frames of an uncompressed chunk blob.
pub fn frames(buf: &[u8]) -> Frames<'_> {
    Frames { buf, pos: 0, failed: false }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<Frame<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos == self.buf.len() {
            return None;
        }
        let start = self.pos;
        let Some(prefix) = self.buf.get(start..start + LENGTH_PREFIX_BYTES) else {
            self.failed = true;
            return Some(Err(CodecError::Truncated(start)));
        };
        let mut len_bytes = [0u8; LENGTH_PREFIX_BYTES];
        len_bytes.copy_from_slice(prefix);
        let len = u32::from_be_bytes(len_bytes) as usize;

        let body_start = start + LENGTH_PREFIX_BYTES;
        let Some(payload) = self.buf.get(body_start..body_start + len) else {
            self.failed = true;
            return Some(Err(CodecError::Truncated(start)));
        };
        self.pos = body_start + len;
        Some(Ok(Frame {
            start: start as u64,
            end: self.pos as u64 - 1,
            payload,
        }))
    }
}

/// Decode every block in an uncompressed chunk blob.
pub fn decode_blob(buf: &[u8]) -> Result<Vec<Block>, CodecError> {
    frames(buf)
        .map(|frame| frame.and_then(|f| decode_block(f.payload)))
        .collect()
}
