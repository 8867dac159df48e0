//! Chunk packing: length-prefixed blob, byte-range index, object naming and
//! gzip transport encoding.

use std::fmt;
use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use lumen_core::codec;
use lumen_core::error::{CodecError, LumenError, ManifestError};
use lumen_core::types::{Block, BlockRange};

use super::manifest::ChunkEntry;

const BLOB_SUFFIX: &str = ".gz";
const INDEX_SUFFIX: &str = ".index.gz";

/// Which of a chunk's two objects a key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkObject {
    Blob,
    Index,
}

impl ChunkObject {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Blob => BLOB_SUFFIX,
            Self::Index => INDEX_SUFFIX,
        }
    }
}

/// Structured form of a chunk object key:
/// `{created_at_ms:013}_blocks_{start:010}_{end:010}{.gz|.index.gz}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkName {
    pub created_at_ms: u64,
    pub range: BlockRange,
    pub object: ChunkObject,
}

impl ChunkName {
    pub fn upload_name(&self) -> String {
        format!(
            "{:013}_blocks_{:010}_{:010}{}",
            self.created_at_ms,
            self.range.start,
            self.range.end,
            self.object.suffix()
        )
    }

    /// Parse a key produced by [`upload_name`](Self::upload_name).
    ///
    /// Only canonical renderings are accepted, so parsing and rendering are
    /// exact inverses.
    pub fn parse_upload_name(key: &str) -> Result<Self, ManifestError> {
        let invalid = || ManifestError::InvalidName(key.to_string());

        let (stem, object) = if let Some(stem) = key.strip_suffix(INDEX_SUFFIX) {
            (stem, ChunkObject::Index)
        } else if let Some(stem) = key.strip_suffix(BLOB_SUFFIX) {
            (stem, ChunkObject::Blob)
        } else {
            return Err(invalid());
        };

        let parts: Vec<&str> = stem.split('_').collect();
        let [created, "blocks", start, end] = parts.as_slice() else {
            return Err(invalid());
        };
        let number = |s: &str| -> Result<u64, ManifestError> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            s.parse::<u64>().map_err(|_| invalid())
        };

        let range = BlockRange::new(number(*start)?, number(*end)?).ok_or_else(invalid)?;
        let name = Self {
            created_at_ms: number(*created)?,
            range,
            object,
        };
        if name.upload_name() != key {
            return Err(invalid());
        }
        Ok(name)
    }
}

impl fmt::Display for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.upload_name())
    }
}

/// One index line: where a block's frame sits in the uncompressed blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub sequence: u64,
    /// Offset of the length prefix.
    pub start: u64,
    /// Offset of the last byte of the block (inclusive).
    pub end: u64,
}

/// Byte-range index rendered as `sequence,startOffset,endOffset` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteRangeIndex {
    entries: Vec<IndexEntry>,
}

impl ByteRangeIndex {
    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.entries.len() * 24);
        for e in &self.entries {
            out.push_str(&format!("{},{},{}\n", e.sequence, e.start, e.end));
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut index = Self::default();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.trim().split(',').collect();
            let [sequence, start, end] = fields.as_slice() else {
                return Err(ManifestError::MalformedIndex(line.to_string()));
            };
            let parse = |s: &str| {
                s.parse::<u64>()
                    .map_err(|_| ManifestError::MalformedIndex(line.to_string()))
            };
            index.push(IndexEntry {
                sequence: parse(*sequence)?,
                start: parse(*start)?,
                end: parse(*end)?,
            });
        }
        Ok(index)
    }

    /// Entry for `sequence`. Entries are in ascending sequence order.
    pub fn lookup(&self, sequence: u64) -> Option<&IndexEntry> {
        self.entries
            .binary_search_by_key(&sequence, |e| e.sequence)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Inclusive byte span covering every block in `range`.
    pub fn byte_span(&self, range: BlockRange) -> Option<(u64, u64)> {
        let first = self.lookup(range.start)?;
        let last = self.lookup(range.end)?;
        Some((first.start, last.end))
    }
}

/// Accumulates consecutive blocks into one chunk.
#[derive(Debug)]
pub struct ChunkBuilder {
    start: u64,
    next: u64,
    size_threshold: u64,
    blob: Vec<u8>,
    index: ByteRangeIndex,
}

impl ChunkBuilder {
    pub fn new(start: u64, size_threshold: u64) -> Self {
        Self {
            start,
            next: start,
            size_threshold,
            blob: Vec::new(),
            index: ByteRangeIndex::default(),
        }
    }

    /// Append the next block. Blocks must arrive in sequence order.
    pub fn push(&mut self, block: &Block) -> Result<(), LumenError> {
        if block.sequence != self.next {
            return Err(ManifestError::NotContiguous {
                start: block.sequence,
                prev_end: self.next.saturating_sub(1),
            }
            .into());
        }
        let bytes = codec::encode_block(block)?;
        let (start, end) = codec::write_frame(&mut self.blob, &bytes)?;
        self.index.push(IndexEntry {
            sequence: block.sequence,
            start,
            end,
        });
        self.next += 1;
        Ok(())
    }

    pub fn next_sequence(&self) -> u64 {
        self.next
    }

    pub fn is_empty(&self) -> bool {
        self.next == self.start
    }

    /// True once the uncompressed blob has reached the size threshold.
    pub fn is_full(&self) -> bool {
        self.blob.len() as u64 >= self.size_threshold
    }

    pub fn blob_len(&self) -> u64 {
        self.blob.len() as u64
    }

    /// Range packed so far, `None` while empty.
    pub fn range(&self) -> Option<BlockRange> {
        BlockRange::new(self.start, self.next.checked_sub(1)?)
    }

    /// Compress the blob and index and build the manifest entry.
    pub fn finish(self, created_at: DateTime<Utc>, finalized: bool) -> Result<PackedChunk, LumenError> {
        let range = self.range().ok_or(ManifestError::InvertedRange {
            start: self.start,
            end: self.start.saturating_sub(1),
        })?;
        let created_at_ms = u64::try_from(created_at.timestamp_millis()).unwrap_or(0);
        let name = |object| ChunkName { created_at_ms, range, object }.upload_name();

        let entry = ChunkEntry {
            range,
            blob_key: name(ChunkObject::Blob),
            byte_range_index_key: name(ChunkObject::Index),
            created_at,
            finalized,
        };
        Ok(PackedChunk {
            blob_gz: gzip(&self.blob)?,
            index_gz: gzip(self.index.render().as_bytes())?,
            raw_len: self.blob.len() as u64,
            entry,
        })
    }
}

/// A finished chunk ready for upload.
#[derive(Debug, Clone)]
pub struct PackedChunk {
    pub entry: ChunkEntry,
    pub blob_gz: Vec<u8>,
    pub index_gz: Vec<u8>,
    /// Uncompressed blob size.
    pub raw_len: u64,
}

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>, LumenError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(encoder
        .finish()
        .map_err(|e| CodecError::Encode(e.to_string()))?)
}

pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, LumenError> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::make_chain;
    use proptest::prelude::*;

    fn created_at() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_123).unwrap()
    }

    #[test]
    fn upload_name_format() {
        let name = ChunkName {
            created_at_ms: 1_700_000_000_123,
            range: BlockRange { start: 1, end: 250 },
            object: ChunkObject::Blob,
        };
        assert_eq!(name.upload_name(), "1700000000123_blocks_0000000001_0000000250.gz");
        let index = ChunkName { object: ChunkObject::Index, ..name };
        assert_eq!(index.upload_name(), "1700000000123_blocks_0000000001_0000000250.index.gz");
    }

    #[test]
    fn parse_rejects_foreign_keys() {
        for key in [
            "manifest.json",
            "1700000000123_blocks_0000000001_0000000250",
            "1700000000123_chunks_0000000001_0000000250.gz",
            "1700000000123_blocks_1_250.gz",
            "1700000000123_blocks_0000000009_0000000001.gz",
            "1700000000123_blocks_+000000001_0000000250.gz",
        ] {
            assert!(ChunkName::parse_upload_name(key).is_err(), "accepted {key}");
        }
    }

    #[test]
    fn index_render_and_parse() {
        let mut index = ByteRangeIndex::default();
        index.push(IndexEntry { sequence: 5, start: 0, end: 99 });
        index.push(IndexEntry { sequence: 6, start: 100, end: 149 });
        let text = index.render();
        assert_eq!(text, "5,0,99\n6,100,149\n");
        assert_eq!(ByteRangeIndex::parse(&text).unwrap(), index);
        assert_eq!(index.lookup(6).unwrap().start, 100);
        assert!(index.lookup(7).is_none());
        assert_eq!(index.byte_span(BlockRange { start: 5, end: 6 }), Some((0, 149)));
    }

    #[test]
    fn index_parse_rejects_bad_lines() {
        assert!(ByteRangeIndex::parse("1,2\n").is_err());
        assert!(ByteRangeIndex::parse("a,b,c\n").is_err());
    }

    #[test]
    fn builder_requires_consecutive_blocks() {
        let chain = make_chain(3, 1);
        let mut builder = ChunkBuilder::new(1, 1 << 20);
        builder.push(&chain[0]).unwrap();
        assert!(builder.push(&chain[2]).is_err());
        assert_eq!(builder.next_sequence(), 2);
    }

    #[test]
    fn builder_fills_at_threshold() {
        let chain = make_chain(3, 1);
        let mut builder = ChunkBuilder::new(1, 1);
        assert!(builder.is_empty());
        assert!(builder.range().is_none());
        builder.push(&chain[0]).unwrap();
        assert!(builder.is_full());
        assert_eq!(builder.range(), Some(BlockRange { start: 1, end: 1 }));
    }

    #[test]
    fn packed_chunk_decodes_back_to_blocks() {
        let chain = make_chain(4, 1);
        let mut builder = ChunkBuilder::new(1, 1 << 20);
        for block in &chain {
            builder.push(block).unwrap();
        }
        let packed = builder.finish(created_at(), false).unwrap();
        assert_eq!(packed.entry.range, BlockRange { start: 1, end: 4 });
        assert!(!packed.entry.finalized);
        assert_eq!(
            packed.entry.blob_key,
            "1700000000123_blocks_0000000001_0000000004.gz"
        );

        let blob = gunzip(&packed.blob_gz).unwrap();
        assert_eq!(blob.len() as u64, packed.raw_len);
        assert_eq!(codec::decode_blob(&blob).unwrap(), chain);

        let index = ByteRangeIndex::parse(&String::from_utf8(gunzip(&packed.index_gz).unwrap()).unwrap()).unwrap();
        assert_eq!(index.entries().len(), 4);
        assert_eq!(index.entries()[0].start, 0);
        assert_eq!(index.entries()[3].end, blob.len() as u64 - 1);
        for (entry, block) in index.entries().iter().zip(&chain) {
            let frame = &blob[entry.start as usize..=entry.end as usize];
            let payload = &frame[lumen_core::constants::LENGTH_PREFIX_BYTES..];
            assert_eq!(&codec::decode_block(payload).unwrap(), block);
        }
    }

    #[test]
    fn finish_rejects_empty_builder() {
        let builder = ChunkBuilder::new(7, 10);
        assert!(builder.finish(created_at(), true).is_err());
    }

    proptest! {
        #[test]
        fn upload_name_roundtrip(
            created_at_ms in 0u64..10_000_000_000_000,
            start in 0u64..10_000_000_000,
            len in 0u64..1_000_000,
            index in any::<bool>(),
        ) {
            let end = start.saturating_add(len).min(9_999_999_999);
            let object = if index { ChunkObject::Index } else { ChunkObject::Blob };
            let name = ChunkName { created_at_ms, range: BlockRange { start, end }, object };
            let key = name.upload_name();
            let parsed = ChunkName::parse_upload_name(&key).unwrap();
            prop_assert_eq!(parsed, name);
            prop_assert_eq!(parsed.upload_name(), key);
        }
    }
}
