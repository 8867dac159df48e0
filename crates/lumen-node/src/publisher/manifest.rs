//! The published chunk manifest.
//!
//! An ordered, contiguous list of chunk entries. Every entry but the last is
//! finalized; the last one may be open, in which case the next publish cycle
//! rebuilds it from its start and replaces it in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lumen_core::constants::MANIFEST_VERSION;
use lumen_core::error::ManifestError;
use lumen_core::types::BlockRange;

/// One published chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEntry {
    /// Inclusive sequence range packed in the chunk.
    pub range: BlockRange,
    /// Key of the gzip blob.
    pub blob_key: String,
    /// Key of the gzip byte-range index.
    pub byte_range_index_key: String,
    pub created_at: DateTime<Utc>,
    /// Finalized chunks are immutable.
    pub finalized: bool,
}

/// Versioned manifest document stored at a fixed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub chunks: Vec<ChunkEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            chunks: Vec::new(),
        }
    }
}

impl Manifest {
    /// Parse and validate a manifest document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|e| ManifestError::Malformed(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, ManifestError> {
        serde_json::to_vec_pretty(self).map_err(|e| ManifestError::Malformed(e.to_string()))
    }

    /// Check version, ordering and the single-open-chunk rule.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.version != MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion(self.version));
        }
        let last_index = self.chunks.len().saturating_sub(1);
        let mut prev_end: Option<u64> = None;
        for (i, chunk) in self.chunks.iter().enumerate() {
            let BlockRange { start, end } = chunk.range;
            if start > end {
                return Err(ManifestError::InvertedRange { start, end });
            }
            if !chunk.finalized && i != last_index {
                return Err(ManifestError::OpenChunkNotLast { start, end });
            }
            if let Some(prev_end) = prev_end {
                if start != prev_end + 1 {
                    return Err(ManifestError::NotContiguous { start, prev_end });
                }
            }
            prev_end = Some(end);
        }
        Ok(())
    }

    pub fn last(&self) -> Option<&ChunkEntry> {
        self.chunks.last()
    }

    /// The trailing unfinalized entry, if there is one.
    pub fn open_chunk(&self) -> Option<&ChunkEntry> {
        self.chunks.last().filter(|c| !c.finalized)
    }

    /// First sequence the next chunk must start at.
    pub fn next_start(&self) -> u64 {
        match self.chunks.last() {
            None => 1,
            Some(chunk) if chunk.finalized => chunk.range.end + 1,
            Some(chunk) => chunk.range.start,
        }
    }

    /// Add a freshly built chunk: appended after a finalized tail, or
    /// replacing an open one. Returns the superseded open entry.
    pub fn record(&mut self, entry: ChunkEntry) -> Result<Option<ChunkEntry>, ManifestError> {
        let expected = self.next_start();
        if entry.range.start != expected {
            return Err(ManifestError::NotContiguous {
                start: entry.range.start,
                prev_end: expected - 1,
            });
        }
        let superseded = match self.chunks.last() {
            Some(last) if !last.finalized => self.chunks.pop(),
            _ => None,
        };
        self.chunks.push(entry);
        Ok(superseded)
    }
}
