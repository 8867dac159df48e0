//! RocksDB-backed block cache.
//!
//! Holds the single canonical path mirrored from the origin, keyed by hash
//! with a sequence index, plus the `head`, `head_sequence` and
//! `finalized_sequence` pointers. The follower is the only writer; the
//! publisher and query surfaces only read. Multi-key updates go through one
//! [`WriteBatch`] so a crash never leaves half a block behind.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};

use lumen_core::codec;
use lumen_core::error::LumenError;
use lumen_core::types::{Block, Hash256};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_SEQUENCE_INDEX: &str = "sequence_index";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_SEQUENCE_INDEX, CF_METADATA];

// --- Metadata keys ---

const META_HEAD: &[u8] = b"head";
const META_HEAD_SEQUENCE: &[u8] = b"head_sequence";
const META_FINALIZED_SEQUENCE: &[u8] = b"finalized_sequence";

/// Persistent cache of the origin's canonical chain.
pub struct ChainCache {
    db: DB,
    finality_depth: u64,
}

impl ChainCache {
    /// Open or create the cache at the given path.
    pub fn open(path: impl AsRef<Path>, finality_depth: u64) -> Result<Self, LumenError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| LumenError::Storage(e.to_string()))?;

        let cache = Self { db, finality_depth };
        tracing::info!(
            head_sequence = cache.head_sequence()?,
            finality_depth,
            "opened chain cache at {}",
            path.as_ref().display()
        );
        Ok(cache)
    }

    /// Number of trailing blocks treated as reversible.
    pub fn finality_depth(&self) -> u64 {
        self.finality_depth
    }

    // --- Raw key/value primitives ---

    /// Read an opaque value from the metadata keyspace. Absent keys return `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, LumenError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .get_cf(cf, key)
            .map_err(|e| LumenError::Storage(e.to_string()))
    }

    /// Write an opaque value into the metadata keyspace.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), LumenError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .put_cf(cf, key, value)
            .map_err(|e| LumenError::Storage(e.to_string()))
    }

    /// Remove a key from the metadata keyspace. Missing keys are ignored.
    pub fn delete(&self, key: &[u8]) -> Result<(), LumenError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .delete_cf(cf, key)
            .map_err(|e| LumenError::Storage(e.to_string()))
    }

    // --- Block operations ---

    /// Store a block and advance the head and finality pointers.
    ///
    /// The head moves when the block is at or above the current head
    /// sequence (or no head exists yet). Finality only moves forward here.
    /// Calling this twice with the same block is a no-op the second time.
    pub fn cache_block(&self, block: &Block) -> Result<(), LumenError> {
        let bytes = codec::encode_block(block)?;
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_index = self.cf_handle(CF_SEQUENCE_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_blocks, block.hash.as_bytes(), &bytes);
        batch.put_cf(cf_index, Self::sequence_key(block.sequence), block.hash.as_bytes());

        let current_head = self.get_meta_u64(META_HEAD_SEQUENCE)?;
        let head_sequence = match current_head {
            Some(seq) if block.sequence < seq => seq,
            _ => {
                batch.put_cf(cf_meta, META_HEAD, block.hash.as_bytes());
                batch.put_cf(cf_meta, META_HEAD_SEQUENCE, block.sequence.to_le_bytes());
                block.sequence
            }
        };

        if head_sequence > self.finality_depth {
            let candidate = head_sequence - self.finality_depth;
            let stored = self.get_meta_u64(META_FINALIZED_SEQUENCE)?;
            if stored.is_none_or(|s| candidate > s) {
                batch.put_cf(cf_meta, META_FINALIZED_SEQUENCE, candidate.to_le_bytes());
            }
        }

        self.db
            .write(batch)
            .map_err(|e| LumenError::Storage(e.to_string()))
    }

    /// Look up a cached block by hash.
    pub fn get_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, LumenError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self
            .db
            .get_cf(cf, hash.as_bytes())
            .map_err(|e| LumenError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(codec::decode_block(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Look up a cached block by sequence via the sequence index.
    pub fn get_block_by_sequence(&self, sequence: u64) -> Result<Option<Block>, LumenError> {
        match self.get_hash_by_sequence(sequence)? {
            Some(hash) => self.get_block_by_hash(&hash),
            None => Ok(None),
        }
    }

    /// Hash recorded at the given sequence, if any.
    pub fn get_hash_by_sequence(&self, sequence: u64) -> Result<Option<Hash256>, LumenError> {
        let cf = self.cf_handle(CF_SEQUENCE_INDEX)?;
        self.db
            .get_cf(cf, Self::sequence_key(sequence))
            .map_err(|e| LumenError::Storage(e.to_string()))?
            .map(|bytes| Hash256::from_slice(&bytes).map_err(LumenError::from))
            .transpose()
    }

    /// Hash of the current head, or `None` for an empty cache.
    pub fn head(&self) -> Result<Option<Hash256>, LumenError> {
        self.get(META_HEAD)?
            .map(|bytes| Hash256::from_slice(&bytes).map_err(LumenError::from))
            .transpose()
    }

    /// The head block itself.
    pub fn head_block(&self) -> Result<Option<Block>, LumenError> {
        match self.head()? {
            Some(hash) => self.get_block_by_hash(&hash),
            None => Ok(None),
        }
    }

    /// Sequence of the current head; 0 when the cache is empty.
    pub fn head_sequence(&self) -> Result<u64, LumenError> {
        Ok(self.get_meta_u64(META_HEAD_SEQUENCE)?.unwrap_or(0))
    }

    /// Highest sequence considered final.
    ///
    /// Defaults to `finality_depth + 1` before the first forward advance.
    pub fn finalized_sequence(&self) -> Result<u64, LumenError> {
        Ok(self
            .get_meta_u64(META_FINALIZED_SEQUENCE)?
            .unwrap_or(self.finality_depth + 1))
    }

    /// True once `sequence` is at or below a recorded finality pointer.
    ///
    /// Unlike [`finalized_sequence`](Self::finalized_sequence) this ignores
    /// the default, so nothing is final until the head has cleared the
    /// finality depth.
    pub fn is_final(&self, sequence: u64) -> Result<bool, LumenError> {
        Ok(self
            .get_meta_u64(META_FINALIZED_SEQUENCE)?
            .is_some_and(|finalized| sequence <= finalized))
    }

    /// Make `new_head` the head, discarding every cached block above it.
    ///
    /// Finality is clamped to `min(current, new_head.sequence - depth)`, and
    /// cleared when the new head is within the finality depth.
    pub fn rollback_to(&self, new_head: &Block) -> Result<(), LumenError> {
        let old_head_sequence = self.head_sequence()?;
        let bytes = codec::encode_block(new_head)?;
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_index = self.cf_handle(CF_SEQUENCE_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for sequence in (new_head.sequence + 1)..=old_head_sequence {
            if let Some(hash) = self.get_hash_by_sequence(sequence)? {
                batch.delete_cf(cf_blocks, hash.as_bytes());
                removed += 1;
            }
            batch.delete_cf(cf_index, Self::sequence_key(sequence));
        }

        batch.put_cf(cf_blocks, new_head.hash.as_bytes(), &bytes);
        batch.put_cf(cf_index, Self::sequence_key(new_head.sequence), new_head.hash.as_bytes());
        batch.put_cf(cf_meta, META_HEAD, new_head.hash.as_bytes());
        batch.put_cf(cf_meta, META_HEAD_SEQUENCE, new_head.sequence.to_le_bytes());
        self.clamp_finality(&mut batch, new_head.sequence)?;

        self.db
            .write(batch)
            .map_err(|e| LumenError::Storage(e.to_string()))?;
        tracing::info!(
            sequence = new_head.sequence,
            hash = %new_head.hash,
            removed,
            "rolled back cache head"
        );
        Ok(())
    }

    /// Retract `block`, the current tip, moving the head to its parent.
    pub fn disconnect(&self, block: &Block) -> Result<(), LumenError> {
        let head = self.head()?;
        if head != Some(block.hash) {
            tracing::warn!(
                sequence = block.sequence,
                hash = %block.hash,
                "disconnecting a block that is not the cached head"
            );
        }

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_index = self.cf_handle(CF_SEQUENCE_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(cf_blocks, block.hash.as_bytes());
        if self.get_hash_by_sequence(block.sequence)? == Some(block.hash) {
            batch.delete_cf(cf_index, Self::sequence_key(block.sequence));
        }

        let parent_sequence = block.sequence.saturating_sub(1);
        if parent_sequence == 0 {
            // Back to an empty chain.
            batch.delete_cf(cf_meta, META_HEAD);
            batch.delete_cf(cf_meta, META_HEAD_SEQUENCE);
        } else {
            batch.put_cf(cf_meta, META_HEAD, block.previous_hash.as_bytes());
            batch.put_cf(cf_meta, META_HEAD_SEQUENCE, parent_sequence.to_le_bytes());
        }
        self.clamp_finality(&mut batch, parent_sequence)?;

        self.db
            .write(batch)
            .map_err(|e| LumenError::Storage(e.to_string()))
    }

    /// Drop every cached block and pointer, leaving an empty chain.
    ///
    /// Returns the number of blocks removed.
    pub fn clear(&self) -> Result<u64, LumenError> {
        let head_sequence = self.head_sequence()?;
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_index = self.cf_handle(CF_SEQUENCE_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for sequence in 1..=head_sequence {
            if let Some(hash) = self.get_hash_by_sequence(sequence)? {
                batch.delete_cf(cf_blocks, hash.as_bytes());
                removed += 1;
            }
            batch.delete_cf(cf_index, Self::sequence_key(sequence));
        }
        batch.delete_cf(cf_meta, META_HEAD);
        batch.delete_cf(cf_meta, META_HEAD_SEQUENCE);
        batch.delete_cf(cf_meta, META_FINALIZED_SEQUENCE);

        self.db
            .write(batch)
            .map_err(|e| LumenError::Storage(e.to_string()))?;
        tracing::warn!(removed, "cleared chain cache");
        Ok(removed)
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), LumenError> {
        self.db
            .flush()
            .map_err(|e| LumenError::Storage(e.to_string()))
    }

    /// Trigger manual compaction across all column families.
    ///
    /// Reclaims the space left behind by rollbacks.
    pub fn compact(&self) -> Result<(), LumenError> {
        for cf_name in ALL_CFS {
            let cf = self.cf_handle(cf_name)?;
            self.db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }

    // --- Internal helpers ---

    /// Lower the finality pointer so it never exceeds `head_sequence - depth`.
    fn clamp_finality(&self, batch: &mut WriteBatch, head_sequence: u64) -> Result<(), LumenError> {
        let cf_meta = self.cf_handle(CF_METADATA)?;
        if head_sequence <= self.finality_depth {
            batch.delete_cf(cf_meta, META_FINALIZED_SEQUENCE);
            return Ok(());
        }
        let ceiling = head_sequence - self.finality_depth;
        if self
            .get_meta_u64(META_FINALIZED_SEQUENCE)?
            .is_some_and(|current| current > ceiling)
        {
            batch.put_cf(cf_meta, META_FINALIZED_SEQUENCE, ceiling.to_le_bytes());
        }
        Ok(())
    }

    /// Get a u64 from the metadata column family.
    fn get_meta_u64(&self, key: &[u8]) -> Result<Option<u64>, LumenError> {
        match self.get(key)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LumenError::Storage("invalid metadata value length".into()))?;
                Ok(Some(u64::from_le_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, LumenError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LumenError::Storage(format!("missing column family: {name}")))
    }

    /// Encode a sequence as big-endian bytes for ordered iteration.
    fn sequence_key(sequence: u64) -> [u8; 8] {
        sequence.to_be_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_block, make_chain};
    use proptest::prelude::*;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Create a temporary cache with the given finality depth.
    fn temp_cache(depth: u64) -> (ChainCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChainCache::open(dir.path().join("chaincache"), depth).unwrap();
        (cache, dir)
    }

    fn cache_all(cache: &ChainCache, blocks: &[Block]) {
        for block in blocks {
            cache.cache_block(block).unwrap();
        }
    }

    /// Walk parent links from the head down to sequence 1.
    fn assert_linked_from_head(cache: &ChainCache) {
        let head_sequence = cache.head_sequence().unwrap();
        for seq in 2..=head_sequence {
            let child = cache.get_block_by_sequence(seq).unwrap().unwrap();
            let parent = cache.get_block_by_sequence(seq - 1).unwrap().unwrap();
            assert_eq!(child.previous_hash, parent.hash, "broken link at {seq}");
        }
    }

    // ------------------------------------------------------------------
    // Empty cache
    // ------------------------------------------------------------------

    #[test]
    fn empty_cache_has_no_head() {
        let (cache, _dir) = temp_cache(10);
        assert_eq!(cache.head().unwrap(), None);
        assert_eq!(cache.head_sequence().unwrap(), 0);
        assert!(cache.head_block().unwrap().is_none());
        assert!(cache.get_block_by_sequence(1).unwrap().is_none());
    }

    #[test]
    fn finalized_defaults_past_depth() {
        let (cache, _dir) = temp_cache(10);
        assert_eq!(cache.finalized_sequence().unwrap(), 11);
        assert!(!cache.is_final(1).unwrap());
    }

    #[test]
    fn raw_get_put_delete() {
        let (cache, _dir) = temp_cache(10);
        assert_eq!(cache.get(b"k").unwrap(), None);
        cache.put(b"k", b"v").unwrap();
        assert_eq!(cache.get(b"k").unwrap(), Some(b"v".to_vec()));
        cache.delete(b"k").unwrap();
        assert_eq!(cache.get(b"k").unwrap(), None);
        cache.delete(b"never-written").unwrap();
    }

    // ------------------------------------------------------------------
    // cache_block
    // ------------------------------------------------------------------

    #[test]
    fn cache_block_sets_head_and_indices() {
        let (cache, _dir) = temp_cache(10);
        let chain = make_chain(3, 0xA0);
        cache_all(&cache, &chain);

        assert_eq!(cache.head().unwrap(), Some(chain[2].hash));
        assert_eq!(cache.head_sequence().unwrap(), 3);
        assert_eq!(cache.get_block_by_hash(&chain[1].hash).unwrap().unwrap(), chain[1]);
        assert_eq!(cache.get_block_by_sequence(1).unwrap().unwrap(), chain[0]);
        assert_eq!(cache.head_block().unwrap().unwrap(), chain[2]);
    }

    #[test]
    fn lower_sequence_does_not_move_head() {
        let (cache, _dir) = temp_cache(10);
        let chain = make_chain(3, 0xA0);
        cache_all(&cache, &chain);

        let side = make_block(2, chain[0].hash, 0xB0);
        cache.cache_block(&side).unwrap();
        assert_eq!(cache.head().unwrap(), Some(chain[2].hash));
        assert_eq!(cache.head_sequence().unwrap(), 3);
    }

    #[test]
    fn cache_block_is_idempotent() {
        let (cache, _dir) = temp_cache(2);
        let chain = make_chain(5, 0xA0);
        cache_all(&cache, &chain);

        let snapshot = |c: &ChainCache| {
            (
                c.head().unwrap(),
                c.head_sequence().unwrap(),
                c.finalized_sequence().unwrap(),
                (1..=5).map(|s| c.get_block_by_sequence(s).unwrap()).collect::<Vec<_>>(),
            )
        };
        let before = snapshot(&cache);
        cache.cache_block(&chain[4]).unwrap();
        assert_eq!(snapshot(&cache), before);
    }

    #[test]
    fn finality_trails_head_by_depth() {
        let (cache, _dir) = temp_cache(3);
        let chain = make_chain(10, 0xA0);
        for block in &chain {
            cache.cache_block(block).unwrap();
            let head = cache.head_sequence().unwrap();
            if head > 3 {
                assert_eq!(cache.finalized_sequence().unwrap(), head - 3);
                assert!(cache.is_final(head - 3).unwrap());
                assert!(!cache.is_final(head - 2).unwrap());
            }
        }
    }

    #[test]
    fn parent_links_hold_along_path() {
        let (cache, _dir) = temp_cache(3);
        cache_all(&cache, &make_chain(20, 0xA0));
        assert_linked_from_head(&cache);
    }

    // ------------------------------------------------------------------
    // Disconnect and rollback
    // ------------------------------------------------------------------

    #[test]
    fn disconnect_moves_head_to_parent() {
        let (cache, _dir) = temp_cache(10);
        let chain = make_chain(3, 0xA0);
        cache_all(&cache, &chain);

        cache.disconnect(&chain[2]).unwrap();
        assert_eq!(cache.head().unwrap(), Some(chain[1].hash));
        assert_eq!(cache.head_sequence().unwrap(), 2);
        assert!(cache.get_block_by_hash(&chain[2].hash).unwrap().is_none());
        assert!(cache.get_block_by_sequence(3).unwrap().is_none());
    }

    #[test]
    fn disconnect_genesis_empties_cache() {
        let (cache, _dir) = temp_cache(10);
        let chain = make_chain(1, 0xA0);
        cache_all(&cache, &chain);

        cache.disconnect(&chain[0]).unwrap();
        assert_eq!(cache.head().unwrap(), None);
        assert_eq!(cache.head_sequence().unwrap(), 0);
    }

    #[test]
    fn reorg_replaces_tip() {
        let (cache, _dir) = temp_cache(10);
        let chain = make_chain(3, 0xA0);
        cache_all(&cache, &chain);

        let replacement = make_block(3, chain[1].hash, 0xB0);
        cache.disconnect(&chain[2]).unwrap();
        cache.cache_block(&replacement).unwrap();

        assert_eq!(cache.get_block_by_sequence(3).unwrap().unwrap().hash, replacement.hash);
        assert_eq!(cache.head().unwrap(), Some(replacement.hash));
        assert_linked_from_head(&cache);
    }

    #[test]
    fn rollback_removes_blocks_above_new_head() {
        let (cache, _dir) = temp_cache(2);
        let chain = make_chain(8, 0xA0);
        cache_all(&cache, &chain);
        assert_eq!(cache.finalized_sequence().unwrap(), 6);

        cache.rollback_to(&chain[4]).unwrap();
        assert_eq!(cache.head().unwrap(), Some(chain[4].hash));
        assert_eq!(cache.head_sequence().unwrap(), 5);
        for block in &chain[5..] {
            assert!(cache.get_block_by_hash(&block.hash).unwrap().is_none());
            assert!(cache.get_block_by_sequence(block.sequence).unwrap().is_none());
        }
        assert_eq!(cache.finalized_sequence().unwrap(), 3);
        assert_linked_from_head(&cache);
    }

    #[test]
    fn rollback_keeps_lower_finality() {
        let (cache, _dir) = temp_cache(5);
        let chain = make_chain(8, 0xA0);
        cache_all(&cache, &chain);
        assert_eq!(cache.finalized_sequence().unwrap(), 3);

        // 7 - 5 = 2 < 3, so clamp to 2.
        cache.rollback_to(&chain[6]).unwrap();
        assert_eq!(cache.finalized_sequence().unwrap(), 2);
    }

    #[test]
    fn rollback_within_depth_clears_finality() {
        let (cache, _dir) = temp_cache(3);
        let chain = make_chain(6, 0xA0);
        cache_all(&cache, &chain);
        assert!(cache.is_final(3).unwrap());

        cache.rollback_to(&chain[1]).unwrap();
        assert!(!cache.is_final(1).unwrap());
        assert_eq!(cache.finalized_sequence().unwrap(), 4);
    }

    #[test]
    fn clear_empties_blocks_and_pointers() {
        let (cache, _dir) = temp_cache(2);
        let chain = make_chain(5, 0xA0);
        cache_all(&cache, &chain);

        assert_eq!(cache.clear().unwrap(), 5);
        assert_eq!(cache.head().unwrap(), None);
        assert_eq!(cache.head_sequence().unwrap(), 0);
        assert!(!cache.is_final(1).unwrap());
        assert!(cache.get_block_by_sequence(3).unwrap().is_none());
        assert!(cache.get_block_by_hash(&chain[4].hash).unwrap().is_none());

        // A different chain can be cached from genesis afterwards.
        let other = make_chain(3, 0xC0);
        cache_all(&cache, &other);
        assert_eq!(cache.head().unwrap(), Some(other[2].hash));
        assert_linked_from_head(&cache);
    }

    // ------------------------------------------------------------------
    // Persistence and maintenance
    // ------------------------------------------------------------------

    #[test]
    fn persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chaincache");
        let chain = make_chain(4, 0xA0);

        {
            let cache = ChainCache::open(&path, 1).unwrap();
            cache_all(&cache, &chain);
            cache.flush().unwrap();
        }

        {
            let cache = ChainCache::open(&path, 1).unwrap();
            assert_eq!(cache.head().unwrap(), Some(chain[3].hash));
            assert_eq!(cache.finalized_sequence().unwrap(), 3);
            assert_eq!(cache.get_block_by_sequence(2).unwrap().unwrap(), chain[1]);
        }
    }

    #[test]
    fn compact_succeeds() {
        let (cache, _dir) = temp_cache(2);
        let chain = make_chain(10, 0xA0);
        cache_all(&cache, &chain);
        cache.rollback_to(&chain[2]).unwrap();
        cache.compact().unwrap();
        assert_eq!(cache.head_sequence().unwrap(), 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn finality_never_exceeds_head_minus_depth(
            len in 1u64..30,
            depth in 1u64..8,
            retract in 0u64..30,
        ) {
            let (cache, _dir) = temp_cache(depth);
            let chain = make_chain(len, 0xC0);
            cache_all(&cache, &chain);
            for block in chain.iter().rev().take(retract as usize) {
                cache.disconnect(block).unwrap();
            }
            let head = cache.head_sequence().unwrap();
            if head > depth {
                prop_assert!(cache.finalized_sequence().unwrap() <= head - depth);
            } else {
                prop_assert!(!cache.is_final(1).unwrap());
            }
        }
    }
}
