//! In-memory block cache with LRU eviction using moka.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache;

use super::{BlockCache, BlockKey};
use crate::pixel::PixelBuffer;

/// Default cache budget: 256 MiB.
pub const DEFAULT_CACHE_BYTES: u64 = 256 * 1024 * 1024;

/// Bounded in-memory block cache.
///
/// Entries are weighted by their byte size, so the capacity is a memory
/// budget rather than an entry count.
pub struct MemoryBlockCache {
    cache: Cache<BlockKey, Arc<PixelBuffer>>,
    max_size_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryBlockCache {
    /// Create a cache holding at most `max_size_bytes` of block data.
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = Cache::builder()
            // moka uses u32 weights
            .weigher(|_key: &BlockKey, value: &Arc<PixelBuffer>| -> u32 {
                value.byte_len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();

        Self {
            cache,
            max_size_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Number of resident blocks.
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// Bytes currently held.
    pub fn size_bytes(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }

    /// Lookups that found a resident block.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that missed.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drop every block.
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }
}

impl Default for MemoryBlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTES)
    }
}

impl std::fmt::Debug for MemoryBlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlockCache")
            .field("max_size_bytes", &self.max_size_bytes)
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

impl BlockCache for MemoryBlockCache {
    fn try_get(&self, key: &BlockKey) -> Option<Arc<PixelBuffer>> {
        match self.cache.get(key) {
            Some(block) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(block)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn insert(&self, key: BlockKey, block: Arc<PixelBuffer>) {
        self.cache.insert(key, block);
    }

    fn contains(&self, key: &BlockKey) -> bool {
        self.cache.contains_key(key)
    }

    fn capacity_bytes(&self) -> u64 {
        self.max_size_bytes
    }
}
