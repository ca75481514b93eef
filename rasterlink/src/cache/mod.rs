//! Block cache contract.
//!
//! Blocks are the unit of residency: one `block_size`×`block_size` square
//! of one band on one raster level. The cache decides eviction on its own;
//! the planner only asks whether a block is resident and commits new ones.

mod memory;

pub use memory::MemoryBlockCache;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::metadata::BandId;
use crate::pixel::PixelBuffer;

/// Identity of a cached block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    /// Level namespace, unique per session level.
    pub namespace: u64,
    pub band: BandId,
    pub block_x: u32,
    pub block_y: u32,
}

impl BlockKey {
    pub fn new(namespace: u64, band: BandId, block_x: u32, block_y: u32) -> Self {
        Self {
            namespace,
            band,
            block_x,
            block_y,
        }
    }
}

/// Storage for fetched blocks.
pub trait BlockCache: Send + Sync {
    /// The block if it is resident.
    fn try_get(&self, key: &BlockKey) -> Option<Arc<PixelBuffer>>;

    /// Commit a block.
    fn insert(&self, key: BlockKey, block: Arc<PixelBuffer>);

    /// True if the block is resident.
    fn contains(&self, key: &BlockKey) -> bool {
        self.try_get(key).is_some()
    }

    /// Total budget in bytes.
    fn capacity_bytes(&self) -> u64;
}

static NEXT_NAMESPACE: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh namespace, so that levels and sessions sharing one
/// cache never see each other's blocks.
pub fn next_namespace() -> u64 {
    NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed)
}
