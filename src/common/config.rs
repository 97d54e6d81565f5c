use super::error::{DbError, Result};
use super::types::{FrameId, PageId};
use crate::storage::page::{internal_page_capacity, leaf_page_capacity};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Logical page reserved for catalog metadata
pub const CATALOG_META_PAGE_ID: PageId = PageId(0);

/// Logical page holding the B+Tree roots directory
pub const INDEX_ROOTS_PAGE_ID: PageId = PageId(1);

/// Number of leading logical pages that are reserved and never handed out
/// by the allocator.
pub const RESERVED_PAGE_COUNT: u32 = 2;

/// Bytes of bookkeeping at the head of a bitmap page (allocated count + next free hint)
pub const BITMAP_HEADER_SIZE: usize = 8;

/// Number of data pages governed by one bitmap page
pub const BITMAP_SIZE: u32 = ((PAGE_SIZE - BITMAP_HEADER_SIZE) * 8) as u32;

/// Bytes of bookkeeping at the head of the disk meta page
/// (magic + allocated pages + extent count)
pub const DISK_META_HEADER_SIZE: usize = 12;

/// Maximum number of extents the meta page can describe
pub const MAX_EXTENTS: u32 = ((PAGE_SIZE - DISK_META_HEADER_SIZE) / 4) as u32;

/// Upper bound on the number of allocatable logical pages
pub const MAX_VALID_PAGE_ID: u32 = MAX_EXTENTS * BITMAP_SIZE;

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Which page replacement policy a buffer pool evicts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacerPolicy {
    Lru,
    Clock,
    LruK { k: usize },
}

impl Default for ReplacerPolicy {
    fn default() -> Self {
        ReplacerPolicy::Lru
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool
    pub pool_size: usize,
    pub policy: ReplacerPolicy,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_BUFFER_POOL_SIZE,
            policy: ReplacerPolicy::default(),
        }
    }
}

/// Settings used when opening a database file through the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageConfig {
    pub buffer_pool: BufferPoolConfig,
    /// Optional ceiling on allocated pages, lower than `MAX_VALID_PAGE_ID`.
    pub max_pages: Option<u32>,
}

/// Key size used by `BPlusTreeConfig::default()` (one 32-bit integer)
pub const DEFAULT_KEY_SIZE: usize = 4;

/// Shape of one B+Tree index.
///
/// Fan-outs default to what fits in a page for `key_size`, keeping one
/// spare slot so a page can overflow by one entry before it splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BPlusTreeConfig {
    pub key_size: usize,
    /// Maximum entries in a leaf page
    pub leaf_max_size: usize,
    /// Maximum children of an internal page
    pub internal_max_size: usize,
}

impl BPlusTreeConfig {
    pub fn new(key_size: usize) -> Self {
        Self {
            key_size,
            leaf_max_size: leaf_page_capacity(key_size).saturating_sub(1),
            internal_max_size: internal_page_capacity(key_size).saturating_sub(1),
        }
    }

    pub fn with_leaf_max_size(mut self, leaf_max_size: usize) -> Self {
        self.leaf_max_size = leaf_max_size;
        self
    }

    pub fn with_internal_max_size(mut self, internal_max_size: usize) -> Self {
        self.internal_max_size = internal_max_size;
        self
    }

    /// Checks that both page kinds can hold `max + 1` entries and that the
    /// fan-outs are large enough to split.
    pub fn validate(&self) -> Result<()> {
        if self.key_size == 0 {
            return Err(DbError::InvalidConfig("key size must be positive".to_string()));
        }
        if self.leaf_max_size < 2 || self.leaf_max_size >= leaf_page_capacity(self.key_size) {
            return Err(DbError::InvalidConfig(format!(
                "leaf max size {} out of range for {}-byte keys",
                self.leaf_max_size, self.key_size
            )));
        }
        if self.internal_max_size < 3
            || self.internal_max_size >= internal_page_capacity(self.key_size)
        {
            return Err(DbError::InvalidConfig(format!(
                "internal max size {} out of range for {}-byte keys",
                self.internal_max_size, self.key_size
            )));
        }
        Ok(())
    }
}

impl Default for BPlusTreeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_SIZE)
    }
}
