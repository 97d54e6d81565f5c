use bytes::{Buf, BufMut};

use crate::common::{DbError, Result, BITMAP_SIZE, MAX_EXTENTS, PAGE_SIZE};

/// Magic number identifying a database file's allocator meta page
pub const DISK_META_MAGIC: u32 = 0x5044_424D;

/// Allocator metadata stored in physical page 0.
///
/// Layout (little-endian):
///
/// | magic (4) | num_allocated_pages (4) | num_extents (4) | extent_used_page[num_extents] (4 each) |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskFileMetaPage {
    pub num_allocated_pages: u32,
    /// Used data pages per extent, indexed by extent number
    pub extent_used_page: Vec<u32>,
}

impl DiskFileMetaPage {
    pub fn new() -> Self {
        Self {
            num_allocated_pages: 0,
            extent_used_page: Vec::new(),
        }
    }

    pub fn num_extents(&self) -> u32 {
        self.extent_used_page.len() as u32
    }

    /// First extent that still has a free data page.
    pub fn first_extent_with_room(&self) -> Option<u32> {
        self.extent_used_page
            .iter()
            .position(|&used| used < BITMAP_SIZE)
            .map(|extent| extent as u32)
    }

    /// Appends an empty extent and returns its index.
    pub fn add_extent(&mut self) -> u32 {
        self.extent_used_page.push(0);
        self.num_extents() - 1
    }

    pub fn serialize(&self, mut buf: &mut [u8]) {
        assert_eq!(buf.len(), PAGE_SIZE);
        buf.put_u32_le(DISK_META_MAGIC);
        buf.put_u32_le(self.num_allocated_pages);
        buf.put_u32_le(self.num_extents());
        for &used in &self.extent_used_page {
            buf.put_u32_le(used);
        }
        let remaining = buf.remaining_mut();
        buf.put_bytes(0, remaining);
    }

    pub fn deserialize(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < PAGE_SIZE || buf.get_u32_le() != DISK_META_MAGIC {
            return Err(DbError::InvalidDatabaseFile);
        }
        let num_allocated_pages = buf.get_u32_le();
        let num_extents = buf.get_u32_le();
        if num_extents > MAX_EXTENTS {
            return Err(DbError::InvalidDatabaseFile);
        }
        let extent_used_page = (0..num_extents).map(|_| buf.get_u32_le()).collect();

        Ok(Self {
            num_allocated_pages,
            extent_used_page,
        })
    }
}

impl Default for DiskFileMetaPage {
    fn default() -> Self {
        Self::new()
    }
}
