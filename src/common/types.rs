use std::fmt;

use bytes::{Buf, BufMut};

use super::config::INVALID_PAGE_ID;

/// Page identifier type - a logical page address, independent of file layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        *self != INVALID_PAGE_ID
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// Frame identifier type - identifies a buffer frame in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.0)
    }
}

/// Slot identifier within a heap page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u16);

impl SlotId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

/// Record identifier - combination of page ID and slot ID.
///
/// The B+Tree stores these as opaque leaf values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    /// On-page encoding: page id (4) + slot id (2)
    pub const SERIALIZED_SIZE: usize = 6;

    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }

    pub fn write_to(&self, mut buf: &mut [u8]) {
        buf.put_u32_le(self.page_id.as_u32());
        buf.put_u16_le(self.slot_id.as_u16());
    }

    pub fn read_from(mut buf: &[u8]) -> Self {
        let page_id = PageId::new(buf.get_u32_le());
        let slot_id = SlotId::new(buf.get_u16_le());
        Self { page_id, slot_id }
    }
}

/// Identifier of an index; the key of its entry in the roots directory
pub type IndexId = u32;

/// Timestamp type for LRU-K tracking
pub type Timestamp = u64;
