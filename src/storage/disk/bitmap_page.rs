use bytes::{Buf, BufMut};

use crate::common::{BITMAP_HEADER_SIZE, BITMAP_SIZE, PAGE_SIZE};

const PAGE_ALLOCATED_OFFSET: usize = 0;
const NEXT_FREE_PAGE_OFFSET: usize = 4;

/// Bitmap page layout:
///
/// +----------------------+
/// | page_allocated (u32) |
/// | next_free_page (u32) |
/// +----------------------+
/// | bitmap bytes         |  one bit per data page of the extent, 1 = allocated
/// +----------------------+
///
/// `next_free_page` is only a hint: it is re-checked against the bitmap
/// before use and a circular scan takes over when it is stale.
pub struct BitmapPage<'a> {
    data: &'a mut [u8],
}

impl<'a> BitmapPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    /// Number of data pages currently allocated in this extent.
    pub fn page_allocated(&self) -> u32 {
        (&self.data[PAGE_ALLOCATED_OFFSET..]).get_u32_le()
    }

    fn set_page_allocated(&mut self, count: u32) {
        (&mut self.data[PAGE_ALLOCATED_OFFSET..]).put_u32_le(count);
    }

    pub fn next_free_page(&self) -> u32 {
        (&self.data[NEXT_FREE_PAGE_OFFSET..]).get_u32_le()
    }

    fn set_next_free_page(&mut self, offset: u32) {
        (&mut self.data[NEXT_FREE_PAGE_OFFSET..]).put_u32_le(offset % BITMAP_SIZE);
    }

    /// Claims a free data page and returns its offset within the extent.
    /// Returns None only when every page of the extent is allocated.
    pub fn allocate_page(&mut self) -> Option<u32> {
        if self.page_allocated() >= BITMAP_SIZE {
            return None;
        }

        let hint = self.next_free_page() % BITMAP_SIZE;
        let offset = if self.is_page_free(hint) {
            hint
        } else {
            self.find_free_page(hint)?
        };

        self.set_taken(offset);
        self.set_page_allocated(self.page_allocated() + 1);
        self.set_next_free_page(offset + 1);
        Some(offset)
    }

    /// Releases the page at `offset`. Fails if it is already free or if the
    /// extent has no allocated pages.
    pub fn deallocate_page(&mut self, offset: u32) -> bool {
        if offset >= BITMAP_SIZE || self.is_page_free(offset) || self.page_allocated() == 0 {
            return false;
        }

        let (byte, bit) = Self::locate(offset);
        self.data[byte] &= !(1u8 << bit);
        self.set_page_allocated(self.page_allocated() - 1);
        // The freed slot is the cheapest next candidate
        self.set_next_free_page(offset);
        true
    }

    pub fn is_page_free(&self, offset: u32) -> bool {
        if offset >= BITMAP_SIZE {
            return false;
        }
        let (byte, bit) = Self::locate(offset);
        self.data[byte] & (1u8 << bit) == 0
    }

    fn set_taken(&mut self, offset: u32) {
        let (byte, bit) = Self::locate(offset);
        self.data[byte] |= 1u8 << bit;
    }

    /// Circular scan starting at `start`, skipping fully allocated bytes.
    fn find_free_page(&self, start: u32) -> Option<u32> {
        let mut offset = start;
        let mut visited = 0;
        while visited < BITMAP_SIZE {
            let (byte, bit) = Self::locate(offset);
            if bit == 0 && self.data[byte] == u8::MAX {
                let step = 8.min(BITMAP_SIZE - visited);
                visited += step;
                offset = (offset + step) % BITMAP_SIZE;
                continue;
            }
            if self.is_page_free(offset) {
                return Some(offset);
            }
            visited += 1;
            offset = (offset + 1) % BITMAP_SIZE;
        }
        None
    }

    fn locate(offset: u32) -> (usize, u32) {
        (BITMAP_HEADER_SIZE + (offset / 8) as usize, offset % 8)
    }
}
