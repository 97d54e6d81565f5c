use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// One buffer frame: the page bytes plus the metadata the buffer pool keeps
/// about whichever page currently occupies it.
///
/// `page_id`, `pin_count` and `is_dirty` only change while the buffer pool
/// latch is held. The data lock is independent of that latch and is what
/// page guards hold.
pub struct FrameHeader {
    frame_id: FrameId,
    page_id: AtomicU32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID.as_u32()),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Page held by this frame, `INVALID_PAGE_ID` when the frame is free.
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    /// Returns None if the pin count was already 0.
    pub(crate) fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Shared access to the page bytes.
    pub fn read_data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Shared access to the page bytes, or None while a writer holds them.
    pub(crate) fn try_read_data(&self) -> Option<RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>>> {
        self.data.try_read()
    }

    /// Exclusive access to the page bytes. Callers of the raw buffer pool API
    /// report modifications through `unpin_page(.., true)`.
    pub fn write_data(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Returns the frame to its unused, zero-filled state.
    pub(crate) fn reset(&self) {
        self.set_page_id(INVALID_PAGE_ID);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_new() {
        let frame = FrameHeader::new(FrameId::new(0));
        assert_eq!(frame.frame_id(), FrameId::new(0));
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_header_pin_unpin() {
        let frame = FrameHeader::new(FrameId::new(0));

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), Some(1));
        assert_eq!(frame.unpin(), Some(0));
        assert_eq!(frame.unpin(), None);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_frame_header_reset() {
        let frame = FrameHeader::new(FrameId::new(3));

        frame.set_page_id(PageId::new(5));
        frame.pin();
        frame.set_dirty(true);
        frame.write_data().fill(1);

        frame.reset();

        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(frame.read_data().iter().all(|&b| b == 0));
    }
}
