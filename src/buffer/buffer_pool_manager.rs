use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::common::{
    BufferPoolConfig, DbError, FrameId, PageId, ReplacerPolicy, Result, INVALID_PAGE_ID,
    RESERVED_PAGE_COUNT,
};
use crate::storage::disk::DiskManager;

use super::{
    BasicPageGuard, ClockReplacer, FrameHeader, LruKReplacer, LruReplacer, ReadPageGuard,
    Replacer, WritePageGuard,
};

/// Everything that changes when a page enters or leaves the pool. One latch
/// covers all of it so residency, free frames and evictability never
/// disagree.
struct PoolState {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that have never held a page or were freed by a delete
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
}

/// BufferPoolManager caches disk pages in a fixed number of frames.
///
/// Every successful `fetch_page`/`new_page` pins the page and must be
/// matched by exactly one `unpin_page`. The page guards do this on drop.
/// When no frame is free and nothing is evictable, fetches fail with
/// `Ok(None)` rather than waiting.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FrameHeader>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

fn build_replacer(policy: ReplacerPolicy, pool_size: usize) -> Box<dyn Replacer> {
    match policy {
        ReplacerPolicy::Lru => Box::new(LruReplacer::new(pool_size)),
        ReplacerPolicy::Clock => Box::new(ClockReplacer::new(pool_size)),
        ReplacerPolicy::LruK { k } => Box::new(LruKReplacer::new(k, pool_size)),
    }
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        let pool_size = config.pool_size;
        let frames = (0..pool_size)
            .map(|i| FrameHeader::new(FrameId::new(i as u32)))
            .collect();
        let free_list = (0..pool_size).map(|i| FrameId::new(i as u32)).collect();

        Self {
            pool_size,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                replacer: build_replacer(config.policy, pool_size),
            }),
            disk_manager,
        }
    }

    /// Pins `page_id`, reading it from disk on a miss.
    ///
    /// Returns `Ok(None)` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<&FrameHeader>> {
        if page_id == INVALID_PAGE_ID {
            return Err(DbError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            frame.pin();
            state.replacer.pin(frame_id);
            trace!("Buffer pool hit for page {}", page_id);
            return Ok(Some(frame));
        }

        let Some(frame_id) = self.acquire_frame(&mut state)? else {
            return Ok(None);
        };
        let frame = &self.frames[frame_id.as_usize()];

        let read = {
            let mut data = frame.write_data();
            self.disk_manager.read_page(page_id, &mut data[..])
        };
        if let Err(e) = read {
            frame.reset();
            state.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        trace!("Buffer pool miss for page {}, loaded into {}", page_id, frame_id);

        Ok(Some(frame))
    }

    /// Allocates a fresh page and pins it in a zero-filled frame.
    ///
    /// Returns `Ok(None)` when every frame is pinned or the disk has no free
    /// page left.
    pub fn new_page(&self) -> Result<Option<(PageId, &FrameHeader)>> {
        let mut state = self.state.lock();

        let Some(frame_id) = self.acquire_frame(&mut state)? else {
            return Ok(None);
        };

        let page_id = match self.disk_manager.allocate_page() {
            Ok(Some(page_id)) => page_id,
            Ok(None) => {
                state.free_list.push_back(frame_id);
                return Ok(None);
            }
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        let frame = &self.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        frame.pin();
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        trace!("New page {} in {}", page_id, frame_id);

        Ok(Some((page_id, frame)))
    }

    /// Drops one pin. Once the count reaches zero the frame becomes
    /// evictable. The dirty flag is sticky: `false` never clears it.
    ///
    /// Returns false if the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            warn!("Unpin of non-resident page {}", page_id);
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];

        if is_dirty {
            frame.set_dirty(true);
        }
        match frame.unpin() {
            Some(0) => {
                state.replacer.unpin(frame_id);
                true
            }
            Some(_) => true,
            None => {
                warn!("Unpin of page {} with pin count 0", page_id);
                false
            }
        }
    }

    /// Removes a page from the pool and releases its id on disk.
    ///
    /// Returns `Ok(false)` if the page is pinned or reserved. A page that is
    /// not resident is only released on disk.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        if page_id.as_u32() < RESERVED_PAGE_COUNT {
            warn!("Refusing to delete reserved page {}", page_id);
            return Ok(false);
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            if frame.pin_count() > 0 {
                return Ok(false);
            }
            state.page_table.remove(&page_id);
            state.replacer.remove(frame_id);
            frame.reset();
            state.free_list.push_back(frame_id);
        }

        self.disk_manager.deallocate_page(page_id)?;
        debug!("Deleted page {}", page_id);
        Ok(true)
    }

    /// Writes a resident page to disk whether or not it is dirty.
    ///
    /// Returns `Ok(false)` if the page is not resident. Guard holders take
    /// the pool latch while holding a page's data lock, so the latch is
    /// never held while blocking on a data lock: a page that is currently
    /// write-locked is retried after the latch is released. Must not be
    /// called while the caller holds a write guard on the same page.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        loop {
            let state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return Ok(false);
            };
            let frame = &self.frames[frame_id.as_usize()];

            if let Some(data) = frame.try_read_data() {
                self.disk_manager.write_page(page_id, &data[..])?;
                // Cleared under the data lock, so a later writer dirties it again
                frame.set_dirty(false);
                trace!("Flushed page {}", page_id);
                return Ok(true);
            }

            drop(state);
            thread::yield_now();
        }
    }

    /// Writes every page that is resident when the call starts. Pages
    /// evicted in the meantime were written back if dirty.
    pub fn flush_all_pages(&self) -> Result<()> {
        let resident: Vec<PageId> = self.state.lock().page_table.keys().copied().collect();

        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Writes an unpinned victim's bytes back. Nothing else can hold the
    /// data lock of a frame with no pins.
    fn write_back(&self, frame: &FrameHeader) -> Result<()> {
        let data = frame.read_data();
        self.disk_manager.write_page(frame.page_id(), &data[..])?;
        frame.set_dirty(false);
        Ok(())
    }

    /// Finds a frame for a new resident page: the free list first, then a
    /// replacer victim, written back first if dirty.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<Option<FrameId>> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = state.replacer.victim() else {
            debug!("No evictable frame among {}", self.pool_size);
            return Ok(None);
        };
        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            if let Err(e) = self.write_back(frame) {
                state.replacer.unpin(frame_id);
                return Err(e);
            }
        }

        state.page_table.remove(&old_page_id);
        frame.reset();
        debug!("Evicted page {} from {}", old_page_id, frame_id);

        Ok(Some(frame_id))
    }

    /// Pins a page without locking its bytes.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<Option<BasicPageGuard<'_>>> {
        Ok(self
            .fetch_page(page_id)?
            .map(|frame| BasicPageGuard::new(self, frame, page_id)))
    }

    /// Fetches a page for read access.
    /// Returns None if the buffer pool has no frame to put it in.
    pub fn checked_read_page(&self, page_id: PageId) -> Result<Option<ReadPageGuard<'_>>> {
        Ok(self
            .fetch_page_basic(page_id)?
            .map(BasicPageGuard::upgrade_read))
    }

    /// Fetches a page for write access.
    /// Returns None if the buffer pool has no frame to put it in.
    pub fn checked_write_page(&self, page_id: PageId) -> Result<Option<WritePageGuard<'_>>> {
        Ok(self
            .fetch_page_basic(page_id)?
            .map(BasicPageGuard::upgrade_write))
    }

    /// Like `checked_read_page`, with a full pool reported as
    /// `DbError::BufferPoolFull`.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        self.checked_read_page(page_id)?
            .ok_or(DbError::BufferPoolFull)
    }

    /// Like `checked_write_page`, with a full pool reported as
    /// `DbError::BufferPoolFull`.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        self.checked_write_page(page_id)?
            .ok_or(DbError::BufferPoolFull)
    }

    /// Allocates a page and returns it write-locked.
    pub fn new_page_guarded(&self) -> Result<Option<WritePageGuard<'_>>> {
        Ok(self
            .new_page()?
            .map(|(page_id, frame)| BasicPageGuard::new(self, frame, page_id).upgrade_write()))
    }

    /// Returns the pin count for a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frames[frame_id.as_usize()].pin_count())
    }

    /// Returns the dirty flag of a resident page.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frames[frame_id.as_usize()].is_dirty())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Number of frames the replacer could evict right now.
    pub fn evictable_count(&self) -> usize {
        self.state.lock().replacer.size()
    }

    pub fn is_page_free(&self, page_id: PageId) -> Result<bool> {
        self.disk_manager.is_page_free(page_id)
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Logs every page that is still pinned. Returns true if none are.
    pub fn check_all_unpinned(&self) -> bool {
        let state = self.state.lock();
        let mut all_unpinned = true;
        for (&page_id, &frame_id) in state.page_table.iter() {
            let pin_count = self.frames[frame_id.as_usize()].pin_count();
            if pin_count != 0 {
                warn!("Page {} still pinned ({} pins)", page_id, pin_count);
                all_unpinned = false;
            }
        }
        all_unpinned
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all_pages() {
            warn!("Failed to flush buffer pool on drop: {}", e);
        }
    }
}
