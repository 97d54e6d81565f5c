use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info, warn};
use parking_lot::ReentrantMutex;

use super::bitmap_page::BitmapPage;
use super::meta_page::DiskFileMetaPage;
use crate::common::{
    DbError, PageId, Result, BITMAP_SIZE, MAX_EXTENTS, MAX_VALID_PAGE_ID, PAGE_SIZE,
    RESERVED_PAGE_COUNT,
};

/// Physical page holding the allocator metadata
const META_PHYSICAL_PAGE: u32 = 0;

struct DiskState {
    file: RefCell<File>,
    meta: RefCell<DiskFileMetaPage>,
}

/// DiskManager maps a logical page id space onto one database file.
///
/// Physical layout is `[meta][bitmap 0][BITMAP_SIZE data pages][bitmap 1]...`.
/// Logical ids count data pages only; `map_page_id` skips the meta page and
/// every bitmap page in front of the target. All physical I/O goes through a
/// single reentrant lock, so allocation can read and write bitmap pages from
/// inside its own critical section.
pub struct DiskManager {
    state: ReentrantMutex<DiskState>,
    db_path: String,
    /// Ceiling on allocated logical pages, reserved pages included
    max_pages: u32,
    is_new: bool,
    num_reads: AtomicU32,
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens (or creates) the database file at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_max_pages(db_path, None)
    }

    /// Like `new`, but caps the number of allocatable pages below
    /// `MAX_VALID_PAGE_ID`.
    pub fn with_max_pages<P: AsRef<Path>>(db_path: P, max_pages: Option<u32>) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let is_new = file_size == 0;

        let meta = if is_new {
            DiskFileMetaPage::new()
        } else {
            let mut buf = [0u8; PAGE_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)
                .map_err(|_| DbError::InvalidDatabaseFile)?;
            DiskFileMetaPage::deserialize(&buf)?
        };

        let max_pages = max_pages
            .map(|m| m.clamp(RESERVED_PAGE_COUNT, MAX_VALID_PAGE_ID))
            .unwrap_or(MAX_VALID_PAGE_ID);

        let dm = Self {
            state: ReentrantMutex::new(DiskState {
                file: RefCell::new(file),
                meta: RefCell::new(meta),
            }),
            db_path: path_str,
            max_pages,
            is_new,
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        };

        if is_new {
            // Reserved ids come out of the allocator first on a fresh file
            for expected in 0..RESERVED_PAGE_COUNT {
                match dm.allocate_page()? {
                    Some(page_id) if page_id.as_u32() == expected => {}
                    _ => return Err(DbError::InvalidDatabaseFile),
                }
            }
            dm.write_meta()?;
            info!("Created database file {}", dm.db_path);
        } else {
            dm.rebuild_extent_counts()?;
            info!(
                "Opened database file {} ({} pages in {} extents)",
                dm.db_path,
                dm.num_allocated_pages(),
                dm.num_extents()
            );
        }

        Ok(dm)
    }

    /// Recomputes the per-extent counts from the bitmap pages. Bitmaps are
    /// written on every allocation, the meta page only on extent creation
    /// and close, so after an unclean shutdown the bitmaps are the truth.
    fn rebuild_extent_counts(&self) -> Result<()> {
        let state = self.state.lock();
        let num_extents = state.meta.borrow().num_extents();

        let mut counts = Vec::with_capacity(num_extents as usize);
        for extent in 0..num_extents {
            let mut buf = [0u8; PAGE_SIZE];
            self.read_physical_page(Self::bitmap_physical_id(extent), &mut buf)?;
            counts.push(BitmapPage::new(&mut buf).page_allocated());
        }

        let mut meta = state.meta.borrow_mut();
        if meta.extent_used_page != counts {
            warn!(
                "Allocator metadata of {} was stale, rebuilt from bitmaps",
                self.db_path
            );
        }
        meta.num_allocated_pages = counts.iter().sum();
        meta.extent_used_page = counts;
        Ok(())
    }

    /// Translates a logical page id into its physical page number.
    pub fn map_page_id(logical: PageId) -> u32 {
        let logical = logical.as_u32();
        let extent = logical / BITMAP_SIZE;
        let offset = logical % BITMAP_SIZE;
        Self::bitmap_physical_id(extent) + 1 + offset
    }

    fn bitmap_physical_id(extent: u32) -> u32 {
        1 + extent * (BITMAP_SIZE + 1)
    }

    fn check_page_id(page_id: PageId) -> Result<()> {
        if !page_id.is_valid() || page_id.as_u32() >= MAX_VALID_PAGE_ID {
            return Err(DbError::InvalidPageId(page_id));
        }
        Ok(())
    }

    /// Reads a logical page into `data`. Pages past the end of the file read
    /// back as zeros.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        Self::check_page_id(page_id)?;
        self.read_physical_page(Self::map_page_id(page_id), data)
    }

    /// Writes `data` to a logical page.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        Self::check_page_id(page_id)?;
        self.write_physical_page(Self::map_page_id(page_id), data)
    }

    /// Allocates a logical page. Returns `Ok(None)` once the page ceiling is
    /// reached and no extent has room.
    pub fn allocate_page(&self) -> Result<Option<PageId>> {
        let state = self.state.lock();

        let (extent, created) = {
            let mut meta = state.meta.borrow_mut();
            if meta.num_allocated_pages >= self.max_pages {
                return Ok(None);
            }
            match meta.first_extent_with_room() {
                Some(extent) => (extent, false),
                None => {
                    if meta.num_extents() >= MAX_EXTENTS {
                        return Ok(None);
                    }
                    let extent = meta.add_extent();
                    debug!("Created extent {}", extent);
                    (extent, true)
                }
            }
        };
        // The extent count only lives in the meta page
        if created {
            self.write_meta()?;
        }

        let bitmap_id = Self::bitmap_physical_id(extent);
        let mut buf = [0u8; PAGE_SIZE];
        self.read_physical_page(bitmap_id, &mut buf)?;
        let offset = BitmapPage::new(&mut buf)
            .allocate_page()
            .ok_or(DbError::InvalidDatabaseFile)?;
        self.write_physical_page(bitmap_id, &buf)?;

        let mut meta = state.meta.borrow_mut();
        meta.extent_used_page[extent as usize] += 1;
        meta.num_allocated_pages += 1;

        Ok(Some(PageId::new(extent * BITMAP_SIZE + offset)))
    }

    /// Releases a logical page. Returns false if it was already free or is
    /// one of the reserved pages. The data page itself is left untouched.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<bool> {
        Self::check_page_id(page_id)?;
        if page_id.as_u32() < RESERVED_PAGE_COUNT {
            warn!("Refusing to deallocate reserved page {}", page_id);
            return Ok(false);
        }

        let state = self.state.lock();
        let extent = page_id.as_u32() / BITMAP_SIZE;
        if extent >= state.meta.borrow().num_extents() {
            warn!("Deallocate of unallocated page {}", page_id);
            return Ok(false);
        }

        let bitmap_id = Self::bitmap_physical_id(extent);
        let mut buf = [0u8; PAGE_SIZE];
        self.read_physical_page(bitmap_id, &mut buf)?;
        if !BitmapPage::new(&mut buf).deallocate_page(page_id.as_u32() % BITMAP_SIZE) {
            warn!("Deallocate of free page {}", page_id);
            return Ok(false);
        }
        self.write_physical_page(bitmap_id, &buf)?;

        let mut meta = state.meta.borrow_mut();
        meta.extent_used_page[extent as usize] -= 1;
        meta.num_allocated_pages -= 1;
        Ok(true)
    }

    /// Whether the logical page is unallocated according to its bitmap.
    pub fn is_page_free(&self, page_id: PageId) -> Result<bool> {
        Self::check_page_id(page_id)?;

        let state = self.state.lock();
        let extent = page_id.as_u32() / BITMAP_SIZE;
        if extent >= state.meta.borrow().num_extents() {
            return Ok(true);
        }

        let mut buf = [0u8; PAGE_SIZE];
        self.read_physical_page(Self::bitmap_physical_id(extent), &mut buf)?;
        Ok(BitmapPage::new(&mut buf).is_page_free(page_id.as_u32() % BITMAP_SIZE))
    }

    fn read_physical_page(&self, physical: u32, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let state = self.state.lock();
        let mut file = state.file.borrow_mut();
        file.seek(SeekFrom::Start(physical as u64 * PAGE_SIZE as u64))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        // Sparse tail of the file
        data[filled..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_physical_page(&self, physical: u32, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let state = self.state.lock();
        let mut file = state.file.borrow_mut();
        file.seek(SeekFrom::Start(physical as u64 * PAGE_SIZE as u64))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_meta(&self) -> Result<()> {
        let state = self.state.lock();
        let mut buf = [0u8; PAGE_SIZE];
        state.meta.borrow().serialize(&mut buf);
        self.write_physical_page(META_PHYSICAL_PAGE, &buf)
    }

    /// Persists the allocator metadata and syncs the file.
    pub fn close(&self) -> Result<()> {
        self.write_meta()?;
        self.sync()
    }

    /// Flushes any buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        let state = self.state.lock();
        state.file.borrow().sync_all()?;
        Ok(())
    }

    pub fn num_allocated_pages(&self) -> u32 {
        self.state.lock().meta.borrow().num_allocated_pages
    }

    pub fn num_extents(&self) -> u32 {
        self.state.lock().meta.borrow().num_extents()
    }

    /// Used data pages in `extent`, or None if the extent does not exist.
    pub fn extent_used_pages(&self, extent: u32) -> Option<u32> {
        self.state
            .lock()
            .meta
            .borrow()
            .extent_used_page
            .get(extent as usize)
            .copied()
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// True if this manager initialised a brand-new file.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Returns the number of physical page reads performed.
    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of physical page writes performed.
    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to persist allocator metadata for {}: {}", self.db_path, e);
        }
    }
}
