use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::{BufferPoolManager, FrameHeader};

/// Holds one pin on a page and releases it on drop.
///
/// The page bytes are not locked; `read` takes the shared data lock only
/// for as long as the returned guard lives.
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a FrameHeader,
    page_id: PageId,
    is_dirty: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame: &'a FrameHeader, page_id: PageId) -> Self {
        Self {
            bpm,
            frame,
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Briefly borrows the page bytes.
    pub fn read(&self) -> RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Keeps the pin and takes the shared data lock.
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        ReadPageGuard {
            data: self.frame.read_data(),
            basic: self,
        }
    }

    /// Keeps the pin and takes the exclusive data lock.
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        WritePageGuard {
            data: self.frame.write_data(),
            basic: self,
        }
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// Pin plus shared lock on the page bytes.
pub struct ReadPageGuard<'a> {
    // Field order matters: the data lock is released before the pin.
    data: RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
    basic: BasicPageGuard<'a>,
}

impl ReadPageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.basic.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

/// Pin plus exclusive lock on the page bytes. Taking mutable access marks
/// the page dirty when the guard is dropped.
pub struct WritePageGuard<'a> {
    // Field order matters: the data lock is released before the pin.
    data: RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>,
    basic: BasicPageGuard<'a>,
}

impl WritePageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.basic.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.basic.is_dirty = true;
        &mut self.data[..]
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::common::BufferPoolConfig;
    use crate::storage::disk::DiskManager;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let config = BufferPoolConfig {
            pool_size,
            ..Default::default()
        };
        (BufferPoolManager::new(config, dm), temp_file)
    }

    #[test]
    fn test_read_guard_unpins_on_drop() {
        let (bpm, _temp) = create_bpm(4);
        let page_id = bpm.new_page_guarded().unwrap().unwrap().page_id();

        let guard = bpm.checked_read_page(page_id).unwrap().unwrap();
        assert_eq!(bpm.pin_count(page_id), Some(1));
        let second = bpm.checked_read_page(page_id).unwrap().unwrap();
        assert_eq!(bpm.pin_count(page_id), Some(2));

        drop(guard);
        drop(second);
        assert_eq!(bpm.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_write_guard_marks_dirty() {
        let (bpm, _temp) = create_bpm(4);
        let page_id = bpm.new_page_guarded().unwrap().unwrap().page_id();
        bpm.flush_page(page_id).unwrap();

        {
            let guard = bpm.checked_write_page(page_id).unwrap().unwrap();
            assert_eq!(guard.data()[0], 0);
        }
        assert!(!bpm.is_dirty(page_id).unwrap());

        {
            let mut guard = bpm.checked_write_page(page_id).unwrap().unwrap();
            guard[0] = 42;
        }
        assert!(bpm.is_dirty(page_id).unwrap());
        assert_eq!(bpm.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_basic_guard_upgrade() {
        let (bpm, _temp) = create_bpm(4);
        let page_id = {
            let mut guard = bpm.new_page_guarded().unwrap().unwrap();
            guard.data_mut()[7] = 9;
            guard.page_id()
        };

        let basic = bpm.fetch_page_basic(page_id).unwrap().unwrap();
        assert_eq!(basic.read()[7], 9);
        let mut write = basic.upgrade_write();
        write.data_mut()[8] = 10;
        assert_eq!(bpm.pin_count(page_id), Some(1));
        drop(write);

        let read = bpm.fetch_page_basic(page_id).unwrap().unwrap().upgrade_read();
        assert_eq!(read.data()[8], 10);
        drop(read);
        assert_eq!(bpm.pin_count(page_id), Some(0));
    }
}
