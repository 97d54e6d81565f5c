use super::{read_u32, write_u32};
use crate::common::{DbError, IndexId, PageId, Result, PAGE_SIZE};

const MAGIC_NUMBER: u32 = 0x4958_5254;

const MAGIC_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 4;
const ENTRIES_OFFSET: usize = 8;

const ENTRY_SIZE: usize = 8; // index_id (4) + root_page_id (4)

/// Number of indexes whose roots fit in the directory
pub const MAX_INDEX_ROOTS: usize = (PAGE_SIZE - ENTRIES_OFFSET) / ENTRY_SIZE;

/// Directory of B+Tree roots kept on the reserved roots page, one
/// `(index_id, root_page_id)` entry per non-empty index.
pub struct IndexRootsPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> IndexRootsPage<B> {
    /// Wraps an existing directory page, rejecting one without the magic.
    pub fn new(data: B) -> Result<Self> {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        if read_u32(data.as_ref(), MAGIC_OFFSET) != MAGIC_NUMBER {
            return Err(DbError::InvalidDatabaseFile);
        }
        Ok(Self { data })
    }

    pub fn count(&self) -> usize {
        read_u32(self.data.as_ref(), COUNT_OFFSET) as usize
    }

    fn entry_offset(index: usize) -> usize {
        ENTRIES_OFFSET + index * ENTRY_SIZE
    }

    fn entry(&self, index: usize) -> (IndexId, PageId) {
        let offset = Self::entry_offset(index);
        let data = self.data.as_ref();
        (
            read_u32(data, offset),
            PageId::new(read_u32(data, offset + 4)),
        )
    }

    fn position(&self, index_id: IndexId) -> Option<usize> {
        (0..self.count()).find(|&i| self.entry(i).0 == index_id)
    }

    pub fn get_root_id(&self, index_id: IndexId) -> Option<PageId> {
        self.position(index_id).map(|i| self.entry(i).1)
    }

    pub fn entries(&self) -> Vec<(IndexId, PageId)> {
        (0..self.count()).map(|i| self.entry(i)).collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> IndexRootsPage<B> {
    /// Formats `data` as an empty directory.
    pub fn init(mut data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        let bytes = data.as_mut();
        bytes.fill(0);
        write_u32(bytes, MAGIC_OFFSET, MAGIC_NUMBER);
        write_u32(bytes, COUNT_OFFSET, 0);
        Self { data }
    }

    fn set_count(&mut self, count: usize) {
        write_u32(self.data.as_mut(), COUNT_OFFSET, count as u32);
    }

    fn set_entry(&mut self, index: usize, index_id: IndexId, root: PageId) {
        let offset = Self::entry_offset(index);
        let data = self.data.as_mut();
        write_u32(data, offset, index_id);
        write_u32(data, offset + 4, root.as_u32());
    }

    pub fn insert(&mut self, index_id: IndexId, root: PageId) -> Result<()> {
        if self.position(index_id).is_some() {
            return Err(DbError::IndexAlreadyExists(index_id));
        }
        let count = self.count();
        if count >= MAX_INDEX_ROOTS {
            return Err(DbError::DirectoryFull);
        }
        self.set_entry(count, index_id, root);
        self.set_count(count + 1);
        Ok(())
    }

    pub fn update(&mut self, index_id: IndexId, root: PageId) -> Result<()> {
        let index = self
            .position(index_id)
            .ok_or(DbError::IndexNotFound(index_id))?;
        self.set_entry(index, index_id, root);
        Ok(())
    }

    /// Removes the entry for `index_id`, returning whether one existed.
    pub fn delete(&mut self, index_id: IndexId) -> bool {
        let Some(index) = self.position(index_id) else {
            return false;
        };
        let last = self.count() - 1;
        if index < last {
            let (id, root) = self.entry(last);
            self.set_entry(index, id, root);
        }
        self.set_count(last);
        true
    }
}
