use std::path::Path;
use std::sync::Arc;

use log::info;

use crate::buffer::BufferPoolManager;
use crate::common::{
    BPlusTreeConfig, IndexId, PageId, Result, StorageConfig, INDEX_ROOTS_PAGE_ID,
};
use crate::index::{BPlusTree, KeyComparator};
use crate::storage::disk::DiskManager;
use crate::storage::page::IndexRootsPage;

/// One open database file: the disk manager, the buffer pool over it, and
/// the index roots directory on page 1.
pub struct StorageEngine {
    disk_manager: Arc<DiskManager>,
    bpm: Arc<BufferPoolManager>,
}

impl StorageEngine {
    /// Opens or creates the database at `path`. A freshly created file gets
    /// an empty index roots directory.
    pub fn open<P: AsRef<Path>>(path: P, config: StorageConfig) -> Result<Self> {
        let disk_manager = Arc::new(DiskManager::with_max_pages(path, config.max_pages)?);
        let bpm = Arc::new(BufferPoolManager::new(
            config.buffer_pool,
            Arc::clone(&disk_manager),
        ));

        if disk_manager.is_new() {
            let mut guard = bpm.write_page(INDEX_ROOTS_PAGE_ID)?;
            IndexRootsPage::init(guard.data_mut());
            info!("Initialized index roots directory in {}", disk_manager.db_path());
        }

        Ok(Self { disk_manager, bpm })
    }

    /// Opens (or lazily creates, on first insert) the index `index_id`.
    pub fn open_index(
        &self,
        index_id: IndexId,
        comparator: Arc<dyn KeyComparator>,
        config: BPlusTreeConfig,
    ) -> Result<BPlusTree> {
        BPlusTree::open(index_id, Arc::clone(&self.bpm), comparator, config)
    }

    /// Index ids currently registered in the roots directory, with their
    /// root pages.
    pub fn indexes(&self) -> Result<Vec<(IndexId, PageId)>> {
        let guard = self.bpm.read_page(INDEX_ROOTS_PAGE_ID)?;
        Ok(IndexRootsPage::new(guard.data())?.entries())
    }

    /// Writes every cached page and the allocator metadata, then syncs.
    pub fn flush(&self) -> Result<()> {
        self.bpm.flush_all_pages()?;
        self.disk_manager.close()
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{RecordId, SlotId};
    use crate::index::IntegerComparator;
    use tempfile::NamedTempFile;

    #[test]
    fn test_fresh_file_has_empty_roots_directory() {
        let temp_file = NamedTempFile::new().unwrap();
        let engine = StorageEngine::open(temp_file.path(), StorageConfig::default()).unwrap();

        assert!(engine.disk_manager().is_new());
        assert!(engine.indexes().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_index_roots() {
        let temp_file = NamedTempFile::new().unwrap();
        let root = {
            let engine = StorageEngine::open(temp_file.path(), StorageConfig::default()).unwrap();
            let mut tree = engine
                .open_index(7, Arc::new(IntegerComparator), BPlusTreeConfig::default())
                .unwrap();
            let rid = RecordId::new(PageId::new(3), SlotId::new(1));
            assert!(tree.insert(&42i32.to_le_bytes(), rid).unwrap());
            engine.flush().unwrap();
            tree.root_page_id().unwrap()
        };

        let engine = StorageEngine::open(temp_file.path(), StorageConfig::default()).unwrap();
        assert!(!engine.disk_manager().is_new());
        assert_eq!(engine.indexes().unwrap(), vec![(7, root)]);
    }
}
