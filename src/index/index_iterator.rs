use crate::buffer::{BasicPageGuard, BufferPoolManager};
use crate::common::{DbError, PageId, RecordId, Result};
use crate::storage::page::BTreeLeafPage;

use super::BPlusTree;

/// Forward cursor over the leaf chain of a `BPlusTree`.
///
/// Keeps the current leaf pinned (not latched) and yields owned
/// `(key, RecordId)` pairs in key order. A cursor is either on a live entry
/// or at the end; two cursors are equal when they point at the same slot of
/// the same page, so every end cursor equals `BPlusTree::end()`.
pub struct IndexIterator<'a> {
    bpm: &'a BufferPoolManager,
    guard: Option<BasicPageGuard<'a>>,
    index: usize,
    error: Option<DbError>,
}

impl<'a> IndexIterator<'a> {
    pub(crate) fn begin(tree: &'a BPlusTree) -> Result<Self> {
        let leaf = tree.find_leaf(None)?;
        Self::positioned(tree.bpm(), leaf, |_| Ok(0))
    }

    pub(crate) fn begin_at(tree: &'a BPlusTree, key: &[u8]) -> Result<Self> {
        let leaf = tree.find_leaf(Some(key))?;
        Self::positioned(tree.bpm(), leaf, |data| {
            Ok(BTreeLeafPage::new(data)?.key_index(key, tree.comparator()))
        })
    }

    pub(crate) fn end(tree: &'a BPlusTree) -> Self {
        Self {
            bpm: tree.bpm(),
            guard: None,
            index: 0,
            error: None,
        }
    }

    fn positioned<F>(bpm: &'a BufferPoolManager, leaf: Option<PageId>, slot: F) -> Result<Self>
    where
        F: FnOnce(&[u8]) -> Result<usize>,
    {
        let mut iter = Self {
            bpm,
            guard: None,
            index: 0,
            error: None,
        };
        if let Some(page_id) = leaf {
            let guard = bpm
                .fetch_page_basic(page_id)?
                .ok_or(DbError::BufferPoolFull)?;
            iter.index = slot(&guard.read()[..])?;
            iter.guard = Some(guard);
            iter.settle()?;
        }
        Ok(iter)
    }

    /// Page the cursor is on, None at the end.
    pub fn page_id(&self) -> Option<PageId> {
        self.guard.as_ref().map(BasicPageGuard::page_id)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }

    /// Moves forward across leaves until the cursor rests on an entry or
    /// runs off the last leaf.
    fn settle(&mut self) -> Result<()> {
        loop {
            let Some(guard) = self.guard.as_ref() else {
                self.index = 0;
                return Ok(());
            };
            let next = {
                let data = guard.read();
                let leaf = BTreeLeafPage::new(&data[..])?;
                if self.index < leaf.size() {
                    return Ok(());
                }
                leaf.next_page_id()
            };

            self.guard = None;
            self.index = 0;
            if let Some(page_id) = next {
                self.guard = Some(
                    self.bpm
                        .fetch_page_basic(page_id)?
                        .ok_or(DbError::BufferPoolFull)?,
                );
            }
        }
    }

    fn current(&self) -> Result<Option<(Vec<u8>, RecordId)>> {
        let Some(guard) = self.guard.as_ref() else {
            return Ok(None);
        };
        let data = guard.read();
        let leaf = BTreeLeafPage::new(&data[..])?;
        Ok(Some((leaf.key_at(self.index).to_vec(), leaf.value_at(self.index))))
    }
}

impl PartialEq for IndexIterator<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.page_id() == other.page_id() && self.index == other.index
    }
}

impl Iterator for IndexIterator<'_> {
    type Item = Result<(Vec<u8>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.error.take() {
            self.guard = None;
            return Some(Err(err));
        }

        let entry = match self.current() {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                self.guard = None;
                return Some(Err(e));
            }
        };

        self.index += 1;
        if let Err(e) = self.settle() {
            self.guard = None;
            self.index = 0;
            self.error = Some(e);
        }
        Some(Ok(entry))
    }
}
