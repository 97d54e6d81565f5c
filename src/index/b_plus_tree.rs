use std::cmp::Ordering;
use std::sync::Arc;

use log::{debug, warn};

use crate::buffer::BufferPoolManager;
use crate::common::{
    BPlusTreeConfig, DbError, IndexId, PageId, RecordId, Result, INDEX_ROOTS_PAGE_ID,
};
use crate::storage::page::{
    btree_page_type, set_btree_parent_page_id, BTreeInternalPage, BTreeLeafPage, BTreePage,
    BTreePageType, IndexRootsPage,
};

use super::{IndexIterator, KeyComparator};

/// A unique-key B+Tree over fixed-size binary keys, stored in buffer pool
/// pages.
///
/// Leaves hold `(key, RecordId)` pairs and are chained left to right.
/// Internal pages route lookups by separator keys. The root page id is
/// recorded in the shared index roots directory under `index_id`, so many
/// trees can live in one file.
///
/// Every page access goes through a page guard and no guard is held across
/// a call that might fetch the same page again.
pub struct BPlusTree {
    index_id: IndexId,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    key_size: usize,
    leaf_max_size: usize,
    internal_max_size: usize,
    root_page_id: Option<PageId>,
}

impl BPlusTree {
    /// Opens the index `index_id`, picking up its root from the roots
    /// directory if it already has one. A fresh index starts empty.
    pub fn open(
        index_id: IndexId,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        config: BPlusTreeConfig,
    ) -> Result<Self> {
        config.validate()?;

        let root_page_id = {
            let guard = bpm.read_page(INDEX_ROOTS_PAGE_ID)?;
            IndexRootsPage::new(guard.data())?.get_root_id(index_id)
        };

        if let Some(root_id) = root_page_id {
            let guard = bpm.read_page(root_id)?;
            let root = BTreePage::new(guard.data())?;
            if root.key_size() != config.key_size {
                return Err(DbError::InvalidConfig(format!(
                    "index {} stores {}-byte keys, opened with {}",
                    index_id,
                    root.key_size(),
                    config.key_size
                )));
            }
        }

        Ok(Self {
            index_id,
            bpm,
            comparator,
            key_size: config.key_size,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            root_page_id,
        })
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn root_page_id(&self) -> Option<PageId> {
        self.root_page_id
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id.is_none()
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    pub(crate) fn bpm(&self) -> &BufferPoolManager {
        &self.bpm
    }

    pub(crate) fn comparator(&self) -> &dyn KeyComparator {
        self.comparator.as_ref()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            return Err(DbError::KeySizeMismatch {
                expected: self.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<RecordId>> {
        self.check_key(key)?;
        let Some(leaf_id) = self.find_leaf(Some(key))? else {
            return Ok(None);
        };
        let guard = self.bpm.read_page(leaf_id)?;
        let leaf = BTreeLeafPage::new(guard.data())?;
        Ok(leaf.lookup(key, self.comparator()))
    }

    /// Descends to the leaf that covers `key`, or the leftmost leaf when
    /// `key` is None.
    pub(crate) fn find_leaf(&self, key: Option<&[u8]>) -> Result<Option<PageId>> {
        let Some(mut page_id) = self.root_page_id else {
            return Ok(None);
        };

        loop {
            let guard = self.bpm.read_page(page_id)?;
            if btree_page_type(guard.data())? == BTreePageType::Leaf {
                return Ok(Some(page_id));
            }
            let internal = BTreeInternalPage::new(guard.data())?;
            page_id = match key {
                Some(key) => internal.lookup(key, self.comparator()),
                None => internal.value_at(0),
            };
        }
    }

    /// Inserts a unique key. Returns `Ok(false)` and leaves the tree
    /// untouched if the key is already present.
    pub fn insert(&mut self, key: &[u8], value: RecordId) -> Result<bool> {
        self.check_key(key)?;
        match self.find_leaf(Some(key))? {
            None => {
                self.start_new_tree(key, value)?;
                Ok(true)
            }
            Some(leaf_id) => self.insert_into_leaf(leaf_id, key, value),
        }
    }

    fn start_new_tree(&mut self, key: &[u8], value: RecordId) -> Result<()> {
        let root_id = {
            let mut guard = self.bpm.new_page_guarded()?.ok_or(DbError::OutOfMemory)?;
            let root_id = guard.page_id();
            let mut leaf = BTreeLeafPage::init(
                guard.data_mut(),
                root_id,
                None,
                self.key_size,
                self.leaf_max_size,
            );
            leaf.insert(key, value, self.comparator.as_ref());
            root_id
        };

        if let Err(e) = self.update_root(Some(root_id)) {
            self.release_pages(vec![root_id]);
            return Err(e);
        }
        debug!("Index {} started with root leaf {}", self.index_id, root_id);
        Ok(())
    }

    fn insert_into_leaf(&mut self, leaf_id: PageId, key: &[u8], value: RecordId) -> Result<bool> {
        let comparator = Arc::clone(&self.comparator);
        let (needs_split, parent_id) = {
            let guard = self.bpm.read_page(leaf_id)?;
            let leaf = BTreeLeafPage::new(guard.data())?;
            if leaf.lookup(key, comparator.as_ref()).is_some() {
                return Ok(false);
            }
            (leaf.size() >= self.leaf_max_size, leaf.parent_page_id())
        };

        // Every page the split will need is allocated before anything moves,
        // so running out of pages leaves the tree as it was.
        let mut reserved = if needs_split {
            self.reserve_split_pages(parent_id)?
        } else {
            Vec::new()
        };

        // Both pages are pinned before the leaf changes
        let bpm = Arc::clone(&self.bpm);
        let mut guard = match bpm.write_page(leaf_id) {
            Ok(guard) => guard,
            Err(e) => {
                self.release_pages(reserved);
                return Err(e);
            }
        };
        let new_guard = match reserved.pop() {
            Some(new_id) => match bpm.write_page(new_id) {
                Ok(new_guard) => Some(new_guard),
                Err(e) => {
                    reserved.push(new_id);
                    self.release_pages(reserved);
                    return Err(e);
                }
            },
            None => None,
        };

        let mut leaf = BTreeLeafPage::new(guard.data_mut())?;
        leaf.insert(key, value, comparator.as_ref());
        let Some(mut new_guard) = new_guard else {
            return Ok(true);
        };

        let new_id = new_guard.page_id();
        let mut new_leaf = BTreeLeafPage::init(
            new_guard.data_mut(),
            new_id,
            parent_id,
            self.key_size,
            self.leaf_max_size,
        );
        leaf.move_half_to(&mut new_leaf);
        let separator = new_leaf.key_at(0).to_vec();
        drop(new_guard);
        drop(guard);

        debug!("Split leaf {} into {}", leaf_id, new_id);
        self.insert_into_parent(leaf_id, parent_id, &separator, new_id, &mut reserved)?;
        if !reserved.is_empty() {
            warn!("{} pages reserved for a split went unused", reserved.len());
            self.release_pages(reserved);
        }
        Ok(true)
    }

    /// Allocates the pages splitting a full leaf under `parent_id` takes:
    /// the new leaf, a sibling for every full ancestor, and a new root when
    /// the split reaches the top. On failure nothing stays allocated.
    fn reserve_split_pages(&self, parent_id: Option<PageId>) -> Result<Vec<PageId>> {
        let mut needed = 1;
        let mut next = parent_id;
        while let Some(page_id) = next {
            let guard = self.bpm.read_page(page_id)?;
            let page = BTreePage::new(guard.data())?;
            if page.size() < self.internal_max_size {
                break;
            }
            needed += 1;
            next = page.parent_page_id();
        }
        if next.is_none() {
            needed += 1;
        }

        let mut reserved = Vec::with_capacity(needed);
        for _ in 0..needed {
            match self.bpm.new_page() {
                Ok(Some((page_id, _))) => {
                    self.bpm.unpin_page(page_id, false);
                    reserved.push(page_id);
                }
                Ok(None) => {
                    debug!(
                        "Index {} split needs {} pages, only {} available",
                        self.index_id,
                        needed,
                        reserved.len()
                    );
                    self.release_pages(reserved);
                    return Err(DbError::OutOfMemory);
                }
                Err(e) => {
                    self.release_pages(reserved);
                    return Err(e);
                }
            }
        }
        // Popped from the back, so hand out the lowest ids first
        reserved.reverse();
        Ok(reserved)
    }

    fn take_reserved(reserved: &mut Vec<PageId>) -> Result<PageId> {
        reserved.pop().ok_or(DbError::OutOfMemory)
    }

    /// Returns pages to the allocator on a failure path.
    fn release_pages(&self, pages: Vec<PageId>) {
        for page_id in pages {
            match self.bpm.delete_page(page_id) {
                Ok(true) => {}
                Ok(false) => warn!("Page {} is still pinned and was not freed", page_id),
                Err(e) => warn!("Failed to free page {}: {}", page_id, e),
            }
        }
    }

    /// Links `new_id` into the tree right after its split sibling `old_id`,
    /// splitting ancestors as needed with pages from `reserved`.
    fn insert_into_parent(
        &mut self,
        old_id: PageId,
        parent_id: Option<PageId>,
        key: &[u8],
        new_id: PageId,
        reserved: &mut Vec<PageId>,
    ) -> Result<()> {
        let Some(parent_id) = parent_id else {
            let root_id = Self::take_reserved(reserved)?;
            {
                let mut guard = self.bpm.write_page(root_id)?;
                let mut root = BTreeInternalPage::init(
                    guard.data_mut(),
                    root_id,
                    None,
                    self.key_size,
                    self.internal_max_size,
                );
                root.populate_new_root(old_id, key, new_id);
            }
            self.set_parent(old_id, Some(root_id))?;
            self.set_parent(new_id, Some(root_id))?;
            debug!("Index {} grew a new root {}", self.index_id, root_id);
            return self.update_root(Some(root_id));
        };

        let mut guard = self.bpm.write_page(parent_id)?;
        let mut parent = BTreeInternalPage::new(guard.data_mut())?;
        if parent.insert_node_after(old_id, key, new_id)? <= self.internal_max_size {
            return Ok(());
        }

        let grandparent_id = parent.parent_page_id();
        let sibling_id = Self::take_reserved(reserved)?;
        let mut sibling_guard = self.bpm.write_page(sibling_id)?;
        let mut sibling = BTreeInternalPage::init(
            sibling_guard.data_mut(),
            sibling_id,
            grandparent_id,
            self.key_size,
            self.internal_max_size,
        );
        let moved = parent.move_half_to(&mut sibling);
        let separator = sibling.key_at(0).to_vec();
        drop(sibling_guard);
        drop(guard);

        for child in moved {
            self.set_parent(child, Some(sibling_id))?;
        }
        debug!("Split internal page {} into {}", parent_id, sibling_id);
        self.insert_into_parent(parent_id, grandparent_id, &separator, sibling_id, reserved)
    }

    /// Removes `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        let Some(leaf_id) = self.find_leaf(Some(key))? else {
            return Ok(false);
        };

        let comparator = Arc::clone(&self.comparator);
        let (old_first, new_first, size, min_size, parent_id) = {
            let mut guard = self.bpm.write_page(leaf_id)?;
            if BTreeLeafPage::new(guard.data())?
                .lookup(key, comparator.as_ref())
                .is_none()
            {
                return Ok(false);
            }

            let mut leaf = BTreeLeafPage::new(guard.data_mut())?;
            let old_first = leaf.key_at(0).to_vec();
            leaf.remove(key, comparator.as_ref());
            let new_first = (leaf.size() > 0).then(|| leaf.key_at(0).to_vec());
            (
                old_first,
                new_first,
                leaf.size(),
                leaf.min_size(),
                leaf.parent_page_id(),
            )
        };

        if let Some(new_first) = new_first {
            if comparator.compare(&old_first, &new_first) != Ordering::Equal {
                self.update_separator(leaf_id, parent_id, &old_first, &new_first)?;
            }
        }

        match parent_id {
            None if size == 0 => self.adjust_root(leaf_id)?,
            None => {}
            Some(_) if size < min_size => self.coalesce_or_redistribute(leaf_id)?,
            Some(_) => {}
        }
        Ok(true)
    }

    /// After a leaf's first key changed from `old_key` to `new_key`, rewrites
    /// the ancestor separator that bounds the leaf from the left, if it still
    /// equals `old_key`.
    fn update_separator(
        &self,
        leaf_id: PageId,
        parent_id: Option<PageId>,
        old_key: &[u8],
        new_key: &[u8],
    ) -> Result<()> {
        let mut child_id = leaf_id;
        let mut next = parent_id;

        while let Some(page_id) = next {
            let mut guard = self.bpm.write_page(page_id)?;
            let index = {
                let page = BTreeInternalPage::new(guard.data())?;
                let index = page.value_index(child_id).ok_or_else(|| {
                    DbError::IndexCorrupted(format!(
                        "page {} missing from parent {}",
                        child_id, page_id
                    ))
                })?;
                if index == 0 {
                    child_id = page_id;
                    next = page.parent_page_id();
                    continue;
                }
                index
            };

            let mut page = BTreeInternalPage::new(guard.data_mut())?;
            if self.comparator.compare(page.key_at(index), old_key) == Ordering::Equal {
                page.set_key_at(index, new_key);
            }
            return Ok(());
        }
        Ok(())
    }

    /// Restores the size invariant of an underflowing page by merging with
    /// or borrowing from a sibling, recursing up through the parents.
    fn coalesce_or_redistribute(&mut self, page_id: PageId) -> Result<()> {
        let (is_leaf, size, min_size, max_size, parent_id) = {
            let guard = self.bpm.read_page(page_id)?;
            let page = BTreePage::new(guard.data())?;
            (
                page.is_leaf(),
                page.size(),
                page.min_size(),
                page.max_size(),
                page.parent_page_id(),
            )
        };

        let Some(parent_id) = parent_id else {
            return self.adjust_root(page_id);
        };
        if size >= min_size {
            return Ok(());
        }

        let (index, sibling_id) = {
            let guard = self.bpm.read_page(parent_id)?;
            let parent = BTreeInternalPage::new(guard.data())?;
            let index = parent.value_index(page_id).ok_or_else(|| {
                DbError::IndexCorrupted(format!(
                    "page {} missing from parent {}",
                    page_id, parent_id
                ))
            })?;
            let sibling_index = if index == 0 { 1 } else { index - 1 };
            (index, parent.value_at(sibling_index))
        };

        let sibling_size = {
            let guard = self.bpm.read_page(sibling_id)?;
            BTreePage::new(guard.data())?.size()
        };

        if sibling_size + size <= max_size {
            let (left_id, right_id, right_index) = if index == 0 {
                (page_id, sibling_id, 1)
            } else {
                (sibling_id, page_id, index)
            };
            self.merge(parent_id, left_id, right_id, right_index, is_leaf)?;
            self.coalesce_or_redistribute(parent_id)
        } else {
            self.redistribute(parent_id, page_id, sibling_id, index, is_leaf)
        }
    }

    /// Moves everything from `right_id` into its left sibling `left_id`,
    /// drops the separator at `right_index` from the parent and frees the
    /// right page.
    fn merge(
        &self,
        parent_id: PageId,
        left_id: PageId,
        right_id: PageId,
        right_index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        let moved = {
            let mut parent_guard = self.bpm.write_page(parent_id)?;
            let mut left_guard = self.bpm.write_page(left_id)?;
            let mut right_guard = self.bpm.write_page(right_id)?;
            let mut parent = BTreeInternalPage::new(parent_guard.data_mut())?;

            let moved = if is_leaf {
                let mut left = BTreeLeafPage::new(left_guard.data_mut())?;
                let mut right = BTreeLeafPage::new(right_guard.data_mut())?;
                right.move_all_to(&mut left);
                Vec::new()
            } else {
                let middle_key = parent.key_at(right_index).to_vec();
                let mut left = BTreeInternalPage::new(left_guard.data_mut())?;
                let mut right = BTreeInternalPage::new(right_guard.data_mut())?;
                right.move_all_to(&mut left, &middle_key)
            };
            parent.remove(right_index);
            moved
        };

        for child in moved {
            self.set_parent(child, Some(left_id))?;
        }
        if !self.bpm.delete_page(right_id)? {
            warn!("Merged page {} is still pinned and was not freed", right_id);
        }
        debug!("Merged page {} into {}", right_id, left_id);
        Ok(())
    }

    /// Moves one entry from `sibling_id` into `page_id` and fixes the
    /// separator between them. `index` is the slot of `page_id` in its
    /// parent; the sibling is on the right when it is 0, else on the left.
    fn redistribute(
        &self,
        parent_id: PageId,
        page_id: PageId,
        sibling_id: PageId,
        index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        let adopted = {
            let mut parent_guard = self.bpm.write_page(parent_id)?;
            let mut page_guard = self.bpm.write_page(page_id)?;
            let mut sibling_guard = self.bpm.write_page(sibling_id)?;
            let mut parent = BTreeInternalPage::new(parent_guard.data_mut())?;

            if is_leaf {
                let mut page = BTreeLeafPage::new(page_guard.data_mut())?;
                let mut sibling = BTreeLeafPage::new(sibling_guard.data_mut())?;
                if index == 0 {
                    sibling.move_first_to_end_of(&mut page);
                    parent.set_key_at(1, sibling.key_at(0));
                } else {
                    sibling.move_last_to_front_of(&mut page);
                    parent.set_key_at(index, page.key_at(0));
                }
                None
            } else {
                let mut page = BTreeInternalPage::new(page_guard.data_mut())?;
                let mut sibling = BTreeInternalPage::new(sibling_guard.data_mut())?;
                let child = if index == 0 {
                    let middle_key = parent.key_at(1).to_vec();
                    let child = sibling.move_first_to_end_of(&mut page, &middle_key);
                    parent.set_key_at(1, sibling.key_at(0));
                    child
                } else {
                    let middle_key = parent.key_at(index).to_vec();
                    let child = sibling.move_last_to_front_of(&mut page, &middle_key);
                    parent.set_key_at(index, page.key_at(0));
                    child
                };
                Some(child)
            }
        };

        if let Some(child) = adopted {
            self.set_parent(child, Some(page_id))?;
        }
        debug!("Redistributed between {} and {}", sibling_id, page_id);
        Ok(())
    }

    /// Shrinks the tree at the root: an internal root left with one child
    /// hands the root role to it, an empty leaf root empties the tree.
    fn adjust_root(&mut self, root_id: PageId) -> Result<()> {
        let new_root = {
            let mut guard = self.bpm.write_page(root_id)?;
            let (is_leaf, size) = {
                let page = BTreePage::new(guard.data())?;
                (page.is_leaf(), page.size())
            };
            match (is_leaf, size) {
                (false, 1) => Some(
                    BTreeInternalPage::new(guard.data_mut())?.remove_and_return_only_child(),
                ),
                (true, 0) => None,
                _ => return Ok(()),
            }
        };

        if let Some(child) = new_root {
            self.set_parent(child, None)?;
        }
        self.update_root(new_root)?;
        if !self.bpm.delete_page(root_id)? {
            warn!("Old root {} is still pinned and was not freed", root_id);
        }
        debug!(
            "Index {} root changed from {} to {:?}",
            self.index_id, root_id, new_root
        );
        Ok(())
    }

    fn set_parent(&self, page_id: PageId, parent: Option<PageId>) -> Result<()> {
        let mut guard = self.bpm.write_page(page_id)?;
        set_btree_parent_page_id(guard.data_mut(), parent)
    }

    /// Records a new root in the roots directory.
    fn update_root(&mut self, root: Option<PageId>) -> Result<()> {
        let mut guard = self.bpm.write_page(INDEX_ROOTS_PAGE_ID)?;
        let mut roots = IndexRootsPage::new(guard.data_mut())?;
        match root {
            Some(root_id) if roots.get_root_id(self.index_id).is_some() => {
                roots.update(self.index_id, root_id)?
            }
            Some(root_id) => roots.insert(self.index_id, root_id)?,
            None => {
                roots.delete(self.index_id);
            }
        }
        self.root_page_id = root;
        Ok(())
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator<'_>> {
        IndexIterator::begin(self)
    }

    /// Iterator positioned at the first key >= `key`.
    pub fn begin_at(&self, key: &[u8]) -> Result<IndexIterator<'_>> {
        self.check_key(key)?;
        IndexIterator::begin_at(self, key)
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> IndexIterator<'_> {
        IndexIterator::end(self)
    }

    /// All entries with `start <= key <= end`, in key order.
    pub fn range_scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, RecordId)>> {
        self.check_key(end)?;
        let mut results = Vec::new();
        for entry in self.begin_at(start)? {
            let (key, value) = entry?;
            if self.comparator.compare(&key, end) == Ordering::Greater {
                break;
            }
            results.push((key, value));
        }
        Ok(results)
    }

    fn collect_pages(&self) -> Result<Vec<PageId>> {
        let mut pages = Vec::new();
        let mut stack: Vec<PageId> = self.root_page_id.into_iter().collect();
        while let Some(page_id) = stack.pop() {
            let guard = self.bpm.read_page(page_id)?;
            if btree_page_type(guard.data())? == BTreePageType::Internal {
                stack.extend(BTreeInternalPage::new(guard.data())?.children());
            }
            pages.push(page_id);
        }
        Ok(pages)
    }

    /// Frees every page of the tree and drops its roots directory entry.
    pub fn destroy(&mut self) -> Result<()> {
        let pages = self.collect_pages()?;
        self.update_root(None)?;
        for page_id in &pages {
            if !self.bpm.delete_page(*page_id)? {
                warn!("Page {} of destroyed index is still pinned", page_id);
            }
        }
        debug!("Destroyed index {} ({} pages)", self.index_id, pages.len());
        Ok(())
    }

    /// Walks the whole tree checking key order, page sizes, parent links,
    /// separator bounds and the leaf chain. Returns the first violation as
    /// `DbError::IndexCorrupted`.
    pub fn verify_integrity(&self) -> Result<()> {
        let Some(root_id) = self.root_page_id else {
            return Ok(());
        };

        let mut leaves = Vec::new();
        self.verify_subtree(root_id, None, None, None, &mut leaves)?;

        let mut chain = Vec::with_capacity(leaves.len());
        let mut next = leaves.first().copied();
        while let Some(page_id) = next {
            if chain.len() > leaves.len() {
                break;
            }
            chain.push(page_id);
            let guard = self.bpm.read_page(page_id)?;
            next = BTreeLeafPage::new(guard.data())?.next_page_id();
        }
        if chain != leaves {
            return Err(DbError::IndexCorrupted(format!(
                "leaf chain {:?} does not match tree order {:?}",
                chain, leaves
            )));
        }
        Ok(())
    }

    fn verify_subtree(
        &self,
        page_id: PageId,
        expected_parent: Option<PageId>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        leaves: &mut Vec<PageId>,
    ) -> Result<()> {
        let corrupt = |msg: String| Err(DbError::IndexCorrupted(msg));
        let cmp = self.comparator();
        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |l| cmp.compare(key, l) != Ordering::Less)
                && upper.map_or(true, |u| cmp.compare(key, u) == Ordering::Less)
        };

        let guard = self.bpm.read_page(page_id)?;
        let page = BTreePage::new(guard.data())?;

        if page.page_id() != page_id {
            return corrupt(format!("page {} records id {}", page_id, page.page_id()));
        }
        if page.parent_page_id() != expected_parent {
            return corrupt(format!(
                "page {} has parent {:?}, expected {:?}",
                page_id,
                page.parent_page_id(),
                expected_parent
            ));
        }

        let size = page.size();
        let min_size = match (expected_parent, page.is_leaf()) {
            (Some(_), _) => page.min_size(),
            (None, true) => 1,
            (None, false) => 2,
        };
        if size < min_size || size > page.max_size() {
            return corrupt(format!(
                "page {} has size {} outside [{}, {}]",
                page_id,
                size,
                min_size,
                page.max_size()
            ));
        }

        if page.is_leaf() {
            let leaf = BTreeLeafPage::new(guard.data())?;
            for i in 0..size {
                if !in_bounds(leaf.key_at(i)) {
                    return corrupt(format!("leaf {} key {} outside its bounds", page_id, i));
                }
                if i > 0 && cmp.compare(leaf.key_at(i - 1), leaf.key_at(i)) != Ordering::Less {
                    return corrupt(format!("leaf {} keys out of order at {}", page_id, i));
                }
            }
            leaves.push(page_id);
            return Ok(());
        }

        let internal = BTreeInternalPage::new(guard.data())?;
        let keys: Vec<Vec<u8>> = (0..size).map(|i| internal.key_at(i).to_vec()).collect();
        let children = internal.children();
        drop(guard);

        for i in 1..size {
            if !in_bounds(keys[i].as_slice()) {
                return corrupt(format!(
                    "internal page {} separator {} outside its bounds",
                    page_id, i
                ));
            }
            if i > 1 && cmp.compare(&keys[i - 1], &keys[i]) != Ordering::Less {
                return corrupt(format!(
                    "internal page {} separators out of order at {}",
                    page_id, i
                ));
            }
        }

        for (i, &child) in children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(keys[i].as_slice()) };
            let child_upper = if i + 1 < size {
                Some(keys[i + 1].as_slice())
            } else {
                upper
            };
            self.verify_subtree(child, Some(page_id), child_lower, child_upper, leaves)?;
        }
        Ok(())
    }
}
