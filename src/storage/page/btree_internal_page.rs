use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

use super::btree_page::{BTreePage, BTreePageHeader, BTreePageType, BTREE_HEADER_SIZE};
use super::{read_u32, write_u32};
use crate::common::{DbError, PageId, Result, PAGE_SIZE};
use crate::index::KeyComparator;

const CHILD_SIZE: usize = 4;

/// Most `(key, child)` pairs an internal page can physically hold.
pub fn internal_page_capacity(key_size: usize) -> usize {
    (PAGE_SIZE - BTREE_HEADER_SIZE) / (key_size + CHILD_SIZE)
}

/// Internal page: header followed by `(key, child page id)` pairs.
///
/// `size` counts children. The key in slot 0 is a placeholder and is never
/// compared; key `i` (i >= 1) is the lower bound of child `i`'s subtree.
pub struct BTreeInternalPage<B> {
    page: BTreePage<B>,
}

impl<B: AsRef<[u8]>> BTreeInternalPage<B> {
    pub fn new(data: B) -> Result<Self> {
        let page = BTreePage::new(data)?;
        if page.is_leaf() {
            return Err(DbError::IndexCorrupted(format!(
                "page {} is not an internal page",
                page.page_id()
            )));
        }
        Ok(Self { page })
    }

    fn entry_size(&self) -> usize {
        self.key_size() + CHILD_SIZE
    }

    fn entry_offset(&self, index: usize) -> usize {
        BTREE_HEADER_SIZE + index * self.entry_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.entry_offset(index);
        &self.data()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> PageId {
        PageId::new(read_u32(self.data(), self.entry_offset(index) + self.key_size()))
    }

    /// Slot holding `child`, if it is one of this page's children.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    pub fn children(&self) -> Vec<PageId> {
        (0..self.size()).map(|i| self.value_at(i)).collect()
    }

    /// Child whose subtree covers `key`. A key equal to a separator
    /// belongs to the child on the separator's right.
    pub fn lookup(&self, key: &[u8], comparator: &dyn KeyComparator) -> PageId {
        let mut left = 1;
        let mut right = self.size();
        while left < right {
            let mid = left + (right - left) / 2;
            if comparator.compare(self.key_at(mid), key) == Ordering::Greater {
                right = mid;
            } else {
                left = mid + 1;
            }
        }
        self.value_at(left - 1)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BTreeInternalPage<B> {
    /// Formats `data` as an internal page with no children.
    pub fn init(
        data: B,
        page_id: PageId,
        parent_page_id: Option<PageId>,
        key_size: usize,
        max_size: usize,
    ) -> Self {
        let mut page = BTreePage::new_unchecked(data);
        page.init(&BTreePageHeader {
            page_type: BTreePageType::Internal,
            size: 0,
            max_size: max_size as u32,
            key_size: key_size as u32,
            page_id,
            parent_page_id,
            next_page_id: None,
        });
        Self { page }
    }

    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        assert_eq!(key.len(), self.key_size());
        let offset = self.entry_offset(index);
        let key_size = self.key_size();
        self.page.data_mut()[offset..offset + key_size].copy_from_slice(key);
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        let offset = self.entry_offset(index) + self.key_size();
        write_u32(self.page.data_mut(), offset, child.as_u32());
    }

    fn shift_right(&mut self, from: usize) {
        let start = self.entry_offset(from);
        let end = self.entry_offset(self.size());
        let shift = self.entry_size();
        self.page.data_mut().copy_within(start..end, start + shift);
    }

    /// Turns an empty page into a root with two children split by `key`.
    pub fn populate_new_root(&mut self, old_child: PageId, key: &[u8], new_child: PageId) {
        self.set_value_at(0, old_child);
        self.set_key_at(1, key);
        self.set_value_at(1, new_child);
        self.page.set_size(2);
    }

    /// Inserts `(key, new_child)` right after `old_child` and returns the new
    /// size.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        key: &[u8],
        new_child: PageId,
    ) -> Result<usize> {
        let index = self.value_index(old_child).ok_or_else(|| {
            DbError::IndexCorrupted(format!(
                "page {} is not a child of {}",
                old_child,
                self.page_id()
            ))
        })? + 1;
        debug_assert!(BTREE_HEADER_SIZE + (self.size() + 1) * self.entry_size() <= PAGE_SIZE);

        self.shift_right(index);
        self.set_key_at(index, key);
        self.set_value_at(index, new_child);
        let size = self.size() + 1;
        self.page.set_size(size);
        Ok(size)
    }

    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        let start = self.entry_offset(index + 1);
        let end = self.entry_offset(size);
        let dest = self.entry_offset(index);
        self.page.data_mut().copy_within(start..end, dest);
        self.page.set_size(size - 1);
    }

    /// Empties a single-child root and returns that child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        debug_assert_eq!(self.size(), 1);
        let child = self.value_at(0);
        self.page.set_size(0);
        child
    }

    fn append_entries(&mut self, src: &[u8], count: usize) {
        let size = self.size();
        let offset = self.entry_offset(size);
        self.page.data_mut()[offset..offset + src.len()].copy_from_slice(src);
        self.page.set_size(size + count);
    }

    /// Moves the upper half of the children into an empty `recipient`.
    /// The key left in the recipient's slot 0 is the separator to push up.
    /// Returns the moved children so the caller can re-parent them.
    pub fn move_half_to<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut BTreeInternalPage<R>,
    ) -> Vec<PageId> {
        let size = self.size();
        let split = size / 2;
        let start = self.entry_offset(split);
        let end = self.entry_offset(size);
        recipient.append_entries(&self.data()[start..end], size - split);
        self.page.set_size(split);
        recipient.children()
    }

    /// Appends every child to `recipient` (the left sibling). `middle_key`
    /// is the parent separator between the two pages and becomes the key of
    /// this page's first child. Returns the moved children.
    pub fn move_all_to<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut BTreeInternalPage<R>,
        middle_key: &[u8],
    ) -> Vec<PageId> {
        self.set_key_at(0, middle_key);
        let moved = self.children();
        let size = self.size();
        let end = self.entry_offset(size);
        recipient.append_entries(&self.data()[BTREE_HEADER_SIZE..end], size);
        self.page.set_size(0);
        moved
    }

    /// Moves the first child to the end of `recipient` (the left sibling),
    /// keyed by `middle_key`. Afterwards `key_at(0)` of this page is the new
    /// separator. Returns the moved child.
    pub fn move_first_to_end_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut BTreeInternalPage<R>,
        middle_key: &[u8],
    ) -> PageId {
        let child = self.value_at(0);
        let size = recipient.size();
        recipient.set_key_at(size, middle_key);
        recipient.set_value_at(size, child);
        recipient.page.set_size(size + 1);
        self.remove(0);
        child
    }

    /// Moves the last child to the front of `recipient` (the right sibling).
    /// `middle_key` becomes the key of the recipient's old first child and
    /// the moved key lands in slot 0 as the new separator. Returns the
    /// moved child.
    pub fn move_last_to_front_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut BTreeInternalPage<R>,
        middle_key: &[u8],
    ) -> PageId {
        let last = self.size() - 1;
        let key = self.key_at(last).to_vec();
        let child = self.value_at(last);
        self.page.set_size(last);

        recipient.set_key_at(0, middle_key);
        recipient.shift_right(0);
        recipient.set_key_at(0, &key);
        recipient.set_value_at(0, child);
        let size = recipient.size() + 1;
        recipient.page.set_size(size);
        child
    }
}

impl<B> Deref for BTreeInternalPage<B> {
    type Target = BTreePage<B>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl<B> DerefMut for BTreeInternalPage<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}
