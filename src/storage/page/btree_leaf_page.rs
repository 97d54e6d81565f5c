use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

use super::btree_page::{BTreePage, BTreePageHeader, BTreePageType, BTREE_HEADER_SIZE};
use crate::common::{DbError, PageId, RecordId, Result, PAGE_SIZE};
use crate::index::KeyComparator;

/// Leaf page: header followed by sorted `(key, RecordId)` pairs.
///
/// Leaves are chained left to right through `next_page_id`. A leaf may
/// briefly hold `max_size + 1` entries between an insert and its split, so
/// the page must have room for one extra pair.
pub struct BTreeLeafPage<B> {
    page: BTreePage<B>,
}

/// Most pairs a leaf page can physically hold for a given key size.
pub fn leaf_page_capacity(key_size: usize) -> usize {
    (PAGE_SIZE - BTREE_HEADER_SIZE) / (key_size + RecordId::SERIALIZED_SIZE)
}

impl<B: AsRef<[u8]>> BTreeLeafPage<B> {
    pub fn new(data: B) -> Result<Self> {
        let page = BTreePage::new(data)?;
        if !page.is_leaf() {
            return Err(DbError::IndexCorrupted(format!(
                "page {} is not a leaf page",
                page.page_id()
            )));
        }
        Ok(Self { page })
    }

    fn entry_size(&self) -> usize {
        self.key_size() + RecordId::SERIALIZED_SIZE
    }

    fn entry_offset(&self, index: usize) -> usize {
        BTREE_HEADER_SIZE + index * self.entry_size()
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        self.page.next_page_id_raw()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.entry_offset(index);
        &self.data()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> RecordId {
        let offset = self.entry_offset(index) + self.key_size();
        RecordId::read_from(&self.data()[offset..])
    }

    /// First index whose key is >= `key`; `size()` if every key is smaller.
    pub fn key_index(&self, key: &[u8], comparator: &dyn KeyComparator) -> usize {
        let mut left = 0;
        let mut right = self.size();
        while left < right {
            let mid = left + (right - left) / 2;
            match comparator.compare(self.key_at(mid), key) {
                Ordering::Less => left = mid + 1,
                Ordering::Equal => return mid,
                Ordering::Greater => right = mid,
            }
        }
        left
    }

    pub fn lookup(&self, key: &[u8], comparator: &dyn KeyComparator) -> Option<RecordId> {
        let index = self.key_index(key, comparator);
        if index < self.size() && comparator.compare(self.key_at(index), key) == Ordering::Equal {
            Some(self.value_at(index))
        } else {
            None
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BTreeLeafPage<B> {
    /// Formats `data` as an empty leaf.
    pub fn init(
        data: B,
        page_id: PageId,
        parent_page_id: Option<PageId>,
        key_size: usize,
        max_size: usize,
    ) -> Self {
        let mut page = BTreePage::new_unchecked(data);
        page.init(&BTreePageHeader {
            page_type: BTreePageType::Leaf,
            size: 0,
            max_size: max_size as u32,
            key_size: key_size as u32,
            page_id,
            parent_page_id,
            next_page_id: None,
        });
        Self { page }
    }

    pub fn set_next_page_id(&mut self, next: Option<PageId>) {
        self.page.set_next_page_id_raw(next);
    }

    fn write_entry(&mut self, index: usize, key: &[u8], value: RecordId) {
        assert_eq!(key.len(), self.key_size());
        let offset = self.entry_offset(index);
        let key_size = self.key_size();
        let data = self.page.data_mut();
        data[offset..offset + key_size].copy_from_slice(key);
        value.write_to(&mut data[offset + key_size..]);
    }

    /// Inserts in sorted position. Returns false if the key already exists.
    pub fn insert(&mut self, key: &[u8], value: RecordId, comparator: &dyn KeyComparator) -> bool {
        let size = self.size();
        let index = self.key_index(key, comparator);
        if index < size && comparator.compare(self.key_at(index), key) == Ordering::Equal {
            return false;
        }
        debug_assert!(BTREE_HEADER_SIZE + (size + 1) * self.entry_size() <= PAGE_SIZE);

        let start = self.entry_offset(index);
        let end = self.entry_offset(size);
        let shift = self.entry_size();
        self.page.data_mut().copy_within(start..end, start + shift);
        self.write_entry(index, key, value);
        self.page.set_size(size + 1);
        true
    }

    /// Removes `key` if present. Returns whether anything was removed.
    pub fn remove(&mut self, key: &[u8], comparator: &dyn KeyComparator) -> bool {
        let size = self.size();
        let index = self.key_index(key, comparator);
        if index >= size || comparator.compare(self.key_at(index), key) != Ordering::Equal {
            return false;
        }
        self.remove_at(index);
        true
    }

    fn remove_at(&mut self, index: usize) {
        let size = self.size();
        let start = self.entry_offset(index + 1);
        let end = self.entry_offset(size);
        let dest = self.entry_offset(index);
        self.page.data_mut().copy_within(start..end, dest);
        self.page.set_size(size - 1);
    }

    /// Appends raw entries copied from another leaf.
    fn append_entries(&mut self, src: &[u8], count: usize) {
        let size = self.size();
        let offset = self.entry_offset(size);
        self.page.data_mut()[offset..offset + src.len()].copy_from_slice(src);
        self.page.set_size(size + count);
    }

    /// Moves the upper half of the entries into an empty `recipient` and
    /// links it into the leaf chain after this page.
    pub fn move_half_to<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut BTreeLeafPage<R>) {
        let size = self.size();
        let split = size / 2;
        let start = self.entry_offset(split);
        let end = self.entry_offset(size);
        recipient.append_entries(&self.data()[start..end], size - split);
        self.page.set_size(split);

        recipient.set_next_page_id(self.next_page_id());
        self.set_next_page_id(Some(recipient.page_id()));
    }

    /// Appends every entry to `recipient` (the left sibling) and hands it
    /// this page's place in the leaf chain.
    pub fn move_all_to<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut BTreeLeafPage<R>) {
        let size = self.size();
        let end = self.entry_offset(size);
        recipient.append_entries(&self.data()[BTREE_HEADER_SIZE..end], size);
        recipient.set_next_page_id(self.next_page_id());
        self.page.set_size(0);
    }

    /// Moves this page's first entry to the end of `recipient` (the left
    /// sibling).
    pub fn move_first_to_end_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut BTreeLeafPage<R>,
    ) {
        let key = self.key_at(0).to_vec();
        let value = self.value_at(0);
        self.remove_at(0);
        let size = recipient.size();
        recipient.write_entry(size, &key, value);
        recipient.page.set_size(size + 1);
    }

    /// Moves this page's last entry to the front of `recipient` (the right
    /// sibling).
    pub fn move_last_to_front_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut BTreeLeafPage<R>,
    ) {
        let last = self.size() - 1;
        let key = self.key_at(last).to_vec();
        let value = self.value_at(last);
        self.page.set_size(last);

        let size = recipient.size();
        let end = recipient.entry_offset(size);
        let shift = recipient.entry_size();
        recipient
            .page
            .data_mut()
            .copy_within(BTREE_HEADER_SIZE..end, BTREE_HEADER_SIZE + shift);
        recipient.write_entry(0, &key, value);
        recipient.page.set_size(size + 1);
    }
}

impl<B> Deref for BTreeLeafPage<B> {
    type Target = BTreePage<B>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl<B> DerefMut for BTreeLeafPage<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}
