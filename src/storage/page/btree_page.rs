use super::{read_page_id, read_u32, write_page_id, write_u32};
use crate::common::{DbError, PageId, Result, PAGE_SIZE};

/// Magic number stamped on every B+Tree page
pub const BTREE_PAGE_MAGIC: u32 = 0x4250_5450;

/// Size of the header shared by leaf and internal pages
pub const BTREE_HEADER_SIZE: usize = 32;

const MAGIC_OFFSET: usize = 0;
const PAGE_TYPE_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 12;
const KEY_SIZE_OFFSET: usize = 16;
const PAGE_ID_OFFSET: usize = 20;
const PARENT_PAGE_ID_OFFSET: usize = 24;
const NEXT_PAGE_ID_OFFSET: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreePageType {
    Leaf = 1,
    Internal = 2,
}

impl BTreePageType {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(BTreePageType::Leaf),
            2 => Some(BTreePageType::Internal),
            _ => None,
        }
    }
}

/// Header shared by all B+Tree pages:
///
/// | magic | page_type | size | max_size | key_size | page_id | parent_page_id | next_page_id |
///
/// All fields are little-endian u32. `next_page_id` is only meaningful on
/// leaves. For internal pages `size` counts children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreePageHeader {
    pub page_type: BTreePageType,
    pub size: u32,
    pub max_size: u32,
    pub key_size: u32,
    pub page_id: PageId,
    pub parent_page_id: Option<PageId>,
    pub next_page_id: Option<PageId>,
}

impl BTreePageHeader {
    pub fn write_to(&self, data: &mut [u8]) {
        write_u32(data, MAGIC_OFFSET, BTREE_PAGE_MAGIC);
        write_u32(data, PAGE_TYPE_OFFSET, self.page_type as u32);
        write_u32(data, SIZE_OFFSET, self.size);
        write_u32(data, MAX_SIZE_OFFSET, self.max_size);
        write_u32(data, KEY_SIZE_OFFSET, self.key_size);
        write_u32(data, PAGE_ID_OFFSET, self.page_id.as_u32());
        write_page_id(data, PARENT_PAGE_ID_OFFSET, self.parent_page_id);
        write_page_id(data, NEXT_PAGE_ID_OFFSET, self.next_page_id);
    }

    pub fn read_from(data: &[u8]) -> Result<Self> {
        if read_u32(data, MAGIC_OFFSET) != BTREE_PAGE_MAGIC {
            return Err(DbError::IndexCorrupted(
                "bad magic number on B+Tree page".to_string(),
            ));
        }
        let page_type = BTreePageType::from_u32(read_u32(data, PAGE_TYPE_OFFSET)).ok_or_else(
            || DbError::IndexCorrupted("unknown B+Tree page type".to_string()),
        )?;

        Ok(Self {
            page_type,
            size: read_u32(data, SIZE_OFFSET),
            max_size: read_u32(data, MAX_SIZE_OFFSET),
            key_size: read_u32(data, KEY_SIZE_OFFSET),
            page_id: PageId::new(read_u32(data, PAGE_ID_OFFSET)),
            parent_page_id: read_page_id(data, PARENT_PAGE_ID_OFFSET),
            next_page_id: read_page_id(data, NEXT_PAGE_ID_OFFSET),
        })
    }
}

/// Untyped view over a B+Tree page, exposing the shared header fields.
/// `BTreeLeafPage` and `BTreeInternalPage` deref to it.
pub struct BTreePage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> BTreePage<B> {
    /// Wraps page bytes, rejecting anything without the B+Tree magic number.
    pub fn new(data: B) -> Result<Self> {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        BTreePageHeader::read_from(data.as_ref())?;
        Ok(Self { data })
    }

    pub(crate) fn new_unchecked(data: B) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn page_type(&self) -> BTreePageType {
        match read_u32(self.data(), PAGE_TYPE_OFFSET) {
            1 => BTreePageType::Leaf,
            _ => BTreePageType::Internal,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type() == BTreePageType::Leaf
    }

    pub fn size(&self) -> usize {
        read_u32(self.data(), SIZE_OFFSET) as usize
    }

    pub fn max_size(&self) -> usize {
        read_u32(self.data(), MAX_SIZE_OFFSET) as usize
    }

    /// Smallest legal size for a non-root page.
    pub fn min_size(&self) -> usize {
        match self.page_type() {
            BTreePageType::Leaf => self.max_size() / 2,
            BTreePageType::Internal => (self.max_size() + 1) / 2,
        }
    }

    pub fn key_size(&self) -> usize {
        read_u32(self.data(), KEY_SIZE_OFFSET) as usize
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(read_u32(self.data(), PAGE_ID_OFFSET))
    }

    pub fn parent_page_id(&self) -> Option<PageId> {
        read_page_id(self.data(), PARENT_PAGE_ID_OFFSET)
    }

    pub fn is_root(&self) -> bool {
        self.parent_page_id().is_none()
    }

    pub(crate) fn next_page_id_raw(&self) -> Option<PageId> {
        read_page_id(self.data(), NEXT_PAGE_ID_OFFSET)
    }

    pub fn header(&self) -> Result<BTreePageHeader> {
        BTreePageHeader::read_from(self.data())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BTreePage<B> {
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    pub(crate) fn init(&mut self, header: &BTreePageHeader) {
        self.data_mut().fill(0);
        header.write_to(self.data_mut());
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        write_u32(self.data_mut(), SIZE_OFFSET, size as u32);
    }

    pub fn set_parent_page_id(&mut self, parent: Option<PageId>) {
        write_page_id(self.data_mut(), PARENT_PAGE_ID_OFFSET, parent);
    }

    pub(crate) fn set_next_page_id_raw(&mut self, next: Option<PageId>) {
        write_page_id(self.data_mut(), NEXT_PAGE_ID_OFFSET, next);
    }
}

/// Reads only the page type, for callers that must dispatch before
/// choosing a leaf or internal view.
pub fn btree_page_type(data: &[u8]) -> Result<BTreePageType> {
    Ok(BTreePageHeader::read_from(data)?.page_type)
}

/// Parent pointer of any B+Tree page.
pub fn btree_parent_page_id(data: &[u8]) -> Result<Option<PageId>> {
    Ok(BTreePageHeader::read_from(data)?.parent_page_id)
}

/// Rewrites the parent pointer of any B+Tree page.
pub fn set_btree_parent_page_id(data: &mut [u8], parent: Option<PageId>) -> Result<()> {
    BTreePageHeader::read_from(data)?;
    write_page_id(data, PARENT_PAGE_ID_OFFSET, parent);
    Ok(())
}
