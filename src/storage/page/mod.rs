mod btree_internal_page;
mod btree_leaf_page;
mod btree_page;
mod index_roots_page;

pub use btree_internal_page::*;
pub use btree_leaf_page::*;
pub use btree_page::*;
pub use index_roots_page::*;

use bytes::{Buf, BufMut};

use crate::common::{PageId, INVALID_PAGE_ID};

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    (&data[offset..]).get_u32_le()
}

pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    (&mut data[offset..]).put_u32_le(value);
}

pub(crate) fn read_page_id(data: &[u8], offset: usize) -> Option<PageId> {
    let page_id = PageId::new(read_u32(data, offset));
    page_id.is_valid().then_some(page_id)
}

pub(crate) fn write_page_id(data: &mut [u8], offset: usize, page_id: Option<PageId>) {
    write_u32(data, offset, page_id.unwrap_or(INVALID_PAGE_ID).as_u32());
}
