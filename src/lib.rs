//! pagedb - an embedded, disk-backed page store with B+Tree indexes
//!
//! The crate is organized into layers, leaf first:
//!
//! - **Storage Layer** (`storage`): the on-disk format
//!   - `DiskManager`: maps logical page ids onto one file through a
//!     two-level bitmap allocator and does whole-page I/O
//!   - `BitmapPage`/`DiskFileMetaPage`: allocator metadata pages
//!   - `BTreeLeafPage`/`BTreeInternalPage`/`IndexRootsPage`: on-page layouts
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: fetches pages from disk and caches them in frames
//!   - `LruReplacer`/`ClockReplacer`/`LruKReplacer`: eviction policies behind
//!     the `Replacer` trait
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards that unpin on drop
//!
//! - **Index** (`index`): unique-key B+Trees over fixed-size binary keys,
//!   ordered by a caller-supplied `KeyComparator`
//!
//! - **Engine** (`engine`): opens a database file and hands out indexes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pagedb::common::{BPlusTreeConfig, StorageConfig};
//! use pagedb::index::IntegerComparator;
//! use pagedb::{PageId, RecordId, SlotId, StorageEngine};
//!
//! let engine = StorageEngine::open("test.db", StorageConfig::default()).unwrap();
//! let mut index = engine
//!     .open_index(1, Arc::new(IntegerComparator), BPlusTreeConfig::default())
//!     .unwrap();
//!
//! let rid = RecordId::new(PageId::new(10), SlotId::new(0));
//! index.insert(&7i32.to_le_bytes(), rid).unwrap();
//! assert_eq!(index.get_value(&7i32.to_le_bytes()).unwrap(), Some(rid));
//!
//! engine.flush().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod engine;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{DbError, PageId, RecordId, Result, SlotId};
pub use engine::StorageEngine;
