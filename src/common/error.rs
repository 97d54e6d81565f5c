use thiserror::Error;

use super::types::{IndexId, PageId};

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Out of memory: no page available for index structure")]
    OutOfMemory,

    #[error("Invalid database file")]
    InvalidDatabaseFile,

    #[error("Index roots directory is full")]
    DirectoryFull,

    #[error("Index {0} already exists")]
    IndexAlreadyExists(IndexId),

    #[error("Index {0} not found")]
    IndexNotFound(IndexId),

    #[error("Key size mismatch: expected {expected} bytes, got {actual}")]
    KeySizeMismatch { expected: usize, actual: usize },

    #[error("Invalid index configuration: {0}")]
    InvalidConfig(String),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
