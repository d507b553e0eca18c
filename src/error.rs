use std::io;

use thiserror::Error;

use crate::storage::page::page::PageId;

#[derive(Error, Debug)]
pub enum StorageError {
    // Read/write syscall failed. Never retried internally.
    #[error("I/O failure while {context}: {source}")]
    IoFailure {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("page not found: table `{table}`, logical page {logical_page}")]
    PageNotFound { table: String, logical_page: u32 },

    #[error("buffer pool exhausted: all {pool_size} frames are pinned")]
    PoolExhausted { pool_size: usize },

    #[error("page {0} is pinned and cannot be deleted")]
    PinnedPageDeleteRefused(PageId),

    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("page directory needs {required} bytes but the metadata range holds {capacity}")]
    DirectoryOverflow { required: usize, capacity: usize },

    #[error("physical page {0} is reserved for metadata")]
    ReservedPage(PageId),

    #[error("storage engine has been shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub trait IoContext<T> {
    fn io_context<C: Into<String>>(self, context: C) -> Result<T>;

    fn with_io_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|source| StorageError::IoFailure { context: context.into(), source })
    }

    fn with_io_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|source| StorageError::IoFailure { context: f().into(), source })
    }
}

impl StorageError {
    // Caller is expected to handle these as ordinary control flow.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::PageNotFound { .. }
                | StorageError::PoolExhausted { .. }
                | StorageError::PinnedPageDeleteRefused(_)
        )
    }
}
