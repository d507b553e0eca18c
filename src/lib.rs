pub mod buffer;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wal;

#[cfg(test)]
mod tests;

pub use buffer::buffer_pool_manager::{BufferPoolManager, FrameHeader, PageHandle, PoolStats};
pub use catalog::page_directory::PageDirectory;
pub use engine::{StorageEngine, StorageOptions};
pub use error::{Result, StorageError};
pub use storage::disk::manager::DiskManager;
pub use storage::page::page::{page_constants::PAGE_SIZE, FrameId, Page, PageId};
pub use storage::page::page_guard::{ReadGuard, WriteGuard};
pub use utils::replacer::{LRUReplacer, Replacer};
pub use wal::{LogRecord, Recovery, WriteAheadLog};
