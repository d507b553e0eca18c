use std::path::Path;

use crate::engine::{StorageEngine, StorageOptions};

mod concurrency_test;

pub(crate) fn open_engine(dir: &Path, pool_size: usize) -> StorageEngine {
    StorageEngine::open(StorageOptions::new(dir).pool_size(pool_size)).expect("engine opens")
}

pub(crate) fn text_of(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).unwrap()
}
