use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::{
    buffer::buffer_pool_manager::{BufferPoolManager, PageHandle},
    storage::page::page::{Page, PageId},
};

// Shared latch on a pinned page. Dropping releases the latch, then unpins
// the page clean.
pub struct ReadGuard<'a> {
    page_id: PageId,
    bpm: &'a BufferPoolManager,
    data: Option<RwLockReadGuard<'a, Page>>,
}

impl<'a> ReadGuard<'a> {
    pub fn new(handle: PageHandle<'a>) -> Self {
        let data = handle.read();
        Self {
            page_id: handle.page_id(),
            bpm: handle.bpm,
            data: Some(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for ReadGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        match &self.data {
            Some(data) => data,
            None => unreachable!("latch released before drop"),
        }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        // Latch must be gone before the unpin takes the page table lock
        self.data.take();
        self.bpm.unpin_page(self.page_id, false);
    }
}

// Exclusive latch on a pinned page. The page is unpinned dirty on drop.
pub struct WriteGuard<'a> {
    page_id: PageId,
    bpm: &'a BufferPoolManager,
    data: Option<RwLockWriteGuard<'a, Page>>,
}

impl<'a> WriteGuard<'a> {
    pub fn new(handle: PageHandle<'a>) -> Self {
        let data = handle.write();
        Self {
            page_id: handle.page_id(),
            bpm: handle.bpm,
            data: Some(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for WriteGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        match &self.data {
            Some(data) => data,
            None => unreachable!("latch released before drop"),
        }
    }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Page {
        match &mut self.data {
            Some(data) => data,
            None => unreachable!("latch released before drop"),
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.data.take();
        self.bpm.unpin_page(self.page_id, true);
    }
}
