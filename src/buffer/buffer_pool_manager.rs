use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    catalog::page_directory::PageDirectory,
    error::{Result, StorageError},
    storage::{
        disk::manager::DiskManager,
        page::{
            page::{is_reserved, FrameId, Page, PageId},
            page_guard::{ReadGuard, WriteGuard},
        },
    },
    utils::replacer::{LRUReplacer, Replacer},
    wal::WriteAheadLog,
};

// Cache metadata of one frame. Guarded by the page table lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameHeader {
    // None while the frame is free or still being loaded
    pub page_id: Option<PageId>,
    pub pin_count: u32,
    pub is_dirty: bool,
}

struct Frame {
    data: RwLock<Page>,
}

struct PageTable {
    // Resident pages only
    pages: HashMap<PageId, FrameId>,
    headers: Vec<FrameHeader>,
    free_frames: VecDeque<FrameId>,
    // Bumped whenever a write of some page to the data file starts. A fetch
    // that loaded outside the lock re-reads if this moved in the meantime.
    write_epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub pool_size: usize,
    pub pinned: usize,
    pub evictable: usize,
    pub free: usize,
}

// Non-owning reference to a pinned frame. Valid until the matching
// `unpin_page`; the frame may hold a different page afterwards.
pub struct PageHandle<'a> {
    pub(crate) bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
}

impl<'a> PageHandle<'a> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    // Do not hold the returned latch across calls back into the pool.
    pub fn read(&self) -> RwLockReadGuard<'a, Page> {
        self.bpm.frames[self.frame_id].data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'a, Page> {
        self.bpm.frames[self.frame_id].data.write()
    }
}

// Fixed set of frames caching pages of the data file.
//
// Lock order, never taken in reverse:
//   1. page directory
//   2. page table (frame headers, resident map, free list)
//   3. replacer
//   4. WAL / disk I/O
// Write-back I/O runs without the page table lock: the frame carries an
// extra pin for the duration, so it stays resident and no other fetch can
// reuse it. Frame data latches are never taken under the page table lock.
pub struct BufferPoolManager {
    num_frames: usize,

    // The frames this pool manages, allocated once
    frames: Box<[Frame]>,

    page_directory: PageDirectory,

    page_table: Mutex<PageTable>,

    // Unpinned resident pages, eviction candidates
    replacer: Mutex<LRUReplacer<PageId>>,

    disk: Arc<DiskManager>,
    wal: Option<WriteAheadLog>,

    closed: AtomicBool,
    shutdown_lock: Mutex<()>,
}

impl BufferPoolManager {
    pub fn new(
        num_frames: usize,
        disk: Arc<DiskManager>,
        page_directory: PageDirectory,
        wal: Option<WriteAheadLog>,
    ) -> Self {
        let frames: Box<[Frame]> = (0..num_frames)
            .map(|_| Frame { data: RwLock::new(Page::new()) })
            .collect();

        let page_table = PageTable {
            pages: HashMap::with_capacity(num_frames),
            headers: vec![FrameHeader::default(); num_frames],
            // The maximum amount of frames are all allocated at once
            free_frames: (0..num_frames).collect(),
            write_epoch: 0,
        };

        Self {
            num_frames,
            frames,
            page_directory,
            page_table: Mutex::new(page_table),
            replacer: Mutex::new(LRUReplacer::new(num_frames)),
            disk,
            wal,
            closed: AtomicBool::new(false),
            shutdown_lock: Mutex::new(()),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.num_frames
    }

    pub fn page_directory(&self) -> &PageDirectory {
        &self.page_directory
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    pub fn wal(&self) -> Option<&WriteAheadLog> {
        self.wal.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn handle(&self, frame_id: FrameId, page_id: PageId) -> PageHandle<'_> {
        PageHandle { bpm: self, frame_id, page_id }
    }

    // Maps a new logical page of `table` to a fresh zeroed physical page.
    pub fn allocate_page(&self, table: &str, logical_page: u32) -> Result<PageId> {
        self.ensure_open()?;
        self.page_directory.allocate(table, logical_page)
    }

    // Pins a resident page. Caller holds the page table lock.
    fn pin_resident(&self, table: &mut PageTable, page_id: PageId) -> Option<FrameId> {
        let frame_id = *table.pages.get(&page_id)?;
        table.headers[frame_id].pin_count += 1;
        self.replacer.lock().erase(page_id);
        Some(frame_id)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PageHandle<'_>> {
        self.ensure_open()?;
        if is_reserved(page_id) {
            return Err(StorageError::ReservedPage(page_id));
        }

        let (frame_id, epoch) = {
            let mut table = self.page_table.lock();

            // Page in memory
            if let Some(frame_id) = self.pin_resident(&mut table, page_id) {
                trace!("Buffer pool hit for page {} in frame {}", page_id, frame_id);
                return Ok(self.handle(frame_id, page_id));
            }

            let frame_id = match table.free_frames.pop_front() {
                Some(frame_id) => frame_id,
                None => self.evict(&mut table)?,
            };

            // Eviction may have dropped the lock while writing a victim back
            if let Some(existing) = self.pin_resident(&mut table, page_id) {
                Self::release_frame(&mut table, frame_id);
                return Ok(self.handle(existing, page_id));
            }

            // Reserved: pinned but not yet visible in the resident map
            table.headers[frame_id] = FrameHeader { page_id: None, pin_count: 1, is_dirty: false };
            (frame_id, table.write_epoch)
        };

        debug!("Buffer pool miss for page {}, loading into frame {}", page_id, frame_id);
        let loaded = {
            let mut data = self.frames[frame_id].data.write();
            self.disk.read_page(page_id, &mut data)
        };

        let mut table = self.page_table.lock();

        if let Err(err) = loaded {
            Self::release_frame(&mut table, frame_id);
            return Err(err);
        }

        // Another fetch installed the same page while we were reading
        if let Some(existing) = self.pin_resident(&mut table, page_id) {
            debug!("Discarding duplicate load of page {}", page_id);
            Self::release_frame(&mut table, frame_id);
            return Ok(self.handle(existing, page_id));
        }

        // The page was written back while we were reading: reload. No write to
        // a non-resident page can be in flight while we hold the table lock.
        if table.write_epoch != epoch {
            let reloaded = {
                let mut data = self.frames[frame_id].data.write();
                self.disk.read_page(page_id, &mut data)
            };
            if let Err(err) = reloaded {
                Self::release_frame(&mut table, frame_id);
                return Err(err);
            }
        }

        table.headers[frame_id].page_id = Some(page_id);
        table.pages.insert(page_id, frame_id);

        Ok(self.handle(frame_id, page_id))
    }

    // Resolves through the page directory; an unmapped page is PageNotFound
    // and nothing is fetched.
    pub fn fetch_table_page(&self, table: &str, logical_page: u32) -> Result<PageHandle<'_>> {
        self.ensure_open()?;
        let page_id = self.page_directory.lookup(table, logical_page).ok_or_else(|| {
            StorageError::PageNotFound { table: table.to_string(), logical_page }
        })?;
        self.fetch_page(page_id)
    }

    pub fn read_page(&self, table: &str, logical_page: u32) -> Result<ReadGuard<'_>> {
        self.fetch_table_page(table, logical_page).map(ReadGuard::new)
    }

    pub fn write_page(&self, table: &str, logical_page: u32) -> Result<WriteGuard<'_>> {
        self.fetch_table_page(table, logical_page).map(WriteGuard::new)
    }

    fn release_frame(table: &mut PageTable, frame_id: FrameId) {
        table.headers[frame_id] = FrameHeader::default();
        table.free_frames.push_front(frame_id);
    }

    // Takes the least recently unpinned frame, writing it back first if dirty.
    // A dirty victim is written without the table lock; if it is pinned or
    // dirtied again meanwhile, the next candidate is tried.
    fn evict(&self, table: &mut MutexGuard<'_, PageTable>) -> Result<FrameId> {
        loop {
            let (victim, frame_id) = self.pick_victim(table)?;

            if table.headers[frame_id].is_dirty {
                table.headers[frame_id].pin_count = 1;
                table.headers[frame_id].is_dirty = false;
                table.write_epoch += 1;

                let written = MutexGuard::unlocked(table, || {
                    let image = self.frames[frame_id].data.read().clone();
                    self.write_back(victim, &image)
                });

                let header = &mut table.headers[frame_id];
                header.pin_count = header.pin_count.saturating_sub(1);
                if written.is_err() {
                    header.is_dirty = true;
                }
                let (pin_count, is_dirty) = (header.pin_count, header.is_dirty);

                if let Err(err) = written {
                    // The image is still only in memory, keep it next in line
                    if pin_count == 0 {
                        self.replacer.lock().reinstate(victim);
                    }
                    return Err(err);
                }
                if pin_count > 0 {
                    continue;
                }
                if is_dirty {
                    self.replacer.lock().insert(victim);
                    continue;
                }
            }

            trace!("Evicted page {} from frame {}", victim, frame_id);
            // A stray unpin during the write-back may have queued it again
            self.replacer.lock().erase(victim);
            table.pages.remove(&victim);
            table.headers[frame_id] = FrameHeader::default();
            return Ok(frame_id);
        }
    }

    // Pops candidates until one is resident and unpinned. Candidates held by
    // an in-flight flush go back at their rank; stale ones are dropped.
    fn pick_victim(&self, table: &PageTable) -> Result<(PageId, FrameId)> {
        let mut replacer = self.replacer.lock();
        let mut held = Vec::new();

        let picked = loop {
            let Some(victim) = replacer.victim() else {
                warn!("Buffer pool exhausted: all {} frames pinned", self.num_frames);
                break Err(StorageError::PoolExhausted { pool_size: self.num_frames });
            };
            match table.pages.get(&victim) {
                Some(&frame_id) if table.headers[frame_id].pin_count == 0 => {
                    break Ok((victim, frame_id));
                }
                Some(_) => held.push(victim),
                None => {}
            }
        };

        for victim in held.into_iter().rev() {
            replacer.reinstate(victim);
        }
        picked
    }

    // Log first, then write to the home location.
    fn write_back(&self, page_id: PageId, page: &Page) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.append(page_id, page)?;
        }
        self.disk.write_page(page_id, page)
    }

    // Returns whether the page was resident. Unpinning below zero is a no-op.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut table = self.page_table.lock();
        let Some(&frame_id) = table.pages.get(&page_id) else {
            return false;
        };

        let header = &mut table.headers[frame_id];
        header.is_dirty |= is_dirty;

        if header.pin_count > 0 {
            header.pin_count -= 1;
            if header.pin_count == 0 {
                self.replacer.lock().insert(page_id);
            }
        }
        true
    }

    // Writes a resident dirty page through the WAL to disk. Returns whether
    // any I/O happened.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        self.ensure_open()?;
        self.flush_resident(page_id)
    }

    fn flush_resident(&self, page_id: PageId) -> Result<bool> {
        let mut table = self.page_table.lock();
        let Some(&frame_id) = table.pages.get(&page_id) else {
            return Ok(false);
        };
        if !table.headers[frame_id].is_dirty {
            return Ok(false);
        }

        // The extra pin keeps the frame resident while the I/O runs without
        // the table lock. An unpinned page keeps its place in the replacer.
        // Clearing the flag up front lets a concurrent dirty unpin set it again.
        table.write_epoch += 1;
        table.headers[frame_id].is_dirty = false;
        table.headers[frame_id].pin_count += 1;

        let written = MutexGuard::unlocked(&mut table, || {
            let image = self.frames[frame_id].data.read().clone();
            self.write_back(page_id, &image)
        });

        let header = &mut table.headers[frame_id];
        if written.is_err() {
            header.is_dirty = true;
        }
        header.pin_count = header.pin_count.saturating_sub(1);
        if header.pin_count == 0 {
            let mut replacer = self.replacer.lock();
            if !replacer.contains(page_id) {
                replacer.insert(page_id);
            }
        }
        drop(table);

        written?;
        debug!("Flushed page {}", page_id);
        Ok(true)
    }

    // Flushes every resident frame. Returns how many were written.
    pub fn flush_all_pages(&self) -> Result<usize> {
        self.ensure_open()?;
        self.flush_all_resident()
    }

    fn flush_all_resident(&self) -> Result<usize> {
        let resident: Vec<PageId> = {
            let table = self.page_table.lock();
            let mut ids: Vec<PageId> = table.pages.keys().copied().collect();
            ids.sort_unstable();
            ids
        };

        let mut flushed = 0;
        for page_id in resident {
            if self.flush_resident(page_id)? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    // Flush, persist the directory and sync, leaving the pool open.
    pub fn checkpoint(&self) -> Result<()> {
        self.ensure_open()?;
        let flushed = self.flush_all_resident()?;
        self.page_directory.persist()?;
        self.disk.sync()?;
        info!("Checkpoint complete, {} pages flushed", flushed);
        Ok(())
    }

    // Flushes all dirty frames, persists the directory and closes the data
    // file. A second call does nothing.
    pub fn shutdown(&self) -> Result<()> {
        let _guard = self.shutdown_lock.lock();
        if self.is_closed() {
            return Ok(());
        }

        let flushed = self.flush_all_resident()?;
        self.page_directory.persist()?;
        self.disk.close()?;
        self.closed.store(true, Ordering::Release);

        info!("Buffer pool shut down, {} pages flushed", flushed);
        Ok(())
    }

    // Detaches (table, logical_page) and zeroes its physical page. Refused
    // while the page is pinned. The physical id is never handed out again.
    pub fn delete_page(&self, table_name: &str, logical_page: u32) -> Result<PageId> {
        self.ensure_open()?;

        self.page_directory.remove_with(table_name, logical_page, |page_id| {
            let mut table = self.page_table.lock();

            let resident = table.pages.get(&page_id).copied();
            if let Some(frame_id) = resident {
                if table.headers[frame_id].pin_count > 0 {
                    return Err(StorageError::PinnedPageDeleteRefused(page_id));
                }
            }

            // The cached copy goes only once the home page is zeroed
            table.write_epoch += 1;
            self.disk.zero_page(page_id)?;

            if let Some(frame_id) = resident {
                table.pages.remove(&page_id);
                self.replacer.lock().erase(page_id);
                Self::release_frame(&mut table, frame_id);
            }
            debug!("Deleted {}:{} (physical page {})", table_name, logical_page, page_id);
            Ok(())
        })
    }

    // Stops the pool as if the process died: nothing is flushed or persisted.
    #[cfg(test)]
    pub(crate) fn crash(&self) {
        let _guard = self.shutdown_lock.lock();
        self.closed.store(true, Ordering::Release);
        let _ = self.disk.close();
    }

    // Eviction candidates, next victim first.
    #[cfg(test)]
    pub(crate) fn eviction_order(&self) -> Vec<PageId> {
        self.replacer.lock().candidates()
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let table = self.page_table.lock();
        table.pages.get(&page_id).map(|&frame_id| table.headers[frame_id].pin_count)
    }

    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let table = self.page_table.lock();
        table.pages.get(&page_id).map(|&frame_id| table.headers[frame_id].is_dirty)
    }

    pub fn frame_of(&self, page_id: PageId) -> Option<FrameId> {
        self.page_table.lock().pages.get(&page_id).copied()
    }

    pub fn stats(&self) -> PoolStats {
        let table = self.page_table.lock();
        let replacer = self.replacer.lock();
        PoolStats {
            pool_size: self.num_frames,
            pinned: table.headers.iter().filter(|h| h.pin_count > 0).count(),
            evictable: replacer.size(),
            free: table.free_frames.len(),
        }
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!("Buffer pool shutdown on drop failed: {}", err);
        }
    }
}
