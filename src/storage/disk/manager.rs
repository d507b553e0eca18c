use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::{
    error::{IoContext, Result, StorageError},
    storage::page::page::{page_constants::PAGE_SIZE, Page, PageId},
};

// Raw fixed-size block I/O against the single backing file.
//
// All reads and writes are serialized through one mutex around the file
// handle; the file is page addressed with offset = page_id * PAGE_SIZE.
// No retries happen here, every syscall error goes straight to the caller.
pub struct DiskManager {
    path: PathBuf,
    // None once the manager has been closed
    db_io: Mutex<Option<File>>,

    num_reads: AtomicU64,
    num_writes: AtomicU64,
}

impl DiskManager {
    // Opens the backing file, creating it if absent. Existing contents are kept.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_io_context(|| format!("opening data file {}", path.display()))?;

        debug!("Opened data file {}", path.display());

        Ok(DiskManager {
            path,
            db_io: Mutex::new(Some(file)),
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset_of(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }

    // Reads a whole page into `page`. Bytes past the end of the file read as
    // zero, so a page that was never written comes back zeroed.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<()> {
        let mut guard = self.db_io.lock();
        let db_io = guard.as_mut().ok_or(StorageError::Closed)?;

        db_io
            .seek(SeekFrom::Start(Self::offset_of(page_id)))
            .with_io_context(|| format!("seeking to page {}", page_id))?;

        let buf = page.as_bytes_mut();
        let mut filled = 0;
        while filled < PAGE_SIZE {
            match db_io.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(StorageError::IoFailure {
                        context: format!("reading page {}", page_id),
                        source: err,
                    });
                }
            }
        }

        // Short read: pad with zeros
        if filled < PAGE_SIZE {
            buf[filled..].fill(0);
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        trace!("Read page {} ({} bytes from disk)", page_id, filled);
        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, page: &Page) -> Result<()> {
        let mut guard = self.db_io.lock();
        let db_io = guard.as_mut().ok_or(StorageError::Closed)?;

        db_io
            .seek(SeekFrom::Start(Self::offset_of(page_id)))
            .with_io_context(|| format!("seeking to page {}", page_id))?;

        db_io
            .write_all(page.as_bytes())
            .with_io_context(|| format!("writing page {}", page_id))?;

        db_io
            .flush()
            .with_io_context(|| format!("flushing page {}", page_id))?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        trace!("Wrote page {}", page_id);
        Ok(())
    }

    // Overwrites the page with zeros.
    pub fn zero_page(&self, page_id: PageId) -> Result<()> {
        self.write_page(page_id, &Page::new())
    }

    // Forces written pages to stable storage.
    pub fn sync(&self) -> Result<()> {
        let guard = self.db_io.lock();
        let db_io = guard.as_ref().ok_or(StorageError::Closed)?;
        db_io.sync_all().io_context("syncing data file")
    }

    // Syncs and drops the file handle. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.db_io.lock();
        if let Some(db_io) = guard.take() {
            db_io.sync_all().io_context("syncing data file on close")?;
            debug!("Closed data file {}", self.path.display());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.db_io.lock().is_none()
    }

    pub fn reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub mod test {
    use tempfile::tempdir;

    use super::DiskManager;
    use crate::{
        error::StorageError,
        storage::page::page::{page_constants::PAGE_SIZE, Page},
    };

    #[test]
    fn db_io_test() {
        let dir = tempdir().unwrap();
        let manager = DiskManager::open(dir.path().join("dbfile")).unwrap();

        let page_data = Page::from_bytes(&[1; PAGE_SIZE]);
        let mut page_buffer = Page::new();

        manager.write_page(3, &page_data).unwrap();
        manager.read_page(3, &mut page_buffer).expect("Failed to read page");

        assert_eq!(page_data, page_buffer, "Page read mismatch!");
        assert_eq!(manager.writes(), 1);
        assert_eq!(manager.reads(), 1);
    }

    #[test]
    fn offset_is_page_aligned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dbfile");
        let manager = DiskManager::open(&path).unwrap();

        manager.write_page(2, &Page::from_bytes(b"third page")).unwrap();
        manager.sync().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw.len(), 3 * PAGE_SIZE);
        assert_eq!(&raw[2 * PAGE_SIZE..2 * PAGE_SIZE + 10], b"third page");
        assert!(raw[..2 * PAGE_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn unwritten_page_reads_as_zeros() {
        let dir = tempdir().unwrap();
        let manager = DiskManager::open(dir.path().join("dbfile")).unwrap();

        let mut page = Page::from_bytes(b"garbage that must be cleared");
        manager.read_page(42, &mut page).unwrap();
        assert!(page.is_zeroed());
    }

    #[test]
    fn short_tail_is_zero_padded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dbfile");
        std::fs::write(&path, vec![7u8; PAGE_SIZE + 100]).unwrap();

        let manager = DiskManager::open(&path).unwrap();
        let mut page = Page::new();
        manager.read_page(1, &mut page).unwrap();

        assert!(page.data[..100].iter().all(|&b| b == 7));
        assert!(page.data[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn reopen_keeps_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dbfile");
        {
            let manager = DiskManager::open(&path).unwrap();
            manager.write_page(0, &Page::from_bytes(b"persisted")).unwrap();
            manager.close().unwrap();
        }

        let manager = DiskManager::open(&path).unwrap();
        let mut page = Page::new();
        manager.read_page(0, &mut page).unwrap();
        assert_eq!(page.read_at(0, 9), b"persisted");
    }

    #[test]
    fn closed_manager_rejects_io() {
        let dir = tempdir().unwrap();
        let manager = DiskManager::open(dir.path().join("dbfile")).unwrap();
        manager.close().unwrap();
        manager.close().unwrap();

        assert!(manager.is_closed());
        let mut page = Page::new();
        assert!(matches!(manager.read_page(0, &mut page), Err(StorageError::Closed)));
        assert!(matches!(manager.write_page(0, &page), Err(StorageError::Closed)));
    }
}
