use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BufMut};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::{IoContext, Result, StorageError};
use crate::storage::disk::manager::DiskManager;
use crate::storage::page::page::{is_reserved, page_constants::PAGE_SIZE, Page, PageId};

// [u32 little-endian physical page id][PAGE_SIZE byte page image]
pub const RECORD_SIZE: usize = 4 + PAGE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub page_id: PageId,
    pub page: Page,
}

// Outcome of a replay. Every page id the log mentions was handed out before
// the crash, so the allocation counter must end up above `highest_page_id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    pub applied: usize,
    pub highest_page_id: Option<PageId>,
}

// Append-only log of full page images. A dirty page's image is appended and
// synced here before it is written to its home location in the data file.
pub struct WriteAheadLog {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
    appended: AtomicU64,
}

impl WriteAheadLog {
    // Opens the log for appending, creating it if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_io_context(|| format!("opening WAL {}", path.display()))?;

        Ok(Self {
            path,
            file: Mutex::new(BufWriter::new(file)),
            appended: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Records appended through this handle since it was opened.
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    // Appends one record and forces it to stable storage before returning.
    pub fn append(&self, page_id: PageId, page: &Page) -> Result<()> {
        let mut buf = Vec::<u8>::with_capacity(RECORD_SIZE);
        buf.put_u32_le(page_id);
        buf.put_slice(page.as_bytes());

        let mut file = self.file.lock();
        file.write_all(&buf)
            .with_io_context(|| format!("appending WAL record for page {}", page_id))?;
        file.flush().io_context("flushing WAL")?;
        file.get_mut().sync_data().io_context("syncing WAL")?;

        self.appended.fetch_add(1, Ordering::Relaxed);
        debug!("Logged page {} to WAL", page_id);
        Ok(())
    }

    // Parses every complete record in file order. A torn trailing record is
    // expected after a crash and is dropped; a missing log has no records.
    pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
        let path = path.as_ref();
        let buf = match std::fs::read(path) {
            Ok(buf) => buf,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("No WAL at {}, nothing to replay", path.display());
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(StorageError::IoFailure {
                    context: format!("reading WAL {}", path.display()),
                    source: err,
                });
            }
        };

        let mut records = Vec::with_capacity(buf.len() / RECORD_SIZE);
        let mut rbuf: &[u8] = buf.as_slice();

        while rbuf.remaining() >= RECORD_SIZE {
            let page_id = rbuf.get_u32_le();
            if is_reserved(page_id) {
                return Err(StorageError::CorruptMetadata(format!(
                    "WAL record {} targets reserved page {}",
                    records.len(),
                    page_id
                )));
            }

            let page = Page::from_bytes(&rbuf[..PAGE_SIZE]);
            rbuf.advance(PAGE_SIZE);
            records.push(LogRecord { page_id, page });
        }

        if rbuf.has_remaining() {
            warn!(
                "Discarding torn WAL tail of {} bytes after {} complete records",
                rbuf.remaining(),
                records.len()
            );
        }

        Ok(records)
    }

    // Replays the log onto the data file in file order. Each record
    // overwrites its whole target page, so replaying twice (or a prefix) is safe.
    pub fn recover(path: impl AsRef<Path>, disk: &DiskManager) -> Result<Recovery> {
        let records = Self::read_records(path.as_ref())?;

        for record in &records {
            disk.write_page(record.page_id, &record.page)?;
        }
        if !records.is_empty() {
            disk.sync()?;
        }

        info!(
            "Replayed {} WAL records from {}",
            records.len(),
            path.as_ref().display()
        );
        Ok(Recovery {
            applied: records.len(),
            highest_page_id: records.iter().map(|record| record.page_id).max(),
        })
    }
}
