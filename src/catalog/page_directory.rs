use std::{
    collections::{BTreeMap, HashSet},
    io::{Cursor, Read},
    sync::Arc,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use parking_lot::Mutex;

use crate::{
    error::{IoContext, Result, StorageError},
    storage::{
        disk::manager::DiskManager,
        page::page::{
            page_constants::{
                DIRECTORY_PAGES, DIRECTORY_PAGE_START, FIRST_DATA_PAGE_ID, METADATA_PAGE_ID,
                PAGE_SIZE,
            },
            Page, PageId,
        },
    },
};

pub const DIRECTORY_CAPACITY: usize = DIRECTORY_PAGES * PAGE_SIZE;

// Logical page number -> physical page id, per table
type TablePageMap = BTreeMap<u32, PageId>;

struct DirectoryState {
    tables: BTreeMap<String, TablePageMap>,
    // Next physical page id to hand out. Only ever grows.
    next_page_id: PageId,
}

// Persistent mapping (table, logical page) -> physical page id plus the
// physical allocation counter.
//
// Physical ids are never reused: removing a mapping leaves its id retired
// for good. The whole mapping lives behind one mutex, which is the first
// lock in the engine's lock order.
pub struct PageDirectory {
    state: Mutex<DirectoryState>,
    disk: Arc<DiskManager>,
}

impl PageDirectory {
    // Empty directory for a fresh data file. Nothing is written until `persist`.
    pub fn new(disk: Arc<DiskManager>) -> Self {
        PageDirectory {
            state: Mutex::new(DirectoryState {
                tables: BTreeMap::new(),
                next_page_id: FIRST_DATA_PAGE_ID,
            }),
            disk,
        }
    }

    // Reads the counter page and the directory range. An all-zero metadata
    // range is a fresh database; anything malformed is CorruptMetadata.
    pub fn load(disk: Arc<DiskManager>) -> Result<Self> {
        let mut header = Page::new();
        disk.read_page(METADATA_PAGE_ID, &mut header)?;

        let mut region = vec![0u8; DIRECTORY_CAPACITY];
        for (i, chunk) in region.chunks_mut(PAGE_SIZE).enumerate() {
            let mut page = Page::new();
            disk.read_page(DIRECTORY_PAGE_START + i as PageId, &mut page)?;
            chunk.copy_from_slice(page.as_bytes());
        }

        if header.is_zeroed() {
            if region.iter().any(|&b| b != 0) {
                return Err(StorageError::CorruptMetadata(
                    "directory pages present but counter page is empty".into(),
                ));
            }
            info!("No page directory on disk, starting fresh");
            return Ok(PageDirectory::new(disk));
        }

        let mut rdr = Cursor::new(header.as_bytes());
        let stored_counter = rdr.read_u32::<LittleEndian>().map_err(corrupt)?;
        let stored_crc = rdr.read_u32::<LittleEndian>().map_err(corrupt)?;

        let crc = crc32fast::hash(&region);
        if crc != stored_crc {
            return Err(StorageError::CorruptMetadata(format!(
                "directory checksum mismatch (stored {:#010x}, computed {:#010x})",
                stored_crc, crc
            )));
        }

        let next_page_id = stored_counter.max(FIRST_DATA_PAGE_ID);
        let tables = decode_tables(&region, next_page_id)?;

        info!(
            "Loaded page directory: {} tables, next physical page {}",
            tables.len(),
            next_page_id
        );

        Ok(PageDirectory {
            state: Mutex::new(DirectoryState { tables, next_page_id }),
            disk,
        })
    }

    // Hands out the next physical id, maps it and zeroes the page on disk.
    // An existing mapping for the same logical page is replaced.
    pub fn allocate(&self, table: &str, logical_page: u32) -> Result<PageId> {
        let mut state = self.state.lock();

        let page_id = state.next_page_id;
        let next = page_id.checked_add(1).ok_or_else(|| {
            StorageError::CorruptMetadata("physical page id space exhausted".into())
        })?;

        // The counter only moves once the page exists on disk
        self.disk.zero_page(page_id)?;
        state.next_page_id = next;

        let previous = state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(logical_page, page_id);

        if let Some(previous) = previous {
            debug!(
                "Remapped {}:{} from physical page {} to {}",
                table, logical_page, previous, page_id
            );
        } else {
            debug!("Allocated physical page {} for {}:{}", page_id, table, logical_page);
        }

        Ok(page_id)
    }

    // Raises the counter so `page_id` and everything below it are never
    // handed out. Returns whether the counter moved.
    pub fn reserve_through(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();
        if page_id < state.next_page_id {
            return Ok(false);
        }

        let next = page_id.checked_add(1).ok_or_else(|| {
            StorageError::CorruptMetadata("physical page id space exhausted".into())
        })?;
        info!(
            "Raising allocation counter from {} to {} past logged pages",
            state.next_page_id, next
        );
        state.next_page_id = next;
        Ok(true)
    }

    pub fn lookup(&self, table: &str, logical_page: u32) -> Option<PageId> {
        let state = self.state.lock();
        state.tables.get(table)?.get(&logical_page).copied()
    }

    // Detaches the mapping. The physical id is not reclaimed.
    pub fn remove(&self, table: &str, logical_page: u32) -> Option<PageId> {
        let mut state = self.state.lock();
        let pages = state.tables.get_mut(table)?;
        let page_id = pages.remove(&logical_page)?;
        if pages.is_empty() {
            state.tables.remove(table);
        }
        Some(page_id)
    }

    // Runs `detach` on the mapped physical id while holding the directory
    // lock and drops the mapping only if it succeeds.
    pub fn remove_with<F>(&self, table: &str, logical_page: u32, detach: F) -> Result<PageId>
    where
        F: FnOnce(PageId) -> Result<()>,
    {
        let mut state = self.state.lock();
        let pages = state.tables.get_mut(table).ok_or_else(|| not_found(table, logical_page))?;
        let page_id = *pages.get(&logical_page).ok_or_else(|| not_found(table, logical_page))?;

        detach(page_id)?;

        pages.remove(&logical_page);
        if pages.is_empty() {
            state.tables.remove(table);
        }
        Ok(page_id)
    }

    pub fn page_count(&self, table: &str) -> usize {
        self.state.lock().tables.get(table).map_or(0, |pages| pages.len())
    }

    pub fn tables(&self) -> Vec<String> {
        self.state.lock().tables.keys().cloned().collect()
    }

    pub fn next_page_id(&self) -> PageId {
        self.state.lock().next_page_id
    }

    // Rewrites the directory pages, then the counter page carrying their checksum.
    pub fn persist(&self) -> Result<()> {
        let state = self.state.lock();

        let region = encode_tables(&state.tables)?;
        let crc = crc32fast::hash(&region);

        for (i, chunk) in region.chunks(PAGE_SIZE).enumerate() {
            self.disk
                .write_page(DIRECTORY_PAGE_START + i as PageId, &Page::from_bytes(chunk))?;
        }

        let mut header = Page::new();
        {
            let mut wtr = Cursor::new(header.as_bytes_mut());
            write_u32(&mut wtr, state.next_page_id)?;
            write_u32(&mut wtr, crc)?;
        }
        self.disk.write_page(METADATA_PAGE_ID, &header)?;

        debug!(
            "Persisted page directory: {} tables, next physical page {}",
            state.tables.len(),
            state.next_page_id
        );
        Ok(())
    }
}

fn not_found(table: &str, logical_page: u32) -> StorageError {
    StorageError::PageNotFound { table: table.to_string(), logical_page }
}

fn corrupt(err: std::io::Error) -> StorageError {
    StorageError::CorruptMetadata(format!("truncated page directory: {}", err))
}

fn write_u32<W: WriteBytesExt>(wtr: &mut W, value: u32) -> Result<()> {
    wtr.write_u32::<LittleEndian>(value)
        .io_context("encoding page directory")
}

// [table_count][per table: name_len, name, entry_count, (logical, physical)*]
fn encode_tables(tables: &BTreeMap<String, TablePageMap>) -> Result<Vec<u8>> {
    let required = 4 + tables
        .iter()
        .map(|(name, pages)| 4 + name.len() + 4 + pages.len() * 8)
        .sum::<usize>();

    if required > DIRECTORY_CAPACITY {
        return Err(StorageError::DirectoryOverflow {
            required,
            capacity: DIRECTORY_CAPACITY,
        });
    }

    let mut buf = Vec::with_capacity(DIRECTORY_CAPACITY);
    write_u32(&mut buf, tables.len() as u32)?;
    for (name, pages) in tables {
        write_u32(&mut buf, name.len() as u32)?;
        buf.extend_from_slice(name.as_bytes());
        write_u32(&mut buf, pages.len() as u32)?;
        for (&logical, &physical) in pages {
            write_u32(&mut buf, logical)?;
            write_u32(&mut buf, physical)?;
        }
    }
    buf.resize(DIRECTORY_CAPACITY, 0);
    Ok(buf)
}

fn decode_tables(region: &[u8], next_page_id: PageId) -> Result<BTreeMap<String, TablePageMap>> {
    let mut rdr = Cursor::new(region);
    let mut tables = BTreeMap::new();
    let mut seen = HashSet::new();

    let table_count = rdr.read_u32::<LittleEndian>().map_err(corrupt)?;
    for _ in 0..table_count {
        let name_len = rdr.read_u32::<LittleEndian>().map_err(corrupt)? as usize;
        if name_len > region.len() {
            return Err(StorageError::CorruptMetadata(format!(
                "table name length {} exceeds the directory range",
                name_len
            )));
        }
        let mut name = vec![0u8; name_len];
        rdr.read_exact(&mut name).map_err(corrupt)?;
        let name = String::from_utf8(name).map_err(|_| {
            StorageError::CorruptMetadata("table name is not valid UTF-8".into())
        })?;

        let entry_count = rdr.read_u32::<LittleEndian>().map_err(corrupt)?;
        let mut pages = TablePageMap::new();
        for _ in 0..entry_count {
            let logical = rdr.read_u32::<LittleEndian>().map_err(corrupt)?;
            let physical = rdr.read_u32::<LittleEndian>().map_err(corrupt)?;

            if physical < FIRST_DATA_PAGE_ID || physical >= next_page_id {
                return Err(StorageError::CorruptMetadata(format!(
                    "{}:{} maps to unallocated physical page {}",
                    name, logical, physical
                )));
            }
            if !seen.insert(physical) {
                return Err(StorageError::CorruptMetadata(format!(
                    "physical page {} is mapped twice",
                    physical
                )));
            }
            pages.insert(logical, physical);
        }

        if tables.insert(name.clone(), pages).is_some() {
            return Err(StorageError::CorruptMetadata(format!(
                "table `{}` appears twice",
                name
            )));
        }
    }

    Ok(tables)
}
