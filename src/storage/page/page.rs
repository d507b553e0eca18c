use page_constants::PAGE_SIZE;

// Position of a page in the backing file: offset = id * PAGE_SIZE
pub type PageId = u32;
// Index of a slot in the buffer pool's frame arena
pub type FrameId = usize;

pub mod page_constants {
    // Size
    pub const PAGE_SIZE: usize = 1024 * 4;

    // Physical layout of the reserved metadata range
    // Page 0: [u32 allocation counter][u32 crc32 of the directory range]
    pub const METADATA_PAGE_ID: u32 = 0;
    // Pages 1..=8: serialized page directory
    pub const DIRECTORY_PAGE_START: u32 = 1;
    pub const DIRECTORY_PAGE_END: u32 = 8;
    pub const DIRECTORY_PAGES: usize = (DIRECTORY_PAGE_END - DIRECTORY_PAGE_START + 1) as usize;

    pub const FIRST_DATA_PAGE_ID: u32 = DIRECTORY_PAGE_END + 1;
}

pub fn is_reserved(page_id: PageId) -> bool {
    page_id < page_constants::FIRST_DATA_PAGE_ID
}

// A fixed size page image. The buffer pool owns one per frame; the disk
// manager and the WAL move these images to and from the file.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new() -> Self {
        Page { data: [0; PAGE_SIZE] }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut page = Page::new();
        let len = bytes.len().min(PAGE_SIZE);
        page.data[..len].copy_from_slice(&bytes[..len]);
        page
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    pub fn is_zeroed(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    // Writes `src` starting at `offset`, truncating at the page boundary.
    // Returns the number of bytes written.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) -> usize {
        if offset >= PAGE_SIZE {
            return 0;
        }
        let len = src.len().min(PAGE_SIZE - offset);
        self.data[offset..offset + len].copy_from_slice(&src[..len]);
        len
    }

    pub fn read_at(&self, offset: usize, len: usize) -> &[u8] {
        let start = offset.min(PAGE_SIZE);
        let end = offset.saturating_add(len).min(PAGE_SIZE);
        &self.data[start..end]
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self.data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        f.debug_struct("Page").field("used_bytes", &used).finish()
    }
}
