use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{info, warn};

use crate::{
    buffer::buffer_pool_manager::BufferPoolManager,
    catalog::page_directory::PageDirectory,
    error::{IoContext, Result, StorageError},
    storage::disk::manager::DiskManager,
    wal::{Recovery, WriteAheadLog},
};

pub const DEFAULT_POOL_SIZE: usize = 64;

pub const ENV_DATA_DIR: &str = "PAGESTORE_DATA_DIR";
pub const ENV_POOL_SIZE: &str = "PAGESTORE_POOL_SIZE";
pub const ENV_ENABLE_WAL: &str = "PAGESTORE_ENABLE_WAL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    // Directory holding the data file and the WAL
    pub data_dir: PathBuf,
    pub db_file_name: String,
    pub wal_file_name: String,
    // Number of frames in the buffer pool
    pub pool_size: usize,
    pub enable_wal: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("pagestore"),
            db_file_name: String::from("dbfile"),
            wal_file_name: String::from("wal.log"),
            pool_size: DEFAULT_POOL_SIZE,
            enable_wal: true,
        }
    }
}

impl StorageOptions {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    // Defaults overridden by PAGESTORE_* variables. Unparsable values are
    // ignored with a warning.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(dir) = env::var(ENV_DATA_DIR) {
            options.data_dir = PathBuf::from(dir);
        }
        if let Ok(raw) = env::var(ENV_POOL_SIZE) {
            match raw.parse() {
                Ok(pool_size) => options.pool_size = pool_size,
                Err(_) => warn!("Ignoring {}={:?}: not a frame count", ENV_POOL_SIZE, raw),
            }
        }
        if let Ok(raw) = env::var(ENV_ENABLE_WAL) {
            match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => options.enable_wal = true,
                "0" | "false" | "off" | "no" => options.enable_wal = false,
                _ => warn!("Ignoring {}={:?}: not a boolean", ENV_ENABLE_WAL, raw),
            }
        }

        options
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn enable_wal(mut self, enable_wal: bool) -> Self {
        self.enable_wal = enable_wal;
        self
    }

    pub fn db_file_name(mut self, name: impl Into<String>) -> Self {
        self.db_file_name = name.into();
        self
    }

    pub fn wal_file_name(mut self, name: impl Into<String>) -> Self {
        self.wal_file_name = name.into();
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file_name)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file_name)
    }
}

// Owns the one buffer pool of a data directory. Clients get the pool
// handed to them; there is no process-wide state.
pub struct StorageEngine {
    pub(crate) options: StorageOptions,
    pub(crate) bpm: Arc<BufferPoolManager>,
}

impl StorageEngine {
    // Startup order: open the data file, replay the WAL onto it, load the
    // page directory, reopen the WAL for appending, build the pool.
    pub fn open(options: StorageOptions) -> Result<StorageEngine> {
        if options.pool_size == 0 {
            return Err(StorageError::PoolExhausted { pool_size: 0 });
        }

        std::fs::create_dir_all(&options.data_dir).with_io_context(|| {
            format!("creating data directory {}", options.data_dir.display())
        })?;

        let disk = Arc::new(DiskManager::open(options.db_path())?);

        let recovery = if options.enable_wal {
            let recovery = WriteAheadLog::recover(options.wal_path(), &disk)?;
            if recovery.applied > 0 {
                info!("Recovered {} page images from the WAL", recovery.applied);
            }
            recovery
        } else {
            Recovery::default()
        };

        let page_directory = PageDirectory::load(Arc::clone(&disk))?;

        // The counter on disk lags behind any allocation made since the last
        // checkpoint. Ids the log has images for must stay retired.
        if let Some(page_id) = recovery.highest_page_id {
            page_directory.reserve_through(page_id)?;
        }

        let wal = if options.enable_wal {
            Some(WriteAheadLog::open(options.wal_path())?)
        } else {
            None
        };

        let bpm = Arc::new(BufferPoolManager::new(
            options.pool_size,
            disk,
            page_directory,
            wal,
        ));

        info!(
            "Opened storage at {} with {} frames (WAL {})",
            options.data_dir.display(),
            options.pool_size,
            if options.enable_wal { "on" } else { "off" }
        );

        Ok(StorageEngine { options, bpm })
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn buffer_pool(&self) -> Arc<BufferPoolManager> {
        Arc::clone(&self.bpm)
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.bpm.checkpoint()
    }

    pub fn shutdown(&self) -> Result<()> {
        self.bpm.shutdown()
    }
}
