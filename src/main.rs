use anyhow::{Context, Result};
use pagestore::{StorageEngine, StorageOptions};

// Walks a small table through a three frame pool: fills it, forces an
// eviction and reads the evicted page back from disk.
fn main() -> Result<()> {
    let options = StorageOptions::from_env().pool_size(3);
    let data_dir = options.data_dir.clone();

    let engine = StorageEngine::open(options)
        .with_context(|| format!("opening storage in {}", data_dir.display()))?;
    let bpm = engine.buffer_pool();
    let table = "demo";

    let start = bpm.page_directory().page_count(table) as u32;
    for logical in start..start + 3 {
        let page_id = bpm.allocate_page(table, logical)?;
        let mut guard = bpm.write_page(table, logical)?;
        guard.write_at(0, format!("Hello Page {}", logical).as_bytes());
        println!("{}:{} -> physical page {}", table, logical, page_id);
    }

    let logical = start + 3;
    bpm.allocate_page(table, logical)?;
    {
        let mut guard = bpm.write_page(table, logical)?;
        guard.write_at(0, b"Evicted someone!");
    }

    let guard = bpm
        .read_page(table, start)
        .with_context(|| format!("reading back {}:{}", table, start))?;
    let bytes = guard.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    println!("{}:{} reads {:?}", table, start, String::from_utf8_lossy(&bytes[..end]));
    drop(guard);

    let stats = bpm.stats();
    println!(
        "pool: {} frames, {} pinned, {} evictable, {} free",
        stats.pool_size, stats.pinned, stats.evictable, stats.free
    );

    engine.shutdown().context("shutting down")?;
    Ok(())
}
