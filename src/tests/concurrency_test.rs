#[cfg(test)]
pub mod test {
    use std::{sync::Barrier, thread, time::Duration};

    use rand::{rngs::StdRng, Rng, SeedableRng};
    use tempfile::tempdir;

    use crate::tests::{open_engine, text_of};

    #[test]
    fn concurrent_fetch_of_one_page_shares_a_frame() {
        const THREADS: usize = 8;
        const POOL: u32 = THREADS as u32 + 2;

        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path(), POOL as usize);
        let bpm = engine.buffer_pool();
        let id = bpm.allocate_page("t", 0).unwrap();
        {
            let mut guard = bpm.write_page("t", 0).unwrap();
            guard.write_at(0, b"shared");
        }
        bpm.flush_page(id).unwrap();
        // Push it out so every thread races on the load. Every miss can
        // still find an unpinned victim.
        for logical in 1..=POOL {
            bpm.allocate_page("t", logical).unwrap();
            drop(bpm.read_page("t", logical).unwrap());
        }
        assert_eq!(bpm.frame_of(id), None);

        let barrier = Barrier::new(THREADS);
        let frames: Vec<_> = thread::scope(|s| {
            let spawned: Vec<_> = (0..THREADS)
                .map(|_| {
                    let bpm = &bpm;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        let handle = bpm.fetch_page(id).unwrap();
                        assert_eq!(text_of(handle.read().as_bytes()), "shared");
                        handle.frame_id()
                    })
                })
                .collect();
            spawned.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let frame = bpm.frame_of(id).unwrap();
        assert!(frames.iter().all(|&f| f == frame));
        assert_eq!(bpm.pin_count(id), Some(THREADS as u32));

        for _ in 0..THREADS {
            assert!(bpm.unpin_page(id, false));
        }
        assert_eq!(bpm.pin_count(id), Some(0));
        assert_eq!(bpm.stats().pinned, 0);
    }

    #[test]
    fn concurrent_writers_on_distinct_pages() {
        const THREADS: u32 = 4;
        const PAGES: u32 = 20;
        const ROUNDS: u32 = 50;

        let dir = tempdir().unwrap();
        {
            let engine = open_engine(dir.path(), 8);
            let bpm = engine.buffer_pool();
            for logical in 0..PAGES {
                bpm.allocate_page("t", logical).unwrap();
            }

            thread::scope(|s| {
                for t in 0..THREADS {
                    let bpm = &bpm;
                    s.spawn(move || {
                        let mut rng = StdRng::seed_from_u64(t as u64);
                        // Each thread owns the pages congruent to its index
                        let owned: Vec<u32> = (0..PAGES).filter(|p| p % THREADS == t).collect();
                        for round in 0..ROUNDS {
                            let logical = owned[rng.gen_range(0..owned.len())];
                            let mut guard = bpm.write_page("t", logical).unwrap();
                            guard.reset();
                            guard.write_at(0, format!("page {} round {}", logical, round).as_bytes());
                            drop(guard);

                            if round % 10 == 0 {
                                let page_id = bpm.page_directory().lookup("t", logical).unwrap();
                                bpm.flush_page(page_id).unwrap();
                            }
                        }

                        // Final, known value for every owned page
                        for &logical in &owned {
                            let mut guard = bpm.write_page("t", logical).unwrap();
                            guard.reset();
                            guard.write_at(0, format!("final {}", logical).as_bytes());
                        }
                    });
                }
            });

            let stats = bpm.stats();
            assert_eq!(stats.pinned, 0);
            assert!(stats.evictable + stats.free <= stats.pool_size);

            for logical in 0..PAGES {
                let guard = bpm.read_page("t", logical).unwrap();
                assert_eq!(text_of(guard.as_bytes()), format!("final {}", logical));
            }
            engine.shutdown().unwrap();
        }

        let engine = open_engine(dir.path(), 8);
        let bpm = engine.buffer_pool();
        for logical in 0..PAGES {
            let guard = bpm.read_page("t", logical).unwrap();
            assert_eq!(text_of(guard.as_bytes()), format!("final {}", logical));
        }
    }

    #[test]
    fn flush_waiting_on_a_latch_does_not_block_the_pool() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path(), 3);
        let bpm = engine.buffer_pool();
        let busy = bpm.allocate_page("t", 0).unwrap();
        bpm.allocate_page("t", 1).unwrap();
        bpm.allocate_page("t", 2).unwrap();
        bpm.allocate_page("t", 3).unwrap();
        {
            let mut guard = bpm.write_page("t", 0).unwrap();
            guard.write_at(0, b"before");
        }

        let mut latched = bpm.write_page("t", 0).unwrap();
        thread::scope(|s| {
            let flusher = s.spawn(|| bpm.flush_page(busy).unwrap());

            // Wait for the flush to take its pin and park on our latch
            while bpm.pin_count(busy) != Some(2) {
                thread::sleep(Duration::from_millis(1));
            }

            // Hits, misses and a dirty eviction still go through
            for logical in 1..=3 {
                let mut guard = bpm.write_page("t", logical).unwrap();
                guard.write_at(0, b"around the flush");
            }
            assert_eq!(bpm.pin_count(busy), Some(2));

            latched.write_at(0, b"after");
            drop(latched);
            assert!(flusher.join().unwrap());
        });

        assert_eq!(bpm.pin_count(busy), Some(0));
        let guard = bpm.read_page("t", 0).unwrap();
        assert_eq!(text_of(guard.as_bytes()), "after");
    }

    #[test]
    fn readers_and_evictions_interleave() {
        const THREADS: u64 = 6;
        const PAGES: u32 = 12;

        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path(), 4);
        let bpm = engine.buffer_pool();
        for logical in 0..PAGES {
            bpm.allocate_page("t", logical).unwrap();
            let mut guard = bpm.write_page("t", logical).unwrap();
            guard.write_at(0, format!("value {}", logical).as_bytes());
        }

        thread::scope(|s| {
            for t in 0..THREADS {
                let bpm = &bpm;
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(100 + t);
                    for _ in 0..200 {
                        let logical = rng.gen_range(0..PAGES);
                        // Pool may be momentarily exhausted by the other readers
                        if let Ok(guard) = bpm.read_page("t", logical) {
                            assert_eq!(text_of(guard.as_bytes()), format!("value {}", logical));
                        }
                    }
                });
            }
        });

        assert_eq!(bpm.stats().pinned, 0);
    }
}
