use std::hash::Hash;

use hashlink::LinkedHashMap;

// Eviction policy over the set of currently unpinned entries.
//
// The buffer pool calls `insert` exactly when an entry's pin count drops to
// zero and `erase` when it is pinned again or dropped from the pool.
pub trait Replacer<ID: Eq + Hash + Copy> {
    // Marks the entry evictable. Re-inserting refreshes its recency.
    fn insert(&mut self, entry_id: ID);
    // Removes the entry from candidacy. Returns whether it was tracked.
    fn erase(&mut self, entry_id: ID) -> bool;
    // Removes and returns the least recently unpinned entry.
    fn victim(&mut self) -> Option<ID>;
    // Puts a taken victim back as the next one to evict.
    fn reinstate(&mut self, entry_id: ID);
    fn contains(&self, entry_id: ID) -> bool;
    fn size(&self) -> usize;
}

// Strict LRU over unpinned entries. Recency is recorded at unpin time only,
// so hits on a pinned entry never change its rank; entries unpinned in the
// same instant are evicted in unpin call order.
//
// The linked map keeps insertion order: front is the least recently
// unpinned entry (the tail of the LRU list), back the most recent (the head).
pub struct LRUReplacer<ID: Eq + Hash + Copy> {
    node_store: LinkedHashMap<ID, ()>,
}

impl<ID: Eq + Hash + Copy> LRUReplacer<ID> {
    pub fn new(number_of_entries: usize) -> Self {
        LRUReplacer {
            node_store: LinkedHashMap::with_capacity(number_of_entries),
        }
    }

    // Candidates from next victim to most recently unpinned.
    pub fn candidates(&self) -> Vec<ID> {
        self.node_store.keys().copied().collect()
    }
}

impl<ID: Eq + Hash + Copy> Replacer<ID> for LRUReplacer<ID> {
    fn insert(&mut self, entry_id: ID) {
        // Move to the head instead of tracking it twice
        self.node_store.remove(&entry_id);
        self.node_store.insert(entry_id, ());
    }

    fn erase(&mut self, entry_id: ID) -> bool {
        self.node_store.remove(&entry_id).is_some()
    }

    fn victim(&mut self) -> Option<ID> {
        self.node_store.pop_front().map(|(entry_id, _)| entry_id)
    }

    fn reinstate(&mut self, entry_id: ID) {
        self.node_store.insert(entry_id, ());
        self.node_store.to_front(&entry_id);
    }

    fn contains(&self, entry_id: ID) -> bool {
        self.node_store.contains_key(&entry_id)
    }

    fn size(&self) -> usize {
        self.node_store.len()
    }
}

#[cfg(test)]
pub mod test {
    use super::{LRUReplacer, Replacer};

    #[test]
    fn replacer_test() {
        let mut replacer = LRUReplacer::new(7);

        // Unpin six entries in order. The LRU list is now [1, 2, 3, 4, 5, 6].
        for id in 1..=6u32 {
            replacer.insert(id);
        }
        assert_eq!(6, replacer.size());

        // Entry 1 is unpinned again and moves to the head: [2, 3, 4, 5, 6, 1].
        replacer.insert(1);
        assert_eq!(6, replacer.size());

        // Evict three entries, oldest unpin first.
        assert_eq!(Some(2), replacer.victim());
        assert_eq!(Some(3), replacer.victim());
        assert_eq!(Some(4), replacer.victim());
        assert_eq!(3, replacer.size());

        // Entry 5 is pinned again (cache hit) and leaves candidacy: [6, 1].
        assert!(replacer.erase(5));
        assert!(!replacer.erase(5));
        assert_eq!(2, replacer.size());

        // Re-unpinning 3 and 4 appends them: [6, 1, 3, 4].
        replacer.insert(3);
        replacer.insert(4);
        assert_eq!(vec![6, 1, 3, 4], replacer.candidates());

        assert_eq!(Some(6), replacer.victim());
        assert_eq!(Some(1), replacer.victim());
        assert_eq!(Some(3), replacer.victim());
        assert_eq!(Some(4), replacer.victim());
        assert_eq!(0, replacer.size());

        // There is nothing left, a failed eviction must not change anything.
        assert_eq!(None, replacer.victim());
        assert_eq!(0, replacer.size());

        // Erasing an untracked entry is harmless.
        assert!(!replacer.erase(42));
    }

    #[test]
    fn reinstated_victim_keeps_its_rank() {
        let mut replacer = LRUReplacer::new(4);
        for id in 1..=4u32 {
            replacer.insert(id);
        }

        let victim = replacer.victim().unwrap();
        assert_eq!(1, victim);
        replacer.reinstate(victim);

        assert_eq!(vec![1, 2, 3, 4], replacer.candidates());
        assert_eq!(Some(1), replacer.victim());
    }

    #[test]
    fn ties_follow_unpin_order() {
        let mut replacer = LRUReplacer::new(3);
        replacer.insert(10u32);
        replacer.insert(11);
        replacer.insert(12);

        assert!(replacer.contains(11));
        assert_eq!(Some(10), replacer.victim());
        assert_eq!(Some(11), replacer.victim());
        assert_eq!(Some(12), replacer.victim());
    }
}
