//! Bounded LRU cache mapping `chunk_id` to decompressed chunk bytes.
//!
//! Private to a single reader instance; not thread-safe. A
//! `HashMap<usize, Vec<u8>>` keyed by chunk id plus a recency queue is
//! enough — no crate in the workspace carries a ready-made LRU container,
//! and the structure is small enough to hand-roll directly.

use std::collections::HashMap;

/// Default capacity: 100 entries, ~3.2 MiB at the default 32 KiB chunk size.
pub const DEFAULT_CAPACITY: usize = 100;

pub struct ChunkCache {
    capacity: usize,
    entries: HashMap<usize, Vec<u8>>,
    /// Most-recently-used at the back.
    recency: Vec<usize>,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            recency: Vec::new(),
        }
    }

    /// Looks up `chunk_id`, marking it most-recently-used on a hit.
    pub fn get(&mut self, chunk_id: usize) -> Option<&[u8]> {
        if !self.entries.contains_key(&chunk_id) {
            return None;
        }
        self.touch(chunk_id);
        self.entries.get(&chunk_id).map(|v| v.as_slice())
    }

    /// Inserts `data` for `chunk_id`, evicting the least-recently-used entry
    /// if the cache is at capacity. A capacity of 0 means every put is
    /// immediately evicted, i.e. the cache always misses.
    pub fn put(&mut self, chunk_id: usize, data: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&chunk_id) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self.recency.first().copied() {
                self.recency.remove(0);
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(chunk_id, data);
        self.touch(chunk_id);
    }

    fn touch(&mut self, chunk_id: usize) {
        if let Some(pos) = self.recency.iter().position(|&id| id == chunk_id) {
            self.recency.remove(pos);
        }
        self.recency.push(chunk_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ChunkCache::new(2);
        cache.put(1, vec![1]);
        cache.put(2, vec![2]);
        // Touch 1 so 2 becomes the LRU entry.
        assert!(cache.get(1).is_some());
        cache.put(3, vec![3]);

        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn zero_capacity_always_misses() {
        let mut cache = ChunkCache::new(0);
        cache.put(1, vec![1, 2, 3]);
        assert!(cache.get(1).is_none());
    }
}
