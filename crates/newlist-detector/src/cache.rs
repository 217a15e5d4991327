//! Bounded dedup cache.
//!
//! Advisory only: a miss always falls through to the store's uniqueness
//! constraint, so clearing the whole set on overflow never breaks dedup.

use std::collections::HashSet;

use newlist_core::ListingKey;
use parking_lot::Mutex;

pub struct DedupCache {
    keys: Mutex<HashSet<ListingKey>>,
    capacity: usize,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            keys: Mutex::new(HashSet::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn contains(&self, key: &ListingKey) -> bool {
        self.keys.lock().contains(key)
    }

    /// Insert a key. Returns `true` if the cache was full and got cleared first.
    pub fn insert(&self, key: ListingKey) -> bool {
        let mut keys = self.keys.lock();
        if keys.contains(&key) {
            return false;
        }
        let cleared = keys.len() >= self.capacity;
        if cleared {
            keys.clear();
        }
        keys.insert(key);
        cleared
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
