//! Bounded LRU cache of B-tree node handles.
//!
//! The cache never owns a node. Entries are arena indices keyed by a
//! fingerprint of the node's current keys and leaf flag, so evicting an entry
//! (or the fingerprint going stale after a split) only forgets a handle; the
//! node stays reachable from its parent.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::num::NonZeroUsize;

use lru::LruCache;

use super::btree::{BTreeNode, NodeIdx};

/// Deterministic identity of a node: hash of (keys, is_leaf).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    pub fn of(node: &BTreeNode) -> Self {
        let mut h = DefaultHasher::new();
        node.is_leaf.hash(&mut h);
        node.keys.hash(&mut h);
        CacheKey(h.finish())
    }
}

/// Non-owning, LRU-ordered node cache.
pub struct NodeCache {
    entries: LruCache<CacheKey, NodeIdx>,
    hits: u64,
    misses: u64,
}

impl NodeCache {
    /// A zero capacity is bumped to one.
    pub fn new(max_cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(max_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            hits: 0,
            misses: 0,
        }
    }

    /// Mark `node` most-recently-used, admitting it if absent. Admission past
    /// capacity evicts the least-recently-used entry.
    pub fn touch(&mut self, idx: NodeIdx, node: &BTreeNode) {
        let key = CacheKey::of(node);
        if self.entries.get(&key).is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        self.entries.put(key, idx);
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<NodeIdx> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
