//! Token-id index: an arena B-tree with a bounded LRU node cache.

pub mod btree;
pub mod cache;

pub use btree::{BTreeIndex, BTreeNode, IndexFile, IndexFileRef, NodeIdx, SerializedNode};
pub use cache::{CacheKey, NodeCache};
