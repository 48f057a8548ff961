//! # Arena B-Tree
//!
//! Sorted index of token ids. Nodes live in a single `Vec` and refer to each
//! other by [`NodeIdx`]; the parent link is a plain index used only to walk
//! upward while propagating a split. Nothing is freed individually: removed
//! keys leave their node in place and `optimize` rebuilds a fresh arena.
//!
//! ```text
//!                    [ m ]                 internal: keys = separators
//!                  /       \                children = keys + 1
//!          [ c  g ]         [ q  u ]
//!         /   |   \        /   |   \
//!     [a b] [c d] [g k] [m n] [q r] [u x]   leaves: keys + values 1:1
//! ```
//!
//! Keys in child `i` of an internal node satisfy
//! `keys[i - 1] <= k < keys[i]`. A leaf split *copies* the sibling's first
//! key into the parent; an internal split *moves* the middle key up.

use parking_lot::Mutex;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::model::{ContextToken, TokenId};
use crate::{Error, Result};
use super::cache::NodeCache;

/// Position of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(pub usize);

/// Root-to-leaf path; trees deeper than 8 levels spill to the heap.
type Path = SmallVec<[NodeIdx; 8]>;

/// A B-tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct BTreeNode {
    pub keys: Vec<TokenId>,
    /// Leaf only, parallel to `keys`.
    pub values: Vec<ContextToken>,
    /// Internal only, `keys.len() + 1` entries.
    pub children: Vec<NodeIdx>,
    pub is_leaf: bool,
    /// Back-reference for split propagation. Never serialized.
    pub parent: Option<NodeIdx>,
}

impl BTreeNode {
    pub fn leaf(parent: Option<NodeIdx>) -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            is_leaf: true,
            parent,
        }
    }

    pub fn internal(parent: Option<NodeIdx>) -> Self {
        Self { is_leaf: false, ..Self::leaf(parent) }
    }
}

/// Index of the child to descend into for `id`.
///
/// An exact hit on a separator goes right: the separator is the smallest key
/// of the right subtree.
fn child_slot(keys: &[TokenId], id: &str) -> usize {
    match keys.binary_search_by(|k| k.as_str().cmp(id)) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}

// ============================================================================
// BTreeIndex
// ============================================================================

/// B-tree over token ids with values stored in the leaves.
pub struct BTreeIndex {
    nodes: Vec<BTreeNode>,
    root: Option<NodeIdx>,
    order: usize,
    depth: usize,
    len: usize,
    cache: Mutex<NodeCache>,
}

impl BTreeIndex {
    /// `order` is the maximum number of keys a node holds before splitting.
    pub fn new(order: usize, max_cache_size: usize) -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            order,
            depth: 0,
            len: 0,
            cache: Mutex::new(NodeCache::new(max_cache_size)),
        }
    }

    pub fn order(&self) -> usize { self.order }

    /// 0 for an empty tree, 1 for a lone leaf.
    pub fn depth(&self) -> usize { self.depth }

    /// Number of distinct keys.
    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Arena size, including nodes emptied by removals.
    pub fn node_count(&self) -> usize { self.nodes.len() }

    pub fn root(&self) -> Option<NodeIdx> { self.root }

    pub fn node(&self, idx: NodeIdx) -> Option<&BTreeNode> {
        self.nodes.get(idx.0)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.lock().capacity()
    }

    /// (hits, misses) since the cache was created.
    pub fn cache_stats(&self) -> (u64, u64) {
        let cache = self.cache.lock();
        (cache.hits(), cache.misses())
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Drop every node. Cache entries go too since their indices are void.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.depth = 0;
        self.len = 0;
        self.cache.get_mut().clear();
    }

    fn alloc(&mut self, node: BTreeNode) -> NodeIdx {
        let idx = NodeIdx(self.nodes.len());
        self.nodes.push(node);
        idx
    }

    fn touch(&self, idx: NodeIdx) {
        self.cache.lock().touch(idx, &self.nodes[idx.0]);
    }

    fn descend(&self, root: NodeIdx, id: &str) -> Path {
        let mut path = Path::new();
        let mut idx = root;
        loop {
            self.touch(idx);
            path.push(idx);
            let node = &self.nodes[idx.0];
            if node.is_leaf {
                return path;
            }
            idx = node.children[child_slot(&node.keys, id)];
        }
    }

    // ========================================================================
    // Point operations
    // ========================================================================

    /// Point lookup.
    pub fn search(&self, id: &str) -> Option<&ContextToken> {
        let root = self.root?;
        let path = self.descend(root, id);
        let leaf = &self.nodes[path.last()?.0];
        leaf.keys
            .binary_search_by(|k| k.as_str().cmp(id))
            .ok()
            .map(|pos| &leaf.values[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.search(id).is_some()
    }

    /// Insert or overwrite. Returns the previous token for an existing id.
    pub fn insert(&mut self, token: ContextToken) -> Option<ContextToken> {
        let Some(root) = self.root else {
            let mut leaf = BTreeNode::leaf(None);
            leaf.keys.push(token.id.clone());
            leaf.values.push(token);
            let idx = self.alloc(leaf);
            self.root = Some(idx);
            self.depth = 1;
            self.len = 1;
            self.touch(idx);
            return None;
        };

        let path = self.descend(root, token.id.as_str());
        let leaf_idx = *path.last()?;
        let leaf = &mut self.nodes[leaf_idx.0];

        match leaf.keys.binary_search(&token.id) {
            Ok(pos) => {
                return Some(std::mem::replace(&mut leaf.values[pos], token));
            }
            Err(pos) => {
                leaf.keys.insert(pos, token.id.clone());
                leaf.values.insert(pos, token);
            }
        }
        self.len += 1;

        if self.nodes[leaf_idx.0].keys.len() > self.order {
            self.split_upward(leaf_idx);
        } else {
            self.touch(leaf_idx);
        }
        None
    }

    /// Remove a key from its leaf. No rebalancing: separators stay valid
    /// routing keys, so lookups keep working on an underfull tree.
    pub fn remove(&mut self, id: &str) -> Option<ContextToken> {
        let root = self.root?;
        let path = self.descend(root, id);
        let leaf_idx = *path.last()?;
        let leaf = &mut self.nodes[leaf_idx.0];
        let pos = leaf.keys.binary_search_by(|k| k.as_str().cmp(id)).ok()?;
        leaf.keys.remove(pos);
        let removed = leaf.values.remove(pos);
        self.len -= 1;

        if self.len == 0 {
            self.clear();
        }
        Some(removed)
    }

    // ========================================================================
    // Splitting
    // ========================================================================

    fn split_upward(&mut self, start: NodeIdx) {
        let mut current = start;
        while self.nodes[current.0].keys.len() > self.order {
            let (promoted, sibling) = if self.nodes[current.0].is_leaf {
                self.split_leaf(current)
            } else {
                self.split_internal(current)
            };

            match self.nodes[current.0].parent {
                Some(parent) => {
                    let pnode = &mut self.nodes[parent.0];
                    // The promoted key sorts right after `current`'s separator,
                    // so its insertion point is also `current`'s child slot.
                    let pos = match pnode.keys.binary_search(&promoted) {
                        Ok(i) | Err(i) => i,
                    };
                    pnode.keys.insert(pos, promoted);
                    pnode.children.insert(pos + 1, sibling);
                    self.touch(current);
                    self.touch(sibling);
                    current = parent;
                }
                None => {
                    let mut root = BTreeNode::internal(None);
                    root.keys.push(promoted);
                    root.children = vec![current, sibling];
                    let root_idx = self.alloc(root);
                    self.nodes[current.0].parent = Some(root_idx);
                    self.nodes[sibling.0].parent = Some(root_idx);
                    self.root = Some(root_idx);
                    self.depth += 1;
                    debug!(depth = self.depth, "b-tree root split");
                    self.touch(current);
                    self.touch(sibling);
                    current = root_idx;
                }
            }
        }
        self.touch(current);
    }

    /// Upper half moves to a new sibling; its first key is copied upward.
    fn split_leaf(&mut self, idx: NodeIdx) -> (TokenId, NodeIdx) {
        let node = &mut self.nodes[idx.0];
        let mid = node.keys.len() / 2;
        let keys = node.keys.split_off(mid);
        let values = node.values.split_off(mid);
        let parent = node.parent;

        let promoted = keys[0].clone();
        let sibling = self.alloc(BTreeNode { keys, values, ..BTreeNode::leaf(parent) });
        debug!(separator = %promoted, "b-tree leaf split");
        (promoted, sibling)
    }

    /// Middle key moves upward; children right of it move to the sibling
    /// and are re-parented.
    fn split_internal(&mut self, idx: NodeIdx) -> (TokenId, NodeIdx) {
        let node = &mut self.nodes[idx.0];
        let mid = node.keys.len() / 2;
        let mut keys = node.keys.split_off(mid);
        let promoted = keys.remove(0);
        let children = node.children.split_off(mid + 1);
        let parent = node.parent;

        let sibling = self.alloc(BTreeNode {
            keys,
            children: children.clone(),
            ..BTreeNode::internal(parent)
        });
        for child in children {
            self.nodes[child.0].parent = Some(sibling);
        }
        debug!(separator = %promoted, "b-tree internal split");
        (promoted, sibling)
    }

    // ========================================================================
    // Scans
    // ========================================================================

    /// In-order walk over every token. `visitor` returns `false` to stop;
    /// the walk then unwinds without touching another node. Returns whether
    /// the walk ran to completion.
    pub fn scan_range<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&ContextToken) -> bool,
    {
        match self.root {
            Some(root) => self.scan_node(root, &mut visitor),
            None => true,
        }
    }

    fn scan_node<F>(&self, idx: NodeIdx, visitor: &mut F) -> bool
    where
        F: FnMut(&ContextToken) -> bool,
    {
        let node = &self.nodes[idx.0];
        if node.is_leaf {
            node.values.iter().all(|token| visitor(token))
        } else {
            node.children.iter().all(|&child| self.scan_node(child, visitor))
        }
    }

    /// All keys in order.
    pub fn keys(&self) -> Vec<TokenId> {
        let mut out = Vec::with_capacity(self.len);
        self.scan_range(|t| {
            out.push(t.id.clone());
            true
        });
        out
    }

    /// Replace the whole tree by re-inserting `tokens`.
    pub fn rebuild<I>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = ContextToken>,
    {
        self.clear();
        for token in tokens {
            self.insert(token);
        }
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    /// Check every structural invariant: sorted keys, separator bounds,
    /// fan-out, parent links, uniform leaf depth, and the key count.
    pub fn verify(&self) -> Result<()> {
        let Some(root) = self.root else {
            if self.len != 0 || self.depth != 0 {
                return Err(Error::CorruptIndex(format!(
                    "empty tree reports len {} depth {}", self.len, self.depth
                )));
            }
            return Ok(());
        };

        let root_node = self.node(root)
            .ok_or_else(|| Error::CorruptIndex(format!("root {} out of bounds", root.0)))?;
        if root_node.parent.is_some() {
            return Err(Error::CorruptIndex("root has a parent".into()));
        }

        let mut walk = Walk { leaf_depth: None, keys: 0 };
        self.verify_node(root, None, None, 1, &mut walk)?;

        if walk.leaf_depth != Some(self.depth) {
            return Err(Error::CorruptIndex(format!(
                "leaf depth {:?} != recorded depth {}", walk.leaf_depth, self.depth
            )));
        }
        if walk.keys != self.len {
            return Err(Error::CorruptIndex(format!(
                "counted {} keys, recorded {}", walk.keys, self.len
            )));
        }
        Ok(())
    }

    fn verify_node(
        &self,
        idx: NodeIdx,
        lower: Option<&TokenId>,
        upper: Option<&TokenId>,
        depth: usize,
        walk: &mut Walk,
    ) -> Result<()> {
        let node = self.node(idx)
            .ok_or_else(|| Error::CorruptIndex(format!("node {} out of bounds", idx.0)))?;
        let corrupt = |msg: &str| Error::CorruptIndex(format!("node {}: {msg}", idx.0));

        if node.keys.len() > self.order {
            return Err(corrupt("overfull"));
        }
        if !node.keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(corrupt("keys not strictly increasing"));
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first()) {
            if first < lo {
                return Err(corrupt("key below separator"));
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last()) {
            if last >= hi {
                return Err(corrupt("key at or above separator"));
            }
        }

        if node.is_leaf {
            if !node.children.is_empty() || node.values.len() != node.keys.len() {
                return Err(corrupt("leaf shape"));
            }
            if node.values.iter().zip(&node.keys).any(|(v, k)| &v.id != k) {
                return Err(corrupt("value id does not match key"));
            }
            match walk.leaf_depth {
                None => walk.leaf_depth = Some(depth),
                Some(d) if d != depth => return Err(corrupt("leaves at unequal depth")),
                Some(_) => {}
            }
            walk.keys += node.keys.len();
            return Ok(());
        }

        if !node.values.is_empty() || node.children.len() != node.keys.len() + 1 {
            return Err(corrupt("internal fan-out"));
        }
        for (i, &child) in node.children.iter().enumerate() {
            let child_node = self.node(child)
                .ok_or_else(|| corrupt("child out of bounds"))?;
            if child_node.parent != Some(idx) {
                return Err(corrupt("child parent link"));
            }
            let lo = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
            let hi = if i == node.keys.len() { upper } else { Some(&node.keys[i]) };
            self.verify_node(child, lo, hi, depth + 1, walk)?;
        }
        Ok(())
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Borrowed serializable view of the whole tree.
    pub fn to_file(&self) -> IndexFileRef<'_> {
        IndexFileRef {
            order: self.order,
            root: self.root.map(|idx| NodeView { index: self, idx }),
        }
    }

    /// Rebuild the arena from its recursive form, restoring parent links
    /// top-down. The result is not verified; callers decide what to do with
    /// a malformed tree.
    pub fn from_file(file: IndexFile, max_cache_size: usize) -> Self {
        let mut index = Self::new(file.order, max_cache_size);
        if let Some(root) = file.root {
            let root_idx = index.adopt(root, None);
            index.root = Some(root_idx);

            let mut depth = 1;
            let mut idx = root_idx;
            while let Some(&first) = index.nodes[idx.0].children.first() {
                depth += 1;
                idx = first;
            }
            index.depth = depth;
            index.len = index.nodes.iter().filter(|n| n.is_leaf).map(|n| n.keys.len()).sum();
        }
        index
    }

    fn adopt(&mut self, node: SerializedNode, parent: Option<NodeIdx>) -> NodeIdx {
        let idx = self.alloc(BTreeNode {
            keys: node.keys,
            values: node.values,
            children: Vec::new(),
            is_leaf: node.is_leaf,
            parent,
        });
        let children = node.children
            .into_iter()
            .map(|child| self.adopt(child, Some(idx)))
            .collect();
        self.nodes[idx.0].children = children;
        idx
    }
}

struct Walk {
    leaf_depth: Option<usize>,
    keys: usize,
}

// ============================================================================
// Wire form
// ============================================================================

/// Owned recursive node, as read back from disk.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNode {
    pub keys: Vec<TokenId>,
    #[serde(default)]
    pub values: Vec<ContextToken>,
    pub is_leaf: bool,
    #[serde(default)]
    pub children: Vec<SerializedNode>,
}

/// Contents of `graph.index`.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexFile {
    pub order: usize,
    pub root: Option<SerializedNode>,
}

/// Borrowed counterpart of [`IndexFile`] used when saving.
#[derive(Serialize)]
pub struct IndexFileRef<'a> {
    pub order: usize,
    pub root: Option<NodeView<'a>>,
}

/// Serializes a subtree in place without cloning tokens.
pub struct NodeView<'a> {
    index: &'a BTreeIndex,
    idx: NodeIdx,
}

impl Serialize for NodeView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let node = &self.index.nodes[self.idx.0];
        let children: Vec<NodeView<'_>> = node.children
            .iter()
            .map(|&idx| NodeView { index: self.index, idx })
            .collect();

        let mut state = serializer.serialize_struct("BTreeNode", 4)?;
        state.serialize_field("keys", &node.keys)?;
        state.serialize_field("values", &node.values)?;
        state.serialize_field("isLeaf", &node.is_leaf)?;
        state.serialize_field("children", &children)?;
        state.end()
    }
}

// ============================================================================
// Tests
// ============================================================================
