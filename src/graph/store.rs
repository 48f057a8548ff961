//! In-memory graph store.
//!
//! Owns everything that gets persisted: the B-tree (which holds the tokens
//! in its leaves), the token map, the relationship edge map, the semantic
//! clusters and the graph metadata. All methods are synchronous; the engine
//! wraps the store in a lock and does the I/O.

use hashbrown::HashMap;
use tracing::warn;

use crate::index::BTreeIndex;
use crate::model::*;
use crate::{Error, Result};
use super::clustering::cluster_tokens;
use super::similarity::{SimilarToken, find_similar};

/// Counts from applying one drained batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Updates or removals naming an unknown token.
    pub skipped: usize,
}

impl BatchOutcome {
    pub fn applied(&self) -> usize {
        self.added + self.updated + self.removed
    }
}

/// What `compact` threw away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub dropped_edge_lists: usize,
    pub dropped_cluster_members: usize,
}

/// The authoritative in-memory graph.
pub struct GraphStore {
    index: BTreeIndex,
    tokens: HashMap<TokenId, ContextToken>,
    /// source id → outgoing relationships, mirrors `ContextToken::relationships`.
    edges: HashMap<TokenId, Vec<TokenRelationship>>,
    clusters: HashMap<String, SemanticCluster>,
    metadata: GraphMetadata,
}

impl GraphStore {
    pub fn new(order: usize, max_cache_size: usize) -> Self {
        Self::from_parts(
            BTreeIndex::new(order, max_cache_size),
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            GraphMetadata::default(),
        )
    }

    pub fn from_parts(
        index: BTreeIndex,
        tokens: HashMap<TokenId, ContextToken>,
        edges: HashMap<TokenId, Vec<TokenRelationship>>,
        clusters: HashMap<String, SemanticCluster>,
        metadata: GraphMetadata,
    ) -> Self {
        let mut store = Self { index, tokens, edges, clusters, metadata };
        store.refresh_totals();
        store
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn index(&self) -> &BTreeIndex { &self.index }

    pub fn tokens(&self) -> &HashMap<TokenId, ContextToken> { &self.tokens }

    pub fn edges(&self) -> &HashMap<TokenId, Vec<TokenRelationship>> { &self.edges }

    pub fn clusters(&self) -> &HashMap<String, SemanticCluster> { &self.clusters }

    pub fn metadata(&self) -> &GraphMetadata { &self.metadata }

    pub fn metadata_mut(&mut self) -> &mut GraphMetadata { &mut self.metadata }

    pub fn token_count(&self) -> usize { self.tokens.len() }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn relationships(&self, id: &str) -> &[TokenRelationship] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Targets of `id`'s outgoing relationships.
    pub fn neighbors(&self, id: &str) -> Vec<&TokenId> {
        self.relationships(id).iter().map(|r| &r.target).collect()
    }

    pub fn cluster_of(&self, id: &str) -> Option<&SemanticCluster> {
        self.clusters.values().find(|c| c.token_ids.contains(id))
    }

    pub fn refresh_totals(&mut self) {
        self.metadata.total_nodes = self.tokens.len() as u64;
        self.metadata.total_edges = self.edge_count() as u64;
    }

    /// Rough heap footprint: tokens are counted twice (map and leaves).
    pub fn estimated_memory_bytes(&self) -> u64 {
        let tokens: usize = self.tokens.values().map(ContextToken::estimated_bytes).sum();
        let edges: usize = self.edges.values()
            .map(|v| v.len() * std::mem::size_of::<TokenRelationship>())
            .sum();
        let nodes = self.index.node_count() * std::mem::size_of::<crate::index::BTreeNode>();
        (tokens * 2 + edges + nodes) as u64
    }

    // ========================================================================
    // Token operations
    // ========================================================================

    /// Insert or overwrite a token. Returns the token it replaced.
    pub fn add_token(&mut self, token: ContextToken) -> Option<ContextToken> {
        self.set_edges(&token);
        self.index.insert(token.clone());
        self.tokens.insert(token.id.clone(), token)
    }

    /// O(log n) lookup through the B-tree.
    pub fn find_token(&self, id: &str) -> Option<&ContextToken> {
        self.index.search(id)
    }

    pub fn find_similar_tokens(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Vec<SimilarToken> {
        find_similar(&self.index, embedding, threshold, limit)
    }

    /// Replace a token's relationships and its edge-map entry together.
    pub fn update_relationships(
        &mut self,
        id: &str,
        relationships: Vec<TokenRelationship>,
    ) -> Result<()> {
        self.apply_patch(id, TokenPatch::relationships(relationships))
    }

    /// Apply a partial change. Fails with `NotFound` before touching
    /// anything if the token is absent.
    pub fn apply_patch(&mut self, id: &str, patch: TokenPatch) -> Result<()> {
        let mut token = self.tokens
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("token {id}")))?;

        if let Some(embedding) = patch.embedding {
            token.embedding = embedding;
        }
        if let Some(relationships) = patch.relationships {
            token.relationships = relationships;
        }
        if let Some(metadata) = patch.metadata {
            merge_properties(&mut token.metadata, metadata);
        }

        self.add_token(token);
        Ok(())
    }

    /// Explicit removal from every map. Incoming edges held by other tokens
    /// are left alone.
    pub fn remove_token(&mut self, id: &str) -> Option<ContextToken> {
        let removed = self.tokens.remove(id)?;
        self.index.remove(id);
        self.edges.remove(id);
        self.clusters.retain(|_, cluster| {
            cluster.token_ids.remove(id);
            !cluster.is_empty()
        });
        Some(removed)
    }

    fn set_edges(&mut self, token: &ContextToken) {
        if token.relationships.is_empty() {
            self.edges.remove(token.id.as_str());
        } else {
            self.edges.insert(token.id.clone(), token.relationships.clone());
        }
    }

    // ========================================================================
    // Batches
    // ========================================================================

    /// Apply a drained batch: all adds, then all updates, then all removes.
    /// Unknown ids are logged and skipped.
    pub fn apply_batch(&mut self, batch: Vec<GraphUpdate>) -> BatchOutcome {
        let mut adds = Vec::new();
        let mut updates = Vec::new();
        let mut removes = Vec::new();
        for update in batch {
            match update.change {
                Change::Add(token) => adds.push(token),
                Change::Update(patch) => updates.push((update.node_id, patch)),
                Change::Remove => removes.push(update.node_id),
            }
        }

        let mut outcome = BatchOutcome::default();
        for token in adds {
            self.add_token(token);
            outcome.added += 1;
        }
        for (id, patch) in updates {
            match self.apply_patch(id.as_str(), patch) {
                Ok(()) => outcome.updated += 1,
                Err(e) => {
                    warn!(token = %id, error = %e, "skipping queued update");
                    outcome.skipped += 1;
                }
            }
        }
        for id in removes {
            if self.remove_token(id.as_str()).is_some() {
                outcome.removed += 1;
            } else {
                warn!(token = %id, "skipping queued removal of unknown token");
                outcome.skipped += 1;
            }
        }
        self.refresh_totals();
        outcome
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Re-insert every token, in key order, into a fresh tree.
    pub fn rebuild_index(&mut self) {
        self.reindex(self.index.order());
    }

    /// Like `rebuild_index`, with a new node order.
    pub fn reindex(&mut self, order: usize) {
        let mut tokens: Vec<ContextToken> = self.tokens.values().cloned().collect();
        tokens.sort_by(|a, b| a.id.cmp(&b.id));
        let mut index = BTreeIndex::new(order, self.index.cache_capacity());
        index.rebuild(tokens);
        self.index = index;
    }

    /// Recover the token map from the index leaves.
    pub fn rebuild_tokens_from_index(&mut self) {
        let mut tokens = HashMap::with_capacity(self.index.len());
        self.index.scan_range(|t| {
            tokens.insert(t.id.clone(), t.clone());
            true
        });
        self.tokens = tokens;
        self.edges = self.tokens
            .values()
            .filter(|t| !t.relationships.is_empty())
            .map(|t| (t.id.clone(), t.relationships.clone()))
            .collect();
        self.refresh_totals();
    }

    pub fn recompute_clusters(&mut self, threshold: f64) {
        self.clusters = cluster_tokens(&self.index, threshold);
    }

    /// Drop edge lists and cluster members whose token no longer exists,
    /// then release spare capacity.
    pub fn compact(&mut self) -> CompactionReport {
        let mut report = CompactionReport::default();

        let before = self.edges.len();
        let tokens = &self.tokens;
        self.edges.retain(|id, rels| tokens.contains_key(id) && !rels.is_empty());
        report.dropped_edge_lists = before - self.edges.len();

        for cluster in self.clusters.values_mut() {
            let before = cluster.token_ids.len();
            cluster.token_ids.retain(|id| tokens.contains_key(id));
            report.dropped_cluster_members += before - cluster.token_ids.len();
        }
        self.clusters.retain(|_, c| !c.is_empty());

        self.tokens.shrink_to_fit();
        self.edges.shrink_to_fit();
        self.clusters.shrink_to_fit();
        self.index.clear_cache();
        self.refresh_totals();
        report
    }

    pub fn clear_cache(&self) {
        self.index.clear_cache();
    }
}

// ============================================================================
// Tests
// ============================================================================
