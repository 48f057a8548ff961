//! Encoding of the graph components and the degrade-to-empty load policy.
//!
//! Everything is JSON. The token, edge and cluster maps are written as
//! arrays of `[key, value]` pairs sorted by key; the metadata file is
//! pretty-printed. A component that is missing or fails to decode is
//! replaced by its empty default and logged, so `decode` always yields a
//! usable store.

use std::io::ErrorKind;

use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::graph::GraphStore;
use crate::index::{BTreeIndex, IndexFile};
use crate::model::*;
use crate::{Error, Result};
use super::{Component, EncodedGraph, RawGraph};

/// JSON writes NaN and infinities as `null`, which does not decode back
/// into a float. Find any such value before anything is written.
fn check_finite(store: &GraphStore) -> Result<()> {
    let non_finite = |what: String| Err(Error::Serialization(format!("non-finite {what}")));

    let mut bad_leaf = None;
    store.index().scan_range(|token| match token.non_finite_field() {
        Some(field) => {
            bad_leaf = Some(format!("{field} in token {}", token.id));
            false
        }
        None => true,
    });
    if let Some(what) = bad_leaf {
        return non_finite(what);
    }
    for token in store.tokens().values() {
        if let Some(field) = token.non_finite_field() {
            return non_finite(format!("{field} in token {}", token.id));
        }
    }
    for (id, rels) in store.edges() {
        if !rels.iter().all(TokenRelationship::is_finite) {
            return non_finite(format!("relationship strength in edges of {id}"));
        }
    }
    for cluster in store.clusters().values() {
        if cluster.centroid.iter().any(|x| !x.is_finite()) {
            return non_finite(format!("centroid in {}", cluster.id));
        }
    }
    let metadata = store.metadata();
    let perf = &metadata.performance;
    let metrics = [
        metadata.compression_ratio,
        perf.query_latency_ms,
        perf.index_latency_ms,
        perf.compression_latency_ms,
        perf.throughput_ops_per_sec,
    ];
    if metrics.iter().any(|x| !x.is_finite()) {
        return non_finite("graph metric".to_string());
    }
    Ok(())
}

/// Serialize every component of `store`. Fails with `Serialization` if any
/// float in the graph is NaN or infinite.
pub fn encode(store: &GraphStore) -> Result<EncodedGraph> {
    check_finite(store)?;

    let mut tokens: Vec<(&TokenId, &ContextToken)> = store.tokens().iter().collect();
    tokens.sort_by(|a, b| a.0.cmp(b.0));

    let mut edges: Vec<(&TokenId, &Vec<TokenRelationship>)> = store.edges().iter().collect();
    edges.sort_by(|a, b| a.0.cmp(b.0));

    let mut clusters: Vec<(&String, &SemanticCluster)> = store.clusters().iter().collect();
    clusters.sort_by(|a, b| a.0.cmp(b.0));

    Ok(EncodedGraph {
        index: serde_json::to_vec(&store.index().to_file())?,
        tokens: serde_json::to_vec(&tokens)?,
        edges: serde_json::to_vec(&edges)?,
        clusters: serde_json::to_vec(&clusters)?,
        metadata: serde_json::to_vec_pretty(store.metadata())?,
    })
}

/// Decode one component, or `None` (logged) if it cannot be used.
fn component<T: DeserializeOwned>(which: Component, raw: Result<Vec<u8>>) -> Option<T> {
    let decoded = raw.and_then(|bytes| serde_json::from_slice(&bytes).map_err(Error::from));
    match decoded {
        Ok(value) => Some(value),
        Err(Error::NotFound(_)) => {
            debug!(component = which.file_name(), "component not found, starting empty");
            None
        }
        Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => {
            debug!(component = which.file_name(), "component not found, starting empty");
            None
        }
        Err(e) => {
            warn!(component = which.file_name(), error = %e, "unreadable component, starting empty");
            None
        }
    }
}

/// Rebuild a store from raw components.
///
/// Reconciliation after decoding:
/// - a structurally invalid index is discarded;
/// - an empty token map next to a non-empty index is recovered from the
///   index leaves;
/// - an index that disagrees with the token map (or was built with another
///   order) is rebuilt from the token map;
/// - missing edges are derived from the tokens' relationships.
pub fn decode(raw: RawGraph, order: usize, max_cache_size: usize) -> GraphStore {
    let index = component::<IndexFile>(Component::Index, raw.index)
        .map(|file| BTreeIndex::from_file(file, max_cache_size))
        .filter(|index| match index.verify() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "discarding corrupt index");
                false
            }
        });
    let index_loaded = index.is_some();
    let index = index.unwrap_or_else(|| BTreeIndex::new(order, max_cache_size));

    let tokens: HashMap<TokenId, ContextToken> =
        component::<Vec<(TokenId, ContextToken)>>(Component::Tokens, raw.tokens)
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_default();

    let edges: HashMap<TokenId, Vec<TokenRelationship>> =
        component::<Vec<(TokenId, Vec<TokenRelationship>)>>(Component::Edges, raw.edges)
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_else(|| {
                tokens
                    .values()
                    .filter(|t| !t.relationships.is_empty())
                    .map(|t| (t.id.clone(), t.relationships.clone()))
                    .collect()
            });

    let clusters: HashMap<String, SemanticCluster> =
        component::<Vec<(String, SemanticCluster)>>(Component::Clusters, raw.clusters)
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_default();

    let metadata = component::<GraphMetadata>(Component::Metadata, raw.metadata)
        .unwrap_or_default();

    let mut store = GraphStore::from_parts(index, tokens, edges, clusters, metadata);

    if store.token_count() == 0 && !store.index().is_empty() {
        warn!(tokens = store.index().len(), "token map missing, recovering tokens from index");
        store.rebuild_tokens_from_index();
    }
    if store.index().order() != order || store.index().len() != store.token_count() {
        if index_loaded {
            warn!(
                index_keys = store.index().len(),
                tokens = store.token_count(),
                "index disagrees with token map, rebuilding"
            );
        }
        store.reindex(order);
    }
    store
}
