//! Greedy leader clustering used by `optimize`.

use hashbrown::HashMap;

use crate::index::BTreeIndex;
use crate::model::SemanticCluster;
use super::similarity::cosine_similarity;

/// Group tokens by embedding similarity.
///
/// Tokens are visited in key order. Each joins the first existing cluster
/// whose centroid scores at least `threshold`, otherwise it founds a new
/// `cluster-<n>`. Tokens without an embedding are left unclustered. The
/// result is deterministic for a given token set.
pub fn cluster_tokens(index: &BTreeIndex, threshold: f64) -> HashMap<String, SemanticCluster> {
    let mut clusters: Vec<SemanticCluster> = Vec::new();

    index.scan_range(|token| {
        if token.embedding.is_empty() {
            return true;
        }
        let home = clusters
            .iter()
            .position(|c| cosine_similarity(&c.centroid, &token.embedding) >= threshold);
        match home {
            Some(i) => clusters[i].absorb(token.id.clone(), &token.embedding),
            None => {
                let id = format!("cluster-{}", clusters.len());
                clusters.push(SemanticCluster::new(id, token.id.clone(), &token.embedding));
            }
        }
        true
    });

    clusters.into_iter().map(|c| (c.id.clone(), c)).collect()
}
