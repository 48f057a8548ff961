//! Cosine-similarity search over the B-tree leaves.

use serde::Serialize;

use crate::index::BTreeIndex;
use crate::model::ContextToken;

/// Default result count for similarity queries.
pub const DEFAULT_LIMIT: usize = 10;

/// A token paired with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarToken {
    pub token: ContextToken,
    pub similarity: f64,
}

/// `dot(a, b) / (|a| * |b|)`, accumulated in f64.
///
/// Vectors of different length, empty vectors and zero vectors all score 0.
/// The denominator is `sqrt(|a|² · |b|²)` so that a vector compared with
/// itself scores exactly 1.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b).sqrt()).clamp(-1.0, 1.0)
}

/// Tokens whose similarity to `query` is at least `threshold`, best first.
///
/// The leaf scan stops as soon as `2 * limit` candidates are held, so on a
/// large tree the result is the best `limit` among the first matches in key
/// order rather than a global top-k.
pub fn find_similar(
    index: &BTreeIndex,
    query: &[f32],
    threshold: f64,
    limit: usize,
) -> Vec<SimilarToken> {
    if limit == 0 {
        return Vec::new();
    }
    let cap = limit.saturating_mul(2);
    let mut candidates: Vec<SimilarToken> = Vec::with_capacity(cap.min(index.len()));

    index.scan_range(|token| {
        let similarity = cosine_similarity(query, &token.embedding);
        if similarity >= threshold {
            candidates.push(SimilarToken { token: token.clone(), similarity });
        }
        candidates.len() < cap
    });

    // Stable: equal scores keep key order.
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    candidates.truncate(limit);
    candidates
}
