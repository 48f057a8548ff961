//! Semantic cluster: a named group of related tokens.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use super::TokenId;

/// Tokens grouped by embedding similarity. Recomputed by `optimize`;
/// nothing in the index depends on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticCluster {
    pub id: String,
    pub token_ids: BTreeSet<TokenId>,
    /// Mean embedding of the members.
    pub centroid: Vec<f32>,
}

impl SemanticCluster {
    pub fn new(id: impl Into<String>, founder: TokenId, embedding: &[f32]) -> Self {
        let mut token_ids = BTreeSet::new();
        token_ids.insert(founder);
        Self {
            id: id.into(),
            token_ids,
            centroid: embedding.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }

    pub fn contains(&self, id: &TokenId) -> bool {
        self.token_ids.contains(id)
    }

    /// Add a member and fold its embedding into the running-mean centroid.
    pub fn absorb(&mut self, id: TokenId, embedding: &[f32]) {
        if !self.token_ids.insert(id) {
            return;
        }
        // In f64: the mean of finite f32s stays finite even near f32::MAX.
        let n = self.token_ids.len() as f64;
        for (c, &x) in self.centroid.iter_mut().zip(embedding) {
            let mean = f64::from(*c) + (f64::from(x) - f64::from(*c)) / n;
            *c = mean as f32;
        }
    }
}
