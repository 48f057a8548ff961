//! Relationship (directed edge) between two context tokens.

use serde::{Deserialize, Serialize};
use super::TokenId;

/// A directed, typed, weighted edge from the owning token to `target`.
///
/// The source is implicit: relationships live on their source token and in
/// the graph's edge map under the source id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRelationship {
    pub target: TokenId,
    pub rel_type: String,
    pub strength: f32,
}

impl TokenRelationship {
    pub fn new(target: impl Into<TokenId>, rel_type: impl Into<String>, strength: f32) -> Self {
        Self {
            target: target.into(),
            rel_type: rel_type.into(),
            strength,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.strength.is_finite()
    }

    /// True when the edge points at `id`.
    pub fn points_to(&self, id: &TokenId) -> bool {
        &self.target == id
    }
}
