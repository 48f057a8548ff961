//! Context token: the unit of storage.

use std::borrow::Borrow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::{PropertyMap, TokenRelationship, Value};

/// Token identifier.
///
/// Ordering is plain byte-wise string ordering, which is what the B-tree
/// sorts by. Never locale-aware.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self { TokenId(s.to_owned()) }
}

impl From<String> for TokenId {
    fn from(s: String) -> Self { TokenId(s) }
}

impl From<&TokenId> for TokenId {
    fn from(id: &TokenId) -> Self { id.clone() }
}

impl Borrow<str> for TokenId {
    fn borrow(&self) -> &str { &self.0 }
}

/// A vector-embedded unit of context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextToken {
    pub id: TokenId,
    /// Opaque embedding supplied by the caller.
    pub embedding: Vec<f32>,
    pub relationships: Vec<TokenRelationship>,
    pub metadata: PropertyMap,
    pub created_at: DateTime<Utc>,
}

impl ContextToken {
    pub fn new(id: impl Into<TokenId>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            relationships: Vec::new(),
            metadata: PropertyMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_relationship(mut self, rel: TokenRelationship) -> Self {
        self.relationships.push(rel);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Name of the first field holding NaN or an infinity, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        if self.embedding.iter().any(|x| !x.is_finite()) {
            Some("embedding")
        } else if !self.relationships.iter().all(TokenRelationship::is_finite) {
            Some("relationship strength")
        } else if !self.metadata.values().all(Value::is_finite) {
            Some("metadata")
        } else {
            None
        }
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }

    pub(crate) fn estimated_bytes(&self) -> usize {
        std::mem::size_of::<ContextToken>()
            + self.id.0.len()
            + self.embedding.len() * std::mem::size_of::<f32>()
            + self
                .relationships
                .iter()
                .map(|r| std::mem::size_of::<TokenRelationship>() + r.target.0.len() + r.rel_type.len())
                .sum::<usize>()
            + self.metadata.iter().map(|(k, v)| k.len() + v.estimated_bytes()).sum::<usize>()
    }
}
