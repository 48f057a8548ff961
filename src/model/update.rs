//! Queued mutation records consumed by the batch processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::{ContextToken, PropertyMap, TokenId, TokenRelationship, Value};

/// Mutation type, used to partition a drained batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Add,
    Update,
    Remove,
}

/// Partial token change. `None` fields are left untouched; metadata is
/// merged key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenPatch {
    pub embedding: Option<Vec<f32>>,
    pub relationships: Option<Vec<TokenRelationship>>,
    pub metadata: Option<PropertyMap>,
}

impl TokenPatch {
    pub fn relationships(rels: Vec<TokenRelationship>) -> Self {
        Self { relationships: Some(rels), ..Self::default() }
    }

    pub fn embedding(embedding: Vec<f32>) -> Self {
        Self { embedding: Some(embedding), ..Self::default() }
    }

    /// Name of the first field holding NaN or an infinity, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        if self.embedding.iter().flatten().any(|x| !x.is_finite()) {
            Some("embedding")
        } else if !self.relationships.iter().flatten().all(TokenRelationship::is_finite) {
            Some("relationship strength")
        } else if !self.metadata.iter().flat_map(|m| m.values()).all(Value::is_finite) {
            Some("metadata")
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.embedding.is_none() && self.relationships.is_none() && self.metadata.is_none()
    }
}

/// Payload of a queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    Add(ContextToken),
    Update(TokenPatch),
    Remove,
}

/// A queued mutation. Transient: drained and dropped by the flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphUpdate {
    pub node_id: TokenId,
    pub change: Change,
    pub timestamp: DateTime<Utc>,
}

impl GraphUpdate {
    pub fn add(token: ContextToken) -> Self {
        Self {
            node_id: token.id.clone(),
            change: Change::Add(token),
            timestamp: Utc::now(),
        }
    }

    pub fn update(id: impl Into<TokenId>, patch: TokenPatch) -> Self {
        Self {
            node_id: id.into(),
            change: Change::Update(patch),
            timestamp: Utc::now(),
        }
    }

    pub fn remove(id: impl Into<TokenId>) -> Self {
        Self {
            node_id: id.into(),
            change: Change::Remove,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> UpdateKind {
        match self.change {
            Change::Add(_) => UpdateKind::Add,
            Change::Update(_) => UpdateKind::Update,
            Change::Remove => UpdateKind::Remove,
        }
    }
}
