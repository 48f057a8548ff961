//! # Context Graph Model
//!
//! Plain data types shared by the index, the graph store, the write queue
//! and the persistence layer.
//!
//! Design rule: this module is pure data. No I/O, no locks, no async.

pub mod token;
pub mod relationship;
pub mod value;
pub mod property_map;
pub mod metadata;
pub mod cluster;
pub mod update;

pub use token::{ContextToken, TokenId};
pub use relationship::TokenRelationship;
pub use value::Value;
pub use property_map::{PropertyMap, merge_properties, properties};
pub use metadata::{GraphMetadata, PerformanceMetrics};
pub use cluster::SemanticCluster;
pub use update::{Change, GraphUpdate, TokenPatch, UpdateKind};
