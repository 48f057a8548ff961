//! # context-graph: Persistent Context Token Graph
//!
//! A durable, single-process store for context tokens: an id, an embedding
//! vector supplied by the caller, outgoing relationships and free-form
//! metadata. Tokens are indexed by an arena B-tree, searchable by cosine
//! similarity, grouped into semantic clusters, and persisted through a
//! batched write queue.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between the engine and storage
//! 2. **Clean DTOs**: `ContextToken`, `TokenRelationship`, `Value` cross all boundaries
//! 3. **Reads never fail**: a damaged component loads as empty, with a warning
//! 4. **Writes surface errors**: `save`, `backup` and `restore` propagate failures
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use context_graph::{ContextGraph, ContextToken, EngineConfig, TokenRelationship};
//!
//! # async fn example() -> context_graph::Result<()> {
//! let graph = ContextGraph::open(EngineConfig::new("/var/lib/context")).await?;
//!
//! graph.add_token(
//!     ContextToken::new("intro", vec![0.1, 0.9, 0.3])
//!         .with_relationship(TokenRelationship::new("chapter-1", "precedes", 1.0))
//!         .with_property("source", "book.md"),
//! )?;
//!
//! for hit in graph.find_similar_tokens(&[0.1, 0.8, 0.3], 0.9, None) {
//!     println!("{} {:.3}", hit.token.id, hit.similarity);
//! }
//!
//! graph.cleanup().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Description |
//! |---------|-------------|
//! | `FileBackend` | One JSON file per component, with backups |
//! | `MemoryBackend` | In-memory, for testing/embedding |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod index;
pub mod graph;
pub mod queue;
pub mod storage;
pub mod config;
pub mod engine;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    ContextToken, TokenId, TokenRelationship, Value, PropertyMap,
    GraphMetadata, PerformanceMetrics, SemanticCluster,
    GraphUpdate, TokenPatch, Change, UpdateKind,
};

// ============================================================================
// Re-exports: Engine, Storage, Config
// ============================================================================

pub use engine::ContextGraph;
pub use config::EngineConfig;
pub use graph::{CompactionReport, SimilarToken};
pub use storage::{BackupManifest, FileBackend, MemoryBackend, StorageBackend};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Persistence error at {}: {source}", path.display())]
    Persist {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
