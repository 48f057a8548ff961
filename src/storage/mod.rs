//! # Storage Backend Trait
//!
//! The contract between the engine and wherever the graph is persisted.
//! A saved graph is five independent components; backends move their
//! encoded bytes and know nothing about what is inside.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `FileBackend` | `file` | One file per component under a storage directory |
//! | `MemoryBackend` | `memory` | In-process, for tests and embedding |
//!
//! Encoding and the degrade-to-empty load policy live in [`codec`].

pub mod codec;
pub mod backup;
pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::{Error, Result};

pub use backup::{BackupManager, BackupManifest, MANIFEST_FILE, backup_id};
pub use file::FileBackend;
pub use memory::MemoryBackend;

// ============================================================================
// Components
// ============================================================================

/// One independently persisted piece of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Index,
    Tokens,
    Edges,
    Clusters,
    Metadata,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Index,
        Component::Tokens,
        Component::Edges,
        Component::Clusters,
        Component::Metadata,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Component::Index => "graph.index",
            Component::Tokens => "graph.data",
            Component::Edges => "graph.edges",
            Component::Clusters => "graph.clusters",
            Component::Metadata => "graph.metadata",
        }
    }

    /// Core components must be present in every backup.
    pub fn is_core(self) -> bool {
        matches!(self, Component::Index | Component::Tokens | Component::Metadata)
    }
}

/// Encoded bytes of every component, ready to be written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedGraph {
    pub index: Vec<u8>,
    pub tokens: Vec<u8>,
    pub edges: Vec<u8>,
    pub clusters: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl EncodedGraph {
    pub fn part(&self, component: Component) -> &[u8] {
        match component {
            Component::Index => &self.index,
            Component::Tokens => &self.tokens,
            Component::Edges => &self.edges,
            Component::Clusters => &self.clusters,
            Component::Metadata => &self.metadata,
        }
    }

    pub fn total_len(&self) -> u64 {
        Component::ALL.iter().map(|&c| self.part(c).len() as u64).sum()
    }
}

/// Raw bytes of every component as read back, each possibly failed.
#[derive(Debug)]
pub struct RawGraph {
    pub index: Result<Vec<u8>>,
    pub tokens: Result<Vec<u8>>,
    pub edges: Result<Vec<u8>>,
    pub clusters: Result<Vec<u8>>,
    pub metadata: Result<Vec<u8>>,
}

impl RawGraph {
    /// Nothing has ever been saved.
    pub fn missing() -> Self {
        let gone = |c: Component| Err(Error::NotFound(c.file_name().to_string()));
        Self {
            index: gone(Component::Index),
            tokens: gone(Component::Tokens),
            edges: gone(Component::Edges),
            clusters: gone(Component::Clusters),
            metadata: gone(Component::Metadata),
        }
    }
}

impl From<EncodedGraph> for RawGraph {
    fn from(g: EncodedGraph) -> Self {
        Self {
            index: Ok(g.index),
            tokens: Ok(g.tokens),
            edges: Ok(g.edges),
            clusters: Ok(g.clusters),
            metadata: Ok(g.metadata),
        }
    }
}

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// Where a graph is persisted.
///
/// `save`, `backup` and `restore` surface failures; `load` never fails as a
/// whole, it reports per-component results and leaves the fallback policy
/// to the codec.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Write every component. Returns the number of bytes written.
    async fn save(&self, graph: &EncodedGraph) -> Result<u64>;

    /// Read every component.
    async fn load(&self) -> RawGraph;

    /// Snapshot the last saved state. `version` goes into the manifest.
    async fn backup(&self, version: u64) -> Result<BackupManifest>;

    /// Replace the live saved state with a backup's contents.
    /// Fails with `BackupNotFound` for an unknown id.
    async fn restore(&self, backup_id: &str) -> Result<BackupManifest>;

    /// Available backups, newest first.
    async fn list_backups(&self) -> Result<Vec<BackupManifest>>;

    async fn delete_backup(&self, backup_id: &str) -> Result<()>;

    /// Reclaim space left behind by earlier writes.
    ///
    /// Default: nothing to reclaim.
    async fn compact(&self) -> Result<()> {
        Ok(())
    }

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}
