//! In-memory storage backend.
//!
//! Keeps the last saved [`EncodedGraph`] and every backup in process memory.
//! Cloning the backend shares the same state, so a test can hand one clone
//! to an engine, drop it, and reopen another engine on the same "disk".
//!
//! ## Limitations
//!
//! - **No durability**: everything is gone when the last clone is dropped.
//! - **No compaction**: there are no temp files to reclaim.
//!
//! Use this backend for:
//! - Testing the engine without touching the filesystem
//! - Embedding a context graph that does not need persistence

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::{Error, Result};
use super::{BackupManifest, EncodedGraph, RawGraph, StorageBackend, backup_id};

// ============================================================================
// MemoryBackend
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    saved: RwLock<Option<EncodedGraph>>,
    backups: RwLock<HashMap<String, (BackupManifest, EncodedGraph)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last saved graph, if any.
    pub fn saved(&self) -> Option<EncodedGraph> {
        self.inner.saved.read().clone()
    }

    /// Overwrite the saved graph directly; lets tests plant corrupt input.
    pub fn put(&self, graph: EncodedGraph) {
        *self.inner.saved.write() = Some(graph);
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn save(&self, graph: &EncodedGraph) -> Result<u64> {
        *self.inner.saved.write() = Some(graph.clone());
        Ok(graph.total_len())
    }

    async fn load(&self) -> RawGraph {
        match self.inner.saved.read().clone() {
            Some(graph) => graph.into(),
            None => RawGraph::missing(),
        }
    }

    async fn backup(&self, version: u64) -> Result<BackupManifest> {
        let graph = self
            .inner
            .saved
            .read()
            .clone()
            .ok_or_else(|| Error::NotFound("no saved graph to back up".into()))?;

        let timestamp = Utc::now();
        let mut backups = self.inner.backups.write();
        let base = backup_id(timestamp);
        let mut id = base.clone();
        let mut suffix = 1;
        while backups.contains_key(&id) {
            id = format!("{base}-{suffix}");
            suffix += 1;
        }
        let manifest = BackupManifest { id: id.clone(), timestamp, size: graph.total_len(), version };
        backups.insert(id, (manifest.clone(), graph));
        Ok(manifest)
    }

    async fn restore(&self, backup_id: &str) -> Result<BackupManifest> {
        let (manifest, graph) = self
            .inner
            .backups
            .read()
            .get(backup_id)
            .cloned()
            .ok_or_else(|| Error::BackupNotFound(backup_id.to_string()))?;
        *self.inner.saved.write() = Some(graph);
        Ok(manifest)
    }

    async fn list_backups(&self) -> Result<Vec<BackupManifest>> {
        let mut list: Vec<BackupManifest> =
            self.inner.backups.read().values().map(|(m, _)| m.clone()).collect();
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(list)
    }

    async fn delete_backup(&self, backup_id: &str) -> Result<()> {
        self.inner
            .backups
            .write()
            .remove(backup_id)
            .map(|_| ())
            .ok_or_else(|| Error::BackupNotFound(backup_id.to_string()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
