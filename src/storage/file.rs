//! File-per-component storage backend.
//!
//! Layout under the storage directory:
//!
//! ```text
//! graph.index  graph.data  graph.edges  graph.clusters  graph.metadata
//! backups/<backup id>/...
//! ```
//!
//! Each component is written to `<name>.tmp` and renamed into place, so a
//! crash mid-save leaves either the old or the new file, never a torn one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{Error, Result};
use super::{BackupManager, BackupManifest, Component, EncodedGraph, RawGraph, StorageBackend};

const TMP_SUFFIX: &str = "tmp";

// ============================================================================
// FileBackend
// ============================================================================

pub struct FileBackend {
    storage_dir: PathBuf,
    backups: BackupManager,
}

impl FileBackend {
    /// Open (creating if needed) a storage directory. Backups go to
    /// `<storage_dir>/<backup_dir>`.
    pub async fn open(storage_dir: impl Into<PathBuf>, backup_dir: impl AsRef<Path>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir)
            .await
            .map_err(|source| Error::Persist { path: storage_dir.clone(), source })?;
        let backups = BackupManager::new(storage_dir.join(backup_dir));
        info!(dir = %storage_dir.display(), "file backend opened");
        Ok(Self { storage_dir, backups })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn path_of(&self, component: Component) -> PathBuf {
        self.storage_dir.join(component.file_name())
    }

    async fn write_component(&self, component: Component, bytes: &[u8]) -> Result<u64> {
        let path = self.path_of(component);
        let tmp = path.with_extension(format!(
            "{}.{TMP_SUFFIX}",
            path.extension().and_then(|e| e.to_str()).unwrap_or_default()
        ));
        fs::write(&tmp, bytes)
            .await
            .map_err(|source| Error::Persist { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|source| Error::Persist { path: path.clone(), source })?;
        Ok(bytes.len() as u64)
    }

    async fn read_component(&self, component: Component) -> Result<Vec<u8>> {
        match fs::read(self.path_of(component)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(component.file_name().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// StorageBackend
// ============================================================================

#[async_trait]
impl StorageBackend for FileBackend {
    async fn save(&self, graph: &EncodedGraph) -> Result<u64> {
        let (index, tokens, edges, clusters, metadata) = tokio::try_join!(
            self.write_component(Component::Index, &graph.index),
            self.write_component(Component::Tokens, &graph.tokens),
            self.write_component(Component::Edges, &graph.edges),
            self.write_component(Component::Clusters, &graph.clusters),
            self.write_component(Component::Metadata, &graph.metadata),
        )?;
        let written = index + tokens + edges + clusters + metadata;
        debug!(bytes = written, dir = %self.storage_dir.display(), "components written");
        Ok(written)
    }

    async fn load(&self) -> RawGraph {
        let (index, tokens, edges, clusters, metadata) = tokio::join!(
            self.read_component(Component::Index),
            self.read_component(Component::Tokens),
            self.read_component(Component::Edges),
            self.read_component(Component::Clusters),
            self.read_component(Component::Metadata),
        );
        RawGraph { index, tokens, edges, clusters, metadata }
    }

    async fn backup(&self, version: u64) -> Result<BackupManifest> {
        self.backups.create_backup(&self.storage_dir, version).await
    }

    async fn restore(&self, backup_id: &str) -> Result<BackupManifest> {
        self.backups.restore_backup(backup_id, &self.storage_dir).await
    }

    async fn list_backups(&self) -> Result<Vec<BackupManifest>> {
        self.backups.list_backups().await
    }

    async fn delete_backup(&self, backup_id: &str) -> Result<()> {
        self.backups.delete_backup(backup_id).await
    }

    /// Remove `*.tmp` leftovers from interrupted saves.
    async fn compact(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.storage_dir).await?;
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TMP_SUFFIX) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove stale temp file"),
            }
        }
        if removed > 0 {
            debug!(removed, "stale temp files removed");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.storage_dir.display())
    }
}
