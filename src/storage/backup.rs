//! Backup and restore of the on-disk component files.
//!
//! A backup is a directory under the backups root named after its creation
//! time, holding copies of the component files and a `manifest.json`:
//!
//! ```text
//! <storage_dir>/backups/graph-backup-2026-10-19T07-03-12-345Z/
//!     graph.index  graph.data  graph.metadata  [graph.edges  graph.clusters]
//!     manifest.json   {id, timestamp, size, version}
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::{Error, Result};
use super::Component;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Description of one backup, stored as its `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Total bytes of the copied component files.
    pub size: u64,
    /// Graph version at backup time.
    pub version: u64,
}

/// `graph-backup-<ISO 8601>` with `:` and `.` replaced by `-`.
pub fn backup_id(at: DateTime<Utc>) -> String {
    format!("graph-backup-{}", at.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
}

/// Ids are single path components; anything else cannot name a backup.
fn is_plain_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
}

/// Manages backup directories for one storage directory.
pub struct BackupManager {
    backup_dir: PathBuf,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self { backup_dir: backup_dir.into() }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn path_of(&self, id: &str) -> Result<PathBuf> {
        if !is_plain_id(id) {
            return Err(Error::BackupNotFound(id.to_string()));
        }
        Ok(self.backup_dir.join(id))
    }

    async fn is_dir(path: &Path) -> bool {
        fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
    }

    /// Copy the component files of `storage_dir` into a fresh backup.
    ///
    /// Core components must exist; edges and clusters are copied when
    /// present. A failed copy removes the partial backup directory.
    pub async fn create_backup(&self, storage_dir: &Path, version: u64) -> Result<BackupManifest> {
        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|source| Error::Persist { path: self.backup_dir.clone(), source })?;

        let timestamp = Utc::now();
        let base = backup_id(timestamp);
        let mut id = base.clone();
        let mut suffix = 1;
        while Self::is_dir(&self.backup_dir.join(&id)).await {
            id = format!("{base}-{suffix}");
            suffix += 1;
        }
        let path = self.backup_dir.join(&id);
        fs::create_dir(&path)
            .await
            .map_err(|source| Error::Persist { path: path.clone(), source })?;

        let size = match copy_components(storage_dir, &path).await {
            Ok(size) => size,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&path).await {
                    warn!(backup = %id, error = %cleanup, "could not remove partial backup");
                }
                return Err(e);
            }
        };

        let manifest = BackupManifest { id, timestamp, size, version };
        let manifest_path = path.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)
            .await
            .map_err(|source| Error::Persist { path: manifest_path, source })?;

        info!(backup = %manifest.id, size, version, "backup created");
        Ok(manifest)
    }

    /// Replace the component files of `storage_dir` with a backup's.
    ///
    /// Every component is first copied next to its live file as
    /// `<name>.restore.tmp`. If any copy fails the staged files are removed
    /// and the live files are left untouched. Only then are the staged files
    /// renamed into place, and optional components the backup does not have
    /// are removed so the next load sees the backup's state, not a mix.
    pub async fn restore_backup(&self, id: &str, storage_dir: &Path) -> Result<BackupManifest> {
        let path = self.path_of(id)?;
        if !Self::is_dir(&path).await {
            return Err(Error::BackupNotFound(id.to_string()));
        }

        let mut staged = Vec::new();
        let size = match stage_components(&path, storage_dir, &mut staged).await {
            Ok(size) => size,
            Err(e) => {
                for (_, tmp) in &staged {
                    if let Err(cleanup) = fs::remove_file(tmp).await {
                        warn!(path = %tmp.display(), error = %cleanup, "could not remove staged file");
                    }
                }
                return Err(e);
            }
        };

        for component in Component::ALL {
            let dst = storage_dir.join(component.file_name());
            match staged.iter().find(|(c, _)| *c == component) {
                Some((_, tmp)) => fs::rename(tmp, &dst)
                    .await
                    .map_err(|source| Error::Persist { path: dst, source })?,
                None => match fs::remove_file(&dst).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(source) => return Err(Error::Persist { path: dst, source }),
                },
            }
        }

        let manifest = match read_manifest(&path).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(backup = %id, error = %e, "manifest unreadable, restoring anyway");
                BackupManifest { id: id.to_string(), timestamp: Utc::now(), size, version: 0 }
            }
        };
        info!(backup = %id, size, "backup restored");
        Ok(manifest)
    }

    /// All readable backups, newest first. A missing backups root means
    /// there are none.
    pub async fn list_backups(&self) -> Result<Vec<BackupManifest>> {
        let mut entries = match fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !Self::is_dir(&path).await {
                continue;
            }
            match read_manifest(&path).await {
                Ok(manifest) => backups.push(manifest),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping backup without manifest"),
            }
        }

        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(backups)
    }

    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        let path = self.path_of(id)?;
        if !Self::is_dir(&path).await {
            return Err(Error::BackupNotFound(id.to_string()));
        }
        fs::remove_dir_all(&path)
            .await
            .map_err(|source| Error::Persist { path, source })
    }
}

async fn copy_components(storage_dir: &Path, dest: &Path) -> Result<u64> {
    let mut size = 0;
    for component in Component::ALL {
        let src = storage_dir.join(component.file_name());
        match fs::copy(&src, dest.join(component.file_name())).await {
            Ok(n) => size += n,
            Err(e) if e.kind() == ErrorKind::NotFound && !component.is_core() => {}
            Err(source) => return Err(Error::Persist { path: src, source }),
        }
    }
    Ok(size)
}

/// Path a backup component is staged at before it replaces the live file.
fn staged_path(storage_dir: &Path, component: Component) -> PathBuf {
    storage_dir.join(format!("{}.restore.tmp", component.file_name()))
}

/// Copy a backup's components into staged files, recording each one in
/// `staged` as it lands. A missing core component fails the restore.
async fn stage_components(
    backup_path: &Path,
    storage_dir: &Path,
    staged: &mut Vec<(Component, PathBuf)>,
) -> Result<u64> {
    let mut size = 0;
    for component in Component::ALL {
        let src = backup_path.join(component.file_name());
        let tmp = staged_path(storage_dir, component);
        match fs::copy(&src, &tmp).await {
            Ok(n) => {
                size += n;
                staged.push((component, tmp));
            }
            Err(e) if e.kind() == ErrorKind::NotFound && !component.is_core() => {}
            Err(source) => {
                // A partial copy may have created the file.
                if fs::metadata(&tmp).await.is_ok() {
                    staged.push((component, tmp));
                }
                return Err(Error::Persist { path: src, source });
            }
        }
    }
    Ok(size)
}

async fn read_manifest(backup_path: &Path) -> Result<BackupManifest> {
    let bytes = fs::read(backup_path.join(MANIFEST_FILE)).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_id_format() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 7, 3, 12).unwrap()
            + chrono::Duration::milliseconds(345);
        assert_eq!(backup_id(at), "graph-backup-2026-10-19T07-03-12-345Z");
    }

    #[test]
    fn test_plain_id() {
        assert!(is_plain_id("graph-backup-2026"));
        assert!(!is_plain_id("../etc"));
        assert!(!is_plain_id(".."));
        assert!(!is_plain_id(""));
    }

    #[tokio::test]
    async fn test_create_list_restore_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path();
        for component in [Component::Index, Component::Tokens, Component::Metadata] {
            std::fs::write(storage.join(component.file_name()), b"v1").unwrap();
        }
        let manager = BackupManager::new(storage.join("backups"));

        let manifest = manager.create_backup(storage, 7).await.unwrap();
        assert!(manifest.id.starts_with("graph-backup-"));
        assert_eq!(manifest.size, 6);
        assert_eq!(manifest.version, 7);

        // Live state moves on, including an edges file the backup lacks.
        std::fs::write(storage.join("graph.data"), b"v2-longer").unwrap();
        std::fs::write(storage.join("graph.edges"), b"[]").unwrap();

        let listed = manager.list_backups().await.unwrap();
        assert_eq!(listed, vec![manifest.clone()]);

        let restored = manager.restore_backup(&manifest.id, storage).await.unwrap();
        assert_eq!(restored, manifest);
        assert_eq!(std::fs::read(storage.join("graph.data")).unwrap(), b"v1");
        assert!(!storage.join("graph.edges").exists());

        manager.delete_backup(&manifest.id).await.unwrap();
        assert!(manager.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_backup_leaves_live_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path();
        for component in Component::ALL {
            std::fs::write(storage.join(component.file_name()), b"v1").unwrap();
        }
        let manager = BackupManager::new(storage.join("backups"));
        let manifest = manager.create_backup(storage, 1).await.unwrap();

        for component in Component::ALL {
            std::fs::write(storage.join(component.file_name()), b"v2").unwrap();
        }
        // The index copies fine, then the data file is missing.
        std::fs::remove_file(manager.backup_dir().join(&manifest.id).join("graph.data")).unwrap();

        let err = manager.restore_backup(&manifest.id, storage).await;
        assert!(matches!(err, Err(Error::Persist { .. })));
        for component in Component::ALL {
            assert_eq!(std::fs::read(storage.join(component.file_name())).unwrap(), b"v2");
            assert!(!staged_path(storage, component).exists());
        }
    }

    #[tokio::test]
    async fn test_unknown_backup() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("backups"));
        let err = manager.restore_backup("graph-backup-nope", dir.path()).await;
        assert!(matches!(err, Err(Error::BackupNotFound(_))));
        assert!(manager.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backup_without_core_files_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("backups"));
        let err = manager.create_backup(dir.path(), 1).await;
        assert!(matches!(err, Err(Error::Persist { .. })));
        assert!(manager.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_instant_backups_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path();
        for component in Component::ALL {
            std::fs::write(storage.join(component.file_name()), b"x").unwrap();
        }
        let manager = BackupManager::new(storage.join("backups"));
        let a = manager.create_backup(storage, 1).await.unwrap();
        let b = manager.create_backup(storage, 1).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(manager.list_backups().await.unwrap().len(), 2);
    }
}
