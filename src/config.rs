//! Engine configuration.
//!
//! Every field has a default, so a JSON config file only needs to name what
//! it changes:
//!
//! ```json
//! { "storageDir": "/var/lib/ctx", "btreeOrder": 64, "dimension": 384 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::DEFAULT_BATCH_SIZE;
use crate::{Error, Result};

pub const DEFAULT_BTREE_ORDER: usize = 32;
pub const MIN_BTREE_ORDER: usize = 3;
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_CLUSTER_THRESHOLD: f64 = 0.8;
pub const DEFAULT_BACKUP_DIR: &str = "backups";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Directory holding the component files. Ignored by in-memory engines.
    pub storage_dir: PathBuf,
    /// Maximum keys per B-tree node.
    pub btree_order: usize,
    /// Node cache capacity.
    pub max_cache_size: usize,
    /// Period of the background flush.
    pub flush_interval_ms: u64,
    /// Queued updates drained per flush.
    pub batch_size: usize,
    /// Minimum centroid similarity for joining a cluster in `optimize`.
    pub cluster_threshold: f64,
    /// Required embedding length, if any.
    pub dimension: Option<usize>,
    /// Backup root, relative to `storage_dir` unless absolute.
    pub backup_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("context-graph"),
            btree_order: DEFAULT_BTREE_ORDER,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            cluster_threshold: DEFAULT_CLUSTER_THRESHOLD,
            dimension: None,
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
        }
    }
}

impl EngineConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self { storage_dir: storage_dir.into(), ..Self::default() }
    }

    /// Read and validate a JSON config file.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| Error::Persist { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_btree_order(mut self, order: usize) -> Self {
        self.btree_order = order;
        self
    }

    pub fn with_max_cache_size(mut self, size: usize) -> Self {
        self.max_cache_size = size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_cluster_threshold(mut self, threshold: f64) -> Self {
        self.cluster_threshold = threshold;
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.btree_order < MIN_BTREE_ORDER {
            return Err(Error::InvalidConfig(format!(
                "btree_order must be at least {MIN_BTREE_ORDER}, got {}",
                self.btree_order
            )));
        }
        if self.max_cache_size == 0 {
            return Err(Error::InvalidConfig("max_cache_size must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::InvalidConfig("flush_interval_ms must be positive".into()));
        }
        if !(-1.0..=1.0).contains(&self.cluster_threshold) {
            return Err(Error::InvalidConfig(format!(
                "cluster_threshold must be within [-1, 1], got {}",
                self.cluster_threshold
            )));
        }
        if self.dimension == Some(0) {
            return Err(Error::InvalidConfig("dimension must be positive".into()));
        }
        Ok(())
    }
}
