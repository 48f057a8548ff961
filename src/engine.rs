//! # Engine handle
//!
//! [`ContextGraph`] ties the in-memory [`GraphStore`], the [`WriteQueue`]
//! and a [`StorageBackend`] together and owns the background flush ticker.
//!
//! ## Write path
//!
//! ```text
//! add_token / update_relationships / remove_token
//!     → applied to the store immediately (read-your-writes)
//!     → marker queued
//! enqueue(update)
//!     → queued, applied at the next flush
//!
//! ticker (every flush_interval)
//!     → drain ≤ batch_size → apply (adds, updates, removes) → save
//! ```
//!
//! The store lock is never held across an `.await`: encoding happens under
//! the read lock and the backend I/O after it is released. Saves, backups
//! and restores are serialized by a separate async lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::graph::{CompactionReport, DEFAULT_LIMIT, GraphStore, SimilarToken};
use crate::model::*;
use crate::queue::{Batch, WriteQueue};
use crate::storage::{BackupManifest, FileBackend, MemoryBackend, StorageBackend, codec};
use crate::{Error, Result};

// ============================================================================
// ContextGraph
// ============================================================================

/// Handle to an open context graph.
///
/// Dropping the handle stops the ticker without a final flush; call
/// [`ContextGraph::cleanup`] first to persist queued writes.
pub struct ContextGraph<B: StorageBackend> {
    inner: Arc<Inner<B>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<B> {
    store: RwLock<GraphStore>,
    queue: WriteQueue,
    backend: B,
    config: EngineConfig,
    flushing: AtomicBool,
    shutdown: Notify,
    /// Serializes save, backup and restore.
    io: tokio::sync::Mutex<()>,
    /// Latest observations, copied into the metadata on save.
    perf: Mutex<PerformanceMetrics>,
}

impl ContextGraph<FileBackend> {
    /// Open (or create) a graph persisted under `config.storage_dir`.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let backend = FileBackend::open(&config.storage_dir, &config.backup_dir).await?;
        Self::with_backend(backend, config).await
    }
}

impl ContextGraph<MemoryBackend> {
    /// In-memory graph for testing and embedding.
    pub async fn open_memory() -> Result<Self> {
        Self::with_backend(MemoryBackend::new(), EngineConfig::default()).await
    }
}

impl<B: StorageBackend> ContextGraph<B> {
    /// Open a graph on the given backend: load whatever it holds, then start
    /// the flush ticker.
    pub async fn with_backend(backend: B, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new(Inner {
            store: RwLock::new(GraphStore::new(config.btree_order, config.max_cache_size)),
            queue: WriteQueue::new(),
            backend,
            config,
            flushing: AtomicBool::new(false),
            shutdown: Notify::new(),
            io: tokio::sync::Mutex::new(()),
            perf: Mutex::new(PerformanceMetrics::default()),
        });
        inner.load().await;

        let ticker = spawn_ticker(Arc::clone(&inner));
        info!(
            backend = %inner.backend.describe(),
            order = inner.config.btree_order,
            flush_interval_ms = inner.config.flush_interval_ms,
            "context graph opened"
        );
        Ok(Self { inner, ticker: Mutex::new(Some(ticker)) })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Run `f` against the store under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&GraphStore) -> R) -> R {
        f(&self.inner.store.read())
    }

    pub fn len(&self) -> usize {
        self.inner.store.read().token_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Token operations
    // ========================================================================

    /// Insert or overwrite a token. Visible to readers immediately, durable
    /// after the next flush.
    ///
    /// Fails with `InvalidToken` if any float in the token is NaN or
    /// infinite, and with `DimensionMismatch` if a dimension is configured
    /// and the embedding has another length.
    pub fn add_token(&self, token: ContextToken) -> Result<()> {
        self.inner.check_token(&token)?;
        let id = token.id.clone();
        let start = Instant::now();
        self.inner.store.write().add_token(token);
        self.inner.perf.lock().index_latency_ms = elapsed_ms(start);
        self.inner.queue.push_applied(id);
        Ok(())
    }

    pub fn find_token(&self, id: &str) -> Option<ContextToken> {
        self.inner.store.read().find_token(id).cloned()
    }

    /// Tokens at least `threshold` similar to `embedding`, best first.
    /// `limit` defaults to 10.
    pub fn find_similar_tokens(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: Option<usize>,
    ) -> Vec<SimilarToken> {
        let start = Instant::now();
        let found = self.inner
            .store
            .read()
            .find_similar_tokens(embedding, threshold, limit.unwrap_or(DEFAULT_LIMIT));
        self.inner.perf.lock().query_latency_ms = elapsed_ms(start);
        found
    }

    /// Replace a token's outgoing relationships. `NotFound` if absent,
    /// `InvalidToken` for a NaN or infinite strength.
    pub fn update_relationships(
        &self,
        id: &str,
        relationships: Vec<TokenRelationship>,
    ) -> Result<()> {
        if !relationships.iter().all(TokenRelationship::is_finite) {
            return Err(Error::InvalidToken(format!("token {id}: non-finite relationship strength")));
        }
        self.inner.store.write().update_relationships(id, relationships)?;
        self.inner.queue.push_applied(id);
        Ok(())
    }

    /// Remove a token with its edges and cluster memberships.
    pub fn remove_token(&self, id: &str) -> Result<ContextToken> {
        let removed = self.inner
            .store
            .write()
            .remove_token(id)
            .ok_or_else(|| Error::NotFound(format!("token {id}")))?;
        self.inner.queue.push_applied(id);
        Ok(removed)
    }

    /// Queue a raw mutation; it reaches the store at the next flush.
    /// Tokens and patches are validated like `add_token` before queuing.
    pub fn enqueue(&self, update: GraphUpdate) -> Result<()> {
        match &update.change {
            Change::Add(token) => self.inner.check_token(token)?,
            Change::Update(patch) => self.inner.check_patch(&update.node_id, patch)?,
            Change::Remove => {}
        }
        self.inner.queue.push(update);
        Ok(())
    }

    pub fn pending_updates(&self) -> usize {
        self.inner.queue.len()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Drain one batch and save. Returns how many queued updates were
    /// drained; 0 when the queue was empty or another flush is running.
    pub async fn flush(&self) -> Result<usize> {
        self.inner.flush().await
    }

    /// Bump the version and write every component.
    pub async fn save(&self) -> Result<u64> {
        self.inner.save().await
    }

    /// Replace the in-memory graph with whatever the backend holds. Never
    /// fails; unreadable components come back empty.
    pub async fn load(&self) -> GraphMetadata {
        self.inner.load().await
    }

    /// Flush everything queued, save, and snapshot the saved state.
    pub async fn backup(&self) -> Result<BackupManifest> {
        self.inner.drain_all();
        self.inner.save().await?;
        let _io = self.inner.io.lock().await;
        let version = self.inner.store.read().metadata().version;
        let manifest = self.inner.backend.backup(version).await?;
        info!(backup = %manifest.id, version, "backup complete");
        Ok(manifest)
    }

    /// Replace the live graph with a backup.
    ///
    /// Queued writes that were not flushed are discarded; callers that want
    /// them kept should `flush` or `backup` first.
    ///
    /// With the file backend, a restore that fails while copying the backup
    /// leaves the live files and the in-memory graph as they were. A failure
    /// while renaming the staged files into place can leave a mixed set on
    /// disk; `save()` then rewrites it from memory.
    pub async fn restore(&self, backup_id: &str) -> Result<BackupManifest> {
        let manifest = {
            let _io = self.inner.io.lock().await;
            self.inner.backend.restore(backup_id).await?
        };

        let dropped = self.inner.queue.clear();
        if dropped > 0 {
            warn!(dropped, backup = %backup_id, "discarding queued writes on restore");
        }
        {
            let mut store = self.inner.store.write();
            store.clear_cache();
            *store = GraphStore::new(self.inner.config.btree_order, self.inner.config.max_cache_size);
        }
        self.inner.load().await;
        info!(backup = %backup_id, version = manifest.version, "restored from backup");
        Ok(manifest)
    }

    /// Backups, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupManifest>> {
        self.inner.backend.list_backups().await
    }

    /// Keep the `keep` newest backups and delete the rest. Returns the
    /// number deleted.
    pub async fn prune_backups(&self, keep: usize) -> Result<usize> {
        let backups = self.inner.backend.list_backups().await?;
        let mut deleted = 0;
        for manifest in backups.iter().skip(keep) {
            self.inner.backend.delete_backup(&manifest.id).await?;
            deleted += 1;
        }
        if deleted > 0 {
            info!(deleted, kept = keep, "pruned backups");
        }
        Ok(deleted)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Rebuild the index, recompute clusters, compact memory and storage,
    /// then save.
    pub async fn optimize(&self) -> Result<CompactionReport> {
        let start = Instant::now();
        let report = {
            let mut store = self.inner.store.write();
            store.rebuild_index();
            store.recompute_clusters(self.inner.config.cluster_threshold);
            store.compact()
        };
        self.inner.backend.compact().await?;
        let latency = elapsed_ms(start);
        self.inner.perf.lock().compression_latency_ms = latency;

        self.inner.save().await?;
        let (depth, clusters) = {
            let store = self.inner.store.read();
            (store.index().depth(), store.clusters().len())
        };
        info!(
            depth,
            clusters,
            dropped_edge_lists = report.dropped_edge_lists,
            dropped_cluster_members = report.dropped_cluster_members,
            latency_ms = latency,
            "optimized"
        );
        Ok(report)
    }

    /// Metadata with live totals and the latest performance observations.
    pub fn get_metrics(&self) -> GraphMetadata {
        let store = self.inner.store.read();
        let mut metadata = store.metadata().clone();
        metadata.total_nodes = store.token_count() as u64;
        metadata.total_edges = store.edge_count() as u64;
        metadata.performance = self.inner.observed(&store);
        metadata.compression_ratio = compression_ratio(&metadata.performance);
        metadata
    }

    /// Stop the ticker, persist everything still queued, and release caches.
    pub async fn cleanup(&self) -> Result<()> {
        let ticker = self.ticker.lock().take();
        if let Some(handle) = ticker {
            self.inner.shutdown.notify_one();
            if let Err(e) = handle.await {
                warn!(error = %e, "flush ticker ended abnormally");
            }
        }

        let drained = self.inner.drain_all();
        self.inner.save().await?;
        self.inner.store.read().clear_cache();
        info!(drained, "context graph closed");
        Ok(())
    }
}

impl<B: StorageBackend> Drop for ContextGraph<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Inner
// ============================================================================

impl<B: StorageBackend> Inner<B> {
    fn check_len(&self, got: usize) -> Result<()> {
        match self.config.dimension {
            Some(expected) if expected != got => Err(Error::DimensionMismatch { expected, got }),
            _ => Ok(()),
        }
    }

    /// Reject what could not be persisted or would break the dimension.
    fn check_token(&self, token: &ContextToken) -> Result<()> {
        if let Some(field) = token.non_finite_field() {
            return Err(Error::InvalidToken(format!("token {}: non-finite {field}", token.id)));
        }
        self.check_len(token.dimension())
    }

    fn check_patch(&self, id: &TokenId, patch: &TokenPatch) -> Result<()> {
        if let Some(field) = patch.non_finite_field() {
            return Err(Error::InvalidToken(format!("token {id}: non-finite {field}")));
        }
        match &patch.embedding {
            Some(embedding) => self.check_len(embedding.len()),
            None => Ok(()),
        }
    }

    fn observed(&self, store: &GraphStore) -> PerformanceMetrics {
        let mut perf = self.perf.lock().clone();
        perf.memory_usage_bytes = store.estimated_memory_bytes();
        perf
    }

    /// Apply one drained batch to the store.
    fn apply(&self, batch: Batch) -> usize {
        let drained = batch.len();
        let outcome = self.store.write().apply_batch(batch.pending);
        debug!(
            drained,
            already_applied = batch.applied,
            added = outcome.added,
            updated = outcome.updated,
            removed = outcome.removed,
            skipped = outcome.skipped,
            "batch applied"
        );
        drained
    }

    /// Apply everything queued, batch by batch, without saving.
    fn drain_all(&self) -> usize {
        let mut total = 0;
        loop {
            let batch = self.queue.drain_batch(self.config.batch_size);
            if batch.is_empty() {
                return total;
            }
            total += self.apply(batch);
        }
    }

    async fn flush(&self) -> Result<usize> {
        let Some(_guard) = FlushGuard::acquire(&self.flushing) else {
            debug!("flush already running, skipping");
            return Ok(0);
        };

        let batch = self.queue.drain_batch(self.config.batch_size);
        if batch.is_empty() {
            return Ok(0);
        }
        let start = Instant::now();
        let drained = self.apply(batch);
        self.save().await?;

        let secs = start.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.perf.lock().throughput_ops_per_sec = drained as f64 / secs;
        }
        debug!(drained, remaining = self.queue.len(), "flushed");
        Ok(drained)
    }

    async fn save(&self) -> Result<u64> {
        let _io = self.io.lock().await;

        let (encoded, previous) = {
            let mut store = self.store.write();
            let perf = self.observed(&store);
            store.refresh_totals();
            let metadata = store.metadata_mut();
            let previous = (metadata.version, metadata.last_update);
            metadata.version += 1;
            metadata.last_update = Utc::now();
            metadata.compression_ratio = compression_ratio(&perf);
            metadata.performance = perf;
            (codec::encode(&store), previous)
        };
        let rollback = |store: &RwLock<GraphStore>| {
            let mut store = store.write();
            let metadata = store.metadata_mut();
            metadata.version = previous.0;
            metadata.last_update = previous.1;
        };

        let written = match encoded {
            Ok(encoded) => self.backend.save(&encoded).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(bytes) => {
                self.perf.lock().disk_usage_bytes = bytes;
                let store = self.store.read();
                info!(
                    version = store.metadata().version,
                    tokens = store.token_count(),
                    edges = store.edge_count(),
                    bytes,
                    "graph saved"
                );
                Ok(bytes)
            }
            Err(e) => {
                rollback(&self.store);
                warn!(error = %e, "save failed");
                Err(e)
            }
        }
    }

    async fn load(&self) -> GraphMetadata {
        let raw = self.backend.load().await;
        let store = codec::decode(raw, self.config.btree_order, self.config.max_cache_size);
        let metadata = store.metadata().clone();
        {
            let mut perf = self.perf.lock();
            perf.disk_usage_bytes = metadata.performance.disk_usage_bytes;
        }
        info!(
            version = metadata.version,
            tokens = store.token_count(),
            edges = store.edge_count(),
            clusters = store.clusters().len(),
            "graph loaded"
        );
        *self.store.write() = store;
        metadata
    }
}

/// Clears the flushing flag when the flush ends, even by cancellation.
struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn spawn_ticker<B: StorageBackend>(inner: Arc<Inner<B>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(inner.config.flush_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = inner.shutdown.notified() => break,
                _ = interval.tick() => {
                    if let Err(e) = inner.flush().await {
                        warn!(error = %e, "background flush failed, updates stay in memory");
                    }
                }
            }
        }
        debug!("flush ticker stopped");
    })
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Bytes on disk per byte in memory; 1.0 until both are known.
fn compression_ratio(perf: &PerformanceMetrics) -> f64 {
    if perf.disk_usage_bytes == 0 || perf.memory_usage_bytes == 0 {
        1.0
    } else {
        perf.disk_usage_bytes as f64 / perf.memory_usage_bytes as f64
    }
}
