//! Graph-level metadata persisted alongside the graph components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Versioning and observational metrics for a stored graph.
///
/// `version` starts at 1 for a fresh graph and is bumped on every
/// successful save. Everything under `performance` (and
/// `compression_ratio`) is observational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetadata {
    pub version: u64,
    pub last_update: DateTime<Utc>,
    pub total_nodes: u64,
    pub total_edges: u64,
    pub compression_ratio: f64,
    #[serde(default)]
    pub performance: PerformanceMetrics,
}

impl Default for GraphMetadata {
    fn default() -> Self {
        Self {
            version: 1,
            last_update: Utc::now(),
            total_nodes: 0,
            total_edges: 0,
            compression_ratio: 1.0,
            performance: PerformanceMetrics::default(),
        }
    }
}

/// Latency, footprint and throughput observations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceMetrics {
    /// Last `find_similar_tokens` duration.
    pub query_latency_ms: f64,
    /// Last B-tree insert duration.
    pub index_latency_ms: f64,
    /// Last `optimize` duration.
    pub compression_latency_ms: f64,
    pub memory_usage_bytes: u64,
    /// Bytes written by the last save.
    pub disk_usage_bytes: u64,
    /// Queued updates applied per second of flush time.
    pub throughput_ops_per_sec: f64,
}
