//! End-to-end tests for `optimize` and metrics.

use std::time::Duration;

use context_graph::{ContextGraph, ContextToken, EngineConfig, TokenRelationship};

fn config(dir: &std::path::Path) -> EngineConfig {
    EngineConfig::new(dir)
        .with_btree_order(4)
        .with_cluster_threshold(0.95)
        .with_flush_interval(Duration::from_secs(3600))
}

/// Two tight groups of directions: near the x axis and near the y axis.
fn grouped(i: usize) -> ContextToken {
    let jitter = (i % 5) as f32 * 0.01;
    let embedding = if i % 2 == 0 { vec![1.0, jitter] } else { vec![jitter, 1.0] };
    ContextToken::new(format!("t{i:03}"), embedding)
}

#[tokio::test]
async fn test_optimize_rebalances_after_removals() {
    let dir = tempfile::tempdir().unwrap();
    let graph = ContextGraph::open(config(dir.path())).await.unwrap();

    // Reverse order makes the least compact tree.
    for i in (0..200).rev() {
        graph.add_token(grouped(i)).unwrap();
    }
    for i in 0..200 {
        if i % 4 != 0 {
            graph.remove_token(&format!("t{i:03}")).unwrap();
        }
    }
    let (nodes_before, depth_before) =
        graph.read(|store| (store.index().node_count(), store.index().depth()));

    graph.optimize().await.unwrap();

    graph.read(|store| {
        let index = store.index();
        index.verify().unwrap();
        assert_eq!(index.len(), 50);
        assert!(index.node_count() < nodes_before);
        assert!(index.depth() <= depth_before);
    });
    for i in (0..200).step_by(4) {
        assert!(graph.find_token(&format!("t{i:03}")).is_some());
    }
}

#[tokio::test]
async fn test_optimize_recomputes_clusters() {
    let dir = tempfile::tempdir().unwrap();
    let graph = ContextGraph::open(config(dir.path())).await.unwrap();
    for i in 0..20 {
        graph.add_token(grouped(i)).unwrap();
    }
    graph.add_token(ContextToken::new("no-embedding", Vec::new())).unwrap();

    graph.optimize().await.unwrap();

    graph.read(|store| {
        assert_eq!(store.clusters().len(), 2);
        let x = store.cluster_of("t000").unwrap();
        let y = store.cluster_of("t001").unwrap();
        assert_ne!(x.id, y.id);
        assert_eq!(x.len(), 10);
        assert!(x.contains(&"t018".into()));
        assert!(store.cluster_of("no-embedding").is_none());
    });

    // Clusters are persisted.
    graph.cleanup().await.unwrap();
    drop(graph);
    let reopened = ContextGraph::open(config(dir.path())).await.unwrap();
    reopened.read(|store| assert_eq!(store.clusters().len(), 2));
}

#[tokio::test]
async fn test_optimize_compacts_edges_and_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let graph = ContextGraph::open(config(dir.path())).await.unwrap();
    graph
        .add_token(grouped(0).with_relationship(TokenRelationship::new("t001", "pairs", 1.0)))
        .unwrap();
    graph.add_token(grouped(1)).unwrap();
    graph.save().await.unwrap();
    std::fs::write(dir.path().join("graph.index.tmp"), b"interrupted").unwrap();

    graph.optimize().await.unwrap();

    assert!(!dir.path().join("graph.index.tmp").exists());
    let metrics = graph.get_metrics();
    assert_eq!(metrics.total_nodes, 2);
    assert_eq!(metrics.total_edges, 1);
    assert!(metrics.performance.compression_latency_ms >= 0.0);
}

#[tokio::test]
async fn test_metrics_track_usage() {
    let dir = tempfile::tempdir().unwrap();
    let graph = ContextGraph::open(config(dir.path())).await.unwrap();
    for i in 0..10 {
        graph.add_token(grouped(i)).unwrap();
    }
    let before_save = graph.get_metrics();
    assert_eq!(before_save.total_nodes, 10);
    assert!(before_save.performance.memory_usage_bytes > 0);
    assert_eq!(before_save.performance.disk_usage_bytes, 0);
    assert_eq!(before_save.compression_ratio, 1.0);

    let written = graph.save().await.unwrap();
    let after = graph.get_metrics();
    assert_eq!(after.performance.disk_usage_bytes, written);
    assert!(after.compression_ratio > 0.0);
    assert_ne!(after.compression_ratio, 1.0);
}
