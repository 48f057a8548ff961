//! End-to-end persistence tests against the file backend.
//!
//! Every test works in its own temporary storage directory and reopens the
//! engine to observe what actually reached disk.

use std::path::Path;
use std::time::Duration;

use context_graph::{
    ContextGraph, ContextToken, EngineConfig, Error, FileBackend, GraphUpdate, TokenPatch,
    TokenRelationship, Value,
};

fn config(dir: &Path) -> EngineConfig {
    EngineConfig::new(dir)
        .with_btree_order(4)
        .with_flush_interval(Duration::from_secs(3600))
}

async fn open(dir: &Path) -> ContextGraph<FileBackend> {
    ContextGraph::open(config(dir)).await.unwrap()
}

fn token(i: usize) -> ContextToken {
    ContextToken::new(format!("tok-{i:03}"), vec![i as f32, 1.0, (i % 7) as f32])
        .with_property("chunk", i as i64)
}

// ============================================================================
// 1. Empty directory bootstraps an empty graph
// ============================================================================

#[tokio::test]
async fn test_empty_directory_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("fresh");
    let graph = open(&storage).await;

    assert!(storage.is_dir());
    assert!(graph.is_empty());
    let metrics = graph.get_metrics();
    assert_eq!(metrics.version, 1);
    assert_eq!(metrics.total_nodes, 0);
    assert_eq!(metrics.compression_ratio, 1.0);
}

// ============================================================================
// 2. Save, reopen, everything comes back
// ============================================================================

#[tokio::test]
async fn test_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    {
        let graph = open(dir.path()).await;
        for i in 0..40 {
            let mut t = token(i);
            if i > 0 {
                t = t.with_relationship(TokenRelationship::new(format!("tok-{:03}", i - 1), "follows", 0.5));
            }
            graph.add_token(t).unwrap();
        }
        let bytes = graph.save().await.unwrap();
        assert!(bytes > 0);
        assert_eq!(graph.get_metrics().version, 2);
        graph.cleanup().await.unwrap();
    }

    for name in ["graph.index", "graph.data", "graph.edges", "graph.clusters", "graph.metadata"] {
        assert!(dir.path().join(name).is_file(), "{name} missing");
    }

    let graph = open(dir.path()).await;
    assert_eq!(graph.len(), 40);
    let t = graph.find_token("tok-017").unwrap();
    assert_eq!(t.embedding, vec![17.0, 1.0, 3.0]);
    assert_eq!(t.get("chunk"), Some(&Value::Int(17)));
    assert_eq!(t.relationships[0].target.as_str(), "tok-016");

    let metrics = graph.get_metrics();
    assert_eq!(metrics.version, 3);
    assert_eq!(metrics.total_nodes, 40);
    assert_eq!(metrics.total_edges, 39);
    graph.read(|store| store.index().verify().unwrap());
}

#[tokio::test]
async fn test_token_file_is_array_of_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let graph = open(dir.path()).await;
    graph.add_token(token(1)).unwrap();
    graph.save().await.unwrap();

    let raw = std::fs::read(dir.path().join("graph.data")).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(json[0][0], serde_json::json!("tok-001"));

    let meta = std::fs::read_to_string(dir.path().join("graph.metadata")).unwrap();
    assert!(meta.contains("\"totalNodes\": 1"));
}

// ============================================================================
// 3. Damaged components degrade instead of failing
// ============================================================================

#[tokio::test]
async fn test_corrupt_token_file_recovered_from_index() {
    let dir = tempfile::tempdir().unwrap();
    {
        let graph = open(dir.path()).await;
        for i in 0..25 {
            graph.add_token(token(i)).unwrap();
        }
        graph.cleanup().await.unwrap();
    }
    std::fs::write(dir.path().join("graph.data"), b"\x00\x01 definitely not json").unwrap();

    let graph = open(dir.path()).await;
    assert_eq!(graph.len(), 25);
    assert!(graph.find_token("tok-024").is_some());
}

#[tokio::test]
async fn test_corrupt_index_rebuilt_from_tokens() {
    let dir = tempfile::tempdir().unwrap();
    {
        let graph = open(dir.path()).await;
        for i in 0..25 {
            graph.add_token(token(i)).unwrap();
        }
        graph.cleanup().await.unwrap();
    }
    std::fs::write(dir.path().join("graph.index"), br#"{"order": 4, "root": {"keys": ["z", "a"]"#).unwrap();
    std::fs::remove_file(dir.path().join("graph.metadata")).unwrap();

    let graph = open(dir.path()).await;
    assert_eq!(graph.len(), 25);
    assert_eq!(graph.get_metrics().version, 1);
    graph.read(|store| {
        assert_eq!(store.index().len(), 25);
        store.index().verify().unwrap();
    });
}

#[tokio::test]
async fn test_everything_corrupt_gives_empty_graph() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["graph.index", "graph.data", "graph.edges", "graph.clusters", "graph.metadata"] {
        std::fs::write(dir.path().join(name), b"garbage").unwrap();
    }
    let graph = open(dir.path()).await;
    assert!(graph.is_empty());
    assert_eq!(graph.get_metrics().version, 1);

    // And the graph is usable again after a save.
    graph.add_token(token(3)).unwrap();
    graph.save().await.unwrap();
    drop(graph);
    assert_eq!(open(dir.path()).await.len(), 1);
}

// ============================================================================
// 4. Explicit load discards unsaved memory state
// ============================================================================

#[tokio::test]
async fn test_load_replaces_memory_state() {
    let dir = tempfile::tempdir().unwrap();
    let graph = open(dir.path()).await;
    graph.add_token(token(1)).unwrap();
    graph.save().await.unwrap();

    graph.add_token(token(2)).unwrap();
    let metadata = graph.load().await;
    assert_eq!(metadata.total_nodes, 1);
    assert!(graph.find_token("tok-002").is_none());
}

// ============================================================================
// 5. Config file
// ============================================================================

#[tokio::test]
async fn test_open_from_json_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.json");
    let storage = dir.path().join("data");
    std::fs::write(
        &path,
        serde_json::json!({ "storageDir": storage, "btreeOrder": 5, "dimension": 3 }).to_string(),
    )
    .unwrap();

    let config = EngineConfig::from_json_file(&path).await.unwrap();
    let graph = ContextGraph::open(config).await.unwrap();
    assert_eq!(graph.config().btree_order, 5);
    assert!(graph.add_token(ContextToken::new("x", vec![1.0])).is_err());
    graph.add_token(ContextToken::new("x", vec![1.0, 2.0, 3.0])).unwrap();
    graph.cleanup().await.unwrap();
    assert!(storage.join("graph.data").is_file());
}

// ============================================================================
// 6. NaN and infinity are rejected before they can reach disk
// ============================================================================

#[tokio::test]
async fn test_non_finite_values_never_reach_disk() {
    let dir = tempfile::tempdir().unwrap();
    {
        let graph = open(dir.path()).await;
        for i in 0..20 {
            graph.add_token(token(i)).unwrap();
        }

        let nan = ContextToken::new("nan", vec![f32::NAN, 1.0, 0.0]);
        assert!(matches!(graph.add_token(nan.clone()), Err(Error::InvalidToken(_))));
        assert!(matches!(graph.enqueue(GraphUpdate::add(nan)), Err(Error::InvalidToken(_))));

        let inf = vec![TokenRelationship::new("tok-001", "near", f32::INFINITY)];
        assert!(matches!(
            graph.update_relationships("tok-000", inf.clone()),
            Err(Error::InvalidToken(_))
        ));
        assert!(matches!(
            graph.enqueue(GraphUpdate::update("tok-000", TokenPatch::relationships(inf))),
            Err(Error::InvalidToken(_))
        ));

        let score = token(99).with_property("score", f64::NAN);
        assert!(matches!(graph.add_token(score), Err(Error::InvalidToken(_))));

        graph.cleanup().await.unwrap();
    }

    let graph = open(dir.path()).await;
    assert_eq!(graph.len(), 20);
    assert!(graph.find_token("nan").is_none());
    assert!(graph.find_token("tok-000").unwrap().relationships.is_empty());
}

// ============================================================================
// 7. Extreme finite floats survive a save and reopen
// ============================================================================

#[tokio::test]
async fn test_extreme_floats_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let extremes = vec![f32::MAX, f32::MIN, f32::MIN_POSITIVE, f32::from_bits(1), -0.0];
    {
        let graph = open(dir.path()).await;
        for i in 0..10 {
            graph.add_token(token(i)).unwrap();
        }
        graph
            .add_token(
                ContextToken::new("edge", extremes.clone())
                    .with_relationship(TokenRelationship::new("tok-000", "far", f32::MAX))
                    .with_property("huge", f64::MAX),
            )
            .unwrap();
        graph.cleanup().await.unwrap();
    }

    let graph = open(dir.path()).await;
    assert_eq!(graph.len(), 11);
    let edge = graph.find_token("edge").unwrap();
    assert_eq!(edge.embedding, extremes);
    assert_eq!(edge.relationships[0].strength, f32::MAX);
    assert_eq!(edge.metadata.get("huge"), Some(&Value::Float(f64::MAX)));
}
