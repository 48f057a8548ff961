//! End-to-end tests for the token API against an in-memory engine.
//!
//! Each test opens a fresh `ContextGraph` on a `MemoryBackend` and works
//! through the public handle only.

use std::time::Duration;

use context_graph::{
    ContextGraph, ContextToken, EngineConfig, Error, MemoryBackend, TokenRelationship, Value,
};

async fn open(config: EngineConfig) -> ContextGraph<MemoryBackend> {
    let config = config.with_flush_interval(Duration::from_secs(3600));
    ContextGraph::with_backend(MemoryBackend::new(), config).await.unwrap()
}

// ============================================================================
// 1. Add a token, find it back
// ============================================================================

#[tokio::test]
async fn test_add_and_find_token() {
    let graph = ContextGraph::open_memory().await.unwrap();

    graph
        .add_token(
            ContextToken::new("intro", vec![0.1, 0.9, 0.3])
                .with_property("source", "book.md")
                .with_relationship(TokenRelationship::new("chapter-1", "precedes", 1.0)),
        )
        .unwrap();

    let token = graph.find_token("intro").unwrap();
    assert_eq!(token.embedding, vec![0.1, 0.9, 0.3]);
    assert_eq!(token.get("source"), Some(&Value::String("book.md".into())));
    assert_eq!(token.relationships.len(), 1);
    assert!(graph.find_token("missing").is_none());
    assert_eq!(graph.len(), 1);
}

// ============================================================================
// 2. Re-adding an id overwrites, never duplicates
// ============================================================================

#[tokio::test]
async fn test_overwrite_is_idempotent() {
    let graph = open(EngineConfig::default().with_btree_order(3)).await;

    for round in 0..3 {
        for i in 0..20 {
            graph
                .add_token(ContextToken::new(format!("t{i:02}"), vec![round as f32, i as f32]))
                .unwrap();
        }
    }

    assert_eq!(graph.len(), 20);
    assert_eq!(graph.find_token("t07").unwrap().embedding, vec![2.0, 7.0]);
    graph.read(|store| {
        assert_eq!(store.index().len(), 20);
        store.index().verify().unwrap();
    });
}

// ============================================================================
// 3. order + 1 keys split the root exactly once
// ============================================================================

#[tokio::test]
async fn test_single_split_boundary() {
    let graph = open(EngineConfig::default().with_btree_order(3)).await;

    for id in ["a", "b", "c"] {
        graph.add_token(ContextToken::new(id, vec![1.0])).unwrap();
    }
    graph.read(|store| assert_eq!(store.index().depth(), 1));

    graph.add_token(ContextToken::new("d", vec![1.0])).unwrap();
    graph.read(|store| {
        assert_eq!(store.index().depth(), 2);
        assert_eq!(store.index().node_count(), 3);
        store.index().verify().unwrap();
    });
    for id in ["a", "b", "c", "d"] {
        assert!(graph.find_token(id).is_some(), "{id} lost after split");
    }
}

// ============================================================================
// 4. Similarity search
// ============================================================================

#[tokio::test]
async fn test_similarity_self_match_at_threshold_one() {
    let graph = ContextGraph::open_memory().await.unwrap();
    let query = vec![0.3, -1.2, 4.5, 0.01];

    graph.add_token(ContextToken::new("self", query.clone())).unwrap();
    graph.add_token(ContextToken::new("other", vec![1.0, 0.0, 0.0, 0.0])).unwrap();
    graph.add_token(ContextToken::new("short", vec![0.3, -1.2])).unwrap();

    let hits = graph.find_similar_tokens(&query, 1.0, None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].token.id.as_str(), "self");
    assert_eq!(hits[0].similarity, 1.0);
}

#[tokio::test]
async fn test_similarity_ordering_and_limit() {
    let graph = ContextGraph::open_memory().await.unwrap();
    for i in 0..30 {
        let angle = i as f32 * 0.02;
        graph
            .add_token(ContextToken::new(format!("v{i:02}"), vec![angle.cos(), angle.sin()]))
            .unwrap();
    }

    let hits = graph.find_similar_tokens(&[1.0, 0.0], 0.0, Some(5));
    assert_eq!(hits.len(), 5);
    assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    assert_eq!(hits[0].token.id.as_str(), "v00");

    assert!(graph.find_similar_tokens(&[1.0, 0.0], 0.0, Some(0)).is_empty());
    assert!(graph.find_similar_tokens(&[0.0, 0.0], -1.0, None).len() <= 10);
    assert!(graph.get_metrics().performance.query_latency_ms >= 0.0);
}

// ============================================================================
// 5. Relationships and removal
// ============================================================================

#[tokio::test]
async fn test_update_relationships_replaces_edges() {
    let graph = ContextGraph::open_memory().await.unwrap();
    graph
        .add_token(
            ContextToken::new("a", vec![1.0])
                .with_relationship(TokenRelationship::new("b", "cites", 0.4)),
        )
        .unwrap();
    graph.add_token(ContextToken::new("b", vec![1.0])).unwrap();

    graph
        .update_relationships(
            "a",
            vec![
                TokenRelationship::new("b", "extends", 0.9),
                TokenRelationship::new("c", "mentions", 0.1),
            ],
        )
        .unwrap();

    let token = graph.find_token("a").unwrap();
    assert_eq!(token.relationships.len(), 2);
    assert_eq!(token.relationships[0].rel_type, "extends");
    graph.read(|store| {
        let targets: Vec<&str> = store.neighbors("a").iter().map(|t| t.as_str()).collect();
        assert_eq!(targets, vec!["b", "c"]);
        assert_eq!(store.edge_count(), 2);
    });
}

#[tokio::test]
async fn test_not_found_paths() {
    let graph = ContextGraph::open_memory().await.unwrap();

    let err = graph.update_relationships("ghost", Vec::new()).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = graph.remove_token("ghost").unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    assert_eq!(graph.pending_updates(), 0);
}

#[tokio::test]
async fn test_remove_token_drops_edges() {
    let graph = ContextGraph::open_memory().await.unwrap();
    graph
        .add_token(
            ContextToken::new("src", vec![1.0])
                .with_relationship(TokenRelationship::new("dst", "links", 1.0)),
        )
        .unwrap();

    let removed = graph.remove_token("src").unwrap();
    assert_eq!(removed.id.as_str(), "src");
    assert!(graph.find_token("src").is_none());
    graph.read(|store| {
        assert_eq!(store.edge_count(), 0);
        store.index().verify().unwrap();
    });
}

// ============================================================================
// 6. Cache stays within its bound
// ============================================================================

#[tokio::test]
async fn test_node_cache_is_bounded() {
    let graph = open(EngineConfig::default().with_btree_order(3).with_max_cache_size(4)).await;
    for i in 0..200 {
        graph.add_token(ContextToken::new(format!("k{i:03}"), vec![1.0])).unwrap();
    }
    for i in (0..200).step_by(7) {
        assert!(graph.find_token(&format!("k{i:03}")).is_some());
    }
    graph.read(|store| {
        assert!(store.index().cache_len() <= 4);
        assert_eq!(store.index().cache_capacity(), 4);
    });
}
