// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn index_then_query_returns_the_document_first() {
    let backend = MemoryBackend::new();
    let doc_id = backend.index("hello world", "test").await.unwrap();
    backend.index("unrelated content entirely", "test").await.unwrap();

    let hits = backend.query("hello", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc_id, doc_id);
    assert!(hits[0].score >= 0.5);
    assert_eq!(hits[0].text, "hello world");
}

#[tokio::test]
async fn query_without_overlap_returns_nothing() {
    let backend = MemoryBackend::new();
    backend.index("alpha beta", "test").await.unwrap();

    assert!(backend.query("gamma", 5).await.unwrap().is_empty());
    assert!(backend.query("", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn query_honours_k() {
    let backend = MemoryBackend::new();
    for i in 0..10 {
        backend.index(&format!("shared token doc{i}"), "test").await.unwrap();
    }
    let hits = backend.query("shared", 3).await.unwrap();
    assert_eq!(hits.len(), 3);
}

#[tokio::test]
async fn document_count_tracks_indexing() {
    let backend = MemoryBackend::new();
    assert_eq!(backend.document_count().await, 0);
    backend.index("one", "t").await.unwrap();
    backend.index("two", "t").await.unwrap();
    assert_eq!(backend.document_count().await, 2);
}

#[tokio::test]
async fn plan_splits_goal_into_steps() {
    let backend = MemoryBackend::new();
    let actions =
        backend.plan("fetch mail then summarize it", &Map::new()).await.unwrap();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0].name, "plan.step");
    assert_eq!(actions[0].payload["step"], "fetch mail");
    assert!(!actions[0].sensitive);
}
