mod common;

use common::{init_logging, open, settings, write, FakeProvider};
use memory_indexer::{IndexerError, SyncOptions, SyncProgress};
use memory_search::QueryOptions;
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn seed_workspace(dir: &TempDir) {
    write(
        dir.path(),
        "MEMORY.md",
        "# Ops\n\nThe staging deploy key lives in the team vault.\n",
    );
    write(
        dir.path(),
        "memory/2024-06-01.md",
        "Weekly sync moved to tuesday afternoons.\n",
    );
    write(
        dir.path(),
        "memory/groceries.md",
        "Remember apples and oat milk.\n",
    );
    write(dir.path(), "README.md", "Not a memory document.\n");
}

#[tokio::test]
async fn first_sync_indexes_memory_documents() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings(&dir), &provider).await;

    assert!(manager.status().dirty);
    let report = manager.sync(SyncOptions::new("manual")).await.unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.indexed_documents, 3);
    assert_eq!(report.completed_chunks, report.total_chunks);
    assert_eq!(report.embedded_chunks, 3);
    let status = manager.status();
    assert_eq!(status.documents, 3);
    assert_eq!(status.chunks, 3);
    assert!(!status.dirty);
    assert!(status.last_sync_unix_ms.is_some());
    assert_eq!(status.last_error, None);

    manager.close().await.unwrap();
    assert!(manager.config().store_path.exists());
}

#[tokio::test]
async fn unchanged_workspace_sync_is_a_noop() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings(&dir), &provider).await;
    manager.sync(SyncOptions::default()).await.unwrap();
    let calls = provider.embed_calls();
    let before = manager.status();

    let report = manager.sync(SyncOptions::default()).await.unwrap();

    assert!(report.noop);
    assert_eq!(provider.embed_calls(), calls);
    assert_eq!(manager.status(), before);
}

#[tokio::test]
async fn large_document_is_split_across_direct_calls() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let line = format!("{}\n", "x".repeat(99));
    let text = line.repeat(100);
    assert_eq!(text.len(), 10_000);
    write(dir.path(), "MEMORY.md", &text);

    let mut settings = settings(&dir);
    settings.chunking.tokens = 1250;
    settings.chunking.overlap = 0;
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings, &provider).await;

    let seen = Arc::new(Mutex::new(Vec::<SyncProgress>::new()));
    let sink = Arc::clone(&seen);
    let report = manager
        .sync(SyncOptions::new("manual").with_progress(move |p| sink.lock().unwrap().push(p)))
        .await
        .unwrap();

    assert!(provider.embed_calls() > 1, "one call per sub-batch");
    assert!(report.total_chunks >= 2);
    let last = *seen.lock().unwrap().last().unwrap();
    assert_eq!(last.completed, last.total);
    assert_eq!(last.total, report.total_chunks);
    assert_eq!(manager.status().chunks, report.total_chunks);
}

#[tokio::test]
async fn transient_embed_failures_are_retried() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let provider = Arc::new(FakeProvider::new("fake-small"));
    provider.fail_next_embeds(vec![memory_embeddings::ProviderError::Transient(
        "HTTP 503".into(),
    )]);
    let manager = open(&settings(&dir), &provider).await;

    let report = manager.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.indexed_documents, 3);
    assert_eq!(provider.embed_calls(), 2);
}

#[tokio::test]
async fn fatal_embed_failure_fails_sync_and_keeps_documents_dirty() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let provider = Arc::new(FakeProvider::new("fake-small"));
    provider.fail_next_embeds(vec![memory_embeddings::ProviderError::Fatal(
        "HTTP 400: bad input".into(),
    )]);
    let manager = open(&settings(&dir), &provider).await;

    let err = manager.sync(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, IndexerError::Embedding(_)), "{err}");
    assert_eq!(provider.embed_calls(), 1, "fatal errors are not retried");
    let status = manager.status();
    assert!(status.dirty);
    assert!(status.last_error.is_some());

    let report = manager.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.indexed_documents, 3);
    assert!(!manager.status().dirty);
}

#[tokio::test]
async fn query_filters_by_min_score() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings(&dir), &provider).await;
    manager.sync(SyncOptions::default()).await.unwrap();

    let results = manager.query("deploy key", None).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, "MEMORY.md");
    assert!(results[0].score >= 0.35);
    assert!(results[0].vector_score.is_some());
    assert!(results[0].snippet.contains("deploy key"));

    let everything = manager
        .query(
            "deploy key",
            Some(QueryOptions {
                max_results: 10,
                min_score: 0.0,
            }),
        )
        .await;
    assert_eq!(everything.len(), 3);
    assert!(manager.query("   ", None).await.is_empty());
}

#[tokio::test]
async fn failing_query_embedding_falls_back_to_lexical() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings(&dir), &provider).await;
    manager.sync(SyncOptions::default()).await.unwrap();
    provider.fail_queries.store(true, Ordering::SeqCst);

    let results = manager
        .query(
            "oat milk",
            Some(QueryOptions {
                max_results: 6,
                min_score: 0.1,
            }),
        )
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, "memory/groceries.md");
    assert_eq!(results[0].vector_score, None);
}

#[tokio::test]
async fn model_change_forces_reindex() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let settings = settings(&dir);

    let first = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings, &first).await;
    manager.sync(SyncOptions::default()).await.unwrap();
    manager.close().await.unwrap();

    // Same model: everything is reused from the persisted store.
    let same = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings, &same).await;
    assert!(manager.sync(SyncOptions::default()).await.unwrap().noop);
    assert_eq!(same.embed_calls(), 0);
    manager.close().await.unwrap();

    let second = Arc::new(FakeProvider::new("fake-large"));
    let manager = open(&settings, &second).await;
    let report = manager.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.indexed_documents, 3);
    assert_eq!(report.cached_chunks, 0);
    assert_eq!(second.embedded_texts.load(Ordering::SeqCst), 3);
    assert_eq!(manager.status().model, "fake-large");
}

#[tokio::test]
async fn chunking_change_reuses_embeddings_of_identical_chunks() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let mut settings = settings(&dir);

    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings, &provider).await;
    manager.sync(SyncOptions::default()).await.unwrap();
    manager.close().await.unwrap();

    // Every document fits one chunk either way, so chunk digests do not change.
    settings.chunking.overlap = 40;
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings, &provider).await;
    let report = manager.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.indexed_documents, 3);
    assert_eq!(report.cached_chunks, 3);
    assert_eq!(provider.embed_calls(), 0);
}

#[tokio::test]
async fn deleted_documents_are_removed() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings(&dir), &provider).await;
    manager.sync(SyncOptions::default()).await.unwrap();

    std::fs::remove_file(dir.path().join("memory/groceries.md")).unwrap();
    let report = manager.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.removed_documents, 1);
    assert_eq!(report.indexed_documents, 0);
    assert_eq!(manager.status().documents, 2);
    let results = manager
        .query(
            "apples",
            Some(QueryOptions {
                max_results: 6,
                min_score: 0.0,
            }),
        )
        .await;
    assert!(results.iter().all(|r| r.path != "memory/groceries.md"));
}

#[tokio::test]
async fn unreadable_document_is_skipped_and_stays_dirty() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    std::fs::write(dir.path().join("memory/broken.md"), [0xff, 0xfe, 0x00, 0xc3]).unwrap();
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings(&dir), &provider).await;

    let report = manager.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.indexed_documents, 3);
    assert_eq!(report.skipped_documents, 1);
    let status = manager.status();
    assert_eq!(status.documents, 3);
    assert!(status.dirty);

    std::fs::write(dir.path().join("memory/broken.md"), "Fixed the vault key note.\n").unwrap();
    let report = manager.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.indexed_documents, 1);
    assert!(!manager.status().dirty);
}

#[tokio::test]
async fn edited_document_replaces_its_chunks() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings(&dir), &provider).await;
    manager.sync(SyncOptions::default()).await.unwrap();

    write(
        dir.path(),
        "memory/groceries.md",
        "Remember apples and oat milk.\nAlso rotate the staging deploy key.\n",
    );
    manager.mark_dirty(Some("memory/groceries.md"));
    let report = manager.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(report.indexed_documents, 1);
    assert_eq!(manager.status().chunks, 3);
    let results = manager.query("deploy key", None).await;
    assert!(results.iter().any(|r| r.path == "memory/groceries.md"));
}

#[tokio::test]
async fn closed_manager_rejects_work() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings(&dir), &provider).await;
    manager.sync(SyncOptions::default()).await.unwrap();

    manager.close().await.unwrap();
    manager.close().await.unwrap();

    assert!(matches!(
        manager.sync(SyncOptions::default()).await,
        Err(IndexerError::Closed)
    ));
    assert!(manager.query("deploy key", None).await.is_empty());
    assert!(manager.status().closed);
}

#[tokio::test]
async fn search_trigger_syncs_in_background() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let mut settings = settings(&dir);
    settings.sync.on_search = true;
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings, &provider).await;

    // The index is empty and dirty; the query returns immediately.
    assert!(manager.query("deploy key", None).await.is_empty());

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while manager.status().documents < 3 {
        assert!(tokio::time::Instant::now() < deadline, "background sync never ran");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(manager.query("deploy key", None).await.len(), 1);
}

#[tokio::test]
async fn session_warmup_runs_once_per_key() {
    init_logging();
    let dir = TempDir::new().unwrap();
    seed_workspace(&dir);
    let mut settings = settings(&dir);
    settings.sync.on_session_start = true;
    let provider = Arc::new(FakeProvider::new("fake-small"));
    let manager = open(&settings, &provider).await;

    assert!(manager.warm_session("session-1"));
    assert!(!manager.warm_session("session-1"));

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while manager.status().documents < 3 {
        assert!(tokio::time::Instant::now() < deadline, "warm-up sync never ran");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    manager.close().await.unwrap();
}
