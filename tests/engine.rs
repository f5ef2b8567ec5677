use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

use codeindex::config::Config;
use codeindex::engine::{IndexError, IndexingEngine, RunOutcome};
use codeindex::sqlite_store::SqliteStore;
use codeindex_core::embedding::Embedder;
use codeindex_core::models::{IndexStatus, ProgressUpdate};
use codeindex_core::store::VectorStore;

/// Deterministic 3-d vectors; optionally fails on selected calls.
struct FakeEmbedder {
    calls: AtomicUsize,
    fail_when: Box<dyn Fn(usize) -> bool + Send + Sync>,
}

impl FakeEmbedder {
    fn ok() -> Self {
        Self::failing(|_| false)
    }

    fn failing(fail_when: impl Fn(usize) -> bool + Send + Sync + 'static) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_when: Box::new(fail_when),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn vector_for(text: &str) -> Vec<f32> {
    vec![text.len() as f32, text.lines().count() as f32, 1.0]
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }

    fn dims(&self) -> Option<usize> {
        Some(3)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if (self.fail_when)(call) {
            bail!("embedding service unavailable (call {})", call);
        }
        Ok(texts.iter().map(|t| vector_for(t)).collect())
    }
}

fn numbered_lines(prefix: &str, n: usize) -> String {
    (1..=n)
        .map(|i| format!("{} line {}", prefix, i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn test_config(root: &Path) -> Config {
    let mut config = Config::for_root(root);
    config.batch.max_lines = 1;
    config.batch.concurrency = 1;
    config.retry.embed_attempts = 1;
    config.retry.embed_initial_delay_ms = 1;
    config.retry.store_initial_delay_ms = 1;
    config
}

async fn setup(
    config: &Config,
    embedder: Arc<FakeEmbedder>,
) -> (Arc<IndexingEngine>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open(&config.db_path()).await.unwrap());
    let engine = IndexingEngine::from_config(config, store.clone(), embedder).unwrap();
    (Arc::new(engine), store)
}

async fn ranges(store: &SqliteStore, file: &str) -> Vec<(i64, i64)> {
    sqlx::query_as("SELECT start_line, end_line FROM chunks WHERE file_path = ? ORDER BY start_line")
        .bind(file)
        .fetch_all(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn full_run_indexes_every_file() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("src")).unwrap();
    fs::write(tmp.path().join("src/lib.rs"), numbered_lines("lib", 250)).unwrap();
    fs::write(tmp.path().join("src/util.rs"), numbered_lines("util", 20)).unwrap();
    fs::write(tmp.path().join("notes.bin"), "not a source file").unwrap();

    let config = test_config(tmp.path());
    let (engine, store) = setup(&config, Arc::new(FakeEmbedder::ok())).await;

    let outcome = engine.start().await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            total_files: 2,
            total_chunks: 4,
            pruned_files: 0
        }
    );
    assert_eq!(
        ranges(&store, "src/lib.rs").await,
        vec![(1, 100), (91, 190), (181, 250)]
    );

    let progress = store.progress().await.unwrap();
    assert_eq!(progress.status, IndexStatus::Completed);
    assert_eq!(progress.processed_files, 2);
    assert_eq!(progress.total_chunks, 4);
    assert!(progress.completed_at.is_some());
    assert!(progress.last_error.is_none());
}

#[tokio::test]
async fn unchanged_files_are_not_reembedded() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.rs"), numbered_lines("a", 150)).unwrap();
    fs::write(tmp.path().join("b.rs"), numbered_lines("b", 30)).unwrap();

    let config = test_config(tmp.path());
    let embedder = Arc::new(FakeEmbedder::ok());
    let (engine, store) = setup(&config, embedder.clone()).await;

    engine.start().await.unwrap();
    let calls_after_first = embedder.calls();
    let chunks_after_first = store.total_chunks().await.unwrap();
    assert!(calls_after_first > 0);

    engine.start().await.unwrap();
    assert_eq!(embedder.calls(), calls_after_first);
    assert_eq!(store.total_chunks().await.unwrap(), chunks_after_first);
}

#[tokio::test]
async fn one_line_change_reindexes_that_file() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("big.rs");
    fs::write(&file, numbered_lines("big", 250)).unwrap();
    fs::write(tmp.path().join("other.rs"), numbered_lines("other", 10)).unwrap();

    let config = test_config(tmp.path());
    let embedder = Arc::new(FakeEmbedder::ok());
    let (engine, store) = setup(&config, embedder.clone()).await;
    engine.start().await.unwrap();
    let calls_before = embedder.calls();

    let changed = numbered_lines("big", 250).replacen("big line 5\n", "big line five\n", 1);
    fs::write(&file, changed).unwrap();
    engine.start().await.unwrap();

    // Three sub-batches for big.rs, nothing for other.rs.
    assert_eq!(embedder.calls() - calls_before, 3);
    assert_eq!(
        ranges(&store, "big.rs").await,
        vec![(1, 100), (91, 190), (181, 250)]
    );

    let first: String = sqlx::query_scalar(
        "SELECT content FROM chunks WHERE file_path = 'big.rs' AND start_line = 1",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert!(first.contains("big line five"));
    assert_eq!(store.total_chunks().await.unwrap(), 4);
}

#[tokio::test]
async fn matching_progress_resumes_from_processed_count() {
    let tmp = TempDir::new().unwrap();
    for name in ["a.rs", "b.rs", "c.rs", "d.rs"] {
        fs::write(tmp.path().join(name), numbered_lines(name, 5)).unwrap();
    }

    let config = test_config(tmp.path());
    let (engine, store) = setup(&config, Arc::new(FakeEmbedder::ok())).await;
    store
        .update_progress(ProgressUpdate {
            total_files: Some(4),
            processed_files: Some(2),
            status: Some(IndexStatus::Indexing),
            ..Default::default()
        })
        .await
        .unwrap();

    engine.start().await.unwrap();

    assert!(ranges(&store, "a.rs").await.is_empty());
    assert!(ranges(&store, "b.rs").await.is_empty());
    assert_eq!(ranges(&store, "c.rs").await, vec![(1, 5)]);
    assert_eq!(ranges(&store, "d.rs").await, vec![(1, 5)]);
    assert_eq!(store.progress().await.unwrap().processed_files, 4);
}

#[tokio::test]
async fn mismatched_progress_restarts_from_zero() {
    let tmp = TempDir::new().unwrap();
    for name in ["a.rs", "b.rs", "c.rs", "d.rs"] {
        fs::write(tmp.path().join(name), numbered_lines(name, 5)).unwrap();
    }

    let config = test_config(tmp.path());
    let (engine, store) = setup(&config, Arc::new(FakeEmbedder::ok())).await;
    store
        .update_progress(ProgressUpdate {
            total_files: Some(9),
            processed_files: Some(2),
            status: Some(IndexStatus::Indexing),
            ..Default::default()
        })
        .await
        .unwrap();

    engine.start().await.unwrap();

    for name in ["a.rs", "b.rs", "c.rs", "d.rs"] {
        assert_eq!(ranges(&store, name).await, vec![(1, 5)], "{}", name);
    }
    let progress = store.progress().await.unwrap();
    assert_eq!(progress.total_files, 4);
    assert_eq!(progress.status, IndexStatus::Completed);
}

#[tokio::test]
async fn breaker_opens_after_three_consecutive_failures() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.rs"), numbered_lines("a", 250)).unwrap();
    fs::write(tmp.path().join("b.rs"), numbered_lines("b", 250)).unwrap();

    let mut config = test_config(tmp.path());
    config.retry.embed_attempts = 2;
    let embedder = Arc::new(FakeEmbedder::failing(|_| true));
    let (engine, store) = setup(&config, embedder.clone()).await;

    let err = engine.start().await.unwrap_err();
    match err.downcast_ref::<IndexError>() {
        Some(IndexError::CircuitOpen { failures, last_error }) => {
            assert_eq!(*failures, 3);
            assert!(last_error.contains("unavailable"));
        }
        other => panic!("expected CircuitOpen, got {:?}", other),
    }

    // Three sub-batches, two attempts each; b.rs never started.
    assert_eq!(embedder.calls(), 6);
    assert_eq!(store.total_chunks().await.unwrap(), 0);

    let progress = store.progress().await.unwrap();
    assert_eq!(progress.status, IndexStatus::Error);
    assert!(progress.last_error.unwrap().contains("circuit breaker"));
    assert!(!engine.is_running());
}

#[tokio::test]
async fn interleaved_successes_keep_breaker_closed() {
    let tmp = TempDir::new().unwrap();
    for name in ["a.rs", "b.rs", "c.rs"] {
        fs::write(tmp.path().join(name), numbered_lines(name, 250)).unwrap();
    }

    let config = test_config(tmp.path());
    // fail, fail, succeed, repeated
    let embedder = Arc::new(FakeEmbedder::failing(|call| call % 3 != 2));
    let (engine, store) = setup(&config, embedder.clone()).await;

    let outcome = engine.start().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { total_files: 3, .. }));
    assert_eq!(embedder.calls(), 9);
    assert_eq!(store.total_chunks().await.unwrap(), 3);
    assert_eq!(store.progress().await.unwrap().status, IndexStatus::Completed);
}

/// Blocks its first call until released.
struct GatedEmbedder {
    entered: Arc<Notify>,
    release: Arc<Notify>,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for GatedEmbedder {
    fn model_name(&self) -> &str {
        "gated"
    }

    fn dims(&self) -> Option<usize> {
        Some(3)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(texts.iter().map(|t| vector_for(t)).collect())
    }
}

#[tokio::test]
async fn stop_leaves_a_resumable_run() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.rs"), numbered_lines("a", 250)).unwrap();
    fs::write(tmp.path().join("b.rs"), numbered_lines("b", 50)).unwrap();

    let config = test_config(tmp.path());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let embedder = Arc::new(GatedEmbedder {
        entered: entered.clone(),
        release: release.clone(),
        calls: AtomicUsize::new(0),
    });
    let store = Arc::new(SqliteStore::open(&config.db_path()).await.unwrap());
    let engine =
        Arc::new(IndexingEngine::from_config(&config, store.clone(), embedder).unwrap());

    let running = Arc::clone(&engine);
    let handle = tokio::spawn(async move { running.start().await });

    entered.notified().await;
    assert!(engine.is_running());
    assert_eq!(engine.start().await.unwrap(), RunOutcome::AlreadyRunning);
    engine.stop();
    release.notify_one();

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Stopped {
            processed_files: 0,
            total_files: 2
        }
    );
    // Partial chunks of the interrupted file are removed.
    assert!(ranges(&store, "a.rs").await.is_empty());
    assert_eq!(store.progress().await.unwrap().status, IndexStatus::Indexing);

    let outcome = engine.start().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { total_files: 2, .. }));
    assert_eq!(ranges(&store, "a.rs").await.len(), 3);
    assert_eq!(ranges(&store, "b.rs").await, vec![(1, 50)]);
}

#[tokio::test]
async fn removing_one_file_leaves_others() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.rs"), numbered_lines("a", 120)).unwrap();
    fs::write(tmp.path().join("b.rs"), numbered_lines("b", 120)).unwrap();

    let config = test_config(tmp.path());
    let (engine, store) = setup(&config, Arc::new(FakeEmbedder::ok())).await;
    engine.start().await.unwrap();

    assert_eq!(engine.remove_file("a.rs").await.unwrap(), 2);
    assert!(ranges(&store, "a.rs").await.is_empty());
    assert_eq!(ranges(&store, "b.rs").await, vec![(1, 100), (91, 120)]);
    assert_eq!(store.progress().await.unwrap().total_chunks, 2);
}

#[tokio::test]
async fn deleted_files_are_pruned_on_next_run() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("keep.rs"), numbered_lines("keep", 10)).unwrap();
    fs::write(tmp.path().join("gone.rs"), numbered_lines("gone", 10)).unwrap();

    let config = test_config(tmp.path());
    let (engine, store) = setup(&config, Arc::new(FakeEmbedder::ok())).await;
    engine.start().await.unwrap();

    fs::remove_file(tmp.path().join("gone.rs")).unwrap();
    let outcome = engine.start().await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            total_files: 1,
            total_chunks: 1,
            pruned_files: 1
        }
    );
    assert_eq!(store.indexed_files().await.unwrap(), vec!["keep.rs".to_string()]);
}

#[tokio::test]
async fn renamed_file_is_indexed_under_new_path() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.rs"), numbered_lines("moved", 10)).unwrap();

    let config = test_config(tmp.path());
    let embedder = Arc::new(FakeEmbedder::ok());
    let (engine, store) = setup(&config, embedder.clone()).await;
    engine.start().await.unwrap();
    assert_eq!(embedder.calls(), 1);

    fs::rename(tmp.path().join("a.rs"), tmp.path().join("b.rs")).unwrap();
    let outcome = engine.start().await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            total_files: 1,
            total_chunks: 1,
            pruned_files: 1
        }
    );
    assert_eq!(store.indexed_files().await.unwrap(), vec!["b.rs".to_string()]);
    assert_eq!(embedder.calls(), 2);
}

#[tokio::test]
async fn identical_files_are_both_indexed() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("one.rs"), numbered_lines("same", 10)).unwrap();
    fs::write(tmp.path().join("two.rs"), numbered_lines("same", 10)).unwrap();

    let config = test_config(tmp.path());
    let (engine, store) = setup(&config, Arc::new(FakeEmbedder::ok())).await;
    engine.start().await.unwrap();

    assert_eq!(
        store.indexed_files().await.unwrap(),
        vec!["one.rs".to_string(), "two.rs".to_string()]
    );
}

#[tokio::test]
async fn disabled_provider_disables_engine() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.rs"), "fn main() {}").unwrap();

    let mut config = test_config(tmp.path());
    config.embedding.provider = "disabled".into();
    let embedder = Arc::new(FakeEmbedder::ok());
    let (engine, store) = setup(&config, embedder.clone()).await;

    assert_eq!(engine.start().await.unwrap(), RunOutcome::Disabled);
    let err = engine
        .index_file(&tmp.path().join("a.rs"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IndexError>(),
        Some(IndexError::Disabled)
    ));
    assert_eq!(embedder.calls(), 0);
    assert_eq!(store.progress().await.unwrap().status, IndexStatus::Idle);
}
