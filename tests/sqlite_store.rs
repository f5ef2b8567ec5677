use std::io;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use codeindex::sqlite_store::SqliteStore;
use codeindex_core::models::{Chunk, IndexStatus, ProgressUpdate};
use codeindex_core::store::VectorStore;

fn chunk(path: &str, start: usize, end: usize, hash: &str, embedding: Vec<f32>) -> Chunk {
    Chunk {
        id: uuid::Uuid::new_v4().to_string(),
        file_path: path.to_string(),
        content: format!("{} {}-{}", path, start, end),
        start_line: start,
        end_line: end,
        embedding,
        file_hash: hash.to_string(),
        created_at: 1,
        updated_at: 1,
    }
}

async fn open(tmp: &TempDir) -> SqliteStore {
    SqliteStore::open(&tmp.path().join(".codeindex/index.sqlite"))
        .await
        .unwrap()
}

#[tokio::test]
async fn fresh_store_is_idle_and_empty() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    assert_eq!(store.total_chunks().await.unwrap(), 0);
    let progress = store.progress().await.unwrap();
    assert_eq!(progress.status, IndexStatus::Idle);
    assert!(!progress.watcher_enabled);
    assert!(tmp.path().join(".codeindex/index.sqlite").exists());
}

#[tokio::test]
async fn reopening_keeps_data() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    store
        .insert_chunks(&[chunk("a.rs", 1, 10, "h1", vec![1.0, 0.0])])
        .await
        .unwrap();
    store.close().await;

    let store = open(&tmp).await;
    assert_eq!(store.total_chunks().await.unwrap(), 1);
    assert!(store.has_file_hash("h1").await.unwrap());
    assert!(!store.has_file_hash("h2").await.unwrap());
}

#[tokio::test]
async fn same_range_is_replaced_not_duplicated() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store
        .insert_chunks(&[chunk("a.rs", 1, 10, "old", vec![1.0, 0.0])])
        .await
        .unwrap();
    store
        .insert_chunks(&[chunk("a.rs", 1, 10, "new", vec![0.0, 1.0])])
        .await
        .unwrap();

    assert_eq!(store.total_chunks().await.unwrap(), 1);
    assert!(!store.has_file_hash("old").await.unwrap());
    assert!(store.has_file_hash("new").await.unwrap());
}

#[tokio::test]
async fn delete_by_file_is_isolated() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    store
        .insert_chunks(&[
            chunk("a.rs", 1, 100, "ha", vec![1.0, 0.0]),
            chunk("a.rs", 91, 150, "ha", vec![1.0, 0.0]),
            chunk("b.rs", 1, 20, "hb", vec![0.0, 1.0]),
        ])
        .await
        .unwrap();

    assert_eq!(store.delete_chunks_by_file("a.rs").await.unwrap(), 2);
    assert_eq!(store.delete_chunks_by_file("a.rs").await.unwrap(), 0);
    assert_eq!(store.indexed_files().await.unwrap(), vec!["b.rs".to_string()]);
}

#[tokio::test]
async fn similarity_ranks_and_limits() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    store
        .insert_chunks(&[
            chunk("far.rs", 1, 5, "h1", vec![0.0, 1.0]),
            chunk("near.rs", 1, 5, "h2", vec![1.0, 0.1]),
            chunk("exact.rs", 1, 5, "h3", vec![2.0, 0.0]),
        ])
        .await
        .unwrap();

    let hits = store.search_similar(&[1.0, 0.0], 2).await.unwrap();
    let paths: Vec<&str> = hits.iter().map(|h| h.file_path.as_str()).collect();
    assert_eq!(paths, vec!["exact.rs", "near.rs"]);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(hits[0].location(), "exact.rs:1-5");
}

#[tokio::test]
async fn clear_resets_progress_but_keeps_watcher_flag() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    store
        .insert_chunks(&[chunk("a.rs", 1, 5, "h", vec![1.0])])
        .await
        .unwrap();
    store.set_watcher_enabled(true).await.unwrap();
    store
        .update_progress(ProgressUpdate {
            total_files: Some(10),
            processed_files: Some(4),
            status: Some(IndexStatus::Error),
            last_error: Some(Some("boom".into())),
            ..Default::default()
        })
        .await
        .unwrap();

    store.clear().await.unwrap();

    let progress = store.progress().await.unwrap();
    assert_eq!(store.total_chunks().await.unwrap(), 0);
    assert_eq!(progress.status, IndexStatus::Idle);
    assert_eq!(progress.total_files, 0);
    assert!(progress.last_error.is_none());
    assert!(progress.watcher_enabled);
    assert!(store.is_watcher_enabled().await.unwrap());
}

#[tokio::test]
async fn concurrent_progress_updates_all_land() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(open(&tmp).await);

    let tasks: Vec<_> = (0..8u64)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let update = if i % 2 == 0 {
                    ProgressUpdate {
                        total_files: Some(i),
                        ..Default::default()
                    }
                } else {
                    ProgressUpdate {
                        last_processed_file: Some(format!("f{}.rs", i)),
                        ..Default::default()
                    }
                };
                store.update_progress(update).await.unwrap();
            })
        })
        .collect();
    for t in tasks {
        t.await.unwrap();
    }

    let progress = store.progress().await.unwrap();
    assert_eq!(progress.total_files % 2, 0);
    assert!(progress.last_processed_file.is_some());
    assert_eq!(progress.status, IndexStatus::Idle);
}

/// Collects formatted log lines for assertions.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn query_length_mismatch_is_reported() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_env_filter("codeindex::sqlite_store=warn")
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    store
        .insert_chunks(&[
            chunk("a.rs", 1, 5, "h1", vec![1.0, 0.0, 0.0]),
            chunk("b.rs", 1, 5, "h2", vec![0.0, 1.0, 0.0]),
        ])
        .await
        .unwrap();

    store.search_similar(&[1.0, 0.0, 0.0], 5).await.unwrap();
    assert!(logs.0.lock().unwrap().is_empty());

    let hits = store.search_similar(&[1.0, 0.0], 5).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.score == 0.0));

    let out = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert_eq!(out.matches("differ in length").count(), 1, "logs: {}", out);
    assert!(out.contains("query_dims=2"));
    assert!(out.contains("stored_dims=3"));
    assert!(out.contains("rows=2"));
}
