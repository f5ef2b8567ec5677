//! In-memory [`VectorStore`] implementation for tests and embedding hosts.
//!
//! Uses a `Vec` and a progress record behind `std::sync::RwLock`. Vector
//! search is the same brute-force cosine scan the SQLite store performs.

use std::collections::BTreeSet;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, IndexProgress, ProgressUpdate, ScoredChunk};

use super::{rank_top, reset_progress, VectorStore};

/// In-memory store. Nothing survives the process.
pub struct InMemoryStore {
    chunks: RwLock<Vec<Chunk>>,
    progress: RwLock<IndexProgress>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            progress: RwLock::new(IndexProgress::default()),
        }
    }

    /// Snapshot of the chunks stored for one file, ordered by start line.
    pub fn chunks_for(&self, file_path: &str) -> Vec<Chunk> {
        let guard = match self.chunks.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out: Vec<Chunk> = guard
            .iter()
            .filter(|c| c.file_path == file_path)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.start_line);
        out
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        for chunk in chunks {
            stored.retain(|c| {
                !(c.file_path == chunk.file_path
                    && c.start_line == chunk.start_line
                    && c.end_line == chunk.end_line)
            });
            stored.push(chunk.clone());
        }
        Ok(())
    }

    async fn delete_chunks_by_file(&self, file_path: &str) -> Result<u64> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|c| c.file_path != file_path);
        Ok((before - stored.len()) as u64)
    }

    async fn has_file_hash(&self, file_hash: &str) -> Result<bool> {
        let stored = self.chunks.read().map_err(poisoned)?;
        Ok(stored.iter().any(|c| c.file_hash == file_hash))
    }

    async fn is_file_current(&self, file_path: &str, file_hash: &str) -> Result<bool> {
        let stored = self.chunks.read().map_err(poisoned)?;
        Ok(stored
            .iter()
            .any(|c| c.file_path == file_path && c.file_hash == file_hash))
    }

    async fn search_similar(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let candidates = stored
            .iter()
            .map(|c| ScoredChunk {
                file_path: c.file_path.clone(),
                start_line: c.start_line,
                end_line: c.end_line,
                content: c.content.clone(),
                score: cosine_similarity(query, &c.embedding),
            })
            .collect();
        Ok(rank_top(candidates, limit))
    }

    async fn total_chunks(&self) -> Result<u64> {
        Ok(self.chunks.read().map_err(poisoned)?.len() as u64)
    }

    async fn indexed_files(&self) -> Result<Vec<String>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let paths: BTreeSet<String> = stored.iter().map(|c| c.file_path.clone()).collect();
        Ok(paths.into_iter().collect())
    }

    async fn progress(&self) -> Result<IndexProgress> {
        Ok(self.progress.read().map_err(poisoned)?.clone())
    }

    async fn update_progress(&self, update: ProgressUpdate) -> Result<IndexProgress> {
        let mut progress = self.progress.write().map_err(poisoned)?;
        progress.apply(&update);
        Ok(progress.clone())
    }

    async fn set_watcher_enabled(&self, enabled: bool) -> Result<()> {
        self.progress.write().map_err(poisoned)?.watcher_enabled = enabled;
        Ok(())
    }

    async fn is_watcher_enabled(&self) -> Result<bool> {
        Ok(self.progress.read().map_err(poisoned)?.watcher_enabled)
    }

    async fn clear(&self) -> Result<()> {
        self.chunks.write().map_err(poisoned)?.clear();
        let mut progress = self.progress.write().map_err(poisoned)?;
        *progress = reset_progress(progress.watcher_enabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexStatus;

    fn chunk(path: &str, start: usize, hash: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: format!("{}-{}", path, start),
            file_path: path.to_string(),
            content: format!("{} @ {}", path, start),
            start_line: start,
            end_line: start + 99,
            embedding,
            file_hash: hash.to_string(),
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn delete_by_file_leaves_other_files() {
        let store = InMemoryStore::new();
        store
            .insert_chunks(&[
                chunk("a.rs", 1, "ha", vec![1.0, 0.0]),
                chunk("a.rs", 91, "ha", vec![1.0, 0.0]),
                chunk("b.rs", 1, "hb", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_chunks_by_file("a.rs").await.unwrap(), 2);
        assert_eq!(store.total_chunks().await.unwrap(), 1);
        assert!(!store.has_file_hash("ha").await.unwrap());
        assert!(store.has_file_hash("hb").await.unwrap());
    }

    #[tokio::test]
    async fn same_range_replaces_previous_chunk() {
        let store = InMemoryStore::new();
        store
            .insert_chunks(&[chunk("a.rs", 91, "old", vec![1.0]), chunk("a.rs", 1, "old", vec![1.0])])
            .await
            .unwrap();
        store.insert_chunks(&[chunk("a.rs", 1, "new", vec![2.0])]).await.unwrap();

        let chunks = store.chunks_for("a.rs");
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_line).collect();
        assert_eq!(starts, vec![1, 91]);
        assert_eq!(chunks[0].file_hash, "new");
        assert!(store.chunks_for("b.rs").is_empty());
    }

    #[tokio::test]
    async fn current_file_check_is_scoped_to_path() {
        let store = InMemoryStore::new();
        store.insert_chunks(&[chunk("a.rs", 1, "ha", vec![1.0])]).await.unwrap();

        assert!(store.is_file_current("a.rs", "ha").await.unwrap());
        assert!(!store.is_file_current("b.rs", "ha").await.unwrap());
        assert!(!store.is_file_current("a.rs", "hb").await.unwrap());
    }

    #[tokio::test]
    async fn search_ranks_by_cosine() {
        let store = InMemoryStore::new();
        store
            .insert_chunks(&[
                chunk("a.rs", 1, "ha", vec![1.0, 0.0]),
                chunk("b.rs", 1, "hb", vec![0.7, 0.7]),
                chunk("c.rs", 1, "hc", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store.search_similar(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].file_path, "a.rs");
        assert_eq!(hits[1].file_path, "b.rs");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn clear_keeps_watcher_flag() {
        let store = InMemoryStore::new();
        store.insert_chunks(&[chunk("a.rs", 1, "ha", vec![1.0])]).await.unwrap();
        store.set_watcher_enabled(true).await.unwrap();
        store
            .update_progress(ProgressUpdate {
                status: Some(IndexStatus::Completed),
                total_files: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();

        store.clear().await.unwrap();

        let p = store.progress().await.unwrap();
        assert_eq!(p.status, IndexStatus::Idle);
        assert_eq!(p.total_files, 0);
        assert!(p.watcher_enabled);
        assert_eq!(store.total_chunks().await.unwrap(), 0);
    }
}
