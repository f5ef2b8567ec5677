//! Storage abstraction for codeindex.
//!
//! The [`VectorStore`] trait defines every storage operation the indexing
//! engine, the file watcher, and the search engine need. Two backends
//! exist: the SQLite store in the application crate (persistent, one file
//! per project) and [`memory::InMemoryStore`] (tests, embedding hosts).
//!
//! All mutation is single-writer. Implementations must make
//! [`insert_chunks`](VectorStore::insert_chunks) atomic: either every row
//! of the batch is committed or none is.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;

use crate::models::{Chunk, IndexProgress, ProgressUpdate, ScoredChunk};

/// Abstract storage backend for chunk rows, vectors, and index progress.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_chunks`](VectorStore::insert_chunks) | Atomically insert a batch of embedded chunks |
/// | [`delete_chunks_by_file`](VectorStore::delete_chunks_by_file) | Remove every chunk of a file |
/// | [`has_file_hash`](VectorStore::has_file_hash) | Any chunk with this content hash |
/// | [`is_file_current`](VectorStore::is_file_current) | Skip-unchanged-file lookup for one path |
/// | [`search_similar`](VectorStore::search_similar) | Brute-force cosine top-k |
/// | [`progress`](VectorStore::progress) / [`update_progress`](VectorStore::update_progress) | Singleton progress record |
/// | [`clear`](VectorStore::clear) | Wipe chunks and reset progress |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert a batch of chunks with their embeddings, all-or-nothing.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Delete every chunk stored for `file_path`. Returns the number removed.
    async fn delete_chunks_by_file(&self, file_path: &str) -> Result<u64>;

    /// Whether any chunk was stored from a file with this content hash.
    async fn has_file_hash(&self, file_hash: &str) -> Result<bool>;

    /// Whether `file_path` already has chunks stored from content with this
    /// hash. The same content under another path does not count, so a
    /// renamed or copied file is still indexed under its new path.
    async fn is_file_current(&self, file_path: &str, file_hash: &str) -> Result<bool>;

    /// Score every stored vector against `query` and return the top `limit`
    /// by descending cosine similarity.
    async fn search_similar(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredChunk>>;

    /// Number of stored chunks.
    async fn total_chunks(&self) -> Result<u64>;

    /// Distinct file paths that currently have chunks, sorted.
    async fn indexed_files(&self) -> Result<Vec<String>>;

    /// Current progress snapshot.
    async fn progress(&self) -> Result<IndexProgress>;

    /// Merge a partial update into the progress record and return the result.
    async fn update_progress(&self, update: ProgressUpdate) -> Result<IndexProgress>;

    async fn set_watcher_enabled(&self, enabled: bool) -> Result<()>;

    async fn is_watcher_enabled(&self) -> Result<bool>;

    /// Remove all chunks and reset progress to idle. The watcher flag is kept.
    async fn clear(&self) -> Result<()>;
}

/// Order candidates by descending score and keep the first `limit`.
///
/// Ties break on path, then start line, so results are stable between runs.
pub fn rank_top(mut candidates: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    candidates.truncate(limit);
    candidates
}

/// Progress record a cleared store goes back to.
pub fn reset_progress(watcher_enabled: bool) -> IndexProgress {
    IndexProgress {
        watcher_enabled,
        ..IndexProgress::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(path: &str, start: usize, score: f32) -> ScoredChunk {
        ScoredChunk {
            file_path: path.to_string(),
            start_line: start,
            end_line: start + 99,
            content: String::new(),
            score,
        }
    }

    #[test]
    fn rank_top_orders_and_truncates() {
        let ranked = rank_top(
            vec![
                cand("b.rs", 1, 0.5),
                cand("a.rs", 91, 0.9),
                cand("a.rs", 1, 0.5),
                cand("c.rs", 1, 0.1),
            ],
            3,
        );
        let locs: Vec<String> = ranked.iter().map(|c| c.location()).collect();
        assert_eq!(locs, vec!["a.rs:91-190", "a.rs:1-100", "b.rs:1-100"]);
    }
}
