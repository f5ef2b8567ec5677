//! Core data models used throughout codeindex.
//!
//! These types represent the chunks, indexing progress, and search
//! candidates that flow between the indexing pipeline, the store, and the
//! search engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A contiguous slice of one file's lines, the unit of embedding and retrieval.
///
/// `embedding`, `file_hash`, and the timestamps are left empty by the
/// chunker and filled in by the indexing pipeline before storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Row key (UUID v4).
    pub id: String,
    /// Project-relative path, `/`-separated.
    pub file_path: String,
    /// Raw text of the slice.
    pub content: String,
    /// 1-indexed first line.
    pub start_line: usize,
    /// 1-indexed last line, inclusive.
    pub end_line: usize,
    pub embedding: Vec<f32>,
    /// SHA-256 of the whole file at chunking time.
    pub file_hash: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

impl Chunk {
    /// `path:start-end`, the location string shown to users.
    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.file_path, self.start_line, self.end_line)
    }
}

/// Lifecycle state of the project index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    #[default]
    Idle,
    Indexing,
    Completed,
    Error,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Idle => "idle",
            IndexStatus::Indexing => "indexing",
            IndexStatus::Completed => "completed",
            IndexStatus::Error => "error",
        }
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "idle" => Ok(IndexStatus::Idle),
            "indexing" => Ok(IndexStatus::Indexing),
            "completed" => Ok(IndexStatus::Completed),
            "error" => Ok(IndexStatus::Error),
            other => anyhow::bail!("unknown index status: '{}'", other),
        }
    }
}

/// Singleton progress record for one project index.
///
/// Persisted by the store so that a run interrupted by a crash or a stop
/// request can be resumed by the next process.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct IndexProgress {
    pub total_files: u64,
    pub processed_files: u64,
    pub total_chunks: u64,
    pub status: IndexStatus,
    pub last_error: Option<String>,
    pub last_processed_file: Option<String>,
    /// Epoch milliseconds.
    pub started_at: Option<i64>,
    /// Epoch milliseconds.
    pub completed_at: Option<i64>,
    pub watcher_enabled: bool,
}

impl IndexProgress {
    /// Whether a run with `scanned_files` files may continue from this record.
    pub fn is_resumable(&self, scanned_files: u64) -> bool {
        self.status == IndexStatus::Indexing
            && self.total_files == scanned_files
            && self.processed_files <= self.total_files
    }

    /// Merge a partial update into this record.
    pub fn apply(&mut self, update: &ProgressUpdate) {
        if let Some(v) = update.total_files {
            self.total_files = v;
        }
        if let Some(v) = update.processed_files {
            self.processed_files = v;
        }
        if let Some(v) = update.total_chunks {
            self.total_chunks = v;
        }
        if let Some(v) = update.status {
            self.status = v;
        }
        if let Some(v) = &update.last_error {
            self.last_error = v.clone();
        }
        if let Some(v) = &update.last_processed_file {
            self.last_processed_file = Some(v.clone());
        }
        if let Some(v) = update.started_at {
            self.started_at = v;
        }
        if let Some(v) = update.completed_at {
            self.completed_at = v;
        }
        if let Some(v) = update.watcher_enabled {
            self.watcher_enabled = v;
        }
    }
}

/// Partial update of an [`IndexProgress`].
///
/// `None` leaves a field untouched. Nullable fields use `Option<Option<_>>`
/// so they can be explicitly cleared with `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub total_files: Option<u64>,
    pub processed_files: Option<u64>,
    pub total_chunks: Option<u64>,
    pub status: Option<IndexStatus>,
    pub last_error: Option<Option<String>>,
    pub last_processed_file: Option<String>,
    pub started_at: Option<Option<i64>>,
    pub completed_at: Option<Option<i64>>,
    pub watcher_enabled: Option<bool>,
}

/// A search candidate: a stored chunk (without its vector) plus its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

impl ScoredChunk {
    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.file_path, self.start_line, self.end_line)
    }
}
