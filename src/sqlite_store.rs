//! SQLite-backed [`VectorStore`] implementation.
//!
//! One database file per project root. Vectors are stored as
//! little-endian `f32` blobs next to their chunk rows and scored by a
//! brute-force cosine scan. Progress lives in the singleton
//! `index_progress` row created by [`migrate::run_migrations`].

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Executor, Row, SqlitePool};
use std::path::Path;
use tracing::warn;

use codeindex_core::embedding::{cosine_similarity, decode_vector, encode_vector};
use codeindex_core::models::{Chunk, IndexProgress, ProgressUpdate, ScoredChunk};
use codeindex_core::store::{rank_top, reset_progress, VectorStore};

use crate::{db, migrate};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `db_path` and make sure the schema exists.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

const PROGRESS_COLUMNS: &str = "total_files, processed_files, total_chunks, status, last_error, \
     last_processed_file, started_at, completed_at, watcher_enabled";

async fn fetch_progress<'e, E>(executor: E) -> Result<IndexProgress>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {} FROM index_progress WHERE id = 1",
        PROGRESS_COLUMNS
    ))
    .fetch_one(executor)
    .await?;
    progress_from_row(&row)
}

fn progress_from_row(row: &SqliteRow) -> Result<IndexProgress> {
    let status: String = row.get("status");
    let total_files: i64 = row.get("total_files");
    let processed_files: i64 = row.get("processed_files");
    let total_chunks: i64 = row.get("total_chunks");
    let watcher_enabled: i64 = row.get("watcher_enabled");

    Ok(IndexProgress {
        total_files: total_files.max(0) as u64,
        processed_files: processed_files.max(0) as u64,
        total_chunks: total_chunks.max(0) as u64,
        status: status.parse()?,
        last_error: row.get("last_error"),
        last_processed_file: row.get("last_processed_file"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        watcher_enabled: watcher_enabled != 0,
    })
}

async fn write_progress<'e, E>(executor: E, p: &IndexProgress) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE index_progress SET
            total_files = ?, processed_files = ?, total_chunks = ?, status = ?,
            last_error = ?, last_processed_file = ?, started_at = ?,
            completed_at = ?, watcher_enabled = ?
        WHERE id = 1
        "#,
    )
    .bind(p.total_files as i64)
    .bind(p.processed_files as i64)
    .bind(p.total_chunks as i64)
    .bind(p.status.as_str())
    .bind(&p.last_error)
    .bind(&p.last_processed_file)
    .bind(p.started_at)
    .bind(p.completed_at)
    .bind(p.watcher_enabled as i64)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, file_path, content, start_line, end_line,
                                    embedding, file_hash, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(file_path, start_line, end_line) DO UPDATE SET
                    id = excluded.id,
                    content = excluded.content,
                    embedding = excluded.embedding,
                    file_hash = excluded.file_hash,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.file_path)
            .bind(&chunk.content)
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(encode_vector(&chunk.embedding))
            .bind(&chunk.file_hash)
            .bind(chunk.created_at)
            .bind(chunk.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_chunks_by_file(&self, file_path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn has_file_hash(&self, file_hash: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM chunks WHERE file_hash = ?)")
                .bind(file_hash)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn is_file_current(&self, file_path: &str, file_hash: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chunks WHERE file_path = ? AND file_hash = ?)",
        )
        .bind(file_path)
        .bind(file_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn search_similar(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT file_path, start_line, end_line, content, embedding FROM chunks",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        let mut mismatched: Option<(usize, usize)> = None;
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = decode_vector(&blob)?;
            if vector.len() != query.len() {
                let (_, count) = mismatched.get_or_insert((vector.len(), 0));
                *count += 1;
            }
            let start_line: i64 = row.get("start_line");
            let end_line: i64 = row.get("end_line");
            candidates.push(ScoredChunk {
                file_path: row.get("file_path"),
                start_line: start_line as usize,
                end_line: end_line as usize,
                content: row.get("content"),
                score: cosine_similarity(query, &vector),
            });
        }

        if let Some((stored_dims, rows)) = mismatched {
            warn!(
                query_dims = query.len(),
                stored_dims,
                rows,
                "stored vectors differ in length from the query and score 0; reindex after changing the embedding model"
            );
        }

        Ok(rank_top(candidates, limit))
    }

    async fn total_chunks(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn indexed_files(&self) -> Result<Vec<String>> {
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT file_path FROM chunks ORDER BY file_path")
                .fetch_all(&self.pool)
                .await?;
        Ok(paths)
    }

    async fn progress(&self) -> Result<IndexProgress> {
        fetch_progress(&self.pool).await
    }

    async fn update_progress(&self, update: ProgressUpdate) -> Result<IndexProgress> {
        let mut tx = self.pool.begin().await?;
        // Take the write lock before reading so concurrent updates serialize.
        sqlx::query("UPDATE index_progress SET id = id WHERE id = 1")
            .execute(&mut *tx)
            .await?;
        let mut progress = fetch_progress(&mut *tx).await?;
        progress.apply(&update);
        write_progress(&mut *tx, &progress).await?;
        tx.commit().await?;
        Ok(progress)
    }

    async fn set_watcher_enabled(&self, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE index_progress SET watcher_enabled = ? WHERE id = 1")
            .bind(enabled as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_watcher_enabled(&self) -> Result<bool> {
        let flag: i64 = sqlx::query_scalar("SELECT watcher_enabled FROM index_progress WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(flag != 0)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        let watcher_enabled = fetch_progress(&mut *tx).await?.watcher_enabled;
        write_progress(&mut *tx, &reset_progress(watcher_enabled)).await?;
        tx.commit().await?;
        Ok(())
    }
}
