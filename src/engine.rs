//! Indexing engine: scan, chunk, embed, store, with resume and circuit breaking.
//!
//! # Run lifecycle
//!
//! ```text
//! idle ─start()─▶ scanning ─▶ indexing ─┬─▶ completed
//!                                        ├─▶ error      (breaker or store failure)
//!                                        └─▶ indexing   (stop(); resumable)
//! ```
//!
//! A run walks the project, reads the persisted progress, and decides where
//! to begin: a run left in `indexing` whose file count still matches the new
//! scan continues from `processed_files`; a mismatched one starts over from
//! zero; any other state starts a fresh pass in which unchanged files are
//! skipped by content hash.
//!
//! Files are processed in waves of `batch.concurrency`. Inside a file the
//! chunks are embedded and stored `batch.max_lines` at a time. Each
//! sub-batch is retried with backoff; a sub-batch that still fails counts
//! toward the breaker, and `retry.breaker_threshold` consecutive failures
//! abort the run.

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use codeindex_core::chunk::{hash_content, split};
use codeindex_core::embedding::{validate_batch, Embedder};
use codeindex_core::models::{Chunk, IndexProgress, IndexStatus, ProgressUpdate};
use codeindex_core::store::VectorStore;

use crate::config::Config;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::scanner::{relative_path, FileScanner};

/// Typed abort conditions, recoverable with `anyhow::Error::downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("circuit breaker open after {failures} consecutive failures: {last_error}")]
    CircuitOpen { failures: u32, last_error: String },
    #[error("indexing is disabled by configuration")]
    Disabled,
}

/// How a call to [`IndexingEngine::start`] ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Disabled,
    AlreadyRunning,
    Stopped {
        processed_files: u64,
        total_files: u64,
    },
    Completed {
        total_files: u64,
        total_chunks: u64,
        pruned_files: u64,
    },
}

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Indexed { chunks: u64 },
    /// This path already holds chunks for its current content.
    Unchanged,
    /// Unreadable, not UTF-8, or outside the root.
    Skipped,
    /// Cancelled before finishing; partial chunks were removed.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub enabled: bool,
    pub max_lines: usize,
    pub concurrency: usize,
    pub embed_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
    pub breaker_threshold: u32,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.index.enabled && config.embedding.is_enabled(),
            max_lines: config.batch.max_lines.max(1),
            concurrency: config.batch.concurrency.max(1),
            embed_retry: RetryPolicy::embed(&config.retry),
            store_retry: RetryPolicy::store(&config.retry),
            breaker_threshold: config.retry.breaker_threshold.max(1),
        }
    }
}

/// Cancellation and breaker state shared by every file task of one run.
struct RunContext {
    /// Child of the run token; also cancelled when the breaker trips.
    abort: CancellationToken,
    failures: AtomicU32,
    threshold: u32,
}

impl RunContext {
    fn new(token: &CancellationToken, threshold: u32) -> Self {
        Self {
            abort: token.child_token(),
            failures: AtomicU32::new(0),
            threshold,
        }
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    fn record_failure(&self, err: &anyhow::Error) -> Option<IndexError> {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            self.abort.cancel();
            Some(IndexError::CircuitOpen {
                failures,
                last_error: format!("{:#}", err),
            })
        } else {
            None
        }
    }
}

/// Clears the running slot when a run ends, however it ends.
struct RunGuard<'a>(&'a Mutex<Option<CancellationToken>>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        match self.0.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct IndexingEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    scanner: FileScanner,
    settings: EngineSettings,
    reporter: Arc<dyn ProgressReporter>,
    running: Mutex<Option<CancellationToken>>,
}

impl IndexingEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        scanner: FileScanner,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            scanner,
            settings,
            reporter: Arc::new(NoProgress),
            running: Mutex::new(None),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let scanner = FileScanner::from_config(config)?;
        Ok(Self::new(
            store,
            embedder,
            scanner,
            EngineSettings::from_config(config),
        ))
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn store(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.store)
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    pub fn scanner(&self) -> &FileScanner {
        &self.scanner
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        Arc::clone(&self.reporter)
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    pub async fn progress(&self) -> Result<IndexProgress> {
        self.store.progress().await
    }

    /// Run a full indexing pass. See the module docs for the lifecycle.
    ///
    /// Returns `Err` when the run aborts; the store then holds
    /// `status = error` and the triggering message.
    pub async fn start(&self) -> Result<RunOutcome> {
        if !self.settings.enabled {
            debug!("indexing disabled by configuration");
            return Ok(RunOutcome::Disabled);
        }

        let token = {
            let mut slot = self
                .running
                .lock()
                .map_err(|_| anyhow!("engine state lock poisoned"))?;
            if slot.is_some() {
                warn!("indexing already running; ignoring start request");
                return Ok(RunOutcome::AlreadyRunning);
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };
        let _guard = RunGuard(&self.running);

        match self.run(&token).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail_run(e).await),
        }
    }

    /// Ask the current run to stop. In-flight calls finish; nothing new starts.
    /// Progress stays `indexing` so the next [`start`](Self::start) resumes.
    pub fn stop(&self) {
        if let Ok(slot) = self.running.lock() {
            if let Some(token) = slot.as_ref() {
                info!("stop requested");
                token.cancel();
            }
        }
    }

    async fn run(&self, token: &CancellationToken) -> Result<RunOutcome> {
        self.reporter.report(ProgressEvent::Scanning);

        let scanner = self.scanner.clone();
        let scan_token = token.clone();
        let files = tokio::task::spawn_blocking(move || scanner.scan(&scan_token))
            .await
            .context("scan task failed")?;

        if token.is_cancelled() {
            return self.stopped().await;
        }

        let total = files.len() as u64;
        let previous = self.store.progress().await?;
        let resume_at = match previous.status {
            IndexStatus::Indexing if previous.is_resumable(total) => previous.processed_files,
            IndexStatus::Indexing => {
                info!(
                    stored_total = previous.total_files,
                    stored_processed = previous.processed_files,
                    scanned = total,
                    "progress does not match the tree; restarting from zero"
                );
                0
            }
            _ => 0,
        };

        let started_at = if resume_at > 0 {
            previous.started_at.or(Some(now_ms()))
        } else {
            Some(now_ms())
        };
        self.store
            .update_progress(ProgressUpdate {
                total_files: Some(total),
                processed_files: Some(resume_at),
                total_chunks: Some(self.store.total_chunks().await?),
                status: Some(IndexStatus::Indexing),
                last_error: Some(None),
                started_at: Some(started_at),
                completed_at: Some(None),
                ..Default::default()
            })
            .await?;

        info!(files = total, resume_at, "indexing started");
        self.reporter.report(ProgressEvent::Scanned {
            files: total,
            resumed_at: resume_at,
        });

        let ctx = RunContext::new(token, self.settings.breaker_threshold);
        let mut processed = resume_at;

        for wave in files[resume_at as usize..].chunks(self.settings.concurrency) {
            if ctx.abort.is_cancelled() {
                break;
            }

            let results = join_all(wave.iter().map(|path| self.process_file(path, &ctx))).await;

            let mut interrupted = false;
            for result in results {
                match result? {
                    FileOutcome::Interrupted => interrupted = true,
                    FileOutcome::Indexed { .. } | FileOutcome::Unchanged | FileOutcome::Skipped => {}
                }
            }
            if interrupted {
                break;
            }

            processed += wave.len() as u64;
            let last_file = wave
                .last()
                .and_then(|p| relative_path(self.scanner.root(), p));
            let total_chunks = self.store.total_chunks().await?;
            self.store
                .update_progress(ProgressUpdate {
                    processed_files: Some(processed),
                    total_chunks: Some(total_chunks),
                    last_processed_file: last_file,
                    ..Default::default()
                })
                .await?;
            self.reporter.report(ProgressEvent::Indexing {
                processed,
                total,
                chunks: total_chunks,
            });
        }

        if token.is_cancelled() {
            return self.stopped().await;
        }

        let pruned = self.prune_stale(&files).await?;
        let total_chunks = self.store.total_chunks().await?;
        self.store
            .update_progress(ProgressUpdate {
                processed_files: Some(total),
                total_chunks: Some(total_chunks),
                status: Some(IndexStatus::Completed),
                completed_at: Some(Some(now_ms())),
                ..Default::default()
            })
            .await?;

        info!(files = total, chunks = total_chunks, pruned, "indexing completed");
        self.reporter.report(ProgressEvent::Completed {
            files: total,
            chunks: total_chunks,
            pruned,
        });

        Ok(RunOutcome::Completed {
            total_files: total,
            total_chunks,
            pruned_files: pruned,
        })
    }

    async fn stopped(&self) -> Result<RunOutcome> {
        let progress = self.store.progress().await?;
        info!(
            processed = progress.processed_files,
            total = progress.total_files,
            "indexing stopped"
        );
        self.reporter.report(ProgressEvent::Stopped {
            processed: progress.processed_files,
            total: progress.total_files,
        });
        Ok(RunOutcome::Stopped {
            processed_files: progress.processed_files,
            total_files: progress.total_files,
        })
    }

    async fn fail_run(&self, err: anyhow::Error) -> anyhow::Error {
        let message = format!("{:#}", err);
        error!(error = %message, "indexing run failed");
        let update = ProgressUpdate {
            status: Some(IndexStatus::Error),
            last_error: Some(Some(message.clone())),
            ..Default::default()
        };
        if let Err(e) = self.store.update_progress(update).await {
            warn!(error = %e, "failed to record indexing error");
        }
        self.reporter.report(ProgressEvent::Failed { message });
        err
    }

    /// Drop chunks of files that are indexed but were not in this scan.
    async fn prune_stale(&self, files: &[PathBuf]) -> Result<u64> {
        let present: HashSet<String> = files
            .iter()
            .filter_map(|p| relative_path(self.scanner.root(), p))
            .collect();

        let mut pruned = 0;
        for path in self.store.indexed_files().await? {
            if !present.contains(&path) {
                let removed = self.store.delete_chunks_by_file(&path).await?;
                debug!(file = %path, chunks = removed, "pruned stale file");
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    /// Reindex one file outside of a run, with its own breaker scope.
    ///
    /// Used by the watcher. Returns `Err` if the engine is disabled, the
    /// breaker trips or the store fails.
    pub async fn index_file(&self, path: &Path) -> Result<FileOutcome> {
        if !self.settings.enabled {
            return Err(IndexError::Disabled.into());
        }
        let token = CancellationToken::new();
        let ctx = RunContext::new(&token, self.settings.breaker_threshold);
        let outcome = self.process_file(path, &ctx).await?;

        if let FileOutcome::Indexed { chunks } = outcome {
            let file = relative_path(self.scanner.root(), path).unwrap_or_default();
            self.store
                .update_progress(ProgressUpdate {
                    total_chunks: Some(self.store.total_chunks().await?),
                    last_processed_file: Some(file.clone()),
                    ..Default::default()
                })
                .await?;
            self.reporter
                .report(ProgressEvent::FileIndexed { file, chunks });
        }
        Ok(outcome)
    }

    /// Delete every chunk of a project-relative path. Returns the count removed.
    pub async fn remove_file(&self, relative: &str) -> Result<u64> {
        let removed = self.store.delete_chunks_by_file(relative).await?;
        if removed > 0 {
            self.store
                .update_progress(ProgressUpdate {
                    total_chunks: Some(self.store.total_chunks().await?),
                    ..Default::default()
                })
                .await?;
        }
        info!(file = %relative, chunks = removed, "removed file from index");
        self.reporter.report(ProgressEvent::FileRemoved {
            file: relative.to_string(),
            chunks: removed,
        });
        Ok(removed)
    }

    async fn process_file(&self, path: &Path, ctx: &RunContext) -> Result<FileOutcome> {
        if ctx.abort.is_cancelled() {
            return Ok(FileOutcome::Interrupted);
        }

        let Some(rel) = relative_path(self.scanner.root(), path) else {
            warn!(file = %path.display(), "file is outside the project root");
            return Ok(FileOutcome::Skipped);
        };

        let content = match tokio::fs::read(path).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!(file = %rel, "skipping non-UTF-8 file");
                    return Ok(FileOutcome::Skipped);
                }
            },
            Err(e) => {
                warn!(file = %rel, error = %e, "skipping unreadable file");
                return Ok(FileOutcome::Skipped);
            }
        };

        let file_hash = hash_content(&content);
        if self.store.is_file_current(&rel, &file_hash).await? {
            debug!(file = %rel, "unchanged");
            return Ok(FileOutcome::Unchanged);
        }

        self.store.delete_chunks_by_file(&rel).await?;

        let now = now_ms();
        let mut chunks = split(&content, &rel);
        for chunk in &mut chunks {
            chunk.file_hash = file_hash.clone();
            chunk.created_at = now;
            chunk.updated_at = now;
        }

        let mut stored = 0u64;
        for sub in chunks.chunks_mut(self.settings.max_lines) {
            if ctx.abort.is_cancelled() {
                self.store.delete_chunks_by_file(&rel).await?;
                debug!(file = %rel, "interrupted; partial chunks removed");
                return Ok(FileOutcome::Interrupted);
            }

            match self.embed_and_store(sub).await {
                Ok(()) => {
                    ctx.record_success();
                    stored += sub.len() as u64;
                    self.store
                        .update_progress(ProgressUpdate {
                            total_chunks: Some(self.store.total_chunks().await?),
                            last_processed_file: Some(rel.clone()),
                            ..Default::default()
                        })
                        .await?;
                }
                Err(e) => {
                    if let Some(open) = ctx.record_failure(&e) {
                        return Err(open.into());
                    }
                    warn!(
                        file = %rel,
                        lines = %format!("{}-{}", sub[0].start_line, sub[sub.len() - 1].end_line),
                        error = %format!("{:#}", e),
                        "skipping sub-batch after retries"
                    );
                }
            }
        }

        debug!(file = %rel, chunks = stored, "indexed");
        Ok(FileOutcome::Indexed { chunks: stored })
    }

    async fn embed_and_store(&self, sub: &mut [Chunk]) -> Result<()> {
        let texts: Vec<String> = sub.iter().map(|c| c.content.clone()).collect();

        let vectors = retry_with_backoff(self.settings.embed_retry, "embed", || {
            self.embedder.embed(&texts)
        })
        .await?;
        validate_batch(&vectors, texts.len(), self.embedder.dims())?;

        for (chunk, vector) in sub.iter_mut().zip(vectors) {
            chunk.embedding = vector;
        }

        let batch: &[Chunk] = sub;
        retry_with_backoff(self.settings.store_retry, "store", || {
            self.store.insert_chunks(batch)
        })
        .await
    }
}
