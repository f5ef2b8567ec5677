//! Indexing progress reporting.
//!
//! Reports what the indexing engine and the watcher are doing so users can
//! see how much is left and when search is up to date. Progress is emitted
//! on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::sync::Arc;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Walking the project tree. Total unknown.
    Scanning,
    /// Scan finished; `resumed_at` is non-zero when continuing a prior run.
    Scanned { files: u64, resumed_at: u64 },
    /// A batch of files finished.
    Indexing { processed: u64, total: u64, chunks: u64 },
    /// The watcher reindexed one file.
    FileIndexed { file: String, chunks: u64 },
    /// The watcher dropped a deleted file.
    FileRemoved { file: String, chunks: u64 },
    /// Run stopped on request; a later run resumes from here.
    Stopped { processed: u64, total: u64 },
    Completed { files: u64, chunks: u64, pruned: u64 },
    Failed { message: String },
}

/// Receives progress events. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "index  indexing  1,234 / 5,000 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Scanning => "index  scanning...\n".to_string(),
            ProgressEvent::Scanned { files, resumed_at } if *resumed_at > 0 => format!(
                "index  found {} files, resuming at {}\n",
                format_number(*files),
                format_number(*resumed_at)
            ),
            ProgressEvent::Scanned { files, .. } => {
                format!("index  found {} files\n", format_number(*files))
            }
            ProgressEvent::Indexing {
                processed,
                total,
                chunks,
            } => format!(
                "index  indexing  {} / {} files  ({} chunks)\n",
                format_number(*processed),
                format_number(*total),
                format_number(*chunks)
            ),
            ProgressEvent::FileIndexed { file, chunks } => {
                format!("watch  reindexed {}  ({} chunks)\n", file, format_number(*chunks))
            }
            ProgressEvent::FileRemoved { file, chunks } => {
                format!("watch  removed {}  ({} chunks)\n", file, format_number(*chunks))
            }
            ProgressEvent::Stopped { processed, total } => format!(
                "index  stopped at {} / {} files\n",
                format_number(*processed),
                format_number(*total)
            ),
            ProgressEvent::Completed {
                files,
                chunks,
                pruned,
            } => format!(
                "index  done  {} files, {} chunks, {} stale files pruned\n",
                format_number(*files),
                format_number(*chunks),
                format_number(*pruned)
            ),
            ProgressEvent::Failed { message } => format!("index  failed: {}\n", message),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Scanning => serde_json::json!({
                "event": "progress", "phase": "scanning"
            }),
            ProgressEvent::Scanned { files, resumed_at } => serde_json::json!({
                "event": "progress", "phase": "scanned", "files": files, "resumed_at": resumed_at
            }),
            ProgressEvent::Indexing {
                processed,
                total,
                chunks,
            } => serde_json::json!({
                "event": "progress", "phase": "indexing",
                "n": processed, "total": total, "chunks": chunks
            }),
            ProgressEvent::FileIndexed { file, chunks } => serde_json::json!({
                "event": "file_indexed", "file": file, "chunks": chunks
            }),
            ProgressEvent::FileRemoved { file, chunks } => serde_json::json!({
                "event": "file_removed", "file": file, "chunks": chunks
            }),
            ProgressEvent::Stopped { processed, total } => serde_json::json!({
                "event": "stopped", "n": processed, "total": total
            }),
            ProgressEvent::Completed {
                files,
                chunks,
                pruned,
            } => serde_json::json!({
                "event": "completed", "files": files, "chunks": chunks, "pruned": pruned
            }),
            ProgressEvent::Failed { message } => serde_json::json!({
                "event": "failed", "message": message
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
