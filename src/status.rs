//! Index status overview.
//!
//! Summarizes the persisted progress record of a project index: what state
//! the last run ended in, how far it got, and whether the watcher is on.
//! Used by `cidx status` and `GET /status`.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use codeindex_core::models::IndexProgress;
use codeindex_core::store::VectorStore;

use crate::config::Config;
use crate::progress::format_number;
use crate::sqlite_store::SqliteStore;

/// Snapshot of one project index.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub db_path: PathBuf,
    pub exists: bool,
    pub db_size_bytes: u64,
    pub indexed_files: u64,
    /// `None` when no database has been created yet.
    pub progress: Option<IndexProgress>,
}

/// Read the status without creating a database that does not exist.
pub async fn collect_status(config: &Config) -> Result<StatusReport> {
    let db_path = config.db_path();
    if !db_path.exists() {
        return Ok(StatusReport {
            db_path,
            exists: false,
            db_size_bytes: 0,
            indexed_files: 0,
            progress: None,
        });
    }

    let store = SqliteStore::open(&db_path).await?;
    let progress = store.progress().await;
    let indexed_files = store.indexed_files().await.map(|f| f.len() as u64);
    store.close().await;

    let db_size_bytes = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    Ok(StatusReport {
        db_path,
        exists: true,
        db_size_bytes,
        indexed_files: indexed_files?,
        progress: Some(progress?),
    })
}

/// `cidx status`: print the index summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let report = collect_status(config).await?;

    println!("codeindex status");
    println!("================");
    println!();
    println!("  Database:    {}", report.db_path.display());

    let Some(p) = report.progress else {
        println!();
        println!("  No index yet. Run `cidx index` to build one.");
        return Ok(());
    };

    println!("  Size:        {}", format_bytes(report.db_size_bytes));
    println!();
    println!("  Status:      {}", p.status);
    println!(
        "  Files:       {} / {} processed ({} indexed)",
        format_number(p.processed_files),
        format_number(p.total_files),
        format_number(report.indexed_files)
    );
    println!("  Chunks:      {}", format_number(p.total_chunks));
    println!(
        "  Watcher:     {}",
        if p.watcher_enabled { "on" } else { "off" }
    );
    println!("  Started:     {}", format_ms_opt(p.started_at));
    println!("  Completed:   {}", format_ms_opt(p.completed_at));
    if let Some(file) = &p.last_processed_file {
        println!("  Last file:   {}", file);
    }
    if let Some(err) = &p.last_error {
        println!();
        println!("  Last error:  {}", err);
    }
    println!();

    Ok(())
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ms_opt(ts_ms: Option<i64>) -> String {
    match ts_ms {
        Some(ts) => format_relative(ts, chrono::Utc::now().timestamp_millis()),
        None => "never".to_string(),
    }
}

/// Epoch-millisecond timestamp relative to `now_ms` ("3 hours ago").
/// Future or month-old timestamps are shown as a date.
fn format_relative(ts_ms: i64, now_ms: i64) -> String {
    let delta = (now_ms - ts_ms) / 1000;

    if delta < 0 || delta >= 86400 * 30 {
        return chrono::DateTime::from_timestamp_millis(ts_ms)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| ts_ms.to_string());
    }

    let (n, unit) = match delta {
        d if d < 60 => return "just now".to_string(),
        d if d < 3600 => (d / 60, "min"),
        d if d < 86400 => (d / 3600, "hour"),
        d => (d / 86400, "day"),
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}
