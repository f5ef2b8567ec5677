//! CLI command implementations that drive the indexing engine and watcher.
//!
//! `search`, `status`, and `serve` live in their own modules; this one
//! covers the commands that open the store for writing.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use codeindex_core::store::VectorStore;

use crate::config::{Config, DEFAULT_CONFIG_FILE, DEFAULT_CONFIG_TOML};
use crate::embedding::create_embedder;
use crate::engine::{IndexingEngine, RunOutcome};
use crate::progress::{format_number, ProgressMode};
use crate::sqlite_store::SqliteStore;
use crate::watcher::FileWatcher;

/// `cidx init`: write a config file (unless one exists) and create the database.
pub async fn run_init(root: &Path, config_path: Option<&Path>) -> Result<()> {
    let target = match config_path {
        Some(p) => p.to_path_buf(),
        None => root.join(DEFAULT_CONFIG_FILE),
    };

    if target.exists() {
        println!("Config already exists: {}", target.display());
    } else {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&target, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        println!("Wrote {}", target.display());
    }

    let config = crate::config::resolve_config(Some(&target), Some(root))?;
    let store = SqliteStore::open(&config.db_path()).await?;
    store.close().await;
    println!("Database initialized at {}", config.db_path().display());
    Ok(())
}

/// `cidx clear`: delete every chunk and reset progress.
pub async fn run_clear(config: &Config) -> Result<()> {
    let db_path = config.db_path();
    if !db_path.exists() {
        println!("No index at {}; nothing to clear.", db_path.display());
        return Ok(());
    }

    let store = SqliteStore::open(&db_path).await?;
    let removed = store.total_chunks().await?;
    store.clear().await?;
    store.close().await;

    println!("Cleared {} chunks.", format_number(removed));
    Ok(())
}

/// Engine over the on-disk store for `config`.
pub async fn open_engine(
    config: &Config,
    mode: ProgressMode,
) -> Result<(Arc<IndexingEngine>, Arc<SqliteStore>)> {
    config.validate()?;
    let store = Arc::new(SqliteStore::open(&config.db_path()).await?);
    let embedder = create_embedder(&config.embedding)?;
    let engine = IndexingEngine::from_config(config, store.clone(), embedder)?
        .with_reporter(mode.reporter());
    Ok((Arc::new(engine), store))
}

/// Cancel `shutdown` and stop the engine on the first Ctrl-C.
fn spawn_interrupt_handler(engine: Arc<IndexingEngine>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            shutdown.cancel();
            engine.stop();
        }
    });
}

/// `cidx index [--watch]`.
pub async fn run_index(config: &Config, watch: bool, mode: ProgressMode) -> Result<()> {
    let (engine, store) = open_engine(config, mode).await?;
    let shutdown = CancellationToken::new();
    spawn_interrupt_handler(Arc::clone(&engine), shutdown.clone());

    let result = index_then_watch(config, &engine, watch, &shutdown).await;
    store.close().await;
    result
}

async fn index_then_watch(
    config: &Config,
    engine: &Arc<IndexingEngine>,
    watch: bool,
    shutdown: &CancellationToken,
) -> Result<()> {
    match engine.start().await? {
        RunOutcome::Disabled => {
            println!("Indexing is disabled ([index].enabled or [embedding].provider).");
            return Ok(());
        }
        RunOutcome::AlreadyRunning => println!("Indexing is already running."),
        RunOutcome::Stopped {
            processed_files,
            total_files,
        } => {
            println!(
                "Stopped after {} / {} files. Run `cidx index` again to resume.",
                format_number(processed_files),
                format_number(total_files)
            );
            return Ok(());
        }
        RunOutcome::Completed {
            total_files,
            total_chunks,
            pruned_files,
        } => {
            println!(
                "Indexed {} files ({} chunks, {} stale files pruned).",
                format_number(total_files),
                format_number(total_chunks),
                format_number(pruned_files)
            );
        }
    }

    if watch && !shutdown.is_cancelled() {
        watch_until(config, engine, shutdown).await?;
    }
    Ok(())
}

/// `cidx watch`: watch without a bulk pass first.
pub async fn run_watch(config: &Config, mode: ProgressMode) -> Result<()> {
    let (engine, store) = open_engine(config, mode).await?;
    if !engine.is_enabled() {
        println!("Indexing is disabled ([index].enabled or [embedding].provider).");
        store.close().await;
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    spawn_interrupt_handler(Arc::clone(&engine), shutdown.clone());

    let result = watch_until(config, &engine, &shutdown).await;
    store.close().await;
    result
}

async fn watch_until(
    config: &Config,
    engine: &Arc<IndexingEngine>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let watcher = FileWatcher::new(Arc::clone(engine), config.watcher.debounce());
    watcher.start().await?;
    println!(
        "Watching {} (Ctrl-C to stop)",
        engine.scanner().root().display()
    );

    shutdown.cancelled().await;

    watcher.stop().await?;
    println!("Watcher stopped.");
    Ok(())
}
