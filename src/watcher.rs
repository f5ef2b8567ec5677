//! File watching with per-path debounced reindexing.
//!
//! A notify [`RecommendedWatcher`] observes the project root recursively and
//! forwards raw events through a bounded channel into an async event loop.
//! For every accepted path:
//!
//! - if the file is gone, any pending timer is cancelled and its chunks
//!   are deleted right away;
//! - otherwise a debounce timer is (re)armed in the [`DebounceRegistry`].
//!
//! When a timer fires the path is queued to a single reindex worker, so
//! files are reindexed one at a time and one path never has two reindexes
//! in flight. A file deleted while its reindex runs loses the freshly
//! written chunks once the reindex returns.

use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::IndexingEngine;
use crate::scanner::relative_path;

/// Per-path debounce timers.
///
/// Each armed path owns one sleeping tokio task. Re-arming aborts the old
/// task and starts a new one; a timer that fires removes its own entry
/// (only if it is still the current one) and sends the path to the queue.
pub struct DebounceRegistry {
    delay: Duration,
    timers: Mutex<HashMap<String, (u64, AbortHandle)>>,
    generation: AtomicU64,
    queue: mpsc::UnboundedSender<PathBuf>,
}

impl DebounceRegistry {
    /// A registry and the receiving end of its fired-path queue.
    pub fn new(delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<PathBuf>) {
        let (queue, fired) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            delay,
            timers: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            queue,
        });
        (registry, fired)
    }

    fn timers(&self) -> std::sync::MutexGuard<'_, HashMap<String, (u64, AbortHandle)>> {
        match self.timers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start (or restart) the timer for `relative`. Must be called inside a
    /// tokio runtime.
    pub fn arm(self: &Arc<Self>, relative: String, path: PathBuf) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let registry = Arc::clone(self);
        let key = relative.clone();

        // The map stays locked until the new entry is in, so a timer can
        // never fire before it is registered.
        let mut timers = self.timers();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(registry.delay).await;
            let current = {
                let mut timers = registry.timers();
                match timers.get(&key) {
                    Some((g, _)) if *g == generation => {
                        timers.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                let _ = registry.queue.send(path);
            }
        })
        .abort_handle();

        if let Some((_, previous)) = timers.insert(relative, (generation, handle)) {
            previous.abort();
        }
    }

    /// Cancel the pending timer for `relative`. Returns whether one existed.
    pub fn cancel(&self, relative: &str) -> bool {
        match self.timers().remove(relative) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer. Returns how many there were.
    pub fn drain(&self) -> usize {
        let mut timers = self.timers();
        let count = timers.len();
        for (_, (_, handle)) in timers.drain() {
            handle.abort();
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.timers().len()
    }
}

/// Event routing shared by the notify loop and [`FileWatcher::notify_path`].
struct Router {
    engine: Arc<IndexingEngine>,
    registry: Arc<DebounceRegistry>,
}

impl Router {
    async fn on_path(&self, path: &Path) {
        let scanner = self.engine.scanner();
        let Some(rel) = relative_path(scanner.root(), path) else {
            return;
        };
        if !scanner.accepts(&rel) {
            return;
        }

        if path.exists() {
            debug!(file = %rel, "change detected; debouncing");
            self.registry.arm(rel, path.to_path_buf());
        } else {
            self.registry.cancel(&rel);
            if let Err(e) = self.engine.remove_file(&rel).await {
                warn!(file = %rel, error = %format!("{:#}", e), "failed to drop deleted file");
            }
        }
    }
}

struct Running {
    _watcher: RecommendedWatcher,
    token: CancellationToken,
    router: Arc<Router>,
    tasks: Vec<JoinHandle<()>>,
}

/// Keeps the index in sync with the working tree while running.
pub struct FileWatcher {
    engine: Arc<IndexingEngine>,
    debounce: Duration,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl FileWatcher {
    pub fn new(engine: Arc<IndexingEngine>, debounce: Duration) -> Self {
        Self {
            engine,
            debounce,
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Start watching and persist `watcher_enabled = true`. No-op if running.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let root = self.engine.scanner().root().to_path_buf();
        let (event_tx, event_rx) = mpsc::channel(1024);
        let watcher = create_fs_watcher(&root, event_tx)?;

        let (registry, fired_rx) = DebounceRegistry::new(self.debounce);
        let router = Arc::new(Router {
            engine: Arc::clone(&self.engine),
            registry,
        });
        let token = CancellationToken::new();

        let tasks = vec![
            tokio::spawn(event_loop(Arc::clone(&router), event_rx, token.clone())),
            tokio::spawn(reindex_worker(Arc::clone(&self.engine), fired_rx, token.clone())),
        ];

        self.engine.store().set_watcher_enabled(true).await?;
        info!(root = %root.display(), debounce_ms = self.debounce.as_millis() as u64, "watcher started");

        *running = Some(Running {
            _watcher: watcher,
            token,
            router,
            tasks,
        });
        Ok(())
    }

    /// Stop watching, drop pending timers, and persist `watcher_enabled = false`.
    pub async fn stop(&self) -> Result<()> {
        let Some(state) = self.running.lock().await.take() else {
            return Ok(());
        };

        state.token.cancel();
        let dropped = state.router.registry.drain();
        drop(state._watcher);
        for task in state.tasks {
            let _ = task.await;
        }

        self.engine.store().set_watcher_enabled(false).await?;
        info!(pending_dropped = dropped, "watcher stopped");
        Ok(())
    }

    /// Route one path as if the file system had reported it.
    pub async fn notify_path(&self, path: &Path) {
        let router = match self.running.lock().await.as_ref() {
            Some(state) => Arc::clone(&state.router),
            None => return,
        };
        router.on_path(path).await;
    }

    /// Number of paths waiting for their debounce timer.
    pub async fn pending(&self) -> usize {
        match self.running.lock().await.as_ref() {
            Some(state) => state.router.registry.pending(),
            None => 0,
        }
    }
}

fn create_fs_watcher(
    root: &Path,
    sender: mpsc::Sender<notify::Result<Event>>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default(),
    )
    .context("watcher init failed")?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", root.display()))?;
    Ok(watcher)
}

async fn event_loop(
    router: Arc<Router>,
    mut events: mpsc::Receiver<notify::Result<Event>>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = events.recv() => match next {
                Some(Ok(event)) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        continue;
                    }
                    for path in &event.paths {
                        router.on_path(path).await;
                    }
                }
                Some(Err(e)) => warn!(error = %e, "watch error"),
                None => break,
            },
        }
    }
}

async fn reindex_worker(
    engine: Arc<IndexingEngine>,
    mut fired: mpsc::UnboundedReceiver<PathBuf>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = fired.recv() => match next {
                Some(path) => reindex(&engine, &path).await,
                None => break,
            },
        }
    }
}

/// Reindex one fired path. The event loop may delete the file's chunks
/// while this is in flight, so existence is checked again afterwards and
/// chunks written for a file that is now gone are dropped.
async fn reindex(engine: &IndexingEngine, path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = engine.index_file(path).await {
        error!(file = %path.display(), error = %format!("{:#}", e), "reindex failed");
    }
    if path.exists() {
        return;
    }

    let Some(rel) = relative_path(engine.scanner().root(), path) else {
        return;
    };
    debug!(file = %rel, "deleted during reindex");
    if let Err(e) = engine.remove_file(&rel).await {
        warn!(file = %rel, error = %format!("{:#}", e), "failed to drop deleted file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test]
    async fn rearming_fires_once() {
        let (registry, mut fired) = DebounceRegistry::new(ms(50));
        for _ in 0..5 {
            registry.arm("a.rs".into(), PathBuf::from("/p/a.rs"));
            tokio::time::sleep(ms(10)).await;
        }
        assert_eq!(registry.pending(), 1);

        let path = tokio::time::timeout(ms(1000), fired.recv()).await.unwrap();
        assert_eq!(path, Some(PathBuf::from("/p/a.rs")));
        assert_eq!(registry.pending(), 0);

        tokio::time::sleep(ms(100)).await;
        assert!(fired.try_recv().is_err(), "superseded timers must not fire");
    }

    #[tokio::test]
    async fn paths_debounce_independently() {
        let (registry, mut fired) = DebounceRegistry::new(ms(20));
        registry.arm("a.rs".into(), PathBuf::from("a.rs"));
        registry.arm("b.rs".into(), PathBuf::from("b.rs"));
        assert_eq!(registry.pending(), 2);

        let mut got = vec![
            tokio::time::timeout(ms(1000), fired.recv()).await.unwrap().unwrap(),
            tokio::time::timeout(ms(1000), fired.recv()).await.unwrap().unwrap(),
        ];
        got.sort();
        assert_eq!(got, vec![PathBuf::from("a.rs"), PathBuf::from("b.rs")]);
    }

    #[tokio::test]
    async fn cancel_and_drain_prevent_firing() {
        let (registry, mut fired) = DebounceRegistry::new(ms(30));
        registry.arm("a.rs".into(), PathBuf::from("a.rs"));
        registry.arm("b.rs".into(), PathBuf::from("b.rs"));
        registry.arm("c.rs".into(), PathBuf::from("c.rs"));

        assert!(registry.cancel("a.rs"));
        assert!(!registry.cancel("missing.rs"));
        assert_eq!(registry.drain(), 2);
        assert_eq!(registry.pending(), 0);

        tokio::time::sleep(ms(100)).await;
        assert!(fired.try_recv().is_err());
    }
}
