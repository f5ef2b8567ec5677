//! Project file discovery.
//!
//! Walks the project root depth-first with [`walkdir`], pruning ignored
//! directories before descending and picking up nested ignore files as
//! directories are entered. Keeps files whose extension (or
//! well-known name) is on the source allow-list and whose size is within
//! `index.max_file_bytes`. Entries are visited in file-name order so two
//! scans of an unchanged tree return the same list.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::ignore::IgnoreFilter;

/// Extension-less files that are still worth indexing.
const SPECIAL_FILE_NAMES: &[&str] = &[
    "Dockerfile",
    "Makefile",
    "makefile",
    "Justfile",
    "Gemfile",
    "Rakefile",
    "Procfile",
];

const SUPPORTED_EXTENSIONS: &[&str] = &[
    // languages
    "rs", "py", "pyi", "js", "mjs", "cjs", "ts", "tsx", "jsx", "java", "kt", "kts", "go", "c",
    "h", "cpp", "cc", "cxx", "hpp", "hh", "cs", "rb", "swift", "php", "scala", "dart", "zig",
    "lua", "ex", "exs", "clj", "hs", "ml", "erl", "r", "jl", "sql", "proto", "graphql", "vue",
    "svelte",
    // scripts
    "sh", "bash", "zsh", "fish", "ps1",
    // web
    "html", "css", "scss", "sass", "less",
    // docs
    "md", "mdx", "rst", "adoc", "txt",
    // config
    "yaml", "yml", "json", "toml", "ini", "cfg", "conf", "xml", "gradle", "tf", "nix",
];

/// Whether a path names a file type the index accepts.
pub fn is_source_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if SPECIAL_FILE_NAMES.contains(&name) {
            return true;
        }
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// `path` relative to `root`, `/`-separated. `None` if outside the root.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[derive(Clone)]
pub struct FileScanner {
    root: PathBuf,
    /// Root-level rules; every scan starts from these.
    base: Arc<IgnoreFilter>,
    /// Rules including the nested ignore files seen so far, shared with
    /// [`accepts`](Self::accepts).
    current: Arc<RwLock<IgnoreFilter>>,
    max_file_bytes: u64,
}

impl FileScanner {
    pub fn new(root: PathBuf, filter: IgnoreFilter, max_file_bytes: u64) -> Self {
        Self {
            root,
            current: Arc::new(RwLock::new(filter.clone())),
            base: Arc::new(filter),
            max_file_bytes,
        }
    }

    /// Build a scanner for the configured root, loading its ignore files.
    pub fn from_config(config: &Config) -> Result<Self> {
        let root = config.root();
        if !root.is_dir() {
            bail!("Project root does not exist: {}", root.display());
        }
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve project root: {}", root.display()))?;
        let filter = IgnoreFilter::load(&root, &config.index.ignore_files);
        Ok(Self::new(root, filter, config.index.max_file_bytes))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn current(&self) -> RwLockWriteGuard<'_, IgnoreFilter> {
        match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether a project-relative path would be picked up by [`scan`](Self::scan),
    /// ignoring size. Used by the watcher to filter events; ignore files in
    /// directories no scan has visited yet are loaded on the way.
    pub fn accepts(&self, relative: &str) -> bool {
        is_source_file(Path::new(relative)) && !self.current().check_path(relative)
    }

    /// Collect indexable files under the root as absolute paths.
    ///
    /// The token is checked between entries; once cancelled the walk stops
    /// and whatever was collected so far is returned. Callers must check
    /// the token before trusting the list.
    pub fn scan(&self, token: &CancellationToken) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let root = self.root.as_path();
        let mut filter = IgnoreFilter::clone(&self.base);

        let mut walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            if token.is_cancelled() {
                debug!(collected = files.len(), "scan cancelled");
                break;
            }

            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let Some(rel) = relative_path(root, entry.path()) else {
                continue;
            };

            let is_dir = entry.file_type().is_dir();
            if filter.ignores_entry(&rel, is_dir) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }
            if is_dir {
                filter.load_dir(&rel);
                continue;
            }
            if !entry.file_type().is_file() || !is_source_file(entry.path()) {
                continue;
            }

            match entry.metadata() {
                Ok(meta) if meta.len() > self.max_file_bytes => {
                    debug!(
                        file = %entry.path().display(),
                        bytes = meta.len(),
                        limit = self.max_file_bytes,
                        "skipping large file"
                    );
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(file = %entry.path().display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            }

            files.push(entry.into_path());
        }

        *self.current() = filter;
        info!(files = files.len(), root = %root.display(), "scan finished");
        files
    }
}
