//! gitignore-style path filtering on top of [`ignore::gitignore`].
//!
//! The root level holds a fixed default set followed by the project's
//! ignore files (`.gitignore`, `.codeindexignore` by default). Any directory
//! below the root may carry its own copies of those files; their rules
//! apply to paths under that directory and take precedence over the levels
//! above it, as in git. Nested files are picked up as directories are
//! visited ([`IgnoreFilter::load_dir`]), either by the scanner's walk or
//! lazily by [`IgnoreFilter::check_path`].
//!
//! Paths are project-relative and `/`-separated. An ignored directory hides
//! everything below it; nothing underneath can re-include a file.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Always-on rules: VCS metadata, build output, dependency caches,
/// lockfiles, minified bundles, and the index directory itself.
pub const DEFAULT_PATTERNS: &[&str] = &[
    ".git/",
    ".hg/",
    ".svn/",
    "target/",
    "dist/",
    "build/",
    "out/",
    ".next/",
    "node_modules/",
    ".cache/",
    "__pycache__/",
    ".venv/",
    "venv/",
    "coverage/",
    "*.lock",
    "package-lock.json",
    "pnpm-lock.yaml",
    "*.min.js",
    ".DS_Store",
    ".codeindex/",
];

/// Rules read from one directory, matched against paths below it.
#[derive(Debug, Clone)]
struct Level {
    /// Project-relative directory; empty for the root.
    dir: String,
    matcher: Gitignore,
}

/// Compiled ignore rules for one project root.
#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    root: PathBuf,
    ignore_files: Vec<String>,
    /// Shallowest first.
    levels: Vec<Level>,
    loaded: HashSet<String>,
}

impl IgnoreFilter {
    /// Default rules plus every ignore file in `ignore_files` that exists
    /// directly under `root`. Malformed patterns are logged and skipped.
    pub fn load(root: &Path, ignore_files: &[String]) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in DEFAULT_PATTERNS {
            add_line(&mut builder, pattern);
        }
        for name in ignore_files {
            let path = root.join(name);
            if path.is_file() {
                add_file(&mut builder, &path);
            }
        }

        let mut filter = Self::empty(root, ignore_files);
        filter.push_level(String::new(), builder);
        filter
    }

    /// Rules from explicit pattern lines, without the defaults or any files.
    pub fn from_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        let mut builder = GitignoreBuilder::new("");
        for line in patterns {
            add_line(&mut builder, line);
        }
        let mut filter = Self::empty(Path::new(""), &[]);
        filter.push_level(String::new(), builder);
        filter
    }

    fn empty(root: &Path, ignore_files: &[String]) -> Self {
        Self {
            root: root.to_path_buf(),
            ignore_files: ignore_files.to_vec(),
            levels: Vec::new(),
            loaded: HashSet::from([String::new()]),
        }
    }

    fn push_level(&mut self, dir: String, builder: GitignoreBuilder) {
        match builder.build() {
            Ok(matcher) if matcher.is_empty() => {}
            Ok(matcher) => {
                self.levels.push(Level { dir, matcher });
                self.levels.sort_by_key(|level| depth(&level.dir));
            }
            Err(e) => warn!(dir = %dir, error = %e, "ignoring unusable ignore rules"),
        }
    }

    /// Read the ignore files of a project-relative directory, once.
    pub fn load_dir(&mut self, relative_dir: &str) {
        if !self.loaded.insert(relative_dir.to_string()) {
            return;
        }

        let dir = self.root.join(relative_dir);
        let mut builder = GitignoreBuilder::new(&dir);
        let mut found = false;
        for name in &self.ignore_files {
            let path = dir.join(name);
            if path.is_file() {
                add_file(&mut builder, &path);
                found = true;
            }
        }
        if found {
            self.push_level(relative_dir.to_string(), builder);
        }
    }

    /// Whether `relative_path` itself is excluded, judged on its own
    /// (ancestors are not consulted). Used while walking, where ignored
    /// directories are already pruned.
    pub fn ignores_entry(&self, relative_path: &str, is_dir: bool) -> bool {
        let mut ignored = false;
        for level in &self.levels {
            let Some(sub) = below(&level.dir, relative_path) else {
                continue;
            };
            match level.matcher.matched(sub, is_dir) {
                Match::Ignore(_) => ignored = true,
                Match::Whitelist(_) => ignored = false,
                Match::None => {}
            }
        }
        ignored
    }

    /// Whether a file at `relative_path` is excluded, either directly or
    /// because one of its ancestor directories is. Only rules already
    /// loaded are consulted.
    pub fn ignores(&self, relative_path: &str) -> bool {
        ancestors(relative_path).any(|dir| self.ignores_entry(dir, true))
            || self.ignores_entry(relative_path, false)
    }

    /// [`ignores`](Self::ignores), loading the ignore files of each
    /// ancestor directory on the way down. Directories that are themselves
    /// ignored are never read.
    pub fn check_path(&mut self, relative_path: &str) -> bool {
        for dir in ancestors(relative_path) {
            if self.ignores_entry(dir, true) {
                return true;
            }
            self.load_dir(dir);
        }
        self.ignores_entry(relative_path, false)
    }
}

fn add_line(builder: &mut GitignoreBuilder, line: &str) {
    if let Err(e) = builder.add_line(None, line) {
        warn!(pattern = line, error = %e, "skipping malformed ignore pattern");
    }
}

fn add_file(builder: &mut GitignoreBuilder, path: &Path) {
    debug!(file = %path.display(), "loading ignore rules");
    // Valid lines are kept even when others fail to parse.
    if let Some(e) = builder.add(path) {
        warn!(file = %path.display(), error = %e, "skipping malformed ignore pattern");
    }
}

/// `path` relative to the level directory `dir`, if it lies below it.
fn below<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    if dir.is_empty() {
        return Some(path);
    }
    path.strip_prefix(dir)?.strip_prefix('/')
}

/// Proper ancestor directories of `path`, outermost first.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(move |(i, _)| &path[..i])
        .filter(|dir| !dir.is_empty())
}

fn depth(dir: &str) -> usize {
    if dir.is_empty() {
        0
    } else {
        dir.matches('/').count() + 1
    }
}
