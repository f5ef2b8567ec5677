//! Configuration parsing and validation.
//!
//! codeindex is configured via a TOML file (by default `codeindex.toml` in
//! the project root). Every section is optional; omitted keys take the
//! defaults below. When no file exists the CLI uses [`Config::for_root`].
//!
//! # Example
//!
//! ```toml
//! [index]
//! root = "."
//! db_path = ".codeindex/index.sqlite"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [batch]
//! max_lines = 10
//! concurrency = 3
//! ```
//!
//! Relative `db_path` and ignore-file entries resolve against `index.root`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the project root when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "codeindex.toml";

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_ignore_files")]
    pub ignore_files: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            root: default_root(),
            db_path: default_db_path(),
            ignore_files: default_ignore_files(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_enabled() -> bool {
    true
}
fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_db_path() -> PathBuf {
    PathBuf::from(".codeindex/index.sqlite")
}
fn default_ignore_files() -> Vec<String> {
    vec![".gitignore".to_string(), ".codeindexignore".to_string()]
}
fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: Option<usize>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Inline key; takes precedence over `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            model: default_model(),
            dims: default_dims(),
            api_key_env: default_api_key_env(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_model() -> Option<String> {
    Some("text-embedding-3-small".to_string())
}
fn default_dims() -> Option<usize> {
    Some(1536)
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// The inline key if set, else the value of `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// Chunks per embedding request.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Files processed concurrently per wave.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_lines() -> usize {
    10
}
fn default_concurrency() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_embed_attempts")]
    pub embed_attempts: u32,
    #[serde(default = "default_embed_initial_delay_ms")]
    pub embed_initial_delay_ms: u64,
    #[serde(default = "default_store_attempts")]
    pub store_attempts: u32,
    #[serde(default = "default_store_initial_delay_ms")]
    pub store_initial_delay_ms: u64,
    /// Consecutive sub-batch failures that abort a run.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            embed_attempts: default_embed_attempts(),
            embed_initial_delay_ms: default_embed_initial_delay_ms(),
            store_attempts: default_store_attempts(),
            store_initial_delay_ms: default_store_initial_delay_ms(),
            breaker_threshold: default_breaker_threshold(),
        }
    }
}

fn default_embed_attempts() -> u32 {
    3
}
fn default_embed_initial_delay_ms() -> u64 {
    2000
}
fn default_store_attempts() -> u32 {
    2
}
fn default_store_initial_delay_ms() -> u64 {
    500
}
fn default_breaker_threshold() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    5000
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Defaults for a project rooted at `root`.
    pub fn for_root(root: &Path) -> Self {
        let mut config = Config::default();
        config.index.root = root.to_path_buf();
        config
    }

    pub fn root(&self) -> &Path {
        &self.index.root
    }

    /// Absolute or root-relative location of the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        self.resolve(&self.index.db_path)
    }

    /// Resolve a path against the project root unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.index.root.join(path)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.max_lines == 0 {
            bail!("batch.max_lines must be > 0");
        }
        if self.batch.concurrency == 0 {
            bail!("batch.concurrency must be > 0");
        }
        if self.retry.embed_attempts == 0 || self.retry.store_attempts == 0 {
            bail!("retry attempts must be >= 1");
        }
        if self.retry.breaker_threshold == 0 {
            bail!("retry.breaker_threshold must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        if self.embedding.is_enabled() {
            if matches!(self.embedding.dims, None | Some(0)) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.as_deref().map_or(true, str::is_empty) {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        Ok(())
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    config.validate()?;
    Ok(config)
}

/// Resolve the effective configuration for the CLI.
///
/// An explicit `config_path` must exist. Otherwise `<root>/codeindex.toml`
/// is used when present, and [`Config::for_root`] when not. A `root`
/// override always wins over `index.root` from the file.
pub fn resolve_config(config_path: Option<&Path>, root: Option<&Path>) -> Result<Config> {
    let base = root.unwrap_or_else(|| Path::new("."));

    let mut config = match config_path {
        Some(path) => load_config(path)?,
        None => {
            let candidate = base.join(DEFAULT_CONFIG_FILE);
            if candidate.exists() {
                let mut config = load_config(&candidate)?;
                if config.index.root.is_relative() {
                    config.index.root = base.join(&config.index.root);
                }
                config
            } else {
                Config::for_root(base)
            }
        }
    };

    if let Some(root) = root {
        config.index.root = root.to_path_buf();
    }
    Ok(config)
}

/// Commented config written by `cidx init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# codeindex configuration

[index]
enabled = true
root = "."
db_path = ".codeindex/index.sqlite"
ignore_files = [".gitignore", ".codeindexignore"]
max_file_bytes = 1048576

[embedding]
provider = "openai"            # "disabled" | "openai"
endpoint = "https://api.openai.com/v1/embeddings"
model = "text-embedding-3-small"
dims = 1536
api_key_env = "OPENAI_API_KEY"
timeout_secs = 30

[batch]
max_lines = 10                 # chunks per embedding request
concurrency = 3                # files per wave

[retry]
embed_attempts = 3
embed_initial_delay_ms = 2000
store_attempts = 2
store_initial_delay_ms = 500
breaker_threshold = 3

[watcher]
debounce_ms = 5000

[server]
bind = "127.0.0.1:7341"
"#;
