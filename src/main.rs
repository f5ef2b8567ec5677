//! # codeindex CLI (`cidx`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cidx init` | Write `codeindex.toml` and create the database |
//! | `cidx index [--watch]` | Index the project (resumes an interrupted run) |
//! | `cidx watch` | Keep the index in sync with file changes |
//! | `cidx search "<query>"` | Semantic search |
//! | `cidx status` | Show index progress |
//! | `cidx clear` | Delete all chunks and reset progress |
//! | `cidx serve` | Start the HTTP server |

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use codeindex::config::resolve_config;
use codeindex::progress::ProgressMode;
use codeindex::search::DEFAULT_TOP_N;
use codeindex::{commands, search, server, status};

/// codeindex: semantic search over a local code base.
#[derive(Parser)]
#[command(name = "cidx", version)]
struct Cli {
    /// Project root. Defaults to the current directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Path to configuration file (TOML). Defaults to `<root>/codeindex.toml`
    /// when it exists, built-in defaults otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file and create the database. Idempotent.
    Init,

    /// Index the project.
    ///
    /// Unchanged files are skipped by content hash. An interrupted run
    /// resumes where it stopped when the file set is unchanged.
    Index {
        /// Keep watching for changes after indexing.
        #[arg(long)]
        watch: bool,
    },

    /// Watch the project and reindex changed files.
    Watch,

    /// Search the index.
    Search {
        query: String,

        /// Number of results (1-50).
        #[arg(long, default_value_t = DEFAULT_TOP_N)]
        top_n: usize,
    },

    /// Show index progress and database size.
    Status,

    /// Delete every chunk and reset progress.
    Clear,

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    if let Commands::Init = cli.command {
        let root = cli.root.unwrap_or_else(|| PathBuf::from("."));
        return commands::run_init(&root, cli.config.as_deref()).await;
    }

    let cfg = resolve_config(cli.config.as_deref(), cli.root.as_deref())?;

    match cli.command {
        Commands::Init => {}
        Commands::Index { watch } => {
            commands::run_index(&cfg, watch, mode).await?;
        }
        Commands::Watch => {
            commands::run_watch(&cfg, mode).await?;
        }
        Commands::Search { query, top_n } => {
            search::run_search(&cfg, &query, top_n).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Clear => {
            commands::run_clear(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
