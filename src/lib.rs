//! # codeindex
//!
//! Semantic code search over a local project. Source files are split into
//! overlapping line chunks, embedded through an external embedding service,
//! and stored in a per-project SQLite database that supports cosine
//! similarity search.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────┐
//! │ FileScanner │──▶│  IndexingEngine  │──▶│  SQLite  │
//! │ FileWatcher │   │ chunk+embed+store│   │ chunks + │
//! └─────────────┘   └──────────────────┘   │ progress │
//!                                          └────┬─────┘
//!                      ┌────────────────────────┤
//!                      ▼                        ▼
//!                 ┌──────────┐            ┌──────────┐
//!                 │   CLI    │            │   HTTP   │
//!                 │  (cidx)  │            │  server  │
//!                 └──────────┘            └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cidx init                  # write codeindex.toml, create the database
//! cidx index --watch         # index, then keep the index in sync
//! cidx search "where are tokens refreshed"
//! cidx status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`ignore`] | Ignore-file matching |
//! | [`scanner`] | Project tree walk |
//! | [`embedding`] | HTTP embedding provider |
//! | [`engine`] | Bulk and per-file indexing |
//! | [`watcher`] | Debounced file watching |
//! | [`search`] | Query surface |
//! | [`server`] | HTTP server |
//! | [`sqlite_store`] | SQLite vector store |
//!
//! Pure types, the chunker, and the search retry loop live in
//! `codeindex-core`.

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod ignore;
pub mod migrate;
pub mod progress;
pub mod retry;
pub mod scanner;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod status;
pub mod watcher;
