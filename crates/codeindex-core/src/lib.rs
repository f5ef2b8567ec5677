//! # codeindex core
//!
//! Runtime-agnostic logic for codeindex: data models, the line-window
//! chunker, the vector store abstraction, the embedder and relevance-review
//! collaborator traits, and the adaptive similarity-search algorithm.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. The application
//! crate supplies the SQLite store, the HTTP embedder, the scanner, the
//! indexing engine, and the file watcher.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod review;
pub mod search;
pub mod store;
