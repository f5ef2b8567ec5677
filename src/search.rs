//! Query surface shared by `cidx search` and `POST /search`.
//!
//! Wraps [`codeindex_core::search::SearchEngine`] with request validation,
//! store discovery, and the response shape returned to callers.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use codeindex_core::embedding::Embedder;
use codeindex_core::models::ScoredChunk;
use codeindex_core::review::RelevanceReviewer;
use codeindex_core::search::{SearchEngine, SearchProgress};
use codeindex_core::store::VectorStore;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

pub const DEFAULT_TOP_N: usize = 10;
pub const MAX_TOP_N: usize = 50;

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_n", rename = "topN", alias = "top_n")]
    pub top_n: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, top_n: usize) -> Self {
        Self {
            query: query.into(),
            top_n,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            bail!("query must not be empty");
        }
        if !(1..=MAX_TOP_N).contains(&self.top_n) {
            bail!("topN must be between 1 and {}", MAX_TOP_N);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResultItem {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub similarity_score: f32,
    /// `path:start-end`
    pub location: String,
}

impl From<ScoredChunk> for SearchResultItem {
    fn from(c: ScoredChunk) -> Self {
        Self {
            location: c.location(),
            file_path: c.file_path,
            start_line: c.start_line,
            end_line: c.end_line,
            content: c.content,
            similarity_score: c.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchResponse {
    Ok {
        results: Vec<SearchResultItem>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
    },
    NotAvailable {
        message: String,
    },
}

/// Search against explicit collaborators.
pub async fn search_with(
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    reviewer: Option<Arc<dyn RelevanceReviewer>>,
    request: &SearchRequest,
    on_progress: &(dyn Fn(SearchProgress) + Send + Sync),
) -> Result<SearchResponse> {
    request.validate()?;

    if store.total_chunks().await? == 0 {
        return Ok(SearchResponse::NotAvailable {
            message: "The index is empty. Run `cidx index` first.".to_string(),
        });
    }

    let mut engine = SearchEngine::new(store, embedder);
    if let Some(reviewer) = reviewer {
        engine = engine.with_reviewer(reviewer);
    }

    let outcome = engine
        .search(&request.query, request.top_n, on_progress)
        .await?;

    Ok(SearchResponse::Ok {
        results: outcome.results.into_iter().map(Into::into).collect(),
        suggestions: outcome.suggestions,
    })
}

/// Search the configured project's on-disk index.
///
/// Returns [`SearchResponse::NotAvailable`] when no index database exists
/// yet or it holds no chunks.
pub async fn search_index(config: &Config, request: &SearchRequest) -> Result<SearchResponse> {
    request.validate()?;

    let db_path = config.db_path();
    if !db_path.exists() {
        return Ok(SearchResponse::NotAvailable {
            message: format!(
                "No index found at {}. Run `cidx index` first.",
                db_path.display()
            ),
        });
    }

    let store = Arc::new(SqliteStore::open(&db_path).await?);
    let embedder = create_embedder(&config.embedding)?;
    let response = search_with(
        store.clone(),
        embedder,
        None,
        request,
        &|_: SearchProgress| {},
    )
    .await;
    store.close().await;
    response
}

/// `cidx search`: run a query and print the results.
pub async fn run_search(config: &Config, query: &str, top_n: usize) -> Result<()> {
    let request = SearchRequest::new(query, top_n);

    match search_index(config, &request).await? {
        SearchResponse::NotAvailable { message } => println!("{}", message),
        SearchResponse::Ok { results, .. } if results.is_empty() => println!("No results."),
        SearchResponse::Ok {
            results,
            suggestions,
        } => {
            for (i, r) in results.iter().enumerate() {
                println!("{}. [{:.2}] {}", i + 1, r.similarity_score, r.location);
                let excerpt: String = r.content.lines().take(3).collect::<Vec<_>>().join(" ");
                println!("    excerpt: \"{}\"", excerpt.trim());
                println!();
            }
            if !suggestions.is_empty() {
                println!("Related queries:");
                for s in &suggestions {
                    println!("  - {}", s);
                }
            }
        }
    }
    Ok(())
}
