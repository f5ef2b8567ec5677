//! Similarity search with adaptive candidate widening.
//!
//! The search engine works entirely through the [`VectorStore`],
//! [`Embedder`], and optional [`RelevanceReviewer`] traits. It has no
//! database, HTTP, or configuration dependencies.
//!
//! # Algorithm
//!
//! 1. Embed the query once; the vector is reused by every attempt.
//! 2. Fetch the top `current` candidates by cosine similarity, where
//!    `current` starts at `top_n`.
//! 3. Without a reviewer, return them. With one, let it filter them.
//! 4. Stop when the review failed or kept at least `ceil(current / 2)`.
//! 5. Otherwise double `current` (capped at the number of stored chunks)
//!    and try again, up to [`MAX_ATTEMPTS`] attempts.
//!
//! The last attempt's kept candidates are returned whole, ranked by
//! descending score. With a reviewer that can be more than `top_n` (16 kept
//! out of a 40-candidate pool, say).

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::embedding::{embed_one, Embedder};
use crate::models::ScoredChunk;
use crate::review::{RelevanceReviewer, ReviewOutcome};
use crate::store::{rank_top, VectorStore};

/// Upper bound on retrieve-and-review rounds per query.
pub const MAX_ATTEMPTS: usize = 3;

/// Emitted once per attempt, before candidates are fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchProgress {
    pub attempt: usize,
    pub max_attempts: usize,
    /// Number of candidates this attempt retrieves.
    pub candidates: usize,
    pub message: String,
}

/// Final result of [`SearchEngine::search`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    /// Everything the last attempt kept, best first.
    pub results: Vec<ScoredChunk>,
    /// Attempts actually made (0 when the store is empty).
    pub attempts: usize,
    /// Candidates the reviewer removed on the last attempt.
    pub removed_count: usize,
    pub review_failed: bool,
    pub suggestions: Vec<String>,
}

pub struct SearchEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    reviewer: Option<Arc<dyn RelevanceReviewer>>,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            reviewer: None,
        }
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn RelevanceReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    /// Run a query. See the module docs for the retry policy.
    ///
    /// Reviewer errors are not propagated: the attempt keeps every
    /// candidate and reports `review_failed`. Embedding and store errors are.
    pub async fn search(
        &self,
        query: &str,
        top_n: usize,
        on_progress: &(dyn Fn(SearchProgress) + Send + Sync),
    ) -> Result<SearchOutcome> {
        if query.trim().is_empty() || top_n == 0 {
            return Ok(SearchOutcome::default());
        }

        let total = usize::try_from(self.store.total_chunks().await?).unwrap_or(usize::MAX);
        if total == 0 {
            return Ok(SearchOutcome::default());
        }

        let query_vec = embed_one(self.embedder.as_ref(), query).await?;

        let mut current = top_n.min(total);
        let mut attempt = 0;
        let mut last = ReviewOutcome::keep_all(Vec::new());

        while attempt < MAX_ATTEMPTS {
            attempt += 1;
            on_progress(SearchProgress {
                attempt,
                max_attempts: MAX_ATTEMPTS,
                candidates: current,
                message: format!(
                    "searching {} candidates (attempt {}/{})",
                    current, attempt, MAX_ATTEMPTS
                ),
            });

            let candidates = self.store.search_similar(&query_vec, current).await?;

            let Some(reviewer) = &self.reviewer else {
                last = ReviewOutcome {
                    filtered: candidates,
                    removed_count: 0,
                    review_failed: false,
                    suggestions: Vec::new(),
                };
                break;
            };

            last = match reviewer.review(query, &candidates).await {
                Ok(outcome) => outcome,
                Err(_) => ReviewOutcome::keep_all(candidates),
            };

            if last.review_failed || last.filtered.len() >= current.div_ceil(2) {
                break;
            }

            let next = (current * 2).min(total);
            if next <= current {
                break;
            }
            current = next;
        }

        let kept = last.filtered.len();
        Ok(SearchOutcome {
            results: rank_top(last.filtered, kept),
            attempts: attempt,
            removed_count: last.removed_count,
            review_failed: last.review_failed,
            suggestions: last.suggestions,
        })
    }
}
