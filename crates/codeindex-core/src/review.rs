//! Relevance-review collaborator.
//!
//! A [`RelevanceReviewer`] looks at a query and its similarity candidates
//! and decides which ones are actually relevant. How it decides (usually a
//! language-model call) is outside this crate; the search engine only sees
//! the [`ReviewOutcome`].

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::models::ScoredChunk;

/// Filters search candidates down to the relevant subset.
#[async_trait]
pub trait RelevanceReviewer: Send + Sync {
    async fn review(&self, query: &str, candidates: &[ScoredChunk]) -> Result<ReviewOutcome>;
}

/// Result of one review pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    /// Candidates judged relevant, in their original order.
    pub filtered: Vec<ScoredChunk>,
    pub removed_count: usize,
    /// The reviewer could not produce a verdict; `filtered` holds every candidate.
    pub review_failed: bool,
    /// Follow-up queries the reviewer proposed, if any.
    pub suggestions: Vec<String>,
}

#[derive(Deserialize)]
struct Verdict {
    keep: Vec<usize>,
    #[serde(default)]
    suggestions: Vec<String>,
}

impl ReviewOutcome {
    /// Keep every candidate and flag the review as failed.
    pub fn keep_all(candidates: Vec<ScoredChunk>) -> Self {
        Self {
            filtered: candidates,
            removed_count: 0,
            review_failed: true,
            suggestions: Vec::new(),
        }
    }

    /// Build an outcome from a reviewer's raw JSON verdict.
    ///
    /// The verdict is `{"keep": [indices], "suggestions": [...]}`, where the
    /// indices point into `candidates`. Text around the outermost JSON
    /// object is ignored. Out-of-range and repeated indices are dropped.
    /// Anything that does not parse degrades to [`ReviewOutcome::keep_all`].
    pub fn from_json(raw: &str, candidates: Vec<ScoredChunk>) -> Self {
        let body = match (raw.find('{'), raw.rfind('}')) {
            (Some(open), Some(close)) if open < close => &raw[open..=close],
            _ => return Self::keep_all(candidates),
        };
        let verdict: Verdict = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => return Self::keep_all(candidates),
        };

        let total = candidates.len();
        let mut keep = vec![false; total];
        for idx in verdict.keep {
            if idx < total {
                keep[idx] = true;
            }
        }

        let filtered: Vec<ScoredChunk> = candidates
            .into_iter()
            .zip(keep)
            .filter_map(|(c, k)| k.then_some(c))
            .collect();

        Self {
            removed_count: total - filtered.len(),
            filtered,
            review_failed: false,
            suggestions: verdict.suggestions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(n: usize) -> Vec<ScoredChunk> {
        (0..n)
            .map(|i| ScoredChunk {
                file_path: format!("f{}.rs", i),
                start_line: 1,
                end_line: 10,
                content: String::new(),
                score: 1.0 - i as f32 * 0.1,
            })
            .collect()
    }

    #[test]
    fn keeps_listed_indices_in_order() {
        let out = ReviewOutcome::from_json(
            r#"{"keep":[2,0],"suggestions":["try auth middleware"]}"#,
            candidates(4),
        );
        assert!(!out.review_failed);
        assert_eq!(out.removed_count, 2);
        let paths: Vec<&str> = out.filtered.iter().map(|c| c.file_path.as_str()).collect();
        assert_eq!(paths, vec!["f0.rs", "f2.rs"]);
        assert_eq!(out.suggestions, vec!["try auth middleware"]);
    }

    #[test]
    fn tolerates_surrounding_text_and_bad_indices() {
        let out = ReviewOutcome::from_json(
            "Here you go:\n```json\n{\"keep\": [1, 1, 99]}\n```",
            candidates(3),
        );
        assert!(!out.review_failed);
        assert_eq!(out.filtered.len(), 1);
        assert_eq!(out.removed_count, 2);
    }

    #[test]
    fn garbage_keeps_everything() {
        for raw in ["", "not json", "{\"keep\": \"all\"}", "}{"] {
            let out = ReviewOutcome::from_json(raw, candidates(3));
            assert!(out.review_failed, "input {:?}", raw);
            assert_eq!(out.filtered.len(), 3);
            assert_eq!(out.removed_count, 0);
        }
    }
}
