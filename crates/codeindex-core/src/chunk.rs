//! Line-window chunker.
//!
//! Splits a file's text into overlapping [`Chunk`]s of whole lines. The
//! policy is fixed so that chunk boundaries are stable across runs and
//! machines:
//!
//! | Parameter | Value |
//! |-----------|-------|
//! | window    | 100 lines |
//! | overlap   | 10 lines |
//! | stride    | 90 lines |
//!
//! # Algorithm
//!
//! 1. Split the text into lines.
//! 2. For `start = 0, 90, 180, …` while `start < total_lines`, take lines
//!    `start .. min(start + 100, total_lines)`.
//! 3. Drop windows whose trimmed content is empty.
//! 4. Stop after the window that reaches the final line.
//!
//! Line numbers are 1-indexed and inclusive, so a 250-line file yields
//! `[1, 100]`, `[91, 190]`, `[181, 250]`.
//!
//! # Example
//!
//! ```rust
//! use codeindex_core::chunk::split;
//!
//! let text = (1..=250).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
//! let chunks = split(&text, "src/lib.rs");
//! let ranges: Vec<_> = chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
//! assert_eq!(ranges, vec![(1, 100), (91, 190), (181, 250)]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Lines per chunk.
pub const WINDOW_LINES: usize = 100;
/// Lines shared between consecutive chunks.
pub const OVERLAP_LINES: usize = 10;
/// Distance between consecutive chunk starts.
pub const STRIDE_LINES: usize = WINDOW_LINES - OVERLAP_LINES;

/// Split file content into ordered, overlapping line-range chunks.
///
/// The returned chunks carry a fresh row id, the file path, the content,
/// and the line range. `embedding` and `file_hash` are empty and the
/// timestamps are zero; the indexing pipeline fills them in.
pub fn split(content: &str, file_path: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    let mut chunks = Vec::new();

    let mut start = 0;
    while start < total {
        let end = (start + WINDOW_LINES).min(total);
        let text = lines[start..end].join("\n");

        if !text.trim().is_empty() {
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                file_path: file_path.to_string(),
                content: text,
                start_line: start + 1,
                end_line: end,
                embedding: Vec::new(),
                file_hash: String::new(),
                created_at: 0,
                updated_at: 0,
            });
        }

        if end == total {
            break;
        }
        start += STRIDE_LINES;
    }

    chunks
}

/// SHA-256 hex digest of a file's content, used for change detection.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
