//! Embedder collaborator trait and vector utilities.
//!
//! The [`Embedder`] trait is the narrow boundary between the indexing
//! pipeline and whatever service turns text into vectors. The application
//! crate provides an OpenAI-compatible HTTP implementation; tests inject
//! deterministic fakes.
//!
//! Vectors are persisted as fixed-width binary blobs (little-endian `f32`,
//! 4 bytes per dimension) rather than text. See [`encode_vector`] and
//! [`decode_vector`].

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Turns a batch of texts into a batch of vectors, one per input, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Expected vector dimensionality, or `None` when the model decides.
    fn dims(&self) -> Option<usize>;

    /// Embed `texts`. Implementations make a single attempt; retry policy
    /// belongs to the caller.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text (e.g. a search query).
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
}

/// Check a batch response against the request it answers.
///
/// The count must match the number of inputs and, when `dims` is known,
/// every vector must have exactly that many components.
pub fn validate_batch(vectors: &[Vec<f32>], expected: usize, dims: Option<usize>) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "embedding response has {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    if let Some(dims) = dims {
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            bail!(
                "embedding dimensionality mismatch: expected {}, got {}",
                dims,
                bad.len()
            );
        }
    }
    Ok(())
}

/// Encode a vector as a little-endian `f32` blob (`4 × len` bytes).
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a blob written by [`encode_vector`].
///
/// Fails if the blob length is not a multiple of 4.
pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        bail!("vector blob length {} is not a multiple of 4", blob.len());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Cosine similarity of two vectors, in `[-1.0, 1.0]`.
///
/// Mismatched lengths, empty vectors, and zero-magnitude vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
