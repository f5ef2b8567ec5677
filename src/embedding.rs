//! Embedding service clients.
//!
//! Implementations of [`codeindex_core::embedding::Embedder`]:
//! - **[`OpenAiEmbedder`]**: any OpenAI-compatible `POST /embeddings`
//!   endpoint (`{"model", "input"}` in, `data[].embedding` out).
//! - **[`DisabledEmbedder`]**: always fails; used when
//!   `embedding.provider = "disabled"`.
//!
//! Each call makes exactly one HTTP request. Backoff and retries are the
//! indexing engine's job (see [`crate::retry`]), so failures here carry
//! enough context (status and body) to be logged once per attempt.
//!
//! ```rust,no_run
//! # use codeindex::config::EmbeddingConfig;
//! # use codeindex::embedding::create_embedder;
//! let config = EmbeddingConfig { provider: "disabled".into(), ..Default::default() };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use codeindex_core::embedding::Embedder;

use crate::config::EmbeddingConfig;

/// Embedder that refuses every request.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> Option<usize> {
        None
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: Option<usize>,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for the openai provider"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model,
            dims: config.dims,
            api_key: config.resolve_api_key(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Embedding request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Embedding API error {}: {}", status, body_text);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Invalid embedding response")?;
        Ok(order_by_index(parsed.data))
    }
}

/// Restore input order when the service reports per-item indices.
fn order_by_index(mut items: Vec<EmbeddingItem>) -> Vec<Vec<f32>> {
    if items.iter().all(|i| i.index.is_some()) {
        items.sort_by_key(|i| i.index);
    }
    items.into_iter().map(|i| i.embedding).collect()
}

/// Create the configured [`Embedder`].
///
/// | `provider` | Embedder |
/// |------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
