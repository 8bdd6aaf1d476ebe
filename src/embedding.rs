//! Embedder construction and the OpenAI-compatible HTTP embedder.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use doc_intake_core::embedding::{Embedder, HashEmbedder};

use crate::config::EmbeddingConfig;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Build the embedder named by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::from_env(config)?)),
        other => bail!("Unknown embedding provider: '{}'", other),
    }
}

/// Embeddings over the OpenAI `/v1/embeddings` API.
///
/// Rate limits (429) and 5xx responses are retried with exponential
/// backoff (1s, 2s, 4s, capped at 32s); other client errors fail at once.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Reads the API key from `OPENAI_API_KEY`.
    pub fn from_env(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
        Self::new(config, api_key, OPENAI_EMBEDDINGS_URL)
    }

    pub fn new(config: &EmbeddingConfig, api_key: String, url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key,
            url: url.to_string(),
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let mut last_err = anyhow!("embedding request was not attempted");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(attempt, error = %e, "embedding request failed");
                    last_err = e.into();
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let mut parsed: EmbeddingResponse = response
                    .json()
                    .await
                    .context("Invalid embeddings response")?;
                parsed.data.sort_by_key(|item| item.index);
                return Ok(parsed.data.into_iter().map(|item| item.embedding).collect());
            }

            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                warn!(attempt, %status, "embedding request throttled or failed, retrying");
                last_err = anyhow!("embeddings API error {}: {}", status, text);
                continue;
            }
            bail!("embeddings API error {}: {}", status, text);
        }

        Err(last_err)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}
