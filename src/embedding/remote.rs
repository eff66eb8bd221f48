//! HTTP-backed embedding provider speaking an OpenAI-compatible
//! `/embeddings` endpoint, with exponential backoff for transient failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

use super::Embedder;

pub struct RemoteEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: u32,
    max_attempts: u32,
}

#[derive(Serialize)]
struct EmbeddingRequestBody<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponseBody {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>, dimensions: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            dimensions,
            max_attempts: 3,
        }
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        let mut delay = std::time::Duration::from_secs(1);

        loop {
            attempt += 1;
            let mut req = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .json(&EmbeddingRequestBody { model: &self.model, input: texts });
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let response = req.send().await;
            match response {
                Ok(resp) if resp.status().is_success() => {
                    let body: EmbeddingResponseBody = resp
                        .json()
                        .await
                        .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;
                    return Ok(body.data.into_iter().map(|d| d.embedding).collect());
                }
                Ok(resp) if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 => {
                    return Err(MemoryError::Misconfigured(format!(
                        "embedding endpoint rejected credentials ({})",
                        resp.status()
                    )));
                }
                Ok(resp) if resp.status().as_u16() == 429 || resp.status().is_server_error() => {
                    if attempt >= self.max_attempts {
                        return Err(MemoryError::EmbeddingUnavailable(format!(
                            "embedding endpoint returned {} after {} attempts",
                            resp.status(),
                            attempt
                        )));
                    }
                }
                Ok(resp) => {
                    return Err(MemoryError::EmbeddingFailed(format!(
                        "embedding endpoint returned {}",
                        resp.status()
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempt >= self.max_attempts {
                        return Err(MemoryError::EmbeddingUnavailable(e.to_string()));
                    }
                }
                Err(e) => return Err(MemoryError::EmbeddingFailed(e.to_string())),
            }

            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let batch = vec![text.to_string()];
        let mut result = self.request_batch(&batch).await?;
        result.pop().ok_or_else(|| MemoryError::EmbeddingFailed("empty response".to_string()))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.request_batch(texts).await
    }

    fn dimension(&self) -> u32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
