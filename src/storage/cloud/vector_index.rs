//! Managed vector index client (spec §4.F). No concrete managed-vector-DB
//! SDK is a genuine dependency anywhere in the pack, so this is modeled as
//! a generic HTTP/JSON contract over `reqwest` (the crate the teacher
//! already depends on for its embedding/cloud HTTP calls) rather than
//! vendoring a specific provider's client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub content_hash: String,
    pub distance: f32,
}

/// The three operations the cloud backend's metadata-row lifecycle needs
/// from a remote vector index: write, nearest-neighbor read, and delete.
#[async_trait]
pub trait VectorIndexClient: Send + Sync {
    async fn upsert(&self, content_hash: &str, embedding: &[f32]) -> Result<()>;
    async fn query_top_k(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorMatch>>;
    async fn delete(&self, content_hash: &str) -> Result<()>;
}

pub struct HttpVectorIndexClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    max_attempts: u32,
    base_delay: std::time::Duration,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    content_hash: &'a str,
    embedding: &'a [f32],
}

#[derive(Serialize)]
struct QueryBody<'a> {
    embedding: &'a [f32],
    top_k: usize,
}

#[derive(Deserialize)]
struct QueryResponseBody {
    matches: Vec<QueryMatchBody>,
}

#[derive(Deserialize)]
struct QueryMatchBody {
    content_hash: String,
    distance: f32,
}

impl HttpVectorIndexClient {
    /// `CLOUD_MAX_RETRIES` = 3, `CLOUD_BASE_DELAY` = 1000ms.
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self::with_retry_policy(base_url, api_token, 3, std::time::Duration::from_secs(1))
    }

    pub fn with_retry_policy(
        base_url: impl Into<String>,
        api_token: Option<String>,
        max_attempts: u32,
        base_delay: std::time::Duration,
    ) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), api_token, max_attempts, base_delay }
    }

    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        Self::with_retry_policy(
            config.cloud_vector_index.clone(),
            config.cloud_api_token.clone(),
            config.cloud_max_retries,
            std::time::Duration::from_millis(config.cloud_base_delay_ms),
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Shared retry/backoff policy with `embedding::RemoteEmbedder`: 429 and
    /// 5xx retry with exponential backoff, 401/403 are configuration errors
    /// and are never retried.
    async fn send_with_retry(&self, build: impl Fn() -> reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        let mut delay = self.base_delay;
        loop {
            attempt += 1;
            match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 => {
                    return Err(MemoryError::Misconfigured(format!(
                        "vector index rejected credentials ({})",
                        resp.status()
                    )));
                }
                Ok(resp) if resp.status().as_u16() == 429 || resp.status().is_server_error() => {
                    if attempt >= self.max_attempts {
                        return Err(MemoryError::CloudStorage(format!(
                            "vector index returned {} after {} attempts",
                            resp.status(),
                            attempt
                        )));
                    }
                }
                Ok(resp) => {
                    return Err(MemoryError::CloudStorage(format!("vector index returned {}", resp.status())));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempt >= self.max_attempts {
                        return Err(MemoryError::CloudStorage(e.to_string()));
                    }
                }
                Err(e) => return Err(MemoryError::CloudStorage(e.to_string())),
            }
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}

#[async_trait]
impl VectorIndexClient for HttpVectorIndexClient {
    async fn upsert(&self, content_hash: &str, embedding: &[f32]) -> Result<()> {
        self.send_with_retry(|| {
            self.authorize(self.client.post(format!("{}/vectors/upsert", self.base_url)))
                .json(&UpsertBody { content_hash, embedding })
        })
        .await?;
        Ok(())
    }

    async fn query_top_k(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        let resp = self
            .send_with_retry(|| {
                self.authorize(self.client.post(format!("{}/vectors/query", self.base_url)))
                    .json(&QueryBody { embedding, top_k: k })
            })
            .await?;
        let body: QueryResponseBody =
            resp.json().await.map_err(|e| MemoryError::CloudStorage(e.to_string()))?;
        Ok(body
            .matches
            .into_iter()
            .map(|m| VectorMatch { content_hash: m.content_hash, distance: m.distance })
            .collect())
    }

    async fn delete(&self, content_hash: &str) -> Result<()> {
        self.send_with_retry(|| {
            self.authorize(self.client.delete(format!("{}/vectors/{}", self.base_url, content_hash)))
        })
        .await?;
        Ok(())
    }
}
