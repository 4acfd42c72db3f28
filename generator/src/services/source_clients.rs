//! Typed wrappers over [`ApiClient`] for the embedding, search and generation sources.

use std::sync::Arc;

use async_trait::async_trait;
use postgen_config::sources;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::api_client::{ApiClient, ApiError, RequestOptions};
use crate::models::{Metadata, Tone};

/// Turns text into a fixed-length vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError>;
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Client for the embedding service (`POST /embed`)
#[derive(Clone)]
pub struct EmbeddingClient {
    api: Arc<ApiClient>,
    source: String,
}

impl EmbeddingClient {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            source: sources::EMBEDDING.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let value = self
            .api
            .fetch(&self.source, "/embed", &RequestOptions::post(json!({ "text": text })))
            .await?;

        let response: EmbedResponse =
            serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))?;
        if response.embedding.is_empty() {
            return Err(ApiError::Decode("empty embedding".to_string()));
        }
        Ok(response.embedding)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

/// Client for a remote search source (`POST /search`)
#[derive(Clone)]
pub struct SearchClient {
    api: Arc<ApiClient>,
    source: String,
}

impl SearchClient {
    pub fn new(api: Arc<ApiClient>, source: impl Into<String>) -> Self {
        Self {
            api,
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, ApiError> {
        let value = self
            .api
            .fetch(
                &self.source,
                "/search",
                &RequestOptions::post(json!({ "query": query, "top_k": top_k })),
            )
            .await?;

        let response: SearchResponse =
            serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(response.results)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

/// Client for the text generation service (`POST /generate`).
///
/// Responses are never served from the API cache: generation is not idempotent
/// and a retried attempt must reach the service again.
#[derive(Clone)]
pub struct GenerationClient {
    api: Arc<ApiClient>,
    source: String,
}

impl GenerationClient {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            source: sources::GENERATION.to_string(),
        }
    }

    pub async fn generate(&self, prompt: &str, tone: Tone, max_tokens: u32) -> Result<String, ApiError> {
        let value = self
            .api
            .fetch(
                &self.source,
                "/generate",
                &RequestOptions::post(json!({
                    "prompt": prompt,
                    "tone": tone,
                    "max_tokens": max_tokens,
                }))
                .bypass_cache(),
            )
            .await?;

        let response: GenerateResponse =
            serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(response.text)
    }
}
