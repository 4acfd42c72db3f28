//! Retrieval strategies run concurrently by the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use super::keyword_index::KeywordIndex;
use super::rag::RagError;
use super::source_clients::{Embedder, SearchClient};
use super::vector_index::VectorIndex;
use crate::models::{RetrievalQuery, RetrievalResult, META_CONTENT};

pub const SEMANTIC: &str = "semantic";
pub const KEYWORD: &str = "keyword";
pub const HYBRID: &str = "hybrid";

#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError>;
}

/// Embeds the query and searches the vector index
pub struct SemanticStrategy {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
}

impl SemanticStrategy {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<VectorIndex>) -> Self {
        Self { embedder, index }
    }
}

#[async_trait]
impl RetrievalStrategy for SemanticStrategy {
    fn name(&self) -> &str {
        SEMANTIC
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError> {
        let vector = self
            .embedder
            .embed(&query.search_text())
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let matches = self.index.search(&vector, query.limit, query.threshold)?;

        Ok(matches
            .into_iter()
            .map(|m| RetrievalResult::from_metadata(&m.id, SEMANTIC, m.score as f64, &m.metadata))
            .collect())
    }
}

/// BM25 search over the keyword index
pub struct KeywordStrategy {
    index: Arc<KeywordIndex>,
}

impl KeywordStrategy {
    pub fn new(index: Arc<KeywordIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl RetrievalStrategy for KeywordStrategy {
    fn name(&self) -> &str {
        KEYWORD
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError> {
        Ok(self
            .index
            .search(&query.search_text(), query.limit)
            .into_iter()
            .map(|hit| RetrievalResult::from_metadata(&hit.id, KEYWORD, hit.score, &hit.metadata))
            .collect())
    }
}

/// Union of the semantic and keyword sub-searches, keeping the best score per id
pub struct HybridStrategy {
    semantic: Arc<dyn RetrievalStrategy>,
    keyword: Arc<dyn RetrievalStrategy>,
}

impl HybridStrategy {
    pub fn new(semantic: Arc<dyn RetrievalStrategy>, keyword: Arc<dyn RetrievalStrategy>) -> Self {
        Self { semantic, keyword }
    }
}

#[async_trait]
impl RetrievalStrategy for HybridStrategy {
    fn name(&self) -> &str {
        HYBRID
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError> {
        let (semantic, keyword) = tokio::join!(self.semantic.retrieve(query), self.keyword.retrieve(query));

        let batches = match (semantic, keyword) {
            (Err(s), Err(k)) => {
                return Err(RagError::Strategy {
                    strategy: HYBRID.to_string(),
                    message: format!("semantic: {}; keyword: {}", s, k),
                })
            }
            (Ok(s), Err(e)) | (Err(e), Ok(s)) => {
                tracing::debug!("Hybrid retrieval continuing with one sub-search: {}", e);
                vec![s]
            }
            (Ok(s), Ok(k)) => vec![s, k],
        };

        let mut union: IndexMap<String, RetrievalResult> = IndexMap::new();
        for mut result in batches.into_iter().flatten() {
            result.source_strategy = HYBRID.to_string();
            match union.get_mut(&result.id) {
                Some(existing) if existing.relevance_score >= result.relevance_score => {}
                Some(existing) => *existing = result,
                None => {
                    union.insert(result.id.clone(), result);
                }
            }
        }

        let mut results: Vec<RetrievalResult> = union.into_values().collect();
        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(query.limit);
        Ok(results)
    }
}

/// Delegates to a remote search source through the API client
pub struct RemoteSearchStrategy {
    name: String,
    client: SearchClient,
}

impl RemoteSearchStrategy {
    pub fn new(client: SearchClient) -> Self {
        Self {
            name: client.source().to_string(),
            client,
        }
    }
}

#[async_trait]
impl RetrievalStrategy for RemoteSearchStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError> {
        let hits = self.client.search(&query.search_text(), query.limit).await?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let mut metadata = hit.metadata;
                metadata.insert(META_CONTENT.to_string(), Value::String(hit.content));
                RetrievalResult::from_metadata(&hit.id, &self.name, hit.score, &metadata)
            })
            .collect())
    }
}
