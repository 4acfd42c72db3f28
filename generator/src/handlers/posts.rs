//! Post generation endpoints:
//! - POST /api/posts - generate one post
//! - POST /api/posts/batch - generate several posts through the job queue

use std::sync::Arc;

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{ErrorBody, PipelineError, PipelineResult};
use crate::models::{AppState, GenerationRequest, Post};
use crate::services::CancellationToken;

pub const MAX_BATCH_SIZE: usize = 50;

/// POST /api/posts
pub async fn create_post(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> PipelineResult<Json<Post>> {
    let Json(request) = payload.map_err(|e| PipelineError::Validation(e.body_text()))?;
    info!("📥 Post requested: '{}' ({})", request.topic, request.options.tone);

    // Dropping this future (client gone) drops the generation with it
    let post = state
        .controller
        .generate_post(&request, &CancellationToken::new())
        .await?;

    info!(
        "✅ Post ready: '{}' ({} words, confidence {:.2})",
        post.content.title, post.metadata.word_count, post.metadata.confidence
    );
    Ok(Json(post))
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<GenerationRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Post>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchItem>,
}

/// POST /api/posts/batch
///
/// Every request becomes one job; results come back in request order.
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> PipelineResult<Json<BatchResponse>> {
    let Json(batch) = payload.map_err(|e| PipelineError::Validation(e.body_text()))?;
    if batch.requests.is_empty() || batch.requests.len() > MAX_BATCH_SIZE {
        return Err(PipelineError::Validation(format!(
            "batch must contain 1-{} requests, got {}",
            MAX_BATCH_SIZE,
            batch.requests.len()
        )));
    }
    info!("📥 Batch of {} posts requested", batch.requests.len());

    let mut pending = Vec::with_capacity(batch.requests.len());
    for request in batch.requests {
        let topic = request.topic.clone();
        pending.push((topic, state.jobs.submit(request).await));
    }

    let results = join_all(pending.into_iter().map(|(topic, submitted)| async move {
        let outcome = match submitted {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(PipelineError::from(e)),
        };
        match outcome {
            Ok(post) => BatchItem {
                topic,
                post: Some(post),
                error: None,
            },
            Err(e) => BatchItem {
                topic,
                post: None,
                error: Some(e.to_body()),
            },
        }
    }))
    .await;

    let succeeded = results.iter().filter(|r| r.post.is_some()).count();
    info!("✅ Batch finished: {}/{} posts generated", succeeded, results.len());

    Ok(Json(BatchResponse {
        succeeded,
        failed: results.len() - succeeded,
        results,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::build_state;
    use postgen_config::AppConfig;

    #[tokio::test]
    async fn test_create_post_without_sources_uses_template() {
        let state = build_state(AppConfig::default()).unwrap();

        let Json(post) = create_post(State(Arc::clone(&state)), Ok(Json(GenerationRequest::new("Rust ownership"))))
            .await
            .unwrap();

        assert!(!post.content.body.is_empty());
        assert!(post.metadata.used_fallback);
        assert_eq!(post.signature.len(), 64);
    }

    #[tokio::test]
    async fn test_create_post_rejects_short_topic() {
        let state = build_state(AppConfig::default()).unwrap();
        let err = create_post(State(state), Ok(Json(GenerationRequest::new("AI"))))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_batch_reports_each_request() {
        let state = build_state(AppConfig::default()).unwrap();
        let batch = BatchRequest {
            requests: vec![GenerationRequest::new("Rust ownership"), GenerationRequest::new("AI")],
        };

        let Json(response) = create_batch(State(state), Ok(Json(batch))).await.unwrap();
        assert_eq!(response.succeeded, 1);
        assert_eq!(response.failed, 1);
        assert_eq!(response.results[1].topic, "AI");
        assert_eq!(
            response.results[1].error.as_ref().map(|e| e.error.as_str()),
            Some("ValidationError")
        );
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let state = build_state(AppConfig::default()).unwrap();
        let err = create_batch(State(state), Ok(Json(BatchRequest { requests: vec![] })))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
