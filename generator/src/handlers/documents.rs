//! POST /api/documents - add reference documents to the retrieval corpus

use std::sync::Arc;

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{PipelineError, PipelineResult};
use crate::models::{AppState, Document};

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestResponse {
    pub ingested: usize,
    pub failed: Vec<IngestFailure>,
}

pub async fn ingest_documents(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> PipelineResult<Json<IngestResponse>> {
    let Json(request) = payload.map_err(|e| PipelineError::Validation(e.body_text()))?;
    if request.documents.is_empty() {
        return Err(PipelineError::Validation("no documents given".to_string()));
    }
    info!("📥 Ingesting {} documents", request.documents.len());

    let orchestrator = &state.orchestrator;
    let outcomes = join_all(request.documents.into_iter().map(|document| async move {
        let id = document.id.clone();
        (id, orchestrator.ingest(document).await)
    }))
    .await;

    let mut ingested = 0;
    let mut failed = Vec::new();
    for (id, outcome) in outcomes {
        match outcome {
            Ok(()) => ingested += 1,
            Err(e) => {
                warn!("⚠️  Document '{}' not ingested: {}", id, e);
                failed.push(IngestFailure {
                    id,
                    error: e.to_string(),
                });
            }
        }
    }

    info!("✅ Ingested {} documents, {} failed", ingested, failed.len());
    Ok(Json(IngestResponse { ingested, failed }))
}
