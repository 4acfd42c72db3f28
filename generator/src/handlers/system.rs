//! Health, metrics and cache maintenance endpoints

use std::sync::Arc;

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use postgen_observability::MetricsSnapshot;
use postgen_utils::{CacheError, CacheExport, CacheStats, RateLimitStats};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::errors::{PipelineError, PipelineResult};
use crate::models::AppState;

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "post-generator",
        "version": env!("CARGO_PKG_VERSION"),
        "strategies": state.orchestrator.strategy_names(),
        "features": {
            "remote_generation": state.config.feature_toggles.remote_generation_enabled(),
            "enhancement": state.config.feature_toggles.enhancement_enabled(),
            "coalescing": state.config.controller.coalesce,
        },
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub pipeline: MetricsSnapshot,
    pub post_cache: CacheStats,
    pub api_cache: CacheStats,
    pub rate_limits: Vec<RateLimitStats>,
    pub jobs_running: usize,
}

/// GET /api/metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let mut sources: Vec<&String> = state.config.rate_limits.quotas.keys().collect();
    sources.sort();

    Json(MetricsResponse {
        pipeline: state.metrics.snapshot(),
        post_cache: state.cache.stats(),
        api_cache: state.api_cache.stats(),
        rate_limits: sources
            .into_iter()
            .filter_map(|source| state.limiter.stats(source))
            .collect(),
        jobs_running: state.jobs.running(),
    })
}

/// GET /api/cache/export
pub async fn export_cache(State(state): State<Arc<AppState>>) -> Json<CacheExport> {
    let export = state.cache.export();
    info!("💾 Exported {} cached posts", export.entries.len());
    Json(export)
}

/// POST /api/cache/import
pub async fn import_cache(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CacheExport>, JsonRejection>,
) -> PipelineResult<Json<Value>> {
    let Json(export) = payload.map_err(|e| PipelineError::Validation(e.body_text()))?;

    let imported = state.cache.import(export).map_err(|e| match e {
        CacheError::UnsupportedVersion(_) => PipelineError::Validation(e.to_string()),
        other => other.into(),
    })?;

    info!("💾 Imported {} cached posts", imported);
    Ok(Json(json!({ "imported": imported })))
}
