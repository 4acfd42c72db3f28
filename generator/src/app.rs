//! Service wiring: shared state construction and the HTTP router

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use postgen_config::{sources, AppConfig};
use postgen_observability::MetricsContext;
use postgen_utils::{CacheManager, RateLimiter, SystemClock};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::handlers::{documents, posts, system};
use crate::models::AppState;
use crate::services::{
    ApiClient, ApiError, EmbeddingClient, GenerationClient, JobQueue, KeywordIndex,
    PostGenerationController, RagOrchestrator, RemoteSearchStrategy, SearchClient, VectorIndex,
};

const SEARCH_SOURCES: [&str; 3] = [
    sources::SEMANTIC_SEARCH,
    sources::KEYWORD_SEARCH,
    sources::HYBRID_SEARCH,
];

/// Build every service from configuration. Must run inside a tokio runtime
/// since the job queue spawns its dispatcher.
pub fn build_state(config: AppConfig) -> Result<Arc<AppState>, ApiError> {
    let metrics = MetricsContext::new();
    let cache = Arc::new(CacheManager::new(config.cache.clone()));
    let api_cache = Arc::new(CacheManager::new(config.cache.clone()));
    let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone(), SystemClock::shared()));

    let api = Arc::new(ApiClient::new(
        config.api.clone(),
        Arc::clone(&api_cache),
        Arc::clone(&limiter),
        metrics.clone(),
    )?);

    let vectors = Arc::new(VectorIndex::new(
        config.vector_index.dimension,
        config.vector_index.clone(),
    ));
    let keywords = Arc::new(KeywordIndex::new());
    let embedder = Arc::new(EmbeddingClient::new(Arc::clone(&api)));

    let generation = if api.has_source(sources::GENERATION) {
        Some(GenerationClient::new(Arc::clone(&api)))
    } else {
        info!("⚠️  No '{}' source configured, posts use the template generator", sources::GENERATION);
        None
    };

    let mut orchestrator = RagOrchestrator::standard(
        config.retrieval.clone(),
        config.feature_toggles.clone(),
        metrics.clone(),
        embedder,
        vectors,
        keywords,
        generation,
    );
    for source in SEARCH_SOURCES {
        if api.has_source(source) {
            let client = SearchClient::new(Arc::clone(&api), source);
            orchestrator = orchestrator.with_strategy(Arc::new(RemoteSearchStrategy::new(client)));
        }
    }
    let orchestrator = Arc::new(orchestrator);
    info!("🎯 Retrieval strategies: {}", orchestrator.strategy_names().join(", "));

    let controller = Arc::new(PostGenerationController::new(
        Arc::clone(&orchestrator),
        Arc::clone(&cache),
        config.controller.clone(),
        metrics.clone(),
    ));
    let jobs = JobQueue::start(
        Arc::clone(&controller),
        config.controller.job_concurrency,
        config.controller.job_capacity,
    );

    Ok(Arc::new(AppState {
        controller,
        jobs,
        orchestrator,
        cache,
        api_cache,
        limiter,
        metrics,
        config,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/api/posts", post(posts::create_post))
        .route("/api/posts/batch", post(posts::create_batch))
        .route("/api/documents", post(documents::ingest_documents))
        .route("/api/metrics", get(system::metrics))
        .route("/api/cache/export", get(system::export_cache))
        .route("/api/cache/import", post(system::import_cache))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use postgen_config::EndpointSettings;

    #[tokio::test]
    async fn test_remote_search_sources_become_strategies() {
        let mut config = AppConfig::default();
        config
            .api
            .endpoints
            .insert(sources::KEYWORD_SEARCH.to_string(), EndpointSettings::new("http://localhost:9000"));

        let state = build_state(config).unwrap();
        assert_eq!(
            state.orchestrator.strategy_names(),
            vec!["semantic", "keyword", "hybrid", "keyword-search"]
        );
    }

    #[tokio::test]
    async fn test_post_and_api_caches_are_separate() {
        let state = build_state(AppConfig::default()).unwrap();
        state.api_cache.set("k", &1, None).unwrap();
        assert!(!state.cache.contains("k"));
    }
}
