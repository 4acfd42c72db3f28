//! Remote search and generation sources behind a mock HTTP server

use std::sync::Arc;

use async_trait::async_trait;
use postgen_config::{sources, ApiClientSettings, CacheSettings, EndpointSettings, RetrievalSettings};
use postgen_observability::MetricsContext;
use postgen_utils::{CacheManager, RateLimiter};
use post_generator::models::{
    GenerationRequest, Metadata, RagStage, RetrievalQuery, RetrievalResult, Tone,
};
use post_generator::services::generation::TEMPLATE_GENERATOR;
use post_generator::services::{
    ApiClient, GenerationClient, GenerationInput, Generator, RagError, RagOrchestrator,
    RemoteGenerator, RemoteSearchStrategy, RetrievalStrategy, SearchClient,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api(server: &MockServer, source: &str) -> Arc<ApiClient> {
    let mut settings = ApiClientSettings {
        max_retries: 0,
        ..Default::default()
    };
    settings
        .endpoints
        .insert(source.to_string(), EndpointSettings::new(server.uri()));

    Arc::new(
        ApiClient::new(
            settings,
            Arc::new(CacheManager::new(CacheSettings::default())),
            Arc::new(RateLimiter::with_defaults()),
            MetricsContext::new(),
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn test_remote_search_maps_hits_to_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_partial_json(json!({ "query": "tokio runtime", "top_k": 5 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "guide", "content": "Tokio drives futures.", "score": 0.8,
                  "metadata": { "title": "Tokio Guide" } },
                { "id": "blog", "content": "Runtimes schedule tasks.", "score": 1.4 }
            ]
        })))
        .mount(&server)
        .await;

    let strategy = RemoteSearchStrategy::new(SearchClient::new(api(&server, sources::KEYWORD_SEARCH), sources::KEYWORD_SEARCH));
    let mut query = RetrievalQuery::new("tokio runtime");
    query.limit = 5;

    let results = strategy.retrieve(&query).await.unwrap();

    assert_eq!(strategy.name(), "keyword-search");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].content, "Tokio drives futures.");
    assert_eq!(results[0].title(), Some("Tokio Guide"));
    assert_eq!(results[0].source_strategy, "keyword-search");
    // Scores are clamped into [0, 1]
    assert_eq!(results[1].relevance_score, 1.0);
}

#[tokio::test]
async fn test_remote_search_error_becomes_strategy_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let strategy = RemoteSearchStrategy::new(SearchClient::new(api(&server, sources::HYBRID_SEARCH), sources::HYBRID_SEARCH));
    let err = strategy.retrieve(&RetrievalQuery::new("tokio")).await.unwrap_err();
    assert!(matches!(err, RagError::Api(_)));
}

#[tokio::test]
async fn test_remote_generator_builds_draft() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_partial_json(json!({ "tone": "casual", "max_tokens": 700 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "# Tokio In Practice\n\nTokio is an async runtime. It runs tasks on a thread pool."
        })))
        .mount(&server)
        .await;

    let generator = RemoteGenerator::new(GenerationClient::new(api(&server, sources::GENERATION)));
    let request = GenerationRequest::new("tokio runtime")
        .with_tone(Tone::Casual)
        .with_length(500);

    let draft = generator.generate(&GenerationInput::new(&request, vec![])).await.unwrap();

    assert_eq!(draft.title, "Tokio In Practice");
    assert_eq!(draft.generator, "remote");
    assert!(draft.body.starts_with("Tokio is an async runtime."));
    assert!(draft.keywords.contains(&"tokio".to_string()));
}

#[tokio::test]
async fn test_remote_generator_rejects_empty_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "   " })))
        .mount(&server)
        .await;

    let generator = RemoteGenerator::new(GenerationClient::new(api(&server, sources::GENERATION)));
    let err = generator
        .generate(&GenerationInput::new(&GenerationRequest::new("tokio runtime"), vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Generation(_)));
}

#[tokio::test]
async fn test_remote_generator_rejects_title_without_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "# Only A Title" })))
        .mount(&server)
        .await;

    let generator = RemoteGenerator::new(GenerationClient::new(api(&server, sources::GENERATION)));
    let err = generator
        .generate(&GenerationInput::new(&GenerationRequest::new("tokio runtime"), vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Generation(_)));
}

#[tokio::test]
async fn test_title_only_remote_draft_falls_back_to_template() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "# Only A Title" })))
        .mount(&server)
        .await;

    let rag = RagOrchestrator::new(RetrievalSettings::default(), MetricsContext::new())
        .with_strategy(Arc::new(GuideStrategy))
        .with_primary(Arc::new(RemoteGenerator::new(GenerationClient::new(api(
            &server,
            sources::GENERATION,
        )))));

    let output = rag.run(&GenerationRequest::new("tokio runtime")).await.unwrap();

    assert_eq!(output.draft.generator, TEMPLATE_GENERATOR);
    assert!(output.used_fallback);
    assert!(output.stages.contains(&RagStage::Fallback));
    assert!(!output.draft.body.trim().is_empty());
}

#[tokio::test]
async fn test_repeated_generation_reaches_the_service_each_time() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "# Tokio\n\nTokio is an async runtime."
        })))
        .expect(2)
        .mount(&server)
        .await;

    let generator = RemoteGenerator::new(GenerationClient::new(api(&server, sources::GENERATION)));
    let request = GenerationRequest::new("tokio runtime");
    let input = GenerationInput::new(&request, vec![]);

    generator.generate(&input).await.unwrap();
    generator.generate(&input).await.unwrap();

    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(2));
}

struct GuideStrategy;

#[async_trait]
impl RetrievalStrategy for GuideStrategy {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn retrieve(&self, _query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError> {
        let mut meta = Metadata::new();
        meta.insert(
            "content".into(),
            json!("Tokio is an async runtime for Rust. It schedules tasks on a thread pool."),
        );
        Ok(vec![RetrievalResult::from_metadata("tokio-guide", "keyword", 0.9, &meta)])
    }
}
