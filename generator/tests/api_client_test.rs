//! ApiClient against a mock HTTP source

use std::sync::Arc;

use postgen_config::{
    ApiClientSettings, CacheSettings, EndpointSettings, RateLimitSettings, SourceQuota,
};
use postgen_observability::MetricsContext;
use postgen_utils::{CacheManager, RateLimiter, SystemClock};
use post_generator::services::{ApiClient, ApiError, Embedder, EmbeddingClient, RequestOptions};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    api: Arc<ApiClient>,
    limiter: Arc<RateLimiter>,
    metrics: MetricsContext,
}

fn harness(server: &MockServer, quota: SourceQuota) -> Harness {
    let mut settings = ApiClientSettings {
        max_retries: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        jitter_ms: 0,
        ..Default::default()
    };
    settings.endpoints.insert(
        "embedding".to_string(),
        EndpointSettings::new(server.uri()).with_api_key("secret"),
    );

    let limiter = Arc::new(RateLimiter::new(
        RateLimitSettings::default().with_quota("embedding", quota),
        SystemClock::shared(),
    ));
    let metrics = MetricsContext::new();
    let api = ApiClient::new(
        settings,
        Arc::new(CacheManager::new(CacheSettings::default())),
        Arc::clone(&limiter),
        metrics.clone(),
    )
    .unwrap();

    Harness {
        api: Arc::new(api),
        limiter,
        metrics,
    }
}

fn embed_request(text: &str) -> RequestOptions {
    RequestOptions::post(json!({ "text": text }))
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [0.1, 0.2, 0.3] })))
        .mount(&server)
        .await;

    let h = harness(&server, SourceQuota::per_minute(10));
    let embedder = EmbeddingClient::new(Arc::clone(&h.api));
    let vector = embedder.embed("ownership").await.unwrap();

    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.api_requests, 3);
    assert_eq!(snapshot.api_retries, 2);
}

#[tokio::test]
async fn test_cached_response_does_not_consume_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .and(body_json(json!({ "text": "borrowing" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [1.0] })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, SourceQuota::per_minute(10));
    let first = h.api.fetch("embedding", "/embed", &embed_request("borrowing")).await.unwrap();
    let second = h.api.fetch("embedding", "/embed", &embed_request("borrowing")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.limiter.stats("embedding").unwrap().request_count, 1);
    assert_eq!(h.metrics.snapshot().api_cache_hits, 1);
}

#[tokio::test]
async fn test_bypass_cache_refetches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [1.0] })))
        .expect(2)
        .mount(&server)
        .await;

    let h = harness(&server, SourceQuota::per_minute(10));
    h.api.fetch("embedding", "/embed", &embed_request("lifetimes")).await.unwrap();
    h.api
        .fetch("embedding", "/embed", &embed_request("lifetimes").bypass_cache())
        .await
        .unwrap();

    assert_eq!(h.limiter.stats("embedding").unwrap().request_count, 2);
}

#[tokio::test]
async fn test_http_error_surfaces_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness(&server, SourceQuota::per_minute(10));
    let err = h
        .api
        .fetch("embedding", "/embed", &embed_request("traits"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ApiError::Http {
            status_code: 500,
            body: "model crashed".to_string()
        }
    );
}

#[tokio::test]
async fn test_exhausted_quota_fails_without_calling_source() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [1.0] })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, SourceQuota::per_minute(1));
    h.api.fetch("embedding", "/embed", &embed_request("one")).await.unwrap();
    let err = h
        .api
        .fetch("embedding", "/embed", &embed_request("two"))
        .await
        .unwrap_err();

    match err {
        ApiError::RateLimited(e) => {
            assert_eq!(e.source_name, "embedding");
            assert!(e.time_to_wait_ms > 0);
        }
        other => panic!("expected rate limit error, got {:?}", other),
    }
    assert_eq!(h.metrics.snapshot().rate_limited, 1);
}
