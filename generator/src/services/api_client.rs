//! Single outbound path to every named external source.
//!
//! Applies, in order: response cache lookup, per-source rate limiting,
//! the HTTP call with a timeout, and bounded exponential backoff on
//! transient failures. Successful responses are cached with a short TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use postgen_config::ApiClientSettings;
pub use postgen_config::EndpointSettings as SourceEndpoint;
use postgen_observability::{log_cache, log_external_call, log_retry, MetricsContext};
use postgen_utils::{CacheManager, RateLimitError, RateLimiter};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

// Upper bound on error bodies carried in `ApiError::Http`
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status_code}: {body}")]
    Http { status_code: u16, body: String },

    #[error("No endpoint registered for source '{0}'")]
    UnknownSource(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ApiError {
    /// Network failures (including timeouts) and non-2xx statuses are retried
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Http { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Skip the cache lookup; the fresh response is still written back
    #[serde(skip)]
    pub bypass_cache: bool,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    settings: ApiClientSettings,
    endpoints: DashMap<String, SourceEndpoint>,
    cache: Arc<CacheManager>,
    limiter: Arc<RateLimiter>,
    metrics: MetricsContext,
}

impl ApiClient {
    pub fn new(
        settings: ApiClientSettings,
        cache: Arc<CacheManager>,
        limiter: Arc<RateLimiter>,
        metrics: MetricsContext,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ApiError::Unexpected(format!("failed to build HTTP client: {}", e)))?;

        let endpoints = settings
            .endpoints
            .iter()
            .map(|(name, endpoint)| (name.clone(), endpoint.clone()))
            .collect();

        Ok(Self {
            http,
            settings,
            endpoints,
            cache,
            limiter,
            metrics,
        })
    }

    pub fn register_source(&self, name: impl Into<String>, endpoint: SourceEndpoint) {
        let name = name.into();
        tracing::info!("📡 Registered source '{}' at {}", name, endpoint.base_url);
        self.endpoints.insert(name, endpoint);
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    pub fn metrics(&self) -> &MetricsContext {
        &self.metrics
    }

    /// `api:<source>:<sha256(endpoint + serialized options)>`
    pub fn cache_key(source: &str, endpoint: &str, options: &RequestOptions) -> String {
        let mut hasher = Sha256::new();
        hasher.update(endpoint.as_bytes());
        hasher.update(serde_json::to_vec(options).unwrap_or_default());
        format!("api:{}:{:x}", source, hasher.finalize())
    }

    /// Fetch `endpoint` from the named source
    pub async fn fetch(
        &self,
        source: &str,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<Value, ApiError> {
        let key = Self::cache_key(source, endpoint, options);

        // Cached responses do not consume quota
        if !options.bypass_cache {
            if let Some(cached) = self.cache.get::<Value>(&key) {
                log_cache!(hit, key.as_str());
                self.metrics.record_api_cache_hit();
                return Ok(cached);
            }
            log_cache!(miss, key.as_str());
        }

        let target = self
            .endpoints
            .get(source)
            .map(|e| e.value().clone())
            .ok_or_else(|| ApiError::UnknownSource(source.to_string()))?;
        let url = join_url(&target.base_url, endpoint);

        let max_attempts = self.settings.max_retries + 1;
        let mut attempt: u32 = 0;

        loop {
            if let Err(e) = self.limiter.check_limit(source) {
                self.metrics.record_rate_limited();
                return Err(e.into());
            }

            self.metrics.record_api_request();
            log_external_call!(source, endpoint);
            let started = Instant::now();

            match self.send_once(&target, &url, options).await {
                Ok(value) => {
                    log_external_call!(source, endpoint, started.elapsed().as_millis() as u64, "ok");
                    if let Err(e) = self.cache.set(&key, &value, Some(self.settings.response_ttl())) {
                        tracing::warn!("⚠️  Not caching response from {}: {}", source, e);
                    } else {
                        log_cache!(set, key.as_str());
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    log_retry!(source, attempt + 1, max_attempts, err);
                    self.metrics.record_api_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        "❌ {} {} failed after {} attempt(s): {}",
                        source,
                        endpoint,
                        attempt + 1,
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(
        &self,
        target: &SourceEndpoint,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Value, ApiError> {
        let mut request = match options.method {
            HttpMethod::Get => self.http.get(url),
            HttpMethod::Post => self.http.post(url),
        };
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }
        if let Some(api_key) = &target.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_BODY_CHARS)
                .collect();
            return Err(ApiError::Http {
                status_code: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// `min(base * 2^attempt, max) + uniform(0..=jitter)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .settings
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.settings.backoff_max_ms);
        let jitter = if self.settings.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.settings.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}

fn join_url(base: &str, endpoint: &str) -> String {
    if endpoint.starts_with('/') {
        format!("{}{}", base, endpoint)
    } else {
        format!("{}/{}", base, endpoint)
    }
}
