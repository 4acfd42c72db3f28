//! Top-level `generate_post`: validation, post cache, coalescing and the bounded retry loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use postgen_config::ControllerSettings;
use postgen_observability::{log_cache, log_retry, MetricsContext};
use postgen_utils::CacheManager;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use validator::Validate;

use super::cancellation::CancellationToken;
use super::formatting::{format_post, validate_output};
use super::rag::RagOrchestrator;
use crate::errors::{PipelineError, PipelineResult};
use crate::models::{GenerationRequest, Post};

type Shared = broadcast::Sender<PipelineResult<Post>>;

enum Role {
    Leader(Shared),
    Follower(broadcast::Receiver<PipelineResult<Post>>),
}

/// Removes the in-flight entry when the leading call finishes or is dropped
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, Shared>,
    key: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(self.key);
    }
}

pub struct PostGenerationController {
    orchestrator: Arc<RagOrchestrator>,
    cache: Arc<CacheManager>,
    settings: ControllerSettings,
    metrics: MetricsContext,
    in_flight: DashMap<String, Shared>,
}

impl PostGenerationController {
    pub fn new(
        orchestrator: Arc<RagOrchestrator>,
        cache: Arc<CacheManager>,
        settings: ControllerSettings,
        metrics: MetricsContext,
    ) -> Self {
        Self {
            orchestrator,
            cache,
            settings,
            metrics,
            in_flight: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &MetricsContext {
        &self.metrics
    }

    pub fn orchestrator(&self) -> &Arc<RagOrchestrator> {
        &self.orchestrator
    }

    /// `post:<sha256(topic + canonical options JSON)>`
    ///
    /// Options serialize with sorted keys and defaults applied, so equivalent
    /// requests share a key.
    pub fn cache_key(request: &GenerationRequest) -> String {
        let normalized = request.normalized();
        let options = serde_json::to_value(&normalized.options)
            .and_then(|value| serde_json::to_string(&value))
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(normalized.topic.as_bytes());
        hasher.update(options.as_bytes());
        format!("post:{:x}", hasher.finalize())
    }

    /// Drop the cached post for this request, if any
    pub fn invalidate(&self, request: &GenerationRequest) -> bool {
        self.cache.delete(&Self::cache_key(request))
    }

    /// Generate (or fetch from cache) a post for the request.
    ///
    /// Validation errors return immediately. Recoverable errors are retried up to
    /// `max_retries` attempts with linear backoff; the last error is surfaced.
    pub async fn generate_post(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<Post> {
        let request = request.normalized();
        if let Err(errors) = request.validate() {
            tracing::warn!("⚠️  Rejected generation request: {}", errors);
            return Err(errors.into());
        }

        let key = Self::cache_key(&request);
        if let Some(post) = self.cached(&key) {
            return Ok(post);
        }

        if !self.settings.coalesce {
            return self.generate_uncached(&request, &key, cancel).await;
        }

        loop {
            let role = match self.in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => Role::Follower(entry.get().subscribe()),
                Entry::Vacant(entry) => {
                    let (sender, _) = broadcast::channel(1);
                    entry.insert(sender.clone());
                    Role::Leader(sender)
                }
            };

            match role {
                Role::Leader(sender) => {
                    let _guard = InFlightGuard {
                        in_flight: &self.in_flight,
                        key: &key,
                    };
                    // A previous leader may have finished between our cache check and now
                    if let Some(post) = self.cached(&key) {
                        let _ = sender.send(Ok(post.clone()));
                        return Ok(post);
                    }

                    let result = self.generate_uncached(&request, &key, cancel).await;
                    // A cancelled leader shares nothing; its followers run on their own
                    if result != Err(PipelineError::Cancelled) {
                        let _ = sender.send(result.clone());
                    }
                    return result;
                }
                Role::Follower(mut receiver) => {
                    tracing::debug!("🔁 Joining in-flight generation for '{}'", request.topic);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        received = receiver.recv() => match received {
                            Ok(result) => return result,
                            Err(_) => {
                                if let Some(post) = self.cached(&key) {
                                    return Ok(post);
                                }
                            }
                        },
                    }
                }
            }
        }
    }

    fn cached(&self, key: &str) -> Option<Post> {
        let post = self.cache.get::<Post>(key)?;
        log_cache!(hit, key);
        self.metrics.record_cache_hit();
        Some(post)
    }

    async fn generate_uncached(
        &self,
        request: &GenerationRequest,
        key: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<Post> {
        let max_attempts = self.settings.max_retries.max(1);
        let mut last_error = PipelineError::Unexpected("no generation attempt was made".to_string());

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::Cancelled),
                outcome = self.attempt(request, attempt) => outcome,
            };
            self.metrics
                .record_attempt(outcome.is_ok(), started.elapsed().as_millis() as u64);

            match outcome {
                Ok(post) => {
                    match self.cache.set(key, &post, Some(self.settings.cache_ttl())) {
                        Ok(()) => {
                            log_cache!(set, key);
                        }
                        Err(e) => tracing::warn!("⚠️  Generated post not cached: {}", e),
                    }
                    tracing::info!(
                        "✅ Generated post '{}' on attempt {}/{}",
                        post.content.title,
                        attempt,
                        max_attempts
                    );
                    return Ok(post);
                }
                Err(PipelineError::Cancelled) => {
                    tracing::info!("🛑 Generation for '{}' cancelled", request.topic);
                    return Err(PipelineError::Cancelled);
                }
                Err(err) if !err.is_retryable() => {
                    tracing::error!("❌ Generation for '{}' failed: {}", request.topic, err);
                    return Err(err);
                }
                Err(err) => {
                    if attempt < max_attempts {
                        let Some(delay) = self.retry_delay(&err, attempt) else {
                            tracing::error!(
                                "❌ Generation for '{}' rate limited beyond the {}ms wait cap: {}",
                                request.topic,
                                self.settings.max_rate_limit_wait_ms,
                                err
                            );
                            return Err(err);
                        };
                        log_retry!("generate_post", attempt, max_attempts, err);
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    last_error = err;
                }
            }
        }

        tracing::error!(
            "❌ Generation for '{}' failed after {} attempts: {}",
            request.topic,
            max_attempts,
            last_error
        );
        Err(last_error)
    }

    /// Linear backoff, stretched to the source window for rate-limit denials.
    /// `None` when the window outlasts `max_rate_limit_wait_ms`.
    fn retry_delay(&self, err: &PipelineError, attempt: u32) -> Option<Duration> {
        let backoff_ms = self.settings.backoff_ms.saturating_mul(attempt as u64);
        let delay_ms = match err {
            PipelineError::RateLimit { time_to_wait_ms, .. } => {
                if *time_to_wait_ms > self.settings.max_rate_limit_wait_ms {
                    return None;
                }
                backoff_ms.max(*time_to_wait_ms)
            }
            _ => backoff_ms,
        };
        Some(Duration::from_millis(delay_ms))
    }

    async fn attempt(&self, request: &GenerationRequest, attempt: u32) -> PipelineResult<Post> {
        let output = self.orchestrator.run(request).await?;
        validate_output(&output)?;
        format_post(output, &request.topic, request.options.tone, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tone;
    use postgen_config::{CacheSettings, RetrievalSettings};

    fn controller() -> PostGenerationController {
        let metrics = MetricsContext::new();
        PostGenerationController::new(
            Arc::new(RagOrchestrator::new(RetrievalSettings::default(), metrics.clone())),
            Arc::new(CacheManager::new(CacheSettings::with_capacity(16))),
            ControllerSettings {
                backoff_ms: 1,
                ..ControllerSettings::default()
            },
            metrics,
        )
    }

    #[test]
    fn test_cache_key_is_canonical() {
        let a = GenerationRequest::new("Rust async");
        let b: GenerationRequest =
            serde_json::from_str(r#"{"topic": "  Rust async ", "options": {"length": 800}}"#).unwrap();
        assert_eq!(PostGenerationController::cache_key(&a), PostGenerationController::cache_key(&b));

        let c = GenerationRequest::new("Rust async").with_tone(Tone::Casual);
        assert_ne!(PostGenerationController::cache_key(&a), PostGenerationController::cache_key(&c));
        assert!(PostGenerationController::cache_key(&a).starts_with("post:"));
    }

    #[tokio::test]
    async fn test_validation_error_is_not_retried() {
        let controller = controller();
        let err = controller
            .generate_post(&GenerationRequest::new("AI"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(controller.metrics().snapshot().attempts, 0);
    }

    #[test]
    fn test_retry_delay_waits_out_rate_limit_window() {
        let controller = controller();
        let limited = |wait| PipelineError::RateLimit {
            source_name: "news".to_string(),
            time_to_wait_ms: wait,
        };

        assert_eq!(controller.retry_delay(&PipelineError::Rag("x".into()), 2), Some(Duration::from_millis(2)));
        assert_eq!(controller.retry_delay(&limited(800), 1), Some(Duration::from_millis(800)));
        assert_eq!(controller.retry_delay(&limited(0), 3), Some(Duration::from_millis(3)));
        assert_eq!(controller.retry_delay(&limited(86_400_000), 1), None);
    }

    #[tokio::test]
    async fn test_retries_exhausted_without_strategies() {
        let controller = controller();
        let err = controller
            .generate_post(&GenerationRequest::new("Rust async"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Rag(_)));
        assert_eq!(controller.metrics().snapshot().attempts, 3);
    }
}
