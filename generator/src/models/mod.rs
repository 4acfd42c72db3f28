//! Models for the post generator

pub mod post;
pub mod retrieval;

pub use post::{
    GenerationOptions, GenerationRequest, Post, PostContent, PostMetadata, SourceRef, Tone,
    MAX_TOPIC_CHARS, MIN_LENGTH_WORDS, MIN_TOPIC_CHARS,
};
pub use retrieval::{
    clamp_unit, Claim, Document, Draft, Metadata, RagStage, RetrievalQuery, RetrievalResult,
    VerificationReport, META_CONTENT, META_PUBLISHED_AT, META_SOURCE_TYPE, META_TITLE,
};

use std::sync::Arc;

use postgen_config::AppConfig;
use postgen_observability::MetricsContext;
use postgen_utils::{CacheManager, RateLimiter};

use crate::services::{JobQueue, PostGenerationController, RagOrchestrator};

/// Application state shared by the HTTP handlers
pub struct AppState {
    pub controller: Arc<PostGenerationController>,
    pub jobs: JobQueue,
    pub orchestrator: Arc<RagOrchestrator>,
    /// Generated posts
    pub cache: Arc<CacheManager>,
    /// Short-lived responses of the external sources
    pub api_cache: Arc<CacheManager>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: MetricsContext,
    pub config: AppConfig,
}
