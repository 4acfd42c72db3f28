use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{env_opt, env_or, sources};

// ============================================================================
// Cache
// ============================================================================

/// TTL + LRU cache configuration
///
/// - `capacity`: maximum number of live entries (`CACHE_CAPACITY`)
/// - `default_ttl_ms`: TTL used when `set` is called without one (`CACHE_DEFAULT_TTL_MS`)
/// - `max_entry_bytes`: serialized size limit for one value (`CACHE_MAX_ENTRY_BYTES`)
/// - `sweep_interval_ms`: background expiry sweep period (`CACHE_SWEEP_INTERVAL_MS`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub capacity: usize,
    pub default_ttl_ms: u64,
    pub max_entry_bytes: usize,
    pub sweep_interval_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            default_ttl_ms: 300_000, // 5 minutes
            max_entry_bytes: 1024 * 1024, // 1 MB
            sweep_interval_ms: 60_000,
        }
    }
}

impl CacheSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            capacity: env_or("CACHE_CAPACITY", d.capacity),
            default_ttl_ms: env_or("CACHE_DEFAULT_TTL_MS", d.default_ttl_ms),
            max_entry_bytes: env_or("CACHE_MAX_ENTRY_BYTES", d.max_entry_bytes),
            sweep_interval_ms: env_or("CACHE_SWEEP_INTERVAL_MS", d.sweep_interval_ms),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

// ============================================================================
// API client
// ============================================================================

/// Base URL and optional bearer token of one downstream source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl EndpointSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Outbound HTTP access configuration
///
/// - `max_retries`: retries after the first attempt (`API_MAX_RETRIES`)
/// - `backoff_base_ms` / `backoff_max_ms`: exponential backoff base and cap
/// - `jitter_ms`: upper bound of the uniform jitter added to each backoff
/// - `timeout_ms`: per-request timeout; a timeout counts as a network failure
/// - `response_ttl_ms`: TTL of cached successful responses
/// - `endpoints`: source name -> endpoint (`<SOURCE>_URL` style variables)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiClientSettings {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_ms: u64,
    pub timeout_ms: u64,
    pub response_ttl_ms: u64,
    pub endpoints: HashMap<String, EndpointSettings>,
}

impl Default for ApiClientSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 10_000,
            jitter_ms: 100,
            timeout_ms: 15_000,
            response_ttl_ms: 300_000,
            endpoints: HashMap::new(),
        }
    }
}

impl ApiClientSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        let mut endpoints = HashMap::new();

        let known = [
            (sources::EMBEDDING, "EMBEDDING_SERVICE_URL", "EMBEDDING_API_KEY"),
            (sources::SEMANTIC_SEARCH, "SEMANTIC_SEARCH_URL", "SEMANTIC_SEARCH_API_KEY"),
            (sources::KEYWORD_SEARCH, "KEYWORD_SEARCH_URL", "KEYWORD_SEARCH_API_KEY"),
            (sources::HYBRID_SEARCH, "HYBRID_SEARCH_URL", "HYBRID_SEARCH_API_KEY"),
            (sources::GENERATION, "GENERATION_SERVICE_URL", "GENERATION_API_KEY"),
        ];

        for (source, url_var, key_var) in known {
            if let Some(url) = env_opt(url_var) {
                let mut endpoint = EndpointSettings::new(url);
                endpoint.api_key = env_opt(key_var);
                endpoints.insert(source.to_string(), endpoint);
            }
        }

        Self {
            max_retries: env_or("API_MAX_RETRIES", d.max_retries),
            backoff_base_ms: env_or("API_BACKOFF_BASE_MS", d.backoff_base_ms),
            backoff_max_ms: env_or("API_BACKOFF_MAX_MS", d.backoff_max_ms),
            jitter_ms: env_or("API_JITTER_MS", d.jitter_ms),
            timeout_ms: env_or("API_TIMEOUT_MS", d.timeout_ms),
            response_ttl_ms: env_or("API_RESPONSE_TTL_MS", d.response_ttl_ms),
            endpoints,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_millis(self.response_ttl_ms)
    }
}

// ============================================================================
// Vector index
// ============================================================================

/// In-memory vector index configuration
///
/// - `dimension`: fixed embedding length (`VECTOR_DIMENSION`)
/// - `query_cache`: cache unfiltered search results until the next mutation
/// - `query_cache_capacity`: number of cached queries
/// - `kmeans_max_iterations`: iteration bound for `find_clusters`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexSettings {
    pub dimension: usize,
    pub query_cache: bool,
    pub query_cache_capacity: usize,
    pub kmeans_max_iterations: usize,
}

impl Default for VectorIndexSettings {
    fn default() -> Self {
        Self {
            dimension: 384,
            query_cache: true,
            query_cache_capacity: 1_000,
            kmeans_max_iterations: 50,
        }
    }
}

impl VectorIndexSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            dimension: env_or("VECTOR_DIMENSION", d.dimension),
            query_cache: env_or("VECTOR_QUERY_CACHE", d.query_cache),
            query_cache_capacity: env_or("VECTOR_QUERY_CACHE_CAPACITY", d.query_cache_capacity),
            kmeans_max_iterations: env_or("VECTOR_KMEANS_MAX_ITERATIONS", d.kmeans_max_iterations),
        }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }
}

// ============================================================================
// Retrieval
// ============================================================================

/// Retrieval orchestration configuration
///
/// - `relevance_weight` / `credibility_weight` / `freshness_weight`: composite ranking weights
/// - `top_k`: number of merged results kept for generation (`RAG_TOP_K`)
/// - `candidates_per_strategy`: results requested from each strategy
/// - `similarity_threshold`: minimum cosine similarity for semantic hits
/// - `strategy_timeout_ms`: per-strategy deadline; a timeout counts as a strategy failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub relevance_weight: f32,
    pub credibility_weight: f32,
    pub freshness_weight: f32,
    pub top_k: usize,
    pub candidates_per_strategy: usize,
    pub similarity_threshold: f32,
    pub strategy_timeout_ms: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            relevance_weight: 0.5,
            credibility_weight: 0.3,
            freshness_weight: 0.2,
            top_k: 10,
            candidates_per_strategy: 20,
            similarity_threshold: 0.2,
            strategy_timeout_ms: 20_000,
        }
    }
}

impl RetrievalSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            relevance_weight: env_or("RAG_RELEVANCE_WEIGHT", d.relevance_weight),
            credibility_weight: env_or("RAG_CREDIBILITY_WEIGHT", d.credibility_weight),
            freshness_weight: env_or("RAG_FRESHNESS_WEIGHT", d.freshness_weight),
            top_k: env_or("RAG_TOP_K", d.top_k),
            candidates_per_strategy: env_or("RAG_CANDIDATES_PER_STRATEGY", d.candidates_per_strategy),
            similarity_threshold: env_or("RAG_SIMILARITY_THRESHOLD", d.similarity_threshold),
            strategy_timeout_ms: env_or("RAG_STRATEGY_TIMEOUT_MS", d.strategy_timeout_ms),
        }
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_millis(self.strategy_timeout_ms)
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Post generation controller configuration
///
/// - `max_retries`: total attempts per request (`POST_MAX_RETRIES`)
/// - `backoff_ms`: linear backoff unit; attempt `n` waits `n * backoff_ms`
/// - `max_rate_limit_wait_ms`: a rate-limited attempt waits out the source window up to this
///   long (`POST_MAX_RATE_LIMIT_WAIT_MS`); longer waits fail the request at once
/// - `cache_ttl_ms`: TTL of cached posts (`POST_CACHE_TTL_MS`)
/// - `coalesce`: share one upstream generation between identical concurrent requests
/// - `job_concurrency` / `job_capacity`: batch queue worker permits and channel bound
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_rate_limit_wait_ms: u64,
    pub cache_ttl_ms: u64,
    pub coalesce: bool,
    pub job_concurrency: usize,
    pub job_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 500,
            max_rate_limit_wait_ms: 10_000,
            cache_ttl_ms: 86_400_000, // 24 hours
            coalesce: true,
            job_concurrency: 4,
            job_capacity: 64,
        }
    }
}

impl ControllerSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_retries: env_or("POST_MAX_RETRIES", d.max_retries),
            backoff_ms: env_or("POST_BACKOFF_MS", d.backoff_ms),
            max_rate_limit_wait_ms: env_or("POST_MAX_RATE_LIMIT_WAIT_MS", d.max_rate_limit_wait_ms),
            cache_ttl_ms: env_or("POST_CACHE_TTL_MS", d.cache_ttl_ms),
            coalesce: env_or("POST_COALESCE", d.coalesce),
            job_concurrency: env_or("JOB_QUEUE_CONCURRENCY", d.job_concurrency),
            job_capacity: env_or("JOB_QUEUE_CAPACITY", d.job_capacity),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3020,
        }
    }
}

impl ServerSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            host: env_opt("POSTGEN_HOST").unwrap_or(d.host),
            port: env_or("POSTGEN_PORT", d.port),
        }
    }
}
