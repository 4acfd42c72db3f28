//! Pipeline metrics passed explicitly through component constructors.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Cheaply clonable handle to a shared set of counters
#[derive(Debug, Clone, Default)]
pub struct MetricsContext {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    latency_ms_total: AtomicU64,
    latency_samples: AtomicU64,

    api_requests: AtomicU64,
    api_retries: AtomicU64,
    api_cache_hits: AtomicU64,
    rate_limited: AtomicU64,

    fallback_generations: AtomicU64,
    strategies: DashMap<String, StrategyCounters>,
}

#[derive(Debug, Default, Clone, Copy)]
struct StrategyCounters {
    successes: u64,
    failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub successes: u64,
    pub failures: u64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub success_rate: f64,
    pub mean_latency_ms: f64,
    pub api_requests: u64,
    pub api_retries: u64,
    pub api_cache_hits: u64,
    pub rate_limited: u64,
    pub fallback_generations: u64,
    pub strategies: BTreeMap<String, StrategyStats>,
    pub captured_at: DateTime<Utc>,
}

impl MetricsContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Record the outcome of one controller attempt
    pub fn record_attempt(&self, success: bool, latency_ms: u64) {
        let c = &self.inner;
        c.attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            c.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            c.failures.fetch_add(1, Ordering::Relaxed);
        }
        c.latency_ms_total.fetch_add(latency_ms, Ordering::Relaxed);
        c.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_generation(&self) {
        self.inner.fallback_generations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success_rate(&self) -> f64 {
        let attempts = self.inner.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 0.0;
        }
        self.inner.successes.load(Ordering::Relaxed) as f64 / attempts as f64
    }

    pub fn mean_latency_ms(&self) -> f64 {
        let samples = self.inner.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        self.inner.latency_ms_total.load(Ordering::Relaxed) as f64 / samples as f64
    }

    // ========================================================================
    // API layer
    // ========================================================================

    pub fn record_api_request(&self) {
        self.inner.api_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_retry(&self) {
        self.inner.api_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_cache_hit(&self) {
        self.inner.api_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.inner.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Retrieval
    // ========================================================================

    pub fn record_strategy(&self, strategy: &str, success: bool) {
        let mut entry = self.inner.strategies.entry(strategy.to_string()).or_default();
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.inner;
        let strategies = c
            .strategies
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    StrategyStats {
                        successes: e.value().successes,
                        failures: e.value().failures,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            attempts: c.attempts.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            success_rate: self.success_rate(),
            mean_latency_ms: self.mean_latency_ms(),
            api_requests: c.api_requests.load(Ordering::Relaxed),
            api_retries: c.api_retries.load(Ordering::Relaxed),
            api_cache_hits: c.api_cache_hits.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            fallback_generations: c.fallback_generations.load(Ordering::Relaxed),
            strategies,
            captured_at: Utc::now(),
        }
    }
}
