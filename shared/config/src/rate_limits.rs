use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::sources;

pub const MINUTE_MS: u64 = 60_000;
pub const DAY_MS: u64 = 86_400_000;
pub const HOUR_MS: u64 = 3_600_000;

/// Quota for one named source: at most `max_requests` per fixed window of `window_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceQuota {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl SourceQuota {
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    pub const fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, MINUTE_MS)
    }

    pub const fn per_day(max_requests: u32) -> Self {
        Self::new(max_requests, DAY_MS)
    }

    /// Generic conservative rate limit for unknown services
    pub const fn generic() -> Self {
        Self::per_minute(100)
    }

    /// Parse the `<max>/<window_ms>` override format
    pub fn parse(raw: &str) -> Option<Self> {
        let (max, window) = raw.trim().split_once('/')?;
        let max_requests = max.trim().parse().ok()?;
        let window_ms: u64 = window.trim().parse().ok()?;
        if window_ms == 0 {
            return None;
        }
        Some(Self::new(max_requests, window_ms))
    }
}

/// Rate limiter configuration
///
/// Recognised options:
/// - `quotas`: per-source quota (`RATE_LIMIT_<SOURCE>=<max>/<window_ms>` overrides one entry)
/// - `default_quota`: used for sources without an explicit quota
/// - `burst_decay_ms`: lifetime of a burst allowance (1 hour)
/// - `window_retention_ms`: windows older than this are purged (24 hours)
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub quotas: HashMap<String, SourceQuota>,
    pub default_quota: SourceQuota,
    pub burst_decay_ms: u64,
    pub window_retention_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let mut quotas = HashMap::new();
        quotas.insert(sources::EMBEDDING.to_string(), SourceQuota::per_minute(200));
        quotas.insert(sources::SEMANTIC_SEARCH.to_string(), SourceQuota::per_minute(100));
        quotas.insert(sources::KEYWORD_SEARCH.to_string(), SourceQuota::per_minute(200));
        quotas.insert(sources::HYBRID_SEARCH.to_string(), SourceQuota::per_minute(100));
        quotas.insert(sources::GENERATION.to_string(), SourceQuota::per_minute(60));
        // Daily-quota news index
        quotas.insert("news".to_string(), SourceQuota::per_day(100));

        Self {
            quotas,
            default_quota: SourceQuota::generic(),
            burst_decay_ms: HOUR_MS,
            window_retention_ms: DAY_MS,
        }
    }
}

impl RateLimitSettings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        for (key, value) in std::env::vars() {
            let Some(suffix) = key.strip_prefix("RATE_LIMIT_") else {
                continue;
            };
            let source = suffix.to_lowercase().replace('_', "-");
            match SourceQuota::parse(&value) {
                Some(quota) if source == "default" => settings.default_quota = quota,
                Some(quota) => {
                    settings.quotas.insert(source, quota);
                }
                None => tracing::warn!("⚠️  Ignoring malformed {}={:?}", key, value),
            }
        }

        settings
    }

    pub fn with_quota(mut self, source: impl Into<String>, quota: SourceQuota) -> Self {
        self.quotas.insert(source.into(), quota);
        self
    }

    pub fn quota_for(&self, source: &str) -> SourceQuota {
        self.quotas.get(source).copied().unwrap_or(self.default_quota)
    }
}
