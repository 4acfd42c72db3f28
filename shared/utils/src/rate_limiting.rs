use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use postgen_config::{RateLimitSettings, SourceQuota};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};

// Stale-window purges run at most this often
const PURGE_INTERVAL_MS: u64 = 60_000;

/// Per-source fixed-window admission control with decaying burst credits
///
/// Each source gets a window aligned on `floor(now / window_ms)`. A request is admitted
/// while `request_count < max_requests + burst_credits`; denials are not counted.
pub struct RateLimiter {
    settings: RateLimitSettings,
    quotas: DashMap<String, SourceQuota>,
    states: DashMap<String, WindowState>,
    clock: Arc<dyn Clock>,
    last_purge: AtomicU64,
}

#[derive(Debug, Clone)]
struct WindowState {
    window_start: u64,
    request_count: u32,
    bursts: Vec<BurstGrant>,
}

#[derive(Debug, Clone, Copy)]
struct BurstGrant {
    credits: u32,
    granted_at: u64,
}

impl WindowState {
    fn new(quota: &SourceQuota, now: u64) -> Self {
        Self {
            window_start: window_start_for(quota, now),
            request_count: 0,
            bursts: Vec::new(),
        }
    }

    fn roll(&mut self, quota: &SourceQuota, now: u64) {
        let start = window_start_for(quota, now);
        if start != self.window_start {
            self.window_start = start;
            self.request_count = 0;
        }
    }

    fn decay_bursts(&mut self, now: u64, decay_ms: u64) {
        self.bursts
            .retain(|b| now.saturating_sub(b.granted_at) < decay_ms);
    }

    fn burst_credits(&self) -> u32 {
        self.bursts
            .iter()
            .fold(0u32, |acc, b| acc.saturating_add(b.credits))
    }
}

fn window_start_for(quota: &SourceQuota, now: u64) -> u64 {
    let window = quota.window_ms.max(1);
    now - now % window
}

/// Snapshot of one source's current window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub source: String,
    pub window_start: u64,
    pub window_ms: u64,
    pub request_count: u32,
    pub max_requests: u32,
    pub burst_credits: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Rate limit exceeded for '{source_name}' ({limit} per window), retry in {time_to_wait_ms}ms")]
pub struct RateLimitError {
    pub source_name: String,
    pub time_to_wait_ms: u64,
    pub limit: u64,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        let quotas = settings
            .quotas
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        Self {
            settings,
            quotas,
            states: DashMap::new(),
            clock,
            last_purge: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimitSettings::default(), SystemClock::shared())
    }

    pub fn quota_for(&self, source: &str) -> SourceQuota {
        self.quotas
            .get(source)
            .map(|q| *q)
            .unwrap_or(self.settings.default_quota)
    }

    /// Admit or deny one request for `source`
    pub fn check_limit(&self, source: &str) -> Result<(), RateLimitError> {
        let now = self.clock.now_ms();
        self.purge_stale(now);

        let quota = self.quota_for(source);
        let mut state = self
            .states
            .entry(source.to_string())
            .or_insert_with(|| WindowState::new(&quota, now));

        state.roll(&quota, now);
        state.decay_bursts(now, self.settings.burst_decay_ms);

        let limit = quota.max_requests as u64 + state.burst_credits() as u64;
        if state.request_count as u64 >= limit {
            let time_to_wait_ms = (state.window_start + quota.window_ms.max(1))
                .saturating_sub(now)
                .max(1);
            tracing::warn!(
                "⚠️  Rate limit exceeded for {}: {}/{} (retry in {}ms)",
                source,
                state.request_count,
                limit,
                time_to_wait_ms
            );
            return Err(RateLimitError {
                source_name: source.to_string(),
                time_to_wait_ms,
                limit,
            });
        }

        state.request_count += 1;
        Ok(())
    }

    /// Temporarily raise the effective quota of `source` by `credits`
    pub fn add_burst_allowance(&self, source: &str, credits: u32) {
        let now = self.clock.now_ms();
        let quota = self.quota_for(source);

        let mut state = self
            .states
            .entry(source.to_string())
            .or_insert_with(|| WindowState::new(&quota, now));
        state.bursts.push(BurstGrant {
            credits,
            granted_at: now,
        });

        tracing::info!("Granted {} burst credits to {}", credits, source);
    }

    pub fn stats(&self, source: &str) -> Option<RateLimitStats> {
        let now = self.clock.now_ms();
        let quota = self.quota_for(source);
        let state = self.states.get(source)?;

        let current = window_start_for(&quota, now) == state.window_start;
        let request_count = if current { state.request_count } else { 0 };
        let burst_credits = state
            .bursts
            .iter()
            .filter(|b| now.saturating_sub(b.granted_at) < self.settings.burst_decay_ms)
            .fold(0u32, |acc, b| acc.saturating_add(b.credits));

        Some(RateLimitStats {
            source: source.to_string(),
            window_start: window_start_for(&quota, now),
            window_ms: quota.window_ms,
            request_count,
            max_requests: quota.max_requests,
            burst_credits,
            remaining: quota
                .max_requests
                .saturating_add(burst_credits)
                .saturating_sub(request_count),
        })
    }

    /// Drop the current window and burst credits for `source`
    pub fn reset(&self, source: &str) {
        self.states.remove(source);
    }

    /// Replace the quota for `source`; the current window count is kept
    pub fn set_config(&self, source: &str, quota: SourceQuota) {
        self.quotas.insert(source.to_string(), quota);
        tracing::info!(
            "Rate limit for {} set to {}/{}ms",
            source,
            quota.max_requests,
            quota.window_ms
        );
    }

    pub fn tracked_sources(&self) -> usize {
        self.states.len()
    }

    fn purge_stale(&self, now: u64) {
        let last = self.last_purge.load(Ordering::Relaxed);
        if now.saturating_sub(last) < PURGE_INTERVAL_MS {
            return;
        }
        if self
            .last_purge
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let retention = self.settings.window_retention_ms;
        let decay = self.settings.burst_decay_ms;
        self.states.retain(|_, state| {
            state.decay_bursts(now, decay);
            now.saturating_sub(state.window_start) <= retention || !state.bursts.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use postgen_config::rate_limits::{DAY_MS, HOUR_MS, MINUTE_MS};
    use proptest::prelude::*;

    fn limiter_at(start: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = ManualClock::new(start);
        (RateLimiter::new(RateLimitSettings::default(), clock.clone()), clock)
    }

    #[test]
    fn test_news_daily_quota_denies_101st_call() {
        let (limiter, _clock) = limiter_at(DAY_MS * 3 + 12_345);

        for _ in 0..100 {
            assert!(limiter.check_limit("news").is_ok());
        }

        let err = limiter.check_limit("news").unwrap_err();
        assert_eq!(err.source_name, "news");
        assert!(err.time_to_wait_ms <= DAY_MS);
        assert_eq!(err.time_to_wait_ms, DAY_MS - 12_345);
    }

    #[test]
    fn test_window_rolls_over() {
        let (limiter, clock) = limiter_at(0);
        limiter.set_config("svc", SourceQuota::new(2, 1_000));

        assert!(limiter.check_limit("svc").is_ok());
        assert!(limiter.check_limit("svc").is_ok());
        assert!(limiter.check_limit("svc").is_err());

        clock.advance(1_000);
        assert!(limiter.check_limit("svc").is_ok());
    }

    #[test]
    fn test_denials_are_not_counted() {
        let (limiter, _clock) = limiter_at(0);
        limiter.set_config("svc", SourceQuota::new(1, MINUTE_MS));

        assert!(limiter.check_limit("svc").is_ok());
        for _ in 0..5 {
            assert!(limiter.check_limit("svc").is_err());
        }
        assert_eq!(limiter.stats("svc").unwrap().request_count, 1);
    }

    #[test]
    fn test_burst_allowance_and_decay() {
        let (limiter, clock) = limiter_at(0);
        limiter.set_config("svc", SourceQuota::new(1, DAY_MS));

        assert!(limiter.check_limit("svc").is_ok());
        assert!(limiter.check_limit("svc").is_err());

        limiter.add_burst_allowance("svc", 2);
        assert!(limiter.check_limit("svc").is_ok());
        assert!(limiter.check_limit("svc").is_ok());
        assert!(limiter.check_limit("svc").is_err());

        let stats = limiter.stats("svc").unwrap();
        assert_eq!(stats.burst_credits, 2);
        assert_eq!(stats.remaining, 0);

        clock.advance(HOUR_MS);
        assert_eq!(limiter.stats("svc").unwrap().burst_credits, 0);
        assert!(limiter.check_limit("svc").is_err());
    }

    #[test]
    fn test_stale_windows_are_purged() {
        let (limiter, clock) = limiter_at(0);
        assert!(limiter.check_limit("embedding").is_ok());
        assert_eq!(limiter.tracked_sources(), 1);

        clock.advance(DAY_MS + MINUTE_MS * 2);
        assert!(limiter.check_limit("generation").is_ok());
        assert_eq!(limiter.tracked_sources(), 1);
        assert!(limiter.stats("embedding").is_none());
    }

    #[test]
    fn test_reset_clears_state() {
        let (limiter, _clock) = limiter_at(0);
        limiter.set_config("svc", SourceQuota::new(1, MINUTE_MS));
        assert!(limiter.check_limit("svc").is_ok());
        assert!(limiter.check_limit("svc").is_err());

        limiter.reset("svc");
        assert!(limiter.check_limit("svc").is_ok());
    }

    #[test]
    fn test_unknown_source_uses_default_quota() {
        let (limiter, _clock) = limiter_at(0);
        assert_eq!(limiter.quota_for("mystery"), SourceQuota::generic());
    }

    #[test]
    fn test_concurrent_checks_do_not_lose_updates() {
        let (limiter, _clock) = limiter_at(0);
        limiter.set_config("shared", SourceQuota::new(100, DAY_MS));
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.check_limit("shared").is_ok())
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
        assert_eq!(limiter.stats("shared").unwrap().request_count, 100);
    }

    proptest! {
        #[test]
        fn prop_allowed_calls_never_exceed_quota_plus_burst(
            quota in 1u32..20,
            burst in 0u32..10,
            steps in proptest::collection::vec(0u64..400, 1..200),
        ) {
            let clock = ManualClock::new(0);
            let limiter = RateLimiter::new(RateLimitSettings::default(), clock.clone());
            limiter.set_config("p", SourceQuota::new(quota, 1_000));
            if burst > 0 {
                limiter.add_burst_allowance("p", burst);
            }

            let mut allowed_per_window = std::collections::HashMap::new();
            for step in steps {
                clock.advance(step);
                if limiter.check_limit("p").is_ok() {
                    *allowed_per_window.entry(clock.now_ms() / 1_000).or_insert(0u32) += 1;
                }
            }

            for count in allowed_per_window.values() {
                prop_assert!(*count <= quota + burst);
            }
        }
    }
}
