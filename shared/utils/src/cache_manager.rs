use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use postgen_config::CacheSettings;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};

/// Version written into cache exports
pub const EXPORT_VERSION: u32 = 1;

/// In-memory TTL cache with LRU eviction and size limits
///
/// Values are stored as serialized JSON so one cache can hold heterogeneous
/// types and be exported/imported between runs.
pub struct CacheManager {
    entries: DashMap<String, CacheEntry>,
    config: CacheSettings,
    clock: Arc<dyn Clock>,
    // Serializes writers so capacity checks and inserts are atomic
    write_lock: Mutex<()>,
    // Logical access clock for LRU ordering
    tick: AtomicU64,
    stats: RwLock<CacheStats>,
}

struct CacheEntry {
    data: Vec<u8>,
    created_at: u64,
    ttl_ms: u64,
    access_count: AtomicU64,
    last_accessed_at: AtomicU64,
    last_tick: AtomicU64,
}

impl CacheEntry {
    fn new(data: Vec<u8>, created_at: u64, ttl_ms: u64, access_count: u64, tick: u64) -> Self {
        Self {
            data,
            created_at,
            ttl_ms,
            access_count: AtomicU64::new(access_count),
            last_accessed_at: AtomicU64::new(created_at),
            last_tick: AtomicU64::new(tick),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) >= self.ttl_ms
    }

    fn touch(&self, now: u64, tick: u64) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_accessed_at.store(now, Ordering::Relaxed);
        self.last_tick.store(tick, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Portable snapshot of the cache contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheExport {
    pub version: u32,
    pub timestamp: u64,
    pub entries: BTreeMap<String, ExportedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedEntry {
    pub data: serde_json::Value,
    pub timestamp: u64,
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl CacheManager {
    pub fn new(config: CacheSettings) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    pub fn with_clock(config: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock,
            write_lock: Mutex::new(()),
            tick: AtomicU64::new(0),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn config(&self) -> &CacheSettings {
        &self.config
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get value from cache
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.clock.now_ms();

        let expired = match self.entries.get(key) {
            None => {
                self.stats.write().misses += 1;
                return None;
            }
            Some(entry) if !entry.is_expired(now) => {
                entry.touch(now, self.next_tick());
                return match serde_json::from_slice(&entry.data) {
                    Ok(value) => {
                        self.stats.write().hits += 1;
                        Some(value)
                    }
                    Err(e) => {
                        tracing::warn!("⚠️  Cached value for '{}' has unexpected shape: {}", key, e);
                        self.stats.write().misses += 1;
                        None
                    }
                };
            }
            Some(_) => true,
        };

        if expired && self.entries.remove_if(key, |_, e| e.is_expired(now)).is_some() {
            let mut stats = self.stats.write();
            stats.expirations += 1;
            stats.total_entries = self.entries.len();
        }
        self.stats.write().misses += 1;
        None
    }

    /// Set value in cache; `ttl` defaults to the configured TTL
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError> {
        let data = serde_json::to_vec(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let size = data.len();
        if size > self.config.max_entry_bytes {
            return Err(CacheError::EntryTooLarge {
                size,
                limit: self.config.max_entry_bytes,
            });
        }

        let ttl_ms = ttl
            .map(|t| t.as_millis() as u64)
            .unwrap_or(self.config.default_ttl_ms);
        let now = self.clock.now_ms();
        let entry = CacheEntry::new(data, now, ttl_ms, 0, self.next_tick());

        self.insert_entry(key.to_string(), entry, now)
    }

    fn insert_entry(&self, key: String, entry: CacheEntry, now: u64) -> Result<(), CacheError> {
        if self.config.capacity == 0 {
            return Ok(());
        }

        let _guard = self.write_lock.lock();

        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.config.capacity {
                self.evict_one(now)?;
            }
        }

        self.entries.insert(key, entry);
        self.stats.write().total_entries = self.entries.len();

        Ok(())
    }

    /// Evict an expired entry if one exists, otherwise the least recently used one
    fn evict_one(&self, now: u64) -> Result<(), CacheError> {
        let mut victim: Option<(String, u64)> = None;
        let mut expired_victim: Option<String> = None;

        for entry in self.entries.iter() {
            if entry.value().is_expired(now) {
                expired_victim = Some(entry.key().clone());
                break;
            }
            let tick = entry.value().last_tick.load(Ordering::Relaxed);
            if victim.as_ref().map_or(true, |(_, best)| tick < *best) {
                victim = Some((entry.key().clone(), tick));
            }
        }

        if let Some(key) = expired_victim {
            self.entries.remove(&key);
            self.stats.write().expirations += 1;
            return Ok(());
        }

        match victim {
            Some((key, _)) => {
                self.entries.remove(&key);
                self.stats.write().evictions += 1;
                tracing::debug!("Evicted least recently used cache entry '{}'", key);
                Ok(())
            }
            None => Err(CacheError::EvictionFailed),
        }
    }

    /// Remove value from cache
    pub fn delete(&self, key: &str) -> bool {
        let _guard = self.write_lock.lock();
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.stats.write().total_entries = self.entries.len();
        }
        removed
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.entries.clear();
        self.stats.write().total_entries = 0;
    }

    /// Whether a live (non-expired) entry exists, without counting as an access
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clean up expired entries, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let to_remove: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        let _guard = self.write_lock.lock();
        let mut removed = 0;
        for key in to_remove {
            if self.entries.remove_if(&key, |_, e| e.is_expired(now)).is_some() {
                removed += 1;
            }
        }

        let mut stats = self.stats.write();
        stats.expirations += removed as u64;
        stats.total_entries = self.entries.len();

        removed
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    /// Periodically remove expired entries until the cache is dropped
    pub fn spawn_sweeper(cache: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(cache);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    tracing::debug!("🧹 Cache sweep removed {} expired entries", removed);
                }
            }
        })
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    /// Snapshot all live entries
    pub fn export(&self) -> CacheExport {
        let now = self.clock.now_ms();
        let mut entries = BTreeMap::new();

        for entry in self.entries.iter() {
            let value = entry.value();
            if value.is_expired(now) {
                continue;
            }
            match serde_json::from_slice::<serde_json::Value>(&value.data) {
                Ok(data) => {
                    entries.insert(
                        entry.key().clone(),
                        ExportedEntry {
                            data,
                            timestamp: value.created_at,
                            access_count: value.access_count.load(Ordering::Relaxed),
                            ttl_ms: Some(value.ttl_ms),
                        },
                    );
                }
                Err(e) => tracing::warn!("⚠️  Skipping unexportable cache entry '{}': {}", entry.key(), e),
            }
        }

        CacheExport {
            version: EXPORT_VERSION,
            timestamp: now,
            entries,
        }
    }

    pub fn export_json(&self) -> Result<String, CacheError> {
        serde_json::to_string(&self.export()).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Restore entries from a snapshot, keeping their original timestamps and access counts.
    /// Entries that have already expired are skipped. Returns the number of entries restored.
    pub fn import(&self, export: CacheExport) -> Result<usize, CacheError> {
        if export.version != EXPORT_VERSION {
            return Err(CacheError::UnsupportedVersion(export.version));
        }

        let now = self.clock.now_ms();
        let mut restored = 0;

        for (key, item) in export.entries {
            let ttl_ms = item.ttl_ms.unwrap_or(self.config.default_ttl_ms);
            let data = serde_json::to_vec(&item.data)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;

            let entry = CacheEntry::new(data, item.timestamp, ttl_ms, item.access_count, self.next_tick());
            if entry.is_expired(now) {
                continue;
            }

            self.insert_entry(key, entry, now)?;
            restored += 1;
        }

        tracing::info!("📥 Imported {} cache entries", restored);
        Ok(restored)
    }

    pub fn import_json(&self, raw: &str) -> Result<usize, CacheError> {
        let export: CacheExport =
            serde_json::from_str(raw).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.import(export)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Entry too large: {size} bytes exceeds limit of {limit}")]
    EntryTooLarge { size: usize, limit: usize },
    #[error("Eviction failed")]
    EvictionFailed,
    #[error("Unsupported cache export version: {0}")]
    UnsupportedVersion(u32),
}
