//! Two-tier response cache with per-operation TTL.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      ResponseCache                        │
//! │  get() ──► memory (LRU, entry cap) ──► hit? return        │
//! │              │ miss                                       │
//! │              ▼                                            │
//! │            durable (byte budget) ──► hit? promote, return │
//! │                                                           │
//! │  set() ──► memory + durable, evict over bound             │
//! │  invalidate_all() ──► exclusive gate, clear both tiers    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys are SHA-256 digests of `(operation, model_version, normalized prompt)`.
//! Entries are immutable once written: they are only ever removed (expiry,
//! eviction, invalidation), never updated in place. Durable-tier failures are
//! logged and counted; the cache keeps working from memory.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::llm::cache_store::DurableStore;
use crate::llm::request::OperationType;

/// How often (in lookups) to emit a cache statistics log line.
const STATS_LOG_EVERY_N: u64 = 100;

/// Upper bound on evictions per write, in case a backend misreports size.
const MAX_EVICTIONS_PER_SET: usize = 1024;

/// Which tier an entry was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Memory,
    Disk,
}

/// A cached value and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub operation: OperationType,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub tier: CacheTier,
}

impl CacheEntry {
    /// An entry is unusable strictly after `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Deterministic content address of a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub operation: OperationType,
    digest: String,
}

impl CacheKey {
    pub fn new(operation: OperationType, model_version: &str, prompt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(operation.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(model_version.as_bytes());
        hasher.update(b"|");
        hasher.update(normalize_prompt(prompt).as_bytes());
        Self {
            operation,
            digest: format!("{:x}", hasher.finalize()),
        }
    }

    /// Hex digest used as the storage key in both tiers.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Trim and collapse internal whitespace.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Per-operation time-to-live. `None` disables caching for that operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    ttls: HashMap<OperationType, Option<Duration>>,
}

impl TtlPolicy {
    pub fn new() -> Self {
        Self {
            ttls: HashMap::new(),
        }
    }

    pub fn with(mut self, operation: OperationType, ttl: Option<Duration>) -> Self {
        self.ttls.insert(operation, ttl);
        self
    }

    pub fn set(&mut self, operation: OperationType, ttl: Option<Duration>) {
        self.ttls.insert(operation, ttl);
    }

    /// TTL for an operation; operations never configured are not cached.
    pub fn ttl_for(&self, operation: OperationType) -> Option<Duration> {
        self.ttls.get(&operation).copied().flatten()
    }

    pub fn is_enabled(&self, operation: OperationType) -> bool {
        self.ttl_for(operation).is_some()
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new()
            .with(OperationType::IntentDetection, Some(Duration::from_secs(1800)))
            .with(OperationType::TaskAnalysis, Some(Duration::from_secs(3600)))
            .with(OperationType::DailyBriefing, Some(Duration::from_secs(900)))
            .with(OperationType::ScheduleOptimization, None)
    }
}

/// Sizing and TTL configuration for the cache.
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    /// Maximum entries in the memory tier before LRU eviction.
    pub max_entries: usize,
    /// Byte budget of the durable tier before oldest-first eviction.
    pub durable_budget_bytes: u64,
    pub ttl: TtlPolicy,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            durable_budget_bytes: 10 * 1024 * 1024,
            ttl: TtlPolicy::default(),
        }
    }
}

/// Counters exposed through the router's stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub lookups: u64,
    pub memory_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evictions: u64,
    pub durable_errors: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.durable_hits
    }

    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits() as f64 / self.lookups as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    lookups: AtomicU64,
    memory_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
    durable_errors: AtomicU64,
}

/// Memory + durable response cache.
pub struct ResponseCache {
    config: ResponseCacheConfig,
    /// `std::sync::Mutex`: never held across an `.await`.
    memory: Mutex<LruCache<String, CacheEntry>>,
    durable: Option<Arc<dyn DurableStore>>,
    /// Readers and writers share; `invalidate_all` takes it exclusively so a
    /// reader never observes a half-cleared cache.
    gate: RwLock<()>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl ResponseCache {
    pub fn new(
        config: ResponseCacheConfig,
        durable: Option<Arc<dyn DurableStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cap = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            memory: Mutex::new(LruCache::new(cap)),
            durable,
            gate: RwLock::new(()),
            clock,
            counters: Counters::default(),
        }
    }

    /// Memory-only cache.
    pub fn in_memory(config: ResponseCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config, None, clock)
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.config.ttl
    }

    /// Look up a live entry. A miss is `None`, never an error.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let _gate = self.gate.read().await;
        self.counted_lookup(key).await
    }

    /// Look up several keys as one consistent view: an `invalidate_all`
    /// lands either before or after the whole batch.
    pub async fn get_many(&self, keys: &[CacheKey]) -> Vec<Option<CacheEntry>> {
        let _gate = self.gate.read().await;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            entries.push(self.counted_lookup(key).await);
        }
        entries
    }

    async fn counted_lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let lookup_no = self.counters.lookups.fetch_add(1, Ordering::Relaxed) + 1;
        let result = self.lookup(key).await;
        if result.is_none() {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        self.maybe_log_stats(lookup_no);
        result
    }

    async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        if !self.config.ttl.is_enabled(key.operation) {
            return None;
        }

        let now = self.clock.now();
        let digest = key.digest();

        let mut expired_in_memory = false;
        {
            let mut memory = self.lock_memory();
            if let Some(entry) = memory.get(digest) {
                if !entry.is_expired(now) {
                    self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(operation = %key.operation, "response cache hit (memory)");
                    return Some(entry.clone());
                }
                memory.pop(digest);
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                expired_in_memory = true;
            }
        }

        let store = self.durable.as_ref()?;
        if expired_in_memory {
            self.durable_remove(store.as_ref(), digest).await;
            return None;
        }

        match store.load(digest).await {
            Ok(Some(entry)) if entry.is_expired(now) => {
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                self.durable_remove(store.as_ref(), digest).await;
                None
            }
            Ok(Some(mut entry)) => {
                self.counters.durable_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(operation = %key.operation, "response cache hit (durable), promoting");
                let served = CacheEntry {
                    tier: CacheTier::Disk,
                    ..entry.clone()
                };
                entry.tier = CacheTier::Memory;
                self.insert_memory(entry);
                Some(served)
            }
            Ok(None) => None,
            Err(e) => {
                self.record_durable_error(store.name(), "load", &e);
                None
            }
        }
    }

    /// Store `value` under the operation's configured TTL. A no-op for
    /// operations with caching disabled.
    pub async fn set(&self, key: &CacheKey, value: impl Into<String>) {
        if let Some(ttl) = self.config.ttl.ttl_for(key.operation) {
            self.set_with_ttl(key, value, ttl).await;
        }
    }

    /// Store `value` with an explicit TTL. Still a no-op when the key's
    /// operation has caching disabled.
    pub async fn set_with_ttl(&self, key: &CacheKey, value: impl Into<String>, ttl: Duration) {
        if !self.config.ttl.is_enabled(key.operation) {
            return;
        }
        let _gate = self.gate.read().await;

        let now = self.clock.now();
        let value = value.into();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or_else(|| now + chrono::Duration::days(36_500));
        let entry = CacheEntry {
            key: key.digest().to_string(),
            size_bytes: (key.digest().len() + value.len()) as u64,
            value,
            operation: key.operation,
            created_at: now,
            expires_at,
            tier: CacheTier::Memory,
        };

        if let Some(store) = &self.durable {
            self.write_durable(store.as_ref(), &entry).await;
        }
        self.insert_memory(entry);
    }

    /// Remove everything from both tiers.
    pub async fn invalidate_all(&self) {
        let _gate = self.gate.write().await;
        let cleared = {
            let mut memory = self.lock_memory();
            let n = memory.len();
            memory.clear();
            n
        };
        if let Some(store) = &self.durable
            && let Err(e) = store.clear().await
        {
            self.record_durable_error(store.name(), "clear", &e);
        }
        tracing::info!(memory_entries = cleared, "response cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.lock_memory().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_memory().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.len(),
            lookups: self.counters.lookups.load(Ordering::Relaxed),
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            durable_hits: self.counters.durable_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            durable_errors: self.counters.durable_errors.load(Ordering::Relaxed),
        }
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert_memory(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        let mut memory = self.lock_memory();
        if let Some((evicted_key, _)) = memory.push(key.clone(), entry)
            && evicted_key != key
        {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn write_durable(&self, store: &dyn DurableStore, entry: &CacheEntry) {
        if entry.size_bytes > self.config.durable_budget_bytes {
            tracing::debug!(
                size_bytes = entry.size_bytes,
                budget = self.config.durable_budget_bytes,
                "entry exceeds durable budget, keeping in memory only"
            );
            return;
        }
        let stored = CacheEntry {
            tier: CacheTier::Disk,
            ..entry.clone()
        };
        if let Err(e) = store.store(&stored).await {
            self.record_durable_error(store.name(), "store", &e);
            return;
        }

        for _ in 0..MAX_EVICTIONS_PER_SET {
            match store.total_bytes().await {
                Ok(total) if total <= self.config.durable_budget_bytes => return,
                Ok(_) => {}
                Err(e) => {
                    self.record_durable_error(store.name(), "total_bytes", &e);
                    return;
                }
            }
            match store.pop_oldest().await {
                Ok(Some(evicted)) => {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %evicted, "evicted oldest durable cache entry");
                }
                Ok(None) => return,
                Err(e) => {
                    self.record_durable_error(store.name(), "pop_oldest", &e);
                    return;
                }
            }
        }
    }

    async fn durable_remove(&self, store: &dyn DurableStore, digest: &str) {
        if let Err(e) = store.remove(digest).await {
            self.record_durable_error(store.name(), "remove", &e);
        }
    }

    fn record_durable_error(&self, backend: &str, op: &str, err: &crate::error::CacheIoError) {
        self.counters.durable_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            backend,
            op,
            error = %err,
            "durable cache tier failed, continuing from memory"
        );
    }

    fn maybe_log_stats(&self, lookup_no: u64) {
        if lookup_no.is_multiple_of(STATS_LOG_EVERY_N) {
            let stats = self.stats();
            tracing::info!(
                total_lookups = stats.lookups,
                total_hits = stats.hits(),
                hit_rate_pct = format!("{:.1}", stats.hit_rate() * 100.0),
                entry_count = stats.memory_entries,
                evictions = stats.evictions,
                "response cache statistics"
            );
        }
    }
}
