//! Result cache.
//!
//! Deterministic memoization of computation results with bounded memory and
//! freshness guarantees: per-category TTL, lazy expiry on read, a periodic
//! background sweep, and LRU eviction under capacity pressure.
//!
//! ## Usage
//!
//! ```no_run
//! use prediction_gate::{CacheConfig, PredictionCategory, ResultCache};
//! use serde_json::json;
//! # #[tokio::main]
//! # async fn main() {
//! let cache: ResultCache<serde_json::Value> = ResultCache::new(CacheConfig::default());
//!
//! let payload = json!({"series": "revenue", "horizon": 30});
//! if let Some(result) = cache.get(PredictionCategory::Forecast, &payload) {
//!     println!("{result}"); // cache hit
//! }
//!
//! // ... compute ...
//! cache.set(PredictionCategory::Forecast, &payload, json!({"points": []}));
//! cache.stop();
//! # }
//! ```

use crate::fingerprint;
use crate::{metrics, PredictionCategory};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction kicks in.
    pub max_size: usize,
    /// TTL applied when a category has no override, in milliseconds.
    pub default_ttl_ms: u64,
    /// Per-category TTL overrides, in milliseconds.
    pub ttl_by_category: HashMap<PredictionCategory, u64>,
    /// Interval between background expiry sweeps, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            default_ttl_ms: 300_000,
            ttl_by_category: HashMap::new(),
            sweep_interval_ms: 30_000,
        }
    }
}

/// A stored result plus its bookkeeping. Owned exclusively by the cache.
struct CacheEntry<T> {
    category: PredictionCategory,
    result: T,
    created_at: Instant,
    ttl: Duration,
    access_count: u64,
    last_accessed_at: Instant,
}

/// Cache statistics snapshot.
///
/// `hits + misses` equals total lookup calls since construction; sweeps and
/// evictions do not reset the counters. `evictions` counts only
/// capacity-triggered LRU removals, never TTL expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Number of entries currently held.
    pub entries: usize,
    /// Cumulative lookup hits.
    pub hits: u64,
    /// Cumulative lookup misses.
    pub misses: u64,
    /// `hits / (hits + misses)`, 0.0 when no lookups have happened.
    pub hit_rate: f64,
    /// Capacity-triggered LRU evictions.
    pub evictions: u64,
    /// Rough in-memory footprint of stored entries, in bytes.
    pub approx_bytes: usize,
}

struct CacheInner<T> {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry<T>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Memoization cache keyed by `(category, payload)` fingerprints.
///
/// `get`/`set`/`invalidate` are total operations — the cache raises no
/// errors; a lookup is always either a hit or a miss.
pub struct ResultCache<T> {
    inner: Arc<CacheInner<T>>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<T> Clone for ResultCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            sweeper: Arc::clone(&self.sweeper),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ResultCache<T> {
    /// Create a cache and spawn its background expiry sweep.
    ///
    /// Must be called from within a tokio runtime. Call [`ResultCache::stop`]
    /// to cancel the sweep task (tests should, to avoid leaked timers).
    pub fn new(config: CacheConfig) -> Self {
        let inner = Arc::new(CacheInner {
            config,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        });

        let sweep_inner = Arc::clone(&inner);
        let interval = Duration::from_millis(inner.config.sweep_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                sweep(&sweep_inner);
            }
        });

        Self {
            inner,
            sweeper: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Look up the cached result for `(category, payload)`.
    ///
    /// An entry past its TTL is removed and counted as a miss (lazy expiry).
    /// A hit bumps the entry's access count and recency.
    pub fn get(&self, category: PredictionCategory, payload: &Value) -> Option<T> {
        let key = fingerprint::cache_key(category, payload);

        if let Some(mut entry) = self.inner.entries.get_mut(&key) {
            if entry.created_at.elapsed() > entry.ttl {
                drop(entry);
                self.inner.entries.remove(&key);
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                metrics::inc_cache_lookup("miss");
                debug!(key = %key, "cache entry expired");
                return None;
            }

            entry.access_count += 1;
            entry.last_accessed_at = Instant::now();
            let result = entry.result.clone();
            drop(entry);

            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            metrics::inc_cache_lookup("hit");
            debug!(key = %key, "cache hit");
            return Some(result);
        }

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        metrics::inc_cache_lookup("miss");
        debug!(key = %key, "cache miss");
        None
    }

    /// Store a result for `(category, payload)`.
    ///
    /// At capacity, inserting a new key first evicts the least-recently
    /// accessed entry (ties broken by smallest key, so eviction is
    /// deterministic).
    pub fn set(&self, category: PredictionCategory, payload: &Value, result: T) {
        let key = fingerprint::cache_key(category, payload);

        if self.inner.entries.len() >= self.inner.config.max_size
            && !self.inner.entries.contains_key(&key)
        {
            self.evict_lru();
        }

        let ttl_ms = self
            .inner
            .config
            .ttl_by_category
            .get(&category)
            .copied()
            .unwrap_or(self.inner.config.default_ttl_ms);
        let now = Instant::now();

        self.inner.entries.insert(
            key.clone(),
            CacheEntry {
                category,
                result,
                created_at: now,
                ttl: Duration::from_millis(ttl_ms),
                access_count: 0,
                last_accessed_at: now,
            },
        );
        debug!(key = %key, ttl_ms = ttl_ms, "cached result");
    }

    /// Invalidate entries. Three modes:
    ///
    /// - both `category` and `payload` — remove that exact entry;
    /// - only `category` — remove every entry of that category;
    /// - neither — clear the whole cache.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(
        &self,
        category: Option<PredictionCategory>,
        payload: Option<&Value>,
    ) -> usize {
        let removed = match (category, payload) {
            (Some(category), Some(payload)) => {
                let key = fingerprint::cache_key(category, payload);
                usize::from(self.inner.entries.remove(&key).is_some())
            }
            (Some(category), None) => {
                let before = self.inner.entries.len();
                self.inner.entries.retain(|_, entry| entry.category != category);
                before - self.inner.entries.len()
            }
            (None, _) => {
                let before = self.inner.entries.len();
                self.inner.entries.clear();
                before
            }
        };

        debug!(removed = removed, "cache invalidated");
        removed
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        let entry_overhead = std::mem::size_of::<CacheEntry<T>>();
        let approx_bytes: usize = self
            .inner
            .entries
            .iter()
            .map(|e| e.key().len() + entry_overhead)
            .sum();

        CacheStats {
            entries: self.inner.entries.len(),
            hits,
            misses,
            hit_rate,
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            approx_bytes,
        }
    }

    /// Cancel the background sweep task. Idempotent.
    pub fn stop(&self) {
        match self.sweeper.lock() {
            Ok(mut guard) => {
                if let Some(handle) = guard.take() {
                    handle.abort();
                    debug!("cache sweep task stopped");
                }
            }
            Err(e) => warn!(error = %e, "sweeper lock poisoned in stop"),
        }
    }

    fn evict_lru(&self) {
        // Collect the victim key first to release all DashMap read-guards
        // before calling remove (avoids shard deadlock).
        let victim: Option<String> = {
            let mut oldest: Option<(Instant, String)> = None;
            for entry in self.inner.entries.iter() {
                let candidate = (entry.last_accessed_at, entry.key().clone());
                oldest = match oldest {
                    None => Some(candidate),
                    Some(current) => {
                        // Older access wins; equal timestamps fall back to
                        // the smaller key so eviction is deterministic.
                        if candidate < current {
                            Some(candidate)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
            oldest.map(|(_, key)| key)
        };

        if let Some(key) = victim {
            self.inner.entries.remove(&key);
            self.inner.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::inc_cache_eviction();
            debug!(key = %key, "evicted least-recently-used entry");
        }
    }
}

/// Delete every entry whose TTL has elapsed. Sweep removals are not
/// evictions and count no misses.
fn sweep<T>(inner: &CacheInner<T>) {
    let before = inner.entries.len();
    inner
        .entries
        .retain(|_, entry| entry.created_at.elapsed() <= entry.ttl);
    let removed = before - inner.entries.len();
    if removed > 0 {
        debug!(removed = removed, "sweep removed expired entries");
    }
}
