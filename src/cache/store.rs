//! The fingerprint cache.
//!
//! Entries live in a sharded [`DashMap`], so lookups and inserts for
//! different fingerprints do not contend. Recency is tracked with a
//! monotonic tick rather than wall-clock time, which keeps LRU order exact
//! even when several accesses land within the same clock resolution.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::fingerprint::Fingerprint;
use super::persist;
use crate::telemetry;
use crate::{FormulaError, Result};

/// Configuration for the fingerprint cache.
///
/// ```rust
/// # use formulaspark::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .capacity(500)
///     .ttl(Duration::from_secs(24 * 3600));
/// assert!(config.path.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries. Default: 1,000.
    pub capacity: usize,
    /// Maximum entry age, measured from the last insert. Default: 7 days.
    pub ttl: Duration,
    /// Cache file. `None` keeps the cache in memory only.
    pub path: Option<PathBuf>,
    /// How often the autosave task checks for unsaved changes. Default: 2s.
    pub autosave_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ttl: Duration::from_secs(7 * 24 * 3600),
            path: None,
            autosave_interval: Duration::from_secs(2),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries.
    pub fn capacity(mut self, n: usize) -> Self {
        self.capacity = n;
        self
    }

    /// Set the maximum entry age.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Persist the cache to this file.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the autosave check interval.
    pub fn autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }
}

/// A cached formula.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub formula: String,
    pub created_at: DateTime<Utc>,
    pub hit_count: u64,
}

/// Counters since the cache was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct Slot {
    formula: String,
    created_at: DateTime<Utc>,
    hit_count: u64,
    last_access: u64,
}

impl Slot {
    fn to_entry(&self, fingerprint: &Fingerprint) -> CacheEntry {
        CacheEntry {
            fingerprint: fingerprint.clone(),
            formula: self.formula.clone(),
            created_at: self.created_at,
            hit_count: self.hit_count,
        }
    }
}

/// Content-addressed store of previously generated formulas.
///
/// Constructed explicitly and handed to the
/// [`RequestCoordinator`](crate::RequestCoordinator); the owner is
/// responsible for calling [`close()`](Self::close) so pending changes
/// reach disk.
pub struct FingerprintCache {
    entries: DashMap<Fingerprint, Slot>,
    config: CacheConfig,
    clock: AtomicU64,
    dirty: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    evict_lock: Mutex<()>,
    save_lock: Mutex<()>,
    autosave: Mutex<Option<JoinHandle<()>>>,
}

impl FingerprintCache {
    /// Create an empty cache without reading the cache file.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            evict_lock: Mutex::new(()),
            save_lock: Mutex::new(()),
            autosave: Mutex::new(None),
        }
    }

    /// Create a cache and load the configured cache file, if any.
    ///
    /// A missing or corrupt file yields an empty cache. Expired entries and
    /// entries beyond capacity are evicted right away.
    pub fn open(config: CacheConfig) -> Self {
        let cache = Self::new(config);
        if let Some(path) = cache.config.path.clone() {
            let mut loaded = persist::load_entries(&path);
            // Oldest first, so insertion ticks approximate recency.
            loaded.sort_by_key(|e| e.created_at);
            let count = loaded.len();
            for entry in loaded {
                cache.restore(entry);
            }
            let evicted = cache.evict();
            info!(
                path = %path.display(),
                loaded = count,
                evicted,
                "loaded formula cache"
            );
        }
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.config.ttl) {
            Ok(ttl) => now.signed_duration_since(created_at) > ttl,
            // TTL beyond chrono's range never expires.
            Err(_) => false,
        }
    }

    /// Look up a formula, counting the hit and refreshing recency.
    ///
    /// Expired entries are removed and reported as a miss.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let now = Utc::now();
        let expired = match self.entries.get_mut(fingerprint) {
            Some(mut slot) if !self.is_expired(slot.created_at, now) => {
                slot.hit_count += 1;
                slot.last_access = self.tick();
                let entry = slot.to_entry(fingerprint);
                drop(slot);
                self.dirty.store(true, Ordering::Release);
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                debug!(fingerprint = fingerprint.short(), hits = entry.hit_count, "cache hit");
                return Some(entry);
            }
            Some(_) => true,
            None => false,
        };

        if expired
            && self
                .entries
                .remove_if(fingerprint, |_, slot| self.is_expired(slot.created_at, now))
                .is_some()
        {
            self.record_eviction("expired", 1);
            self.dirty.store(true, Ordering::Release);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        None
    }

    /// Look up without counting a hit or touching recency.
    ///
    /// Expired entries are not returned, but are left for [`evict()`](Self::evict).
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let now = Utc::now();
        self.entries
            .get(fingerprint)
            .filter(|slot| !self.is_expired(slot.created_at, now))
            .map(|slot| slot.to_entry(fingerprint))
    }

    /// Insert or refresh a formula, then run eviction.
    ///
    /// A refresh replaces the formula and resets `created_at` but keeps the
    /// hit count. Empty formulas are rejected.
    pub fn put(&self, fingerprint: Fingerprint, formula: impl Into<String>) -> Result<()> {
        let formula = formula.into();
        if formula.trim().is_empty() {
            return Err(FormulaError::InvalidInput(
                "refusing to cache an empty formula".into(),
            ));
        }

        let now = Utc::now();
        let tick = self.tick();
        self.entries
            .entry(fingerprint)
            .and_modify(|slot| {
                slot.formula.clone_from(&formula);
                slot.created_at = now;
                slot.last_access = tick;
            })
            .or_insert_with(|| Slot {
                formula: formula.clone(),
                created_at: now,
                hit_count: 0,
                last_access: tick,
            });
        self.dirty.store(true, Ordering::Release);
        self.evict();
        Ok(())
    }

    /// Reinsert a persisted entry as-is.
    pub(crate) fn restore(&self, entry: CacheEntry) {
        if entry.formula.trim().is_empty() {
            return;
        }
        let tick = self.tick();
        self.entries.insert(
            entry.fingerprint,
            Slot {
                formula: entry.formula,
                created_at: entry.created_at,
                hit_count: entry.hit_count,
                last_access: tick,
            },
        );
    }

    /// Remove expired entries, then least-recently-accessed entries until the
    /// cache is within capacity. Returns the number of entries removed.
    pub fn evict(&self) -> usize {
        let _guard = self
            .evict_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Utc::now();

        let before = self.entries.len();
        self.entries
            .retain(|_, slot| !self.is_expired(slot.created_at, now));
        let expired = before.saturating_sub(self.entries.len());
        if expired > 0 {
            self.record_eviction("expired", expired);
        }

        let mut over = self.entries.len().saturating_sub(self.config.capacity);
        let mut evicted = 0;
        if over > 0 {
            let mut by_recency: Vec<(u64, Fingerprint)> = self
                .entries
                .iter()
                .map(|e| (e.value().last_access, e.key().clone()))
                .collect();
            by_recency.sort_unstable_by_key(|(tick, _)| *tick);
            for (tick, fingerprint) in by_recency {
                if over == 0 {
                    break;
                }
                // Skip entries touched since the snapshot.
                if self
                    .entries
                    .remove_if(&fingerprint, |_, slot| slot.last_access == tick)
                    .is_some()
                {
                    debug!(fingerprint = fingerprint.short(), "evicted least recently used");
                    over -= 1;
                    evicted += 1;
                }
            }
            if evicted > 0 {
                self.record_eviction("capacity", evicted);
            }
        }

        let total = expired + evicted;
        if total > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        total
    }

    fn record_eviction(&self, reason: &'static str, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "reason" => reason)
            .increment(count as u64);
    }

    /// Remove a single entry.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let removed = self
            .entries
            .remove(fingerprint)
            .map(|(fp, slot)| slot.to_entry(&fp));
        if removed.is_some() {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
        self.dirty.store(true, Ordering::Release);
    }

    /// Number of entries currently in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// All entries, most recently accessed first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut snapshot: Vec<(u64, CacheEntry)> = self
            .entries
            .iter()
            .map(|e| (e.value().last_access, e.value().to_entry(e.key())))
            .collect();
        snapshot.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        snapshot.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Whether there are changes not yet written to disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the cache file if there are unsaved changes.
    ///
    /// A no-op for in-memory caches. On failure the cache stays dirty, so
    /// the next flush tries again.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = self.config.path.as_deref() else {
            return Ok(());
        };
        let _guard = self
            .save_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let snapshot = self.entries();
        if let Err(e) = persist::save_entries(path, &snapshot) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!(path = %path.display(), entries = snapshot.len(), "saved formula cache");
        Ok(())
    }

    /// Start the debounced autosave task.
    ///
    /// Every `autosave_interval` the task writes the cache file if anything
    /// changed. The task holds a weak reference and ends on its own once the
    /// cache is dropped. Calling this again replaces the running task.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn start_autosave(self: &Arc<Self>) {
        if self.config.path.is_none() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.autosave_interval.max(Duration::from_millis(10));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                if !cache.is_dirty() {
                    continue;
                }
                let result = tokio::task::spawn_blocking(move || cache.flush()).await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "autosave failed, cache continues in memory"),
                    Err(e) => warn!(error = %e, "autosave task panicked"),
                }
            }
        });
        let mut slot = self
            .autosave
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop autosave and flush pending changes.
    pub fn close(&self) -> Result<()> {
        let handle = self
            .autosave
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.flush()
    }
}

impl Drop for FingerprintCache {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.autosave.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}
