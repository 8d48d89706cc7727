//! Result cache with single-flight computation.
//!
//! Results are keyed by a task fingerprint (SHA-256 over role name, step name
//! and rendered prompt). Only successful results are stored. Entries expire
//! after their TTL and the table is bounded: inserting into a full cache
//! evicts the least recently used entry.
//!
//! [`ResultCache::get_or_compute`] guarantees at most one in-flight
//! computation per fingerprint. The first caller (the leader) registers a
//! shared future; concurrent callers await that same future. The leader
//! inserts its result into the table before it deregisters the in-flight
//! future, and both the deregistration and the followers' registration check
//! happen under the same lock, so a caller always observes one or the other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use maestro_types::agent::{AgentResult, RunnerError};
use maestro_types::config::CacheConfig;
use maestro_types::task::Task;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

type SharedOutcome = Shared<BoxFuture<'static, Result<AgentResult, RunnerError>>>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CacheEntry {
    step_name: String,
    result: AgentResult,
    expires_at: Option<Instant>,
    last_access: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Counters exposed by [`ResultCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined another caller's in-flight computation.
    pub joins: u64,
}

/// How a [`ResultCache::get_or_compute`] call was served.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub outcome: Result<AgentResult, RunnerError>,
    /// Served from a stored entry.
    pub from_cache: bool,
    /// Served by awaiting another caller's computation.
    pub joined: bool,
}

// ---------------------------------------------------------------------------
// ResultCache
// ---------------------------------------------------------------------------

pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    in_flight: Mutex<HashMap<String, SharedOutcome>>,
    default_ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: Mutex::new(HashMap::new()),
            default_ttl: Duration::from_millis(config.default_ttl_ms),
            max_entries: config.max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            joins: AtomicU64::new(0),
        }
    }

    /// Stable fingerprint of a task and its rendered prompt.
    pub fn fingerprint(role: &str, step_name: &str, prompt: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [role, step_name, prompt] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Fingerprint for a task.
    pub fn task_fingerprint(task: &Task, prompt: &str) -> String {
        Self::fingerprint(&task.role.name, &task.step_name, prompt)
    }

    /// Cached result for `fingerprint`, if present and not expired.
    pub fn get(&self, fingerprint: &str) -> Option<AgentResult> {
        let found = self.fresh(fingerprint);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store a result. Failed results are ignored.
    pub fn set(
        &self,
        fingerprint: &str,
        step_name: &str,
        result: &AgentResult,
        ttl: Option<Duration>,
    ) {
        if !result.success {
            return;
        }
        let now = Instant::now();
        if !self.entries.contains_key(fingerprint) && self.entries.len() >= self.max_entries {
            self.evict(now);
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                step_name: step_name.to_string(),
                result: result.clone(),
                expires_at: now.checked_add(ttl),
                last_access: now,
            },
        );
    }

    /// Return the cached result or run `compute`, sharing one computation
    /// among concurrent callers with the same fingerprint.
    ///
    /// `compute` is only polled by the leader; followers drop theirs.
    pub async fn get_or_compute<F>(
        &self,
        fingerprint: &str,
        step_name: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> CacheLookup
    where
        F: Future<Output = Result<AgentResult, RunnerError>> + Send + 'static,
    {
        if let Some(hit) = self.fresh(fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return CacheLookup {
                outcome: Ok(hit),
                from_cache: true,
                joined: false,
            };
        }

        let (shared, leader) = {
            let mut in_flight = self.lock_in_flight();
            if let Some(existing) = in_flight.get(fingerprint) {
                self.joins.fetch_add(1, Ordering::Relaxed);
                (existing.clone(), false)
            } else if let Some(hit) = self.fresh(fingerprint) {
                // A leader finished between the first lookup and the lock.
                self.hits.fetch_add(1, Ordering::Relaxed);
                return CacheLookup {
                    outcome: Ok(hit),
                    from_cache: true,
                    joined: false,
                };
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let shared = compute.boxed().shared();
                in_flight.insert(fingerprint.to_string(), shared.clone());
                (shared, true)
            }
        };

        if !leader {
            tracing::debug!(step = step_name, "joined in-flight computation");
            return CacheLookup {
                outcome: shared.await,
                from_cache: false,
                joined: true,
            };
        }

        let guard = InFlightGuard {
            cache: self,
            fingerprint,
        };
        let outcome = shared.await;
        if let Ok(result) = &outcome {
            self.set(fingerprint, step_name, result, ttl);
        }
        drop(guard);

        CacheLookup {
            outcome,
            from_cache: false,
            joined: false,
        }
    }

    /// Drop every entry recorded for `step_name`. Returns how many were removed.
    pub fn invalidate(&self, step_name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.step_name != step_name);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Lookup without touching the counters. Refreshes LRU order on a hit and
    /// drops the entry if it has expired.
    fn fresh(&self, fingerprint: &str) -> Option<AgentResult> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(fingerprint) {
            if !entry.is_expired(now) {
                entry.last_access = now;
                return Some(entry.result.clone());
            }
        }
        self.entries.remove_if(fingerprint, |_, e| e.is_expired(now));
        None
    }

    /// Make room for one entry: expired entries first, then the least
    /// recently used one.
    fn evict(&self, now: Instant) {
        self.entries.retain(|_, e| !e.is_expired(now));
        if self.entries.len() < self.max_entries {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().last_access)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            tracing::debug!(fingerprint = %key, "evicted least recently used cache entry");
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, SharedOutcome>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

/// Deregisters the leader's in-flight future, including when the leader is
/// dropped mid-computation. Followers keep driving the shared future.
struct InFlightGuard<'a> {
    cache: &'a ResultCache,
    fingerprint: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.lock_in_flight().remove(self.fingerprint);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
