//! Single-flight response cache with stale-while-revalidate.
//!
//! # Fetch coordination
//!
//! Every key has one `Slot` holding the stored entry (if any) and the
//! computation in flight (if any). The slot is only touched under its
//! `DashMap` shard lock, and that lock is never held across an `.await`:
//!
//! 1. Classify the entry under the lock (fresh / servable stale / expired).
//! 2. If a computation is needed and none is in flight, spawn one and park
//!    its shared result handle in the slot.
//! 3. Release the lock, then await the shared handle (miss) or return the
//!    stale value at once (stale-while-revalidate).
//!
//! The computation runs in its own task, so a caller that times out or is
//! dropped does not cancel it; the value still lands in the cache for the
//! next caller. On completion the task re-takes the shard lock and installs
//! the value only if its fetch id still owns the slot, so an invalidation
//! during the fetch is never undone.

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::stats::{CacheCounters, CacheStats};
use crate::cache::types::{CacheEntry, CacheStatus, EntryPolicy, EntryState, FetchOptions, Freshness};
use crate::error::{BoxError, CacheError};
use crate::observability::metrics;
use crate::timing::SharedClock;

type SharedResult<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

struct InFlight<V> {
    id: u64,
    result: SharedResult<V>,
}

struct Slot<V> {
    entry: Option<CacheEntry<V>>,
    inflight: Option<InFlight<V>>,
}

impl<V> Slot<V> {
    fn empty() -> Self {
        Self {
            entry: None,
            inflight: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    Miss,
    Revalidate,
}

enum Lookup<V> {
    Hit(V),
    Stale(V),
    Wait(SharedResult<V>),
}

struct Inner<V> {
    slots: DashMap<String, Slot<V>>,
    clock: SharedClock,
    counters: CacheCounters,
    next_fetch_id: AtomicU64,
    max_entries: Option<usize>,
}

/// In-memory memoization of computed values, keyed by namespaced strings.
///
/// Cloning is cheap; all clones share the same store.
pub struct ResponseCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for ResponseCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(clock: SharedClock) -> Self {
        Self::with_max_entries(clock, None)
    }

    /// A cache that evicts the least recently stored idle entries beyond `max_entries`.
    pub fn with_max_entries(clock: SharedClock, max_entries: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                clock,
                counters: CacheCounters::default(),
                next_fetch_id: AtomicU64::new(1),
                max_entries,
            }),
        }
    }

    /// Return the cached value for `key`, computing it with `fetch` if needed.
    ///
    /// # Errors
    ///
    /// On a miss, the error returned by `fetch` (as [`CacheError::Upstream`]),
    /// [`CacheError::Timeout`] if `options.timeout` elapses first, or
    /// [`CacheError::TaskFailed`] if the computation panicked. Failures of a
    /// background revalidation are logged, never returned.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, options: &FetchOptions, fetch: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.get_or_fetch_with_status(key, options, fetch)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`ResponseCache::get_or_fetch`], also reporting how the call was answered.
    pub async fn get_or_fetch_with_status<F, Fut, E>(
        &self,
        key: &str,
        options: &FetchOptions,
        fetch: F,
    ) -> Result<(V, CacheStatus), CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        match self.lookup(key, options, fetch) {
            Lookup::Hit(value) => {
                CacheCounters::bump(&self.inner.counters.hits);
                metrics::record_cache_lookup(CacheStatus::Hit);
                Ok((value, CacheStatus::Hit))
            }
            Lookup::Stale(value) => {
                CacheCounters::bump(&self.inner.counters.stale_hits);
                metrics::record_cache_lookup(CacheStatus::Stale);
                Ok((value, CacheStatus::Stale))
            }
            Lookup::Wait(pending) => {
                CacheCounters::bump(&self.inner.counters.misses);
                metrics::record_cache_lookup(CacheStatus::Miss);

                let result = match options.timeout {
                    Some(limit) => match tokio::time::timeout(limit, pending).await {
                        Ok(result) => result,
                        Err(_) => {
                            tracing::warn!(key, timeout_ms = limit.as_millis() as u64, "Gave up waiting for cache fetch");
                            Err(CacheError::Timeout(limit))
                        }
                    },
                    None => pending.await,
                };
                result.map(|value| (value, CacheStatus::Miss))
            }
        }
    }

    /// Decide how to answer under the shard lock. Never awaits.
    fn lookup<F, Fut, E>(&self, key: &str, options: &FetchOptions, fetch: F) -> Lookup<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let now = self.inner.clock.now_ms();
        let policy = options.policy();

        // Read-locked fast path for fresh hits.
        if let Some(slot) = self.inner.slots.get(key) {
            if let Some(entry) = &slot.entry {
                if policy.classify(entry.age_ms(now)) == Freshness::Fresh {
                    return Lookup::Hit(entry.value.clone());
                }
            }
        }

        let mut slot = self.inner.slots.entry(key.to_owned()).or_insert_with(Slot::empty);

        let servable = slot.entry.as_ref().and_then(|entry| match policy.classify(entry.age_ms(now)) {
            Freshness::Expired => None,
            freshness => Some((freshness, entry.value.clone())),
        });

        match servable {
            Some((Freshness::Fresh, value)) => Lookup::Hit(value),
            Some((_, value)) => {
                if slot.inflight.is_none() {
                    tracing::debug!(key, "Serving stale entry, starting background revalidation");
                    slot.inflight = Some(self.spawn_fetch(key, policy, fetch, FetchMode::Revalidate));
                }
                Lookup::Stale(value)
            }
            None => {
                if let Some(inflight) = &slot.inflight {
                    return Lookup::Wait(inflight.result.clone());
                }
                let inflight = self.spawn_fetch(key, policy, fetch, FetchMode::Miss);
                let pending = inflight.result.clone();
                slot.inflight = Some(inflight);
                Lookup::Wait(pending)
            }
        }
    }

    fn spawn_fetch<F, Fut, E>(&self, key: &str, policy: EntryPolicy, fetch: F, mode: FetchMode) -> InFlight<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let key = key.to_owned();

        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { fetch().await }).catch_unwind().await;
            let result = match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(CacheError::upstream(e)),
                Err(_) => Err(CacheError::TaskFailed("fetch panicked".to_string())),
            };
            inner.complete(&key, id, &result, policy, mode);
            result
        });

        let result = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(CacheError::TaskFailed(e.to_string())))
        }
        .boxed()
        .shared();

        InFlight { id, result }
    }

    /// Store `value` directly, bypassing any computation.
    pub fn insert(&self, key: impl Into<String>, value: V, options: &FetchOptions) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            stored_at_ms: self.inner.clock.now_ms(),
            policy: options.policy(),
        };
        self.inner
            .slots
            .entry(key.clone())
            .or_insert_with(Slot::empty)
            .entry = Some(entry);

        CacheCounters::bump(&self.inner.counters.sets);
        self.inner.enforce_capacity(&key);
    }

    /// Stored value regardless of freshness.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.inner
            .slots
            .get(key)
            .and_then(|slot| slot.entry.as_ref().map(|e| e.value.clone()))
    }

    /// Lifecycle state under the policy the entry was stored with.
    pub fn state(&self, key: &str) -> Option<EntryState> {
        let now = self.inner.clock.now_ms();
        let slot = self.inner.slots.get(key)?;
        let entry = slot.entry.as_ref()?;

        if slot.inflight.is_some() {
            return Some(EntryState::Revalidating);
        }
        match entry.policy.classify(entry.age_ms(now)) {
            Freshness::Fresh => Some(EntryState::Fresh),
            _ => Some(EntryState::Stale),
        }
    }

    /// Drop the entry for `key`. Returns whether a value was stored.
    pub fn invalidate(&self, key: &str) -> bool {
        let had_value = self
            .inner
            .slots
            .remove(key)
            .is_some_and(|(_, slot)| slot.entry.is_some());
        if had_value {
            CacheCounters::bump(&self.inner.counters.deletes);
        }
        had_value
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many values were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        self.inner.slots.retain(|key, slot| {
            let keep = !key.starts_with(prefix);
            if !keep && slot.entry.is_some() {
                removed += 1;
            }
            keep
        });
        CacheCounters::add(&self.inner.counters.deletes, removed as u64);
        removed
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| slot.value().entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot(self.len())
    }

    pub fn reset_stats(&self) {
        self.inner.counters.reset();
    }
}

impl<V> Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Install the outcome of fetch `fetch_id`, if it still owns the slot.
    fn complete(&self, key: &str, fetch_id: u64, result: &Result<V, CacheError>, policy: EntryPolicy, mode: FetchMode) {
        let now = self.clock.now_ms();
        let mut owned = false;
        let mut orphaned = false;

        if let Some(mut slot) = self.slots.get_mut(key) {
            if slot.inflight.as_ref().is_some_and(|f| f.id == fetch_id) {
                owned = true;
                slot.inflight = None;
                if let Ok(value) = result {
                    slot.entry = Some(CacheEntry {
                        value: value.clone(),
                        stored_at_ms: now,
                        policy,
                    });
                }
                orphaned = slot.entry.is_none();
            }
        }

        if orphaned {
            self.slots
                .remove_if(key, |_, slot| slot.entry.is_none() && slot.inflight.is_none());
        }

        match (result, mode) {
            (Ok(_), _) if owned => {
                CacheCounters::bump(&self.counters.sets);
                tracing::debug!(key, ?mode, "Cache entry stored");
                self.enforce_capacity(key);
            }
            (Ok(_), _) => {
                tracing::debug!(key, "Discarding fetch result for invalidated cache entry");
            }
            (Err(e), FetchMode::Revalidate) => {
                CacheCounters::bump(&self.counters.revalidation_failures);
                metrics::record_revalidation_failure();
                tracing::warn!(key, error = %e, "Background revalidation failed, keeping stale entry");
            }
            (Err(e), FetchMode::Miss) => {
                tracing::debug!(key, error = %e, "Cache fetch failed, nothing stored");
            }
        }
    }

    /// Evict the oldest idle entries beyond `max_entries`, sparing `keep`.
    fn enforce_capacity(&self, keep: &str) {
        let Some(max) = self.max_entries else {
            return;
        };
        let len = self.slots.len();
        if len <= max {
            return;
        }

        let mut candidates: Vec<(String, u64)> = self
            .slots
            .iter()
            .filter(|slot| slot.key() != keep && slot.value().inflight.is_none())
            .filter_map(|slot| {
                slot.value()
                    .entry
                    .as_ref()
                    .map(|e| (slot.key().clone(), e.stored_at_ms))
            })
            .collect();
        candidates.sort_by_key(|(_, stored_at)| *stored_at);

        let mut evicted = 0u64;
        for (key, _) in candidates.into_iter().take(len - max) {
            if self
                .slots
                .remove_if(&key, |_, slot| slot.inflight.is_none())
                .is_some()
            {
                evicted += 1;
            }
        }
        if evicted > 0 {
            CacheCounters::add(&self.counters.evictions, evicted);
            tracing::debug!(evicted, max_entries = max, "Evicted cache entries over capacity");
        }
    }
}
